//! Quality descriptor codec.
//!
//! Monitored information elements carry one quality byte (QDS, or the upper
//! nibble of SIQ/DIQ):
//!
//! ```text
//!   7    6    5    4    3..0
//! +----+----+----+----+--------+
//! | IV | NT | SB | BL | (low)  |
//! +----+----+----+----+--------+
//! ```
//!
//! The low nibble holds OV (bit 0) for QDS and the point state for SIQ/DIQ.
//! It does not influence classification but is carried unchanged so that
//! `to_byte(from_byte(b)) == b` for every byte.

const IV_MASK: u8 = 0x80;
const NT_MASK: u8 = 0x40;
const SB_MASK: u8 = 0x20;
const BL_MASK: u8 = 0x10;
const LOW_MASK: u8 = 0x0F;
const OV_MASK: u8 = 0x01;

/// Three-level classification of a quality descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QualityLevel {
    /// No flag set
    Good,
    /// Blocked, substituted or not topical
    Uncertain,
    /// Invalid
    Bad,
}

impl QualityLevel {
    /// Host-facing name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Good => "Good",
            Self::Uncertain => "Uncertain",
            Self::Bad => "Bad",
        }
    }

    /// Whether the level is [`QualityLevel::Good`].
    #[inline]
    pub const fn is_good(&self) -> bool {
        matches!(self, Self::Good)
    }
}

impl std::fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded quality flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct QualityFlags {
    /// Invalid (IV)
    pub invalid: bool,
    /// Not topical (NT)
    pub not_topical: bool,
    /// Substituted (SB)
    pub substituted: bool,
    /// Blocked (BL)
    pub blocked: bool,
    reserved: u8,
}

impl QualityFlags {
    /// All flags clear.
    pub const GOOD: Self = Self {
        invalid: false,
        not_topical: false,
        substituted: false,
        blocked: false,
        reserved: 0,
    };

    /// Only the invalid flag set.
    pub const INVALID: Self = Self {
        invalid: true,
        not_topical: false,
        substituted: false,
        blocked: false,
        reserved: 0,
    };

    /// Decode a quality byte.
    #[inline]
    pub const fn from_byte(byte: u8) -> Self {
        Self {
            invalid: byte & IV_MASK != 0,
            not_topical: byte & NT_MASK != 0,
            substituted: byte & SB_MASK != 0,
            blocked: byte & BL_MASK != 0,
            reserved: byte & LOW_MASK,
        }
    }

    /// Decode only the IV/NT/SB/BL bits, dropping the low nibble.
    ///
    /// Used for SIQ/DIQ where the low bits hold the point state.
    #[inline]
    pub const fn from_flag_bits(byte: u8) -> Self {
        Self::from_byte(byte & !LOW_MASK)
    }

    /// Encode back to the wire byte.
    #[inline]
    pub const fn to_byte(&self) -> u8 {
        let mut byte = self.reserved & LOW_MASK;
        if self.invalid {
            byte |= IV_MASK;
        }
        if self.not_topical {
            byte |= NT_MASK;
        }
        if self.substituted {
            byte |= SB_MASK;
        }
        if self.blocked {
            byte |= BL_MASK;
        }
        byte
    }

    /// Overflow bit (QDS bit 0). Does not affect classification.
    #[inline]
    pub const fn overflow(&self) -> bool {
        self.reserved & OV_MASK != 0
    }

    /// Classify: invalid, then blocked, substituted, not topical, else good.
    pub const fn level(&self) -> QualityLevel {
        if self.invalid {
            QualityLevel::Bad
        } else if self.blocked || self.substituted || self.not_topical {
            QualityLevel::Uncertain
        } else {
            QualityLevel::Good
        }
    }

    /// Whether classification yields [`QualityLevel::Good`].
    #[inline]
    pub const fn is_good(&self) -> bool {
        matches!(self.level(), QualityLevel::Good)
    }
}

impl std::fmt::Display for QualityFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.invalid && !self.not_topical && !self.substituted && !self.blocked {
            return f.write_str("Good");
        }

        let mut sep = "";
        for (set, flag) in [
            (self.invalid, "IV"),
            (self.not_topical, "NT"),
            (self.substituted, "SB"),
            (self.blocked, "BL"),
        ] {
            if set {
                write!(f, "{sep}{flag}")?;
                sep = "|";
            }
        }
        Ok(())
    }
}
