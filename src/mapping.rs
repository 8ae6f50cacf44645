//! Tag type and tag address mapping.
//!
//! A host names a point by an address string (`ioa[:qualifier[:select]]`)
//! and a type string. The type string is any alias in the table below
//! (short code, protocol mnemonic or human name, case-insensitive); it
//! resolves to one [`DataType`], which in turn maps one-to-one onto a
//! protocol [`TypeId`].

use std::str::FromStr;

use crate::error::{Iec104Error, Result};
use crate::types::{Ioa, TimeTag, TypeId};

/// Declares `DataType`, its bijection with `TypeId` and the alias table.
macro_rules! data_types {
    ($( $(#[$doc:meta])* $variant:ident => $type_id:ident [$($alias:literal),* $(,)?] ),+ $(,)?) => {
        /// Host-facing data type classification.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum DataType {
            $( $(#[$doc])* $variant, )+
        }

        impl DataType {
            /// Every data type, in protocol order.
            pub const ALL: &'static [DataType] = &[ $( Self::$variant ),+ ];

            /// Protocol type identifier carrying this data type.
            pub const fn type_id(&self) -> TypeId {
                match self {
                    $( Self::$variant => TypeId::$type_id, )+
                }
            }

            /// Data type carried by a protocol type identifier.
            ///
            /// Returns `None` for system types (interrogation, clock sync, ...).
            pub const fn from_type_id(type_id: TypeId) -> Option<Self> {
                match type_id {
                    $( TypeId::$type_id => Some(Self::$variant), )+
                    _ => None,
                }
            }

            /// Extra aliases besides the variant name and protocol mnemonic.
            const fn aliases(&self) -> &'static [&'static str] {
                match self {
                    $( Self::$variant => &[$($alias),*], )+
                }
            }

            /// Variant name, e.g. "MeasuredFloat".
            pub const fn name(&self) -> &'static str {
                match self {
                    $( Self::$variant => stringify!($variant), )+
                }
            }
        }
    };
}

data_types! {
    /// Single-point information
    SinglePoint => SinglePoint ["SP", "Binary", "Bool", "Boolean", "DI"],
    /// Single-point with CP24Time2a
    SinglePointTime24 => SinglePointTime24 ["SP_TA"],
    /// Single-point with CP56Time2a
    SinglePointTime56 => SinglePointTime56 ["SP_TB", "BinaryTime"],
    /// Double-point information
    DoublePoint => DoublePoint ["DP", "Double", "DoubleBinary"],
    /// Double-point with CP24Time2a
    DoublePointTime24 => DoublePointTime24 ["DP_TA"],
    /// Double-point with CP56Time2a
    DoublePointTime56 => DoublePointTime56 ["DP_TB", "DoubleTime"],
    /// Step position information
    StepPosition => StepPosition ["ST", "Step", "TapPosition"],
    /// Step position with CP24Time2a
    StepPositionTime24 => StepPositionTime24 ["ST_TA"],
    /// Step position with CP56Time2a
    StepPositionTime56 => StepPositionTime56 ["ST_TB"],
    /// Bitstring of 32 bit
    Bitstring32 => Bitstring32 ["BO", "Bitstring", "DWord"],
    /// Bitstring with CP24Time2a
    Bitstring32Time24 => Bitstring32Time24 ["BO_TA"],
    /// Bitstring with CP56Time2a
    Bitstring32Time56 => Bitstring32Time56 ["BO_TB"],
    /// Measured value, normalized
    MeasuredNormalized => MeasuredNormalized ["ME_NA", "Normalized", "NVA"],
    /// Normalized with CP24Time2a
    MeasuredNormalizedTime24 => MeasuredNormalizedTime24 ["ME_TA"],
    /// Normalized with CP56Time2a
    MeasuredNormalizedTime56 => MeasuredNormalizedTime56 ["ME_TD"],
    /// Measured value, scaled
    MeasuredScaled => MeasuredScaled ["ME_NB", "Scaled", "SVA", "Int16"],
    /// Scaled with CP24Time2a
    MeasuredScaledTime24 => MeasuredScaledTime24 ["ME_TB"],
    /// Scaled with CP56Time2a
    MeasuredScaledTime56 => MeasuredScaledTime56 ["ME_TE"],
    /// Measured value, short floating point
    MeasuredFloat => MeasuredFloat ["ME_NC", "Float", "Float32", "Real", "Analog", "AI"],
    /// Float with CP24Time2a
    MeasuredFloatTime24 => MeasuredFloatTime24 ["ME_TC"],
    /// Float with CP56Time2a
    MeasuredFloatTime56 => MeasuredFloatTime56 ["ME_TF", "FloatTime"],
    /// Integrated totals
    IntegratedTotals => IntegratedTotals ["IT", "Counter", "BCR", "Totals"],
    /// Integrated totals with CP24Time2a
    IntegratedTotalsTime24 => IntegratedTotalsTime24 ["IT_TA"],
    /// Integrated totals with CP56Time2a
    IntegratedTotalsTime56 => IntegratedTotalsTime56 ["IT_TB", "CounterTime"],
    /// Single command
    SingleCommand => SingleCommand ["SC", "DO", "SingleCmd"],
    /// Double command
    DoubleCommand => DoubleCommand ["DC", "DoubleCmd"],
    /// Regulating step command
    RegulatingStep => RegulatingStep ["RC", "StepCommand"],
    /// Set-point, normalized
    SetpointNormalized => SetpointNormalized ["SE_NA", "SetpointNVA"],
    /// Set-point, scaled
    SetpointScaled => SetpointScaled ["SE_NB", "SetpointSVA"],
    /// Set-point, short floating point
    SetpointFloat => SetpointFloat ["SE_NC", "Setpoint", "AO"],
    /// Bitstring command
    Bitstring32Command => Bitstring32Command ["BO_NA", "BitstringCommand"],
    /// Single command with CP56Time2a
    SingleCommandTime56 => SingleCommandTime56 ["SC_TA"],
    /// Double command with CP56Time2a
    DoubleCommandTime56 => DoubleCommandTime56 ["DC_TA"],
    /// Regulating step with CP56Time2a
    RegulatingStepTime56 => RegulatingStepTime56 ["RC_TA"],
    /// Set-point normalized with CP56Time2a
    SetpointNormalizedTime56 => SetpointNormalizedTime56 ["SE_TA"],
    /// Set-point scaled with CP56Time2a
    SetpointScaledTime56 => SetpointScaledTime56 ["SE_TB"],
    /// Set-point float with CP56Time2a
    SetpointFloatTime56 => SetpointFloatTime56 ["SE_TC"],
    /// Bitstring command with CP56Time2a
    Bitstring32CommandTime56 => Bitstring32CommandTime56 ["BO_TA_CMD"],
}

impl DataType {
    /// Monitoring direction: values arrive from the device.
    #[inline]
    pub const fn is_readable(&self) -> bool {
        self.type_id().is_monitoring()
    }

    /// Control direction: values can be written as commands.
    pub const fn is_writable(&self) -> bool {
        match self.type_id().layout() {
            Some((kind, _)) => kind.is_command(),
            None => false,
        }
    }

    /// Elements of this type carry a time tag.
    pub const fn has_timestamp(&self) -> bool {
        match self.type_id().layout() {
            Some((_, tag)) => !matches!(tag, TimeTag::None),
            None => false,
        }
    }

    fn matches(&self, alias: &str) -> bool {
        self.name().eq_ignore_ascii_case(alias)
            || self.type_id().standard_name().eq_ignore_ascii_case(alias)
            || self.aliases().iter().any(|a| a.eq_ignore_ascii_case(alias))
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolve a host tag type string.
pub fn resolve_tag_type(alias: &str) -> Result<DataType> {
    let alias = alias.trim();
    DataType::ALL
        .iter()
        .copied()
        .find(|data_type| data_type.matches(alias))
        .ok_or_else(|| Iec104Error::InvalidTagType {
            parameter: "tag type",
            value: alias.to_string(),
        })
}

impl FromStr for DataType {
    type Err = Iec104Error;

    fn from_str(s: &str) -> Result<Self> {
        resolve_tag_type(s)
    }
}

/// Parsed tag address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TagAddress {
    /// Information object address (1..=16_777_215)
    pub ioa: u32,
    /// Command qualifier (QU/QL)
    pub qualifier: u8,
    /// Select (S/E) flag
    pub select: bool,
}

impl TagAddress {
    /// Address with default qualifier and execute semantics.
    pub fn new(ioa: u32) -> Result<Self> {
        validate_ioa(ioa)?;
        Ok(Self {
            ioa,
            qualifier: 0,
            select: false,
        })
    }

    /// Parse `ioa[:qualifier[:select]]`.
    ///
    /// Only the IOA can fail; a malformed qualifier or select flag falls
    /// back to its default.
    pub fn parse(text: &str) -> Result<Self> {
        let mut parts = text.trim().split(':').map(str::trim);
        let ioa_text = parts.next().unwrap_or_default();
        let ioa = ioa_text
            .parse::<u32>()
            .map_err(|_| Iec104Error::InvalidAddress(text.to_string()))?;
        let mut address = Self::new(ioa)?;

        if let Some(qualifier) = parts.next() {
            address.qualifier = qualifier.parse().unwrap_or(0);
        }
        if let Some(select) = parts.next() {
            address.select = crate::value::parse_bool(select).unwrap_or(false);
        }
        Ok(address)
    }
}

impl FromStr for TagAddress {
    type Err = Iec104Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for TagAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.ioa, self.qualifier, u8::from(self.select))
    }
}

/// Check an IOA against the addressable range 1..=16_777_215.
pub fn validate_ioa(ioa: u32) -> Result<()> {
    if (1..=Ioa::MAX).contains(&ioa) {
        Ok(())
    } else {
        Err(Iec104Error::InvalidAddress(format!(
            "IOA {ioa} outside 1..={}",
            Ioa::MAX
        )))
    }
}
