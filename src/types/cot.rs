//! IEC 60870-5-104 Cause of Transmission (COT).
//!
//! The cause of transmission defines the reason for sending an ASDU. It
//! occupies the lower 6 bits of the COT byte; bit 6 is the P/N flag and
//! bit 7 the test flag (both handled by `AsduHeader`).

use crate::error::{Iec104Error, Result};

/// Cause of Transmission (COT).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cot {
    /// Periodic, cyclic (1)
    Periodic,
    /// Background scan (2)
    Background,
    /// Spontaneous (3)
    Spontaneous,
    /// Initialized (4)
    Initialized,
    /// Request or requested (5)
    Request,
    /// Activation (6)
    Activation,
    /// Activation confirmation (7)
    ActivationConfirm,
    /// Deactivation (8)
    Deactivation,
    /// Deactivation confirmation (9)
    DeactivationConfirm,
    /// Activation termination (10)
    ActivationTermination,
    /// Return information caused by a remote command (11)
    ReturnRemoteCommand,
    /// Return information caused by a local command (12)
    ReturnLocalCommand,
    /// File transfer (13)
    FileTransfer,
    /// Interrogated by station interrogation (20)
    InterrogatedByStation,
    /// Interrogated by group 1..=16 (21-36)
    InterrogatedByGroup(u8),
    /// Requested by general counter request (37)
    RequestedByGeneralCounter,
    /// Requested by counter group 1..=4 (38-41)
    RequestedByCounterGroup(u8),
    /// Unknown type identification (44)
    UnknownTypeId,
    /// Unknown cause of transmission (45)
    UnknownCot,
    /// Unknown common address of ASDU (46)
    UnknownCommonAddress,
    /// Unknown information object address (47)
    UnknownIoa,
}

impl Cot {
    /// Create COT from raw byte value (lower 6 bits).
    pub fn from_u8(value: u8) -> Result<Self> {
        let cot = match value & 0x3F {
            1 => Self::Periodic,
            2 => Self::Background,
            3 => Self::Spontaneous,
            4 => Self::Initialized,
            5 => Self::Request,
            6 => Self::Activation,
            7 => Self::ActivationConfirm,
            8 => Self::Deactivation,
            9 => Self::DeactivationConfirm,
            10 => Self::ActivationTermination,
            11 => Self::ReturnRemoteCommand,
            12 => Self::ReturnLocalCommand,
            13 => Self::FileTransfer,
            20 => Self::InterrogatedByStation,
            n @ 21..=36 => Self::InterrogatedByGroup(n - 20),
            37 => Self::RequestedByGeneralCounter,
            n @ 38..=41 => Self::RequestedByCounterGroup(n - 37),
            44 => Self::UnknownTypeId,
            45 => Self::UnknownCot,
            46 => Self::UnknownCommonAddress,
            47 => Self::UnknownIoa,
            other => return Err(Iec104Error::UnknownCot(other)),
        };
        Ok(cot)
    }

    /// Convert to raw 6-bit value.
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Periodic => 1,
            Self::Background => 2,
            Self::Spontaneous => 3,
            Self::Initialized => 4,
            Self::Request => 5,
            Self::Activation => 6,
            Self::ActivationConfirm => 7,
            Self::Deactivation => 8,
            Self::DeactivationConfirm => 9,
            Self::ActivationTermination => 10,
            Self::ReturnRemoteCommand => 11,
            Self::ReturnLocalCommand => 12,
            Self::FileTransfer => 13,
            Self::InterrogatedByStation => 20,
            Self::InterrogatedByGroup(group) => 20 + group,
            Self::RequestedByGeneralCounter => 37,
            Self::RequestedByCounterGroup(group) => 37 + group,
            Self::UnknownTypeId => 44,
            Self::UnknownCot => 45,
            Self::UnknownCommonAddress => 46,
            Self::UnknownIoa => 47,
        }
    }

    /// Confirmation or termination of a previously activated command.
    #[inline]
    pub const fn is_confirmation(&self) -> bool {
        matches!(
            self,
            Self::ActivationConfirm | Self::DeactivationConfirm | Self::ActivationTermination
        )
    }

    /// Remote rejected the ASDU as unknown (type, cause, address or IOA).
    #[inline]
    pub const fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::UnknownTypeId | Self::UnknownCot | Self::UnknownCommonAddress | Self::UnknownIoa
        )
    }

    /// Data sent in response to an interrogation.
    #[inline]
    pub const fn is_interrogation_response(&self) -> bool {
        matches!(
            self,
            Self::InterrogatedByStation
                | Self::InterrogatedByGroup(_)
                | Self::RequestedByGeneralCounter
                | Self::RequestedByCounterGroup(_)
        )
    }
}

impl std::fmt::Display for Cot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cot_roundtrip() {
        for raw in (1..=13).chain(20..=41).chain(44..=47) {
            let cot = Cot::from_u8(raw).unwrap();
            assert_eq!(cot.as_u8(), raw);
        }
    }

    #[test]
    fn test_cot_ignores_flag_bits() {
        assert_eq!(Cot::from_u8(0x80 | 0x40 | 7).unwrap(), Cot::ActivationConfirm);
    }

    #[test]
    fn test_cot_groups() {
        assert_eq!(Cot::from_u8(21).unwrap(), Cot::InterrogatedByGroup(1));
        assert_eq!(Cot::from_u8(36).unwrap(), Cot::InterrogatedByGroup(16));
        assert_eq!(Cot::from_u8(41).unwrap(), Cot::RequestedByCounterGroup(4));
        assert!(Cot::from_u8(20).unwrap().is_interrogation_response());
    }

    #[test]
    fn test_cot_unknown() {
        for raw in [0, 14, 19, 42, 43, 48, 63] {
            assert!(matches!(Cot::from_u8(raw), Err(Iec104Error::UnknownCot(v)) if v == raw));
        }
    }

    #[test]
    fn test_cot_classes() {
        assert!(Cot::ActivationConfirm.is_confirmation());
        assert!(Cot::ActivationTermination.is_confirmation());
        assert!(!Cot::Spontaneous.is_confirmation());
        assert!(Cot::UnknownIoa.is_rejection());
    }
}
