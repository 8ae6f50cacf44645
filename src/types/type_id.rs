//! IEC 60870-5-104 Type Identification.
//!
//! Type identification defines the structure and meaning of information objects.
//! [`TypeId::layout`] is the single table that tells the parser and the
//! command builder how each data-carrying type is laid out on the wire.

use crate::error::{Iec104Error, Result};
use crate::types::{ElementKind, TimeTag};

/// Declares the `TypeId` enum together with its numeric and standard names.
macro_rules! type_ids {
    ($( $(#[$doc:meta])* $variant:ident = $value:literal => $name:literal ),+ $(,)?) => {
        /// IEC 60870-5-104 Type Identification.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u8)]
        pub enum TypeId {
            $( $(#[$doc])* $variant = $value, )+
        }

        impl TypeId {
            /// Every supported type identifier, in numeric order.
            pub const ALL: &'static [TypeId] = &[ $( Self::$variant ),+ ];

            /// Create TypeId from raw byte value.
            #[inline]
            pub fn from_u8(value: u8) -> Result<Self> {
                match value {
                    $( $value => Ok(Self::$variant), )+
                    _ => Err(Iec104Error::UnknownTypeId(value)),
                }
            }

            /// Get the IEC standard name (e.g., "M_SP_NA_1").
            #[inline]
            pub const fn standard_name(&self) -> &'static str {
                match self {
                    $( Self::$variant => $name, )+
                }
            }
        }
    };
}

type_ids! {
    // Process information in monitoring direction
    /// Single-point information
    SinglePoint = 1 => "M_SP_NA_1",
    /// Single-point information with CP24Time2a
    SinglePointTime24 = 2 => "M_SP_TA_1",
    /// Double-point information
    DoublePoint = 3 => "M_DP_NA_1",
    /// Double-point information with CP24Time2a
    DoublePointTime24 = 4 => "M_DP_TA_1",
    /// Step position information
    StepPosition = 5 => "M_ST_NA_1",
    /// Step position information with CP24Time2a
    StepPositionTime24 = 6 => "M_ST_TA_1",
    /// Bitstring of 32 bit
    Bitstring32 = 7 => "M_BO_NA_1",
    /// Bitstring of 32 bit with CP24Time2a
    Bitstring32Time24 = 8 => "M_BO_TA_1",
    /// Measured value, normalized
    MeasuredNormalized = 9 => "M_ME_NA_1",
    /// Measured value, normalized with CP24Time2a
    MeasuredNormalizedTime24 = 10 => "M_ME_TA_1",
    /// Measured value, scaled
    MeasuredScaled = 11 => "M_ME_NB_1",
    /// Measured value, scaled with CP24Time2a
    MeasuredScaledTime24 = 12 => "M_ME_TB_1",
    /// Measured value, short floating point
    MeasuredFloat = 13 => "M_ME_NC_1",
    /// Measured value, short floating point with CP24Time2a
    MeasuredFloatTime24 = 14 => "M_ME_TC_1",
    /// Integrated totals
    IntegratedTotals = 15 => "M_IT_NA_1",
    /// Integrated totals with CP24Time2a
    IntegratedTotalsTime24 = 16 => "M_IT_TA_1",
    /// Single-point information with CP56Time2a
    SinglePointTime56 = 30 => "M_SP_TB_1",
    /// Double-point information with CP56Time2a
    DoublePointTime56 = 31 => "M_DP_TB_1",
    /// Step position information with CP56Time2a
    StepPositionTime56 = 32 => "M_ST_TB_1",
    /// Bitstring of 32 bit with CP56Time2a
    Bitstring32Time56 = 33 => "M_BO_TB_1",
    /// Measured value, normalized with CP56Time2a
    MeasuredNormalizedTime56 = 34 => "M_ME_TD_1",
    /// Measured value, scaled with CP56Time2a
    MeasuredScaledTime56 = 35 => "M_ME_TE_1",
    /// Measured value, short floating point with CP56Time2a
    MeasuredFloatTime56 = 36 => "M_ME_TF_1",
    /// Integrated totals with CP56Time2a
    IntegratedTotalsTime56 = 37 => "M_IT_TB_1",

    // Process information in control direction
    /// Single command
    SingleCommand = 45 => "C_SC_NA_1",
    /// Double command
    DoubleCommand = 46 => "C_DC_NA_1",
    /// Regulating step command
    RegulatingStep = 47 => "C_RC_NA_1",
    /// Set-point command, normalized
    SetpointNormalized = 48 => "C_SE_NA_1",
    /// Set-point command, scaled
    SetpointScaled = 49 => "C_SE_NB_1",
    /// Set-point command, short floating point
    SetpointFloat = 50 => "C_SE_NC_1",
    /// Bitstring of 32 bit command
    Bitstring32Command = 51 => "C_BO_NA_1",
    /// Single command with CP56Time2a
    SingleCommandTime56 = 58 => "C_SC_TA_1",
    /// Double command with CP56Time2a
    DoubleCommandTime56 = 59 => "C_DC_TA_1",
    /// Regulating step command with CP56Time2a
    RegulatingStepTime56 = 60 => "C_RC_TA_1",
    /// Set-point command, normalized with CP56Time2a
    SetpointNormalizedTime56 = 61 => "C_SE_TA_1",
    /// Set-point command, scaled with CP56Time2a
    SetpointScaledTime56 = 62 => "C_SE_TB_1",
    /// Set-point command, short floating point with CP56Time2a
    SetpointFloatTime56 = 63 => "C_SE_TC_1",
    /// Bitstring of 32 bit command with CP56Time2a
    Bitstring32CommandTime56 = 64 => "C_BO_TA_1",

    // System information in monitoring direction
    /// End of initialization
    EndOfInit = 70 => "M_EI_NA_1",

    // System information in control direction
    /// Interrogation command
    InterrogationCommand = 100 => "C_IC_NA_1",
    /// Counter interrogation command
    CounterInterrogation = 101 => "C_CI_NA_1",
    /// Read command
    ReadCommand = 102 => "C_RD_NA_1",
    /// Clock synchronization command
    ClockSync = 103 => "C_CS_NA_1",
    /// Test command
    TestCommand = 104 => "C_TS_NA_1",
    /// Reset process command
    ResetProcess = 105 => "C_RP_NA_1",
    /// Test command with CP56Time2a
    TestCommandTime56 = 107 => "C_TS_TA_1",
}

impl TypeId {
    /// Convert to raw byte value.
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Check if this type is in the monitoring direction (from RTU to master).
    #[inline]
    pub const fn is_monitoring(&self) -> bool {
        matches!(self.as_u8(), 1..=44 | 70)
    }

    /// Check if this type is in the control direction (from master to RTU).
    #[inline]
    pub const fn is_control(&self) -> bool {
        matches!(self.as_u8(), 45..=69 | 100..=127)
    }

    /// Check if this type contains a time tag.
    #[inline]
    pub const fn has_time_tag(&self) -> bool {
        match self.layout() {
            Some((_, tag)) => !matches!(tag, TimeTag::None),
            None => matches!(self, Self::TestCommandTime56),
        }
    }

    /// Element kind and time tag of data-carrying types.
    ///
    /// Returns `None` for system types (interrogation, clock sync, ...).
    pub const fn layout(&self) -> Option<(ElementKind, TimeTag)> {
        use ElementKind as K;
        use TimeTag as T;

        let layout = match self {
            Self::SinglePoint => (K::SinglePoint, T::None),
            Self::SinglePointTime24 => (K::SinglePoint, T::Cp24),
            Self::SinglePointTime56 => (K::SinglePoint, T::Cp56),
            Self::DoublePoint => (K::DoublePoint, T::None),
            Self::DoublePointTime24 => (K::DoublePoint, T::Cp24),
            Self::DoublePointTime56 => (K::DoublePoint, T::Cp56),
            Self::StepPosition => (K::StepPosition, T::None),
            Self::StepPositionTime24 => (K::StepPosition, T::Cp24),
            Self::StepPositionTime56 => (K::StepPosition, T::Cp56),
            Self::Bitstring32 => (K::Bitstring32, T::None),
            Self::Bitstring32Time24 => (K::Bitstring32, T::Cp24),
            Self::Bitstring32Time56 => (K::Bitstring32, T::Cp56),
            Self::MeasuredNormalized => (K::Normalized, T::None),
            Self::MeasuredNormalizedTime24 => (K::Normalized, T::Cp24),
            Self::MeasuredNormalizedTime56 => (K::Normalized, T::Cp56),
            Self::MeasuredScaled => (K::Scaled, T::None),
            Self::MeasuredScaledTime24 => (K::Scaled, T::Cp24),
            Self::MeasuredScaledTime56 => (K::Scaled, T::Cp56),
            Self::MeasuredFloat => (K::ShortFloat, T::None),
            Self::MeasuredFloatTime24 => (K::ShortFloat, T::Cp24),
            Self::MeasuredFloatTime56 => (K::ShortFloat, T::Cp56),
            Self::IntegratedTotals => (K::IntegratedTotals, T::None),
            Self::IntegratedTotalsTime24 => (K::IntegratedTotals, T::Cp24),
            Self::IntegratedTotalsTime56 => (K::IntegratedTotals, T::Cp56),
            Self::SingleCommand => (K::SingleCommand, T::None),
            Self::SingleCommandTime56 => (K::SingleCommand, T::Cp56),
            Self::DoubleCommand => (K::DoubleCommand, T::None),
            Self::DoubleCommandTime56 => (K::DoubleCommand, T::Cp56),
            Self::RegulatingStep => (K::RegulatingStep, T::None),
            Self::RegulatingStepTime56 => (K::RegulatingStep, T::Cp56),
            Self::SetpointNormalized => (K::SetpointNormalized, T::None),
            Self::SetpointNormalizedTime56 => (K::SetpointNormalized, T::Cp56),
            Self::SetpointScaled => (K::SetpointScaled, T::None),
            Self::SetpointScaledTime56 => (K::SetpointScaled, T::Cp56),
            Self::SetpointFloat => (K::SetpointFloat, T::None),
            Self::SetpointFloatTime56 => (K::SetpointFloat, T::Cp56),
            Self::Bitstring32Command => (K::Bitstring32Command, T::None),
            Self::Bitstring32CommandTime56 => (K::Bitstring32Command, T::Cp56),
            Self::EndOfInit
            | Self::InterrogationCommand
            | Self::CounterInterrogation
            | Self::ReadCommand
            | Self::ClockSync
            | Self::TestCommand
            | Self::ResetProcess
            | Self::TestCommandTime56 => return None,
        };
        Some(layout)
    }

    /// Size of one information element (without IOA), if the type carries data.
    #[inline]
    pub const fn element_size(&self) -> Option<usize> {
        match self.layout() {
            Some((kind, tag)) => Some(kind.payload_len() + tag.len()),
            None => None,
        }
    }
}

impl std::fmt::Display for TypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.standard_name())
    }
}
