//! Information element types for IEC 60870-5-104.
//!
//! Every data-carrying type identifier maps to one [`ElementKind`] (see
//! [`TypeId::layout`](super::TypeId::layout)); decoding an element of that
//! kind yields one [`DataValue`] variant.

use chrono::{DateTime, Utc};

use super::{QualityFlags, QualityLevel, TypeId};

/// Wire layout family of an information element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    /// SIQ (1 byte)
    SinglePoint,
    /// DIQ (1 byte)
    DoublePoint,
    /// VTI + QDS (2 bytes)
    StepPosition,
    /// BSI + QDS (5 bytes)
    Bitstring32,
    /// NVA + QDS (3 bytes)
    Normalized,
    /// SVA + QDS (3 bytes)
    Scaled,
    /// IEEE STD 754 + QDS (5 bytes)
    ShortFloat,
    /// BCR (5 bytes)
    IntegratedTotals,
    /// SCO (1 byte)
    SingleCommand,
    /// DCO (1 byte)
    DoubleCommand,
    /// RCO (1 byte)
    RegulatingStep,
    /// NVA + QOS (3 bytes)
    SetpointNormalized,
    /// SVA + QOS (3 bytes)
    SetpointScaled,
    /// IEEE STD 754 + QOS (5 bytes)
    SetpointFloat,
    /// BSI (4 bytes)
    Bitstring32Command,
}

impl ElementKind {
    /// Payload length in bytes, excluding IOA and time tag.
    pub const fn payload_len(&self) -> usize {
        match self {
            Self::SinglePoint
            | Self::DoublePoint
            | Self::SingleCommand
            | Self::DoubleCommand
            | Self::RegulatingStep => 1,
            Self::StepPosition => 2,
            Self::Normalized | Self::Scaled | Self::SetpointNormalized | Self::SetpointScaled => 3,
            Self::Bitstring32Command => 4,
            Self::Bitstring32 | Self::ShortFloat | Self::IntegratedTotals | Self::SetpointFloat => 5,
        }
    }

    /// Whether this kind is sent in the control direction.
    pub const fn is_command(&self) -> bool {
        matches!(
            self,
            Self::SingleCommand
                | Self::DoubleCommand
                | Self::RegulatingStep
                | Self::SetpointNormalized
                | Self::SetpointScaled
                | Self::SetpointFloat
                | Self::Bitstring32Command
        )
    }
}

/// Double-point state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DoublePointValue {
    /// Indeterminate or intermediate (00)
    Indeterminate = 0,
    /// Determined OFF (01)
    Off = 1,
    /// Determined ON (10)
    On = 2,
    /// Indeterminate (11)
    IndeterminateOrFaulty = 3,
}

impl DoublePointValue {
    /// Parse from the lower 2 bits.
    #[inline]
    pub const fn from_bits(value: u8) -> Self {
        match value & 0x03 {
            0 => Self::Indeterminate,
            1 => Self::Off,
            2 => Self::On,
            _ => Self::IndeterminateOrFaulty,
        }
    }

    /// Host-facing three-state name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "Off",
            Self::On => "On",
            Self::Indeterminate | Self::IndeterminateOrFaulty => "Undetermined",
        }
    }
}

/// Decoded element value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DataValue {
    /// Single-point information or single command state
    Single(bool),

    /// Double-point information or double command state
    Double(DoublePointValue),

    /// Step position (-64 to +63)
    StepPosition {
        /// Position value
        value: i8,
        /// Equipment in transient state
        transient: bool,
    },

    /// Bitstring of 32 bits
    Bitstring(u32),

    /// Normalized value, raw 16-bit representation
    Normalized(i16),

    /// Scaled value
    Scaled(i16),

    /// Short floating point
    Float(f32),

    /// Binary counter reading
    Counter {
        /// Counter value
        value: i32,
        /// Sequence number (0-31)
        sequence: u8,
        /// Counter overflow since last reading
        carry: bool,
        /// Counter was adjusted
        adjusted: bool,
    },
}

impl DataValue {
    /// Normalized value scaled to [-1.0, 1.0).
    #[inline]
    pub fn normalized_to_f32(raw: i16) -> f32 {
        f32::from(raw) / 32768.0
    }

    /// Convert to f64 if numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Single(v) => Some(if *v { 1.0 } else { 0.0 }),
            Self::Double(DoublePointValue::Off) => Some(0.0),
            Self::Double(DoublePointValue::On) => Some(1.0),
            Self::Double(_) => None,
            Self::StepPosition { value, .. } => Some(f64::from(*value)),
            Self::Bitstring(v) => Some(f64::from(*v)),
            Self::Normalized(raw) => Some(f64::from(Self::normalized_to_f32(*raw))),
            Self::Scaled(v) => Some(f64::from(*v)),
            Self::Float(v) => Some(f64::from(*v)),
            Self::Counter { value, .. } => Some(f64::from(*value)),
        }
    }

    /// Convert to bool if boolean type.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Single(v) => Some(*v),
            Self::Double(DoublePointValue::On) => Some(true),
            Self::Double(DoublePointValue::Off) => Some(false),
            _ => None,
        }
    }
}

/// One decoded information object.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    /// Information object address
    pub ioa: u32,
    /// Type identifier of the carrying ASDU
    pub type_id: TypeId,
    /// Decoded value
    pub value: DataValue,
    /// Quality flags
    pub quality: QualityFlags,
    /// Source timestamp from a CP56Time2a tag, if present and valid
    pub timestamp: Option<DateTime<Utc>>,
}

impl DataPoint {
    /// Create a data point with good quality and no timestamp.
    pub fn new(ioa: u32, type_id: TypeId, value: DataValue) -> Self {
        Self {
            ioa,
            type_id,
            value,
            quality: QualityFlags::GOOD,
            timestamp: None,
        }
    }

    /// Set the quality flags.
    pub fn with_quality(mut self, quality: QualityFlags) -> Self {
        self.quality = quality;
        self
    }

    /// Set the source timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Three-level quality.
    #[inline]
    pub fn level(&self) -> QualityLevel {
        self.quality.level()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_lengths() {
        assert_eq!(ElementKind::SinglePoint.payload_len(), 1);
        assert_eq!(ElementKind::StepPosition.payload_len(), 2);
        assert_eq!(ElementKind::Scaled.payload_len(), 3);
        assert_eq!(ElementKind::ShortFloat.payload_len(), 5);
        assert_eq!(ElementKind::Bitstring32Command.payload_len(), 4);
        assert!(ElementKind::SetpointFloat.is_command());
        assert!(!ElementKind::IntegratedTotals.is_command());
    }

    #[test]
    fn test_double_point_names() {
        assert_eq!(DoublePointValue::from_bits(0x01).as_str(), "Off");
        assert_eq!(DoublePointValue::from_bits(0x02).as_str(), "On");
        assert_eq!(DoublePointValue::from_bits(0x00).as_str(), "Undetermined");
        assert_eq!(DoublePointValue::from_bits(0xFF).as_str(), "Undetermined");
    }

    #[test]
    fn test_data_value_conversions() {
        assert_eq!(DataValue::Single(true).as_bool(), Some(true));
        assert_eq!(DataValue::Double(DoublePointValue::Indeterminate).as_bool(), None);
        assert_eq!(DataValue::Normalized(16384).as_f64(), Some(0.5));
        assert_eq!(DataValue::Normalized(i16::MIN).as_f64(), Some(-1.0));
        assert_eq!(DataValue::Scaled(-100).as_f64(), Some(-100.0));
        assert_eq!(DataValue::Float(1.5).as_bool(), None);
        let counter = DataValue::Counter {
            value: 42,
            sequence: 1,
            carry: false,
            adjusted: false,
        };
        assert_eq!(counter.as_f64(), Some(42.0));
    }

    #[test]
    fn test_data_point_builder() {
        let dp = DataPoint::new(1001, TypeId::MeasuredFloat, DataValue::Float(23.5))
            .with_quality(QualityFlags::INVALID);
        assert_eq!(dp.ioa, 1001);
        assert_eq!(dp.level(), QualityLevel::Bad);
        assert!(dp.timestamp.is_none());
    }
}
