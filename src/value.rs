//! Value codec for information elements.
//!
//! Decoding turns the fixed-width payload of one element (including its
//! trailing quality byte, where the element has one) into a [`DataValue`]
//! plus [`QualityFlags`]. [`format_value`] renders that pair as the generic
//! string a host expects. Encoding goes the other way for commands: a host
//! string plus qualifier/select becomes the element bytes of a control ASDU.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Iec104Error, Result};
use crate::types::{
    Cp56Time2a, DataValue, DoublePointValue, ElementKind, QualityFlags, QualityLevel, TimeTag,
    TypeId,
};

/// Sentinel rendered for single/double points with bad quality.
pub const INVALID_TEXT: &str = "Invalid";

const NORMALIZED_RANGE: &str = "[-1.0, 1.0]";
const NORMALIZED_SCALE: f64 = 32768.0;

/// Decode one element payload.
///
/// `bytes` must start at the element (after the IOA); only the first
/// `kind.payload_len()` bytes are read.
pub fn decode_element(kind: ElementKind, bytes: &[u8]) -> Result<(DataValue, QualityFlags)> {
    let len = kind.payload_len();
    let b = bytes.get(..len).ok_or_else(|| {
        Iec104Error::invalid_asdu(format!(
            "{kind:?} element needs {len} bytes, {} available",
            bytes.len()
        ))
    })?;

    let decoded = match kind {
        ElementKind::SinglePoint => (
            DataValue::Single(b[0] & 0x01 != 0),
            QualityFlags::from_flag_bits(b[0]),
        ),
        ElementKind::DoublePoint => (
            DataValue::Double(DoublePointValue::from_bits(b[0])),
            QualityFlags::from_flag_bits(b[0]),
        ),
        ElementKind::StepPosition => (
            DataValue::StepPosition {
                // VTI value is a 7-bit two's complement number
                value: ((b[0] << 1) as i8) >> 1,
                transient: b[0] & 0x80 != 0,
            },
            QualityFlags::from_byte(b[1]),
        ),
        ElementKind::Bitstring32 => (
            DataValue::Bitstring(u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            QualityFlags::from_byte(b[4]),
        ),
        ElementKind::Normalized => (
            DataValue::Normalized(i16::from_le_bytes([b[0], b[1]])),
            QualityFlags::from_byte(b[2]),
        ),
        ElementKind::Scaled => (
            DataValue::Scaled(i16::from_le_bytes([b[0], b[1]])),
            QualityFlags::from_byte(b[2]),
        ),
        ElementKind::ShortFloat => (
            DataValue::Float(f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            QualityFlags::from_byte(b[4]),
        ),
        ElementKind::IntegratedTotals => {
            let seq = b[4];
            let quality = if seq & 0x80 != 0 {
                QualityFlags::INVALID
            } else {
                QualityFlags::GOOD
            };
            (
                DataValue::Counter {
                    value: i32::from_le_bytes([b[0], b[1], b[2], b[3]]),
                    sequence: seq & 0x1F,
                    carry: seq & 0x20 != 0,
                    adjusted: seq & 0x40 != 0,
                },
                quality,
            )
        }
        ElementKind::SingleCommand => (DataValue::Single(b[0] & 0x01 != 0), QualityFlags::GOOD),
        ElementKind::DoubleCommand => (
            DataValue::Double(DoublePointValue::from_bits(b[0])),
            QualityFlags::GOOD,
        ),
        ElementKind::SetpointNormalized => (
            DataValue::Normalized(i16::from_le_bytes([b[0], b[1]])),
            QualityFlags::GOOD,
        ),
        ElementKind::SetpointScaled => (
            DataValue::Scaled(i16::from_le_bytes([b[0], b[1]])),
            QualityFlags::GOOD,
        ),
        ElementKind::SetpointFloat => (
            DataValue::Float(f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            QualityFlags::GOOD,
        ),
        ElementKind::Bitstring32Command => (
            DataValue::Bitstring(u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            QualityFlags::GOOD,
        ),
        ElementKind::RegulatingStep => {
            return Err(Iec104Error::conversion(
                "RegulatingStep",
                format!("{:#04x}", b[0]),
                "regulating step commands carry no readable value",
            ))
        }
    };
    Ok(decoded)
}

/// Render a decoded value as host text.
pub fn format_value(value: &DataValue, quality: QualityFlags) -> String {
    let bad = quality.level() == QualityLevel::Bad;
    match value {
        DataValue::Single(_) | DataValue::Double(_) if bad => INVALID_TEXT.to_string(),
        DataValue::Single(on) => (if *on { "1" } else { "0" }).to_string(),
        DataValue::Double(state) => state.as_str().to_string(),
        DataValue::StepPosition { value, .. } => value.to_string(),
        DataValue::Bitstring(bits) => format!("0x{bits:08X}"),
        DataValue::Normalized(raw) => format!("{:.6}", DataValue::normalized_to_f32(*raw)),
        DataValue::Scaled(v) => v.to_string(),
        DataValue::Float(v) => format!("{v:.6}"),
        DataValue::Counter { value, .. } => value.to_string(),
    }
}

/// Decode an element straight to host text and quality level.
pub fn decode_text(kind: ElementKind, bytes: &[u8]) -> Result<(String, QualityLevel)> {
    let (value, quality) = decode_element(kind, bytes)?;
    Ok((format_value(&value, quality), quality.level()))
}

/// Parse a host boolean: true/false, 1/0, on/off, yes/no (any case).
pub fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Some(true),
        "false" | "0" | "off" | "no" => Some(false),
        _ => None,
    }
}

/// Clamp a normalized input into [-1.0, 1.0].
///
/// Only applied at the host boundary when an endpoint opts in;
/// [`encode_command`] itself rejects out-of-range input.
pub fn clamp_normalized(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(-1.0, 1.0)
    }
}

/// Encode a command element (without IOA or time tag).
///
/// `qualifier` is the QU field for single/double/step commands (5 bits) or
/// the QL field for set-points (7 bits). Bitstring commands have no
/// qualifier byte.
pub fn encode_command(
    kind: ElementKind,
    text: &str,
    qualifier: u8,
    select: bool,
) -> Result<Bytes> {
    let text = text.trim();
    let select_bit = if select { 0x80 } else { 0x00 };
    let command_qualifier = ((qualifier & 0x1F) << 2) | select_bit;
    let setpoint_qualifier = (qualifier & 0x7F) | select_bit;
    let mut buf = BytesMut::with_capacity(kind.payload_len());

    match kind {
        ElementKind::SingleCommand => {
            let on = parse_bool(text)
                .ok_or_else(|| Iec104Error::conversion("SingleCommand", text, "expected a boolean"))?;
            buf.put_u8(u8::from(on) | command_qualifier);
        }
        ElementKind::DoubleCommand => {
            let on = parse_bool(text)
                .ok_or_else(|| Iec104Error::conversion("DoubleCommand", text, "expected a boolean"))?;
            let state = if on {
                DoublePointValue::On
            } else {
                DoublePointValue::Off
            };
            buf.put_u8(state as u8 | command_qualifier);
        }
        ElementKind::RegulatingStep => {
            let step: u8 = match text.to_ascii_lowercase().as_str() {
                "1" | "lower" | "down" => 1,
                "2" | "higher" | "up" => 2,
                _ => {
                    return Err(Iec104Error::conversion(
                        "RegulatingStep",
                        text,
                        "expected 1/lower or 2/higher",
                    ))
                }
            };
            buf.put_u8(step | command_qualifier);
        }
        ElementKind::SetpointNormalized => {
            let value = parse_number::<f64>("SetpointNormalized", text)?;
            if !(-1.0..=1.0).contains(&value) {
                return Err(Iec104Error::ValueOutOfRange {
                    value: text.to_string(),
                    range: NORMALIZED_RANGE,
                });
            }
            let raw = (value * NORMALIZED_SCALE)
                .round()
                .clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16;
            buf.put_i16_le(raw);
            buf.put_u8(setpoint_qualifier);
        }
        ElementKind::SetpointScaled => {
            let value = parse_number::<i16>("SetpointScaled", text)?;
            buf.put_i16_le(value);
            buf.put_u8(setpoint_qualifier);
        }
        ElementKind::SetpointFloat => {
            let value = parse_number::<f32>("SetpointFloat", text)?;
            if !value.is_finite() {
                return Err(Iec104Error::conversion("SetpointFloat", text, "not a finite number"));
            }
            buf.put_f32_le(value);
            buf.put_u8(setpoint_qualifier);
        }
        ElementKind::Bitstring32Command => {
            let bits = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => text.parse::<u32>().ok(),
            }
            .ok_or_else(|| {
                Iec104Error::conversion("Bitstring32Command", text, "expected hex or decimal u32")
            })?;
            buf.put_u32_le(bits);
        }
        ElementKind::SinglePoint
        | ElementKind::DoublePoint
        | ElementKind::StepPosition
        | ElementKind::Bitstring32
        | ElementKind::Normalized
        | ElementKind::Scaled
        | ElementKind::ShortFloat
        | ElementKind::IntegratedTotals => {
            return Err(Iec104Error::conversion(
                format!("{kind:?}"),
                text,
                "monitoring elements cannot be encoded as commands",
            ))
        }
    }

    Ok(buf.freeze())
}

/// Encode the full element for a command type, appending the current time
/// for CP56Time2a command variants.
pub fn command_element(type_id: TypeId, text: &str, qualifier: u8, select: bool) -> Result<Bytes> {
    let (kind, tag) = match type_id.layout() {
        Some((kind, tag)) if kind.is_command() => (kind, tag),
        _ => return Err(Iec104Error::UnsupportedCommand(type_id.to_string())),
    };

    let element = encode_command(kind, text, qualifier, select)?;
    if tag != TimeTag::Cp56 {
        return Ok(element);
    }

    let mut buf = BytesMut::with_capacity(element.len() + tag.len());
    buf.put_slice(&element);
    buf.put_slice(&Cp56Time2a::now().to_bytes());
    Ok(buf.freeze())
}

fn parse_number<T: std::str::FromStr>(data_type: &str, text: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    text.parse::<T>()
        .map_err(|e| Iec104Error::conversion(data_type, text, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Decode ====================

    #[test]
    fn test_single_point_text() {
        assert_eq!(
            decode_text(ElementKind::SinglePoint, &[0x01]).unwrap(),
            ("1".to_string(), QualityLevel::Good)
        );
        assert_eq!(
            decode_text(ElementKind::SinglePoint, &[0x81]).unwrap(),
            ("Invalid".to_string(), QualityLevel::Bad)
        );
        assert_eq!(
            decode_text(ElementKind::SinglePoint, &[0x80]).unwrap().0,
            "Invalid"
        );
        assert_eq!(
            decode_text(ElementKind::SinglePoint, &[0x10]).unwrap(),
            ("0".to_string(), QualityLevel::Uncertain)
        );
    }

    #[test]
    fn test_double_point_text() {
        assert_eq!(decode_text(ElementKind::DoublePoint, &[0x02]).unwrap().0, "On");
        assert_eq!(decode_text(ElementKind::DoublePoint, &[0x01]).unwrap().0, "Off");
        assert_eq!(
            decode_text(ElementKind::DoublePoint, &[0x03]).unwrap().0,
            "Undetermined"
        );
        assert_eq!(decode_text(ElementKind::DoublePoint, &[0x82]).unwrap().0, "Invalid");
    }

    #[test]
    fn test_step_position_sign() {
        let (value, _) = decode_element(ElementKind::StepPosition, &[0x7F, 0x00]).unwrap();
        assert_eq!(value, DataValue::StepPosition { value: -1, transient: false });

        let (value, quality) = decode_element(ElementKind::StepPosition, &[0x85, 0x10]).unwrap();
        assert_eq!(value, DataValue::StepPosition { value: 5, transient: true });
        assert!(quality.blocked);
        assert_eq!(format_value(&value, quality), "5");
    }

    #[test]
    fn test_measured_values() {
        let (text, level) = decode_text(ElementKind::Normalized, &[0x00, 0x40, 0x00]).unwrap();
        assert_eq!(text, "0.500000");
        assert_eq!(level, QualityLevel::Good);

        let (text, _) = decode_text(ElementKind::Scaled, &[0x9C, 0xFF, 0x00]).unwrap();
        assert_eq!(text, "-100");

        let mut float = 23.5f32.to_le_bytes().to_vec();
        float.push(0x40);
        let (text, level) = decode_text(ElementKind::ShortFloat, &float).unwrap();
        assert_eq!(text, "23.500000");
        assert_eq!(level, QualityLevel::Uncertain);

        let (text, _) = decode_text(ElementKind::Bitstring32, &[0xEF, 0xBE, 0x00, 0x00, 0x00]).unwrap();
        assert_eq!(text, "0x0000BEEF");
    }

    #[test]
    fn test_counter() {
        let mut bytes = (-42i32).to_le_bytes().to_vec();
        bytes.push(0x80 | 0x20 | 0x03);
        let (value, quality) = decode_element(ElementKind::IntegratedTotals, &bytes).unwrap();
        assert_eq!(
            value,
            DataValue::Counter {
                value: -42,
                sequence: 3,
                carry: true,
                adjusted: false,
            }
        );
        assert_eq!(quality.level(), QualityLevel::Bad);
        assert_eq!(format_value(&value, quality), "-42");
    }

    #[test]
    fn test_truncated_payload() {
        assert!(matches!(
            decode_element(ElementKind::ShortFloat, &[0, 0, 0]),
            Err(Iec104Error::InvalidAsdu(_))
        ));
        assert!(decode_element(ElementKind::RegulatingStep, &[1]).is_err());
    }

    // ==================== Encode ====================

    #[test]
    fn test_parse_bool_tokens() {
        for t in ["true", "TRUE", "1", "On", "yes"] {
            assert_eq!(parse_bool(t), Some(true), "{t}");
        }
        for f in ["false", "0", "OFF", "No"] {
            assert_eq!(parse_bool(f), Some(false), "{f}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_single_and_double_command() {
        assert_eq!(&encode_command(ElementKind::SingleCommand, "on", 0, false).unwrap()[..], &[0x01]);
        assert_eq!(&encode_command(ElementKind::SingleCommand, "0", 1, true).unwrap()[..], &[0x84]);
        assert_eq!(&encode_command(ElementKind::DoubleCommand, "yes", 0, false).unwrap()[..], &[0x02]);
        assert_eq!(&encode_command(ElementKind::DoubleCommand, "off", 0, false).unwrap()[..], &[0x01]);
        assert!(encode_command(ElementKind::SingleCommand, "maybe", 0, false).is_err());
    }

    #[test]
    fn test_regulating_step() {
        assert_eq!(&encode_command(ElementKind::RegulatingStep, "higher", 0, false).unwrap()[..], &[0x02]);
        assert_eq!(&encode_command(ElementKind::RegulatingStep, "1", 0, false).unwrap()[..], &[0x01]);
        assert!(encode_command(ElementKind::RegulatingStep, "3", 0, false).is_err());
    }

    #[test]
    fn test_setpoint_float_payload() {
        let bytes = encode_command(ElementKind::SetpointFloat, "123.45", 0, false).unwrap();
        let mut expected = 123.45f32.to_le_bytes().to_vec();
        expected.push(0x00);
        assert_eq!(&bytes[..], &expected[..]);

        let selected = encode_command(ElementKind::SetpointFloat, "1", 0, true).unwrap();
        assert_eq!(selected[4], 0x80);
        assert!(encode_command(ElementKind::SetpointFloat, "NaN", 0, false).is_err());
    }

    #[test]
    fn test_setpoint_normalized_roundtrip() {
        let step = 1.0 / NORMALIZED_SCALE;
        for v in [-1.0, -0.5, -0.123_456, 0.0, 0.25, 0.999, 1.0] {
            let bytes = encode_command(ElementKind::SetpointNormalized, &v.to_string(), 0, false).unwrap();
            let (value, _) = decode_element(ElementKind::SetpointNormalized, &bytes).unwrap();
            let back = value.as_f64().unwrap();
            assert!((back - v).abs() <= step, "{v} -> {back}");
        }
    }

    #[test]
    fn test_setpoint_normalized_rejects_out_of_range() {
        for v in ["1.0001", "-1.5", "42"] {
            assert!(matches!(
                encode_command(ElementKind::SetpointNormalized, v, 0, false),
                Err(Iec104Error::ValueOutOfRange { .. })
            ));
        }
        assert_eq!(clamp_normalized(1.5), 1.0);
        assert_eq!(clamp_normalized(-7.0), -1.0);
        assert_eq!(clamp_normalized(f64::NAN), 0.0);
    }

    #[test]
    fn test_setpoint_scaled_and_bitstring() {
        assert_eq!(
            &encode_command(ElementKind::SetpointScaled, "-2", 3, false).unwrap()[..],
            &[0xFE, 0xFF, 0x03]
        );
        assert!(encode_command(ElementKind::SetpointScaled, "40000", 0, false).is_err());
        assert_eq!(
            &encode_command(ElementKind::Bitstring32Command, "0xDEADBEEF", 0, false).unwrap()[..],
            &[0xEF, 0xBE, 0xAD, 0xDE]
        );
        assert_eq!(
            &encode_command(ElementKind::Bitstring32Command, "256", 0, false).unwrap()[..],
            &[0x00, 0x01, 0x00, 0x00]
        );
    }

    #[test]
    fn test_monitoring_kind_is_not_encodable() {
        assert!(matches!(
            encode_command(ElementKind::ShortFloat, "1.0", 0, false),
            Err(Iec104Error::DataConversion { .. })
        ));
    }

    #[test]
    fn test_command_element_time_tag() {
        let plain = command_element(TypeId::SingleCommand, "1", 0, false).unwrap();
        assert_eq!(plain.len(), 1);

        let tagged = command_element(TypeId::SingleCommandTime56, "1", 0, false).unwrap();
        assert_eq!(tagged.len(), 8);
        assert!(Cp56Time2a::from_bytes(&tagged[1..]).unwrap().to_datetime().unwrap().is_some());

        assert!(matches!(
            command_element(TypeId::MeasuredFloat, "1", 0, false),
            Err(Iec104Error::UnsupportedCommand(_))
        ));
        assert!(matches!(
            command_element(TypeId::InterrogationCommand, "20", 0, false),
            Err(Iec104Error::UnsupportedCommand(_))
        ));
    }
}
