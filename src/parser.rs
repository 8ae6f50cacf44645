//! ASDU information object parser.
//!
//! Walks the object region of an [`Asdu`] using the wire layout from
//! [`TypeId::layout`] and decodes each element with the value codec.
//! A broken element is recorded in [`ParsedAsdu::failures`] and the walk
//! moves on to the next one; only truncation stops it, since the offset of
//! later elements is then unknown.

use crate::error::{Iec104Error, Result};
use crate::types::{Asdu, Cp56Time2a, DataPoint, ElementKind, Ioa, TimeTag, TypeId, IOA_LEN};
use crate::value::decode_element;

/// An element that could not be decoded.
#[derive(Debug)]
pub struct ElementFailure {
    /// Position of the element within the ASDU
    pub index: usize,
    /// Address of the element, if it could be read
    pub ioa: Option<u32>,
    /// Why decoding failed
    pub error: Iec104Error,
}

/// Result of walking one ASDU.
#[derive(Debug, Default)]
pub struct ParsedAsdu {
    /// Successfully decoded points, in wire order
    pub points: Vec<DataPoint>,
    /// Elements that failed, in wire order
    pub failures: Vec<ElementFailure>,
}

impl ParsedAsdu {
    /// No element failed.
    #[inline]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Parse every information element of an ASDU.
///
/// System types (interrogation, clock sync, end of init, ...) carry no
/// data points and yield an empty result.
///
/// ```rust,ignore
/// let parsed = parse_asdu(&asdu);
/// for point in &parsed.points {
///     println!("IOA {}: {:?} ({})", point.ioa, point.value, point.level());
/// }
/// ```
pub fn parse_asdu(asdu: &Asdu) -> ParsedAsdu {
    let type_id = asdu.header.type_id;
    let mut parsed = ParsedAsdu::default();
    let Some((kind, tag)) = type_id.layout() else {
        return parsed;
    };

    let data = asdu.body.as_ref();
    let count = usize::from(asdu.header.vsq.count);
    let element_len = kind.payload_len() + tag.len();
    let mut offset = 0;
    let mut first_ioa = 0;

    for index in 0..count {
        let ioa = if asdu.header.vsq.sequence && index > 0 {
            first_ioa + index as u32
        } else {
            match Ioa::from_bytes(data.get(offset..).unwrap_or_default()) {
                Ok(ioa) => {
                    offset += IOA_LEN;
                    first_ioa = ioa.value();
                    ioa.value()
                }
                Err(error) => {
                    parsed.failures.push(ElementFailure { index, ioa: None, error });
                    break;
                }
            }
        };

        let Some(element) = data.get(offset..offset + element_len) else {
            parsed.failures.push(ElementFailure {
                index,
                ioa: Some(ioa),
                error: Iec104Error::invalid_asdu(format!(
                    "{type_id} element {index} truncated: need {element_len} bytes at offset {offset}, have {}",
                    data.len()
                )),
            });
            break;
        };
        offset += element_len;

        match decode_point(type_id, kind, tag, ioa, element) {
            Ok(point) => parsed.points.push(point),
            Err(error) => parsed.failures.push(ElementFailure {
                index,
                ioa: Some(ioa),
                error,
            }),
        }
    }

    parsed
}

fn decode_point(
    type_id: TypeId,
    kind: ElementKind,
    tag: TimeTag,
    ioa: u32,
    element: &[u8],
) -> Result<DataPoint> {
    let payload_len = kind.payload_len();
    let (value, quality) = decode_element(kind, element)?;
    let point = DataPoint::new(ioa, type_id, value).with_quality(quality);

    match tag {
        TimeTag::Cp56 => match Cp56Time2a::from_bytes(&element[payload_len..])?.to_datetime()? {
            Some(timestamp) => Ok(point.with_timestamp(timestamp)),
            None => Ok(point),
        },
        // CP24 carries only minutes and milliseconds; the receive time stands in
        TimeTag::Cp24 | TimeTag::None => Ok(point),
    }
}
