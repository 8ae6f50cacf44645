//! APDU framing for tokio.
//!
//! [`Iec104Codec`] splits the TCP byte stream into APDUs
//! (`0x68 | length | control[4] | ASDU`) and serialises outgoing ones.
//! Bytes that cannot start a frame are skipped until the next start byte.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::error::Iec104Error;
use crate::types::{Apci, Asdu, UFunction, MAX_APDU_LENGTH, MIN_APDU_LENGTH, START_BYTE};

/// Start byte plus length byte.
const FRAME_PREFIX_LEN: usize = 2;

/// An IEC 104 APDU (Application Protocol Data Unit).
#[derive(Debug, Clone, PartialEq)]
pub struct Apdu {
    /// Control information
    pub apci: Apci,
    /// Data unit, present only in I-frames
    pub asdu: Option<Asdu>,
}

impl Apdu {
    /// I-frame carrying `asdu`.
    pub fn i_frame(send_seq: u16, recv_seq: u16, asdu: Asdu) -> Self {
        Self {
            apci: Apci::i_frame(send_seq, recv_seq),
            asdu: Some(asdu),
        }
    }

    /// Supervisory acknowledgement.
    pub fn s_frame(recv_seq: u16) -> Self {
        Self {
            apci: Apci::s_frame(recv_seq),
            asdu: None,
        }
    }

    /// Unnumbered control frame.
    pub fn u_frame(function: UFunction) -> Self {
        Self {
            apci: Apci::u_frame(function),
            asdu: None,
        }
    }
}

impl std::fmt::Display for Apdu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.apci)?;
        if let Some(asdu) = &self.asdu {
            write!(
                f,
                " [{}] COT={} CA={}",
                asdu.header.type_id, asdu.header.cot, asdu.header.common_address
            )?;
        }
        Ok(())
    }
}

/// IEC 60870-5-104 APDU codec.
///
/// ```rust,ignore
/// let stream = TcpStream::connect("192.168.1.100:2404").await?;
/// let mut framed = Framed::new(stream, Iec104Codec::new());
/// framed.send(Apdu::u_frame(UFunction::StartDtAct)).await?;
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Iec104Codec {
    skipped: usize,
}

impl Iec104Codec {
    /// Create a new codec.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of bytes discarded while searching for frame starts.
    pub fn skipped_bytes(&self) -> usize {
        self.skipped
    }

    fn skip(&mut self, src: &mut BytesMut, count: usize) {
        src.advance(count);
        self.skipped += count;
    }
}

impl Decoder for Iec104Codec {
    type Item = Apdu;
    type Error = Iec104Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Apdu>, Iec104Error> {
        loop {
            match src.iter().position(|b| *b == START_BYTE) {
                Some(0) => {}
                Some(garbage) => {
                    debug!(bytes = garbage, "Skipping bytes before frame start");
                    self.skip(src, garbage);
                }
                None => {
                    let len = src.len();
                    self.skip(src, len);
                    return Ok(None);
                }
            }

            let Some(&length) = src.get(1) else {
                return Ok(None);
            };
            let length = usize::from(length);
            if !(MIN_APDU_LENGTH..=MAX_APDU_LENGTH).contains(&length) {
                debug!(length, "Invalid APDU length, resynchronising");
                self.skip(src, 1);
                continue;
            }

            let total = FRAME_PREFIX_LEN + length;
            if src.len() < total {
                src.reserve(total - src.len());
                return Ok(None);
            }

            let frame = src.split_to(total).freeze();
            let apci = Apci::parse(&frame[FRAME_PREFIX_LEN..])?;
            let body = &frame[FRAME_PREFIX_LEN + MIN_APDU_LENGTH..];
            let asdu = match (apci.is_i_frame(), body.is_empty()) {
                (true, false) => Some(Asdu::parse(body)?),
                (true, true) => return Err(Iec104Error::invalid_frame("I-frame without ASDU")),
                (false, _) => None,
            };
            return Ok(Some(Apdu { apci, asdu }));
        }
    }
}

impl Encoder<Apdu> for Iec104Codec {
    type Error = Iec104Error;

    fn encode(&mut self, item: Apdu, dst: &mut BytesMut) -> Result<(), Iec104Error> {
        let asdu_len = item.asdu.as_ref().map_or(0, Asdu::encoded_len);
        if asdu_len > MAX_APDU_LENGTH - MIN_APDU_LENGTH {
            return Err(Iec104Error::invalid_frame(format!(
                "ASDU of {asdu_len} bytes exceeds the APDU limit"
            )));
        }

        dst.reserve(FRAME_PREFIX_LEN + MIN_APDU_LENGTH + asdu_len);
        dst.extend_from_slice(&item.apci.encode_header(asdu_len));
        if let Some(asdu) = &item.asdu {
            asdu.encode_to(dst);
        }
        Ok(())
    }
}
