//! IEC 60870-5-104 ASDU (Application Service Data Unit).
//!
//! An ASDU is the 6-byte data unit identifier followed by the information
//! objects. Inbound units keep their object region as raw bytes; the
//! [`parser`](crate::parser) walks it using the type's wire layout.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Iec104Error, Result};
use crate::types::{Cot, Cp56Time2a, TypeId};

/// Qualifier of interrogation for a station (global) interrogation.
pub const QOI_STATION: u8 = 20;

/// Qualifier of counter interrogation: general request, no freeze or reset.
pub const QCC_GENERAL: u8 = 5;

/// Size of the data unit identifier (type, VSQ, COT, originator, CA).
pub const ASDU_HEADER_LEN: usize = 6;

/// Size of an information object address on the wire.
pub const IOA_LEN: usize = 3;

/// Variable Structure Qualifier (VSQ).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vsq {
    /// Number of information objects or elements (0-127)
    pub count: u8,
    /// SQ=1: one address followed by `count` consecutive elements
    pub sequence: bool,
}

impl Vsq {
    /// Create a new VSQ.
    #[inline]
    pub const fn new(count: u8, sequence: bool) -> Self {
        Self {
            count: count & 0x7F,
            sequence,
        }
    }

    /// Parse VSQ from byte.
    #[inline]
    pub const fn from_u8(value: u8) -> Self {
        Self::new(value & 0x7F, value & 0x80 != 0)
    }

    /// Encode VSQ to byte.
    #[inline]
    pub const fn as_u8(&self) -> u8 {
        self.count | if self.sequence { 0x80 } else { 0 }
    }
}

/// Information Object Address (IOA), 24 bits little-endian on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ioa(u32);

impl Ioa {
    /// Largest addressable information object.
    pub const MAX: u32 = 0x00FF_FFFF;

    /// Create IOA from u32 (lower 24 bits).
    #[inline]
    pub const fn new(value: u32) -> Self {
        Self(value & Self::MAX)
    }

    /// Parse IOA from 3 bytes (little-endian).
    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        match bytes {
            [b0, b1, b2, ..] => Ok(Self(u32::from_le_bytes([*b0, *b1, *b2, 0]))),
            _ => Err(Iec104Error::invalid_asdu("IOA too short")),
        }
    }

    /// Encode IOA to 3 bytes (little-endian).
    #[inline]
    pub fn to_bytes(&self) -> [u8; 3] {
        let [b0, b1, b2, _] = self.0.to_le_bytes();
        [b0, b1, b2]
    }

    /// Get the raw value.
    #[inline]
    pub const fn value(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for Ioa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Data unit identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsduHeader {
    /// Type identification
    pub type_id: TypeId,
    /// Variable structure qualifier
    pub vsq: Vsq,
    /// Cause of transmission
    pub cot: Cot,
    /// Test flag (T)
    pub test: bool,
    /// Negative confirmation flag (P/N)
    pub negative: bool,
    /// Originator address (0 if not used)
    pub originator: u8,
    /// Common address of ASDU (station address)
    pub common_address: u16,
}

impl AsduHeader {
    /// Create a header for a single-object unit.
    pub fn new(type_id: TypeId, cot: Cot, common_address: u16) -> Self {
        Self {
            type_id,
            vsq: Vsq::new(1, false),
            cot,
            test: false,
            negative: false,
            originator: 0,
            common_address,
        }
    }

    /// Parse the data unit identifier.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let [type_byte, vsq, cot, originator, ca_lo, ca_hi] = match data {
            [a, b, c, d, e, f, ..] => [*a, *b, *c, *d, *e, *f],
            _ => return Err(Iec104Error::invalid_asdu("ASDU header too short")),
        };

        Ok(Self {
            type_id: TypeId::from_u8(type_byte)?,
            vsq: Vsq::from_u8(vsq),
            cot: Cot::from_u8(cot)?,
            test: cot & 0x80 != 0,
            negative: cot & 0x40 != 0,
            originator,
            common_address: u16::from_le_bytes([ca_lo, ca_hi]),
        })
    }

    /// Encode the data unit identifier.
    pub fn encode(&self, buf: &mut BytesMut) {
        let mut cot = self.cot.as_u8();
        if self.test {
            cot |= 0x80;
        }
        if self.negative {
            cot |= 0x40;
        }
        buf.put_u8(self.type_id.as_u8());
        buf.put_u8(self.vsq.as_u8());
        buf.put_u8(cot);
        buf.put_u8(self.originator);
        buf.put_u16_le(self.common_address);
    }
}

/// Complete ASDU.
#[derive(Debug, Clone, PartialEq)]
pub struct Asdu {
    /// Data unit identifier
    pub header: AsduHeader,
    /// Information object region (addresses, elements and time tags)
    pub body: Bytes,
}

impl Asdu {
    /// Create an ASDU from a header and an encoded object region.
    pub fn new(header: AsduHeader, body: Bytes) -> Self {
        Self { header, body }
    }

    /// Single-object activation carrying `element` at `ioa`.
    pub fn activation(type_id: TypeId, common_address: u16, ioa: Ioa, element: &[u8]) -> Self {
        let mut body = BytesMut::with_capacity(IOA_LEN + element.len());
        body.put_slice(&ioa.to_bytes());
        body.put_slice(element);
        Self::new(
            AsduHeader::new(type_id, Cot::Activation, common_address),
            body.freeze(),
        )
    }

    /// Station interrogation (C_IC_NA_1, IOA 0).
    pub fn interrogation(common_address: u16, qoi: u8) -> Self {
        Self::activation(TypeId::InterrogationCommand, common_address, Ioa::new(0), &[qoi])
    }

    /// Counter interrogation (C_CI_NA_1, IOA 0).
    pub fn counter_interrogation(common_address: u16, qcc: u8) -> Self {
        Self::activation(TypeId::CounterInterrogation, common_address, Ioa::new(0), &[qcc])
    }

    /// Clock synchronization (C_CS_NA_1, IOA 0).
    pub fn clock_sync(common_address: u16, time: Cp56Time2a) -> Self {
        Self::activation(TypeId::ClockSync, common_address, Ioa::new(0), &time.to_bytes())
    }

    /// Parse ASDU from bytes (after APCI).
    pub fn parse(data: &[u8]) -> Result<Self> {
        let header = AsduHeader::parse(data)?;
        Ok(Self {
            header,
            body: Bytes::copy_from_slice(&data[ASDU_HEADER_LEN..]),
        })
    }

    /// Type identification shortcut.
    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.header.type_id
    }

    /// Encode ASDU to bytes.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_to(&mut buf);
        buf
    }

    /// Encode ASDU directly into the provided buffer.
    #[inline]
    pub fn encode_to(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        buf.put_slice(&self.body);
    }

    /// Encoded length of this ASDU.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        ASDU_HEADER_LEN + self.body.len()
    }
}
