//! IEC 60870-5-104 APCI (Application Protocol Control Information).
//!
//! APCI is the 6-byte header of an APDU, containing frame type and sequence numbers.
//!
//! ```text
//! +--------+--------+--------+--------+--------+--------+
//! | 0x68   | Length | CF1    | CF2    | CF3    | CF4    |
//! +--------+--------+--------+--------+--------+--------+
//! ```

use crate::error::{Iec104Error, Result};

/// Start byte for IEC 104 frames.
pub const START_BYTE: u8 = 0x68;

/// Minimum APDU length (APCI only, no ASDU).
pub const MIN_APDU_LENGTH: usize = 4;

/// Maximum APDU length.
pub const MAX_APDU_LENGTH: usize = 253;

/// Sequence numbers are 15 bits wide.
pub const SEQ_MODULO: u16 = 32768;

/// Next sequence number after `seq`.
#[inline]
pub const fn seq_next(seq: u16) -> u16 {
    (seq + 1) % SEQ_MODULO
}

/// Number of steps from `from` forward to `to`, modulo 2^15.
#[inline]
pub const fn seq_distance(from: u16, to: u16) -> u16 {
    (to + SEQ_MODULO - from) % SEQ_MODULO
}

/// U-frame function codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UFunction {
    /// STARTDT act
    StartDtAct,
    /// STARTDT con
    StartDtCon,
    /// STOPDT act
    StopDtAct,
    /// STOPDT con
    StopDtCon,
    /// TESTFR act
    TestFrAct,
    /// TESTFR con
    TestFrCon,
}

impl UFunction {
    const TABLE: [(UFunction, u8, &'static str); 6] = [
        (Self::StartDtAct, 0x07, "STARTDT act"),
        (Self::StartDtCon, 0x0B, "STARTDT con"),
        (Self::StopDtAct, 0x13, "STOPDT act"),
        (Self::StopDtCon, 0x23, "STOPDT con"),
        (Self::TestFrAct, 0x43, "TESTFR act"),
        (Self::TestFrCon, 0x83, "TESTFR con"),
    ];

    /// Get the control field byte for this U-function.
    #[inline]
    pub const fn control_byte(&self) -> u8 {
        match self {
            Self::StartDtAct => 0x07,
            Self::StartDtCon => 0x0B,
            Self::StopDtAct => 0x13,
            Self::StopDtCon => 0x23,
            Self::TestFrAct => 0x43,
            Self::TestFrCon => 0x83,
        }
    }

    /// Parse U-function from control byte.
    pub fn from_control_byte(byte: u8) -> Result<Self> {
        Self::TABLE
            .iter()
            .find(|(_, b, _)| *b == byte)
            .map(|(function, _, _)| *function)
            .ok_or_else(|| Iec104Error::invalid_frame(format!("unknown U-frame function {byte:#04x}")))
    }

    fn name(&self) -> &'static str {
        Self::TABLE
            .iter()
            .find(|(function, _, _)| function == self)
            .map_or("?", |(_, _, name)| name)
    }
}

/// APCI control information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Apci {
    /// I-frame with send and receive sequence numbers.
    IFrame {
        /// Send sequence number (0-32767)
        send_seq: u16,
        /// Receive sequence number (0-32767)
        recv_seq: u16,
    },
    /// S-frame with receive sequence number only.
    SFrame {
        /// Receive sequence number (0-32767)
        recv_seq: u16,
    },
    /// U-frame with function code.
    UFrame {
        /// U-frame function
        function: UFunction,
    },
}

impl Apci {
    /// Create a new I-frame APCI.
    #[inline]
    pub fn i_frame(send_seq: u16, recv_seq: u16) -> Self {
        Self::IFrame { send_seq, recv_seq }
    }

    /// Create a new S-frame APCI.
    #[inline]
    pub fn s_frame(recv_seq: u16) -> Self {
        Self::SFrame { recv_seq }
    }

    /// Create a new U-frame APCI.
    #[inline]
    pub fn u_frame(function: UFunction) -> Self {
        Self::UFrame { function }
    }

    /// Parse APCI from the 4-byte control field.
    pub fn parse(control: &[u8]) -> Result<Self> {
        let [cf1, cf2, cf3, cf4] = match control {
            [a, b, c, d, ..] => [*a, *b, *c, *d],
            _ => return Err(Iec104Error::invalid_frame("control field too short")),
        };

        let recv_seq = (u16::from(cf4) << 7) | u16::from(cf3 >> 1);
        match cf1 & 0x03 {
            0x00 | 0x02 => Ok(Self::IFrame {
                send_seq: (u16::from(cf2) << 7) | u16::from(cf1 >> 1),
                recv_seq,
            }),
            0x01 => Ok(Self::SFrame { recv_seq }),
            _ => Ok(Self::UFrame {
                function: UFunction::from_control_byte(cf1)?,
            }),
        }
    }

    /// Encode APCI to the 4-byte control field.
    pub fn encode(&self) -> [u8; 4] {
        let seq_bytes = |seq: u16| [((seq & 0x7F) << 1) as u8, (seq >> 7) as u8];
        match self {
            Self::IFrame { send_seq, recv_seq } => {
                let [s1, s2] = seq_bytes(*send_seq);
                let [r1, r2] = seq_bytes(*recv_seq);
                [s1, s2, r1, r2]
            }
            Self::SFrame { recv_seq } => {
                let [r1, r2] = seq_bytes(*recv_seq);
                [0x01, 0x00, r1, r2]
            }
            Self::UFrame { function } => [function.control_byte(), 0x00, 0x00, 0x00],
        }
    }

    /// Encode full APDU header (start + length + control).
    ///
    /// `asdu_len` is the length of the ASDU that follows (0 for S/U frames).
    pub fn encode_header(&self, asdu_len: usize) -> [u8; 6] {
        let [c1, c2, c3, c4] = self.encode();
        [START_BYTE, (MIN_APDU_LENGTH + asdu_len) as u8, c1, c2, c3, c4]
    }

    /// Check if this is an I-frame.
    #[inline]
    pub fn is_i_frame(&self) -> bool {
        matches!(self, Self::IFrame { .. })
    }

    /// Get the receive sequence number (I-frame and S-frame).
    #[inline]
    pub fn recv_seq(&self) -> Option<u16> {
        match self {
            Self::IFrame { recv_seq, .. } | Self::SFrame { recv_seq } => Some(*recv_seq),
            Self::UFrame { .. } => None,
        }
    }
}

impl std::fmt::Display for Apci {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IFrame { send_seq, recv_seq } => write!(f, "I(S={send_seq}, R={recv_seq})"),
            Self::SFrame { recv_seq } => write!(f, "S(R={recv_seq})"),
            Self::UFrame { function } => write!(f, "U({})", function.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i_frame_encode_decode() {
        let apci = Apci::i_frame(100, 50);
        let decoded = Apci::parse(&apci.encode()).unwrap();
        assert_eq!(decoded, apci);
        assert_eq!(decoded.recv_seq(), Some(50));
    }

    #[test]
    fn test_i_frame_high_sequence() {
        let apci = Apci::i_frame(32767, 16384);
        assert_eq!(apci.encode(), [0xFE, 0xFF, 0x00, 0x80]);
        assert_eq!(Apci::parse(&apci.encode()).unwrap(), apci);
    }

    #[test]
    fn test_s_frame_encode_decode() {
        let apci = Apci::s_frame(200);
        assert_eq!(apci.encode(), [0x01, 0x00, 0x90, 0x01]);
        assert_eq!(Apci::parse(&apci.encode()).unwrap(), apci);
    }

    #[test]
    fn test_u_frames() {
        for (function, byte, _) in UFunction::TABLE {
            let apci = Apci::u_frame(function);
            assert_eq!(apci.encode()[0], byte);
            assert_eq!(Apci::parse(&apci.encode()).unwrap(), apci);
        }
        assert!(Apci::parse(&[0x03, 0, 0, 0]).is_err());
        assert!(Apci::parse(&[0x07, 0, 0]).is_err());
    }

    #[test]
    fn test_header() {
        let header = Apci::u_frame(UFunction::StartDtAct).encode_header(0);
        assert_eq!(header, [0x68, 0x04, 0x07, 0x00, 0x00, 0x00]);
        assert_eq!(Apci::i_frame(0, 0).encode_header(10)[1], 14);
    }

    #[test]
    fn test_sequence_arithmetic() {
        assert_eq!(seq_next(5), 6);
        assert_eq!(seq_next(32767), 0);
        assert_eq!(seq_distance(10, 15), 5);
        assert_eq!(seq_distance(32765, 2), 5);
        assert_eq!(seq_distance(7, 7), 0);
    }

    #[test]
    fn test_display() {
        assert_eq!(Apci::i_frame(1, 2).to_string(), "I(S=1, R=2)");
        assert_eq!(Apci::u_frame(UFunction::TestFrCon).to_string(), "U(TESTFR con)");
    }
}
