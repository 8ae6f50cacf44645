//! Error types for the IEC 60870-5-104 driver.
//!
//! Every variant carries a stable numeric code. The thousands digit of the
//! code selects the [`ErrorCategory`]:
//!
//! ```text
//! 1xxx Connection     2xxx Protocol     3xxx Data
//! 4xxx Command        5xxx Configuration
//! 6xxx Cache          9xxx Internal
//! ```

use thiserror::Error;

/// Result type alias for IEC 104 operations.
pub type Result<T> = std::result::Result<T, Iec104Error>;

/// Error category, derived from the numeric error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Transport and session establishment failures
    Connection,
    /// Malformed or unexpected protocol units
    Protocol,
    /// Value decoding and conversion failures
    Data,
    /// Command construction or delivery failures
    Command,
    /// Invalid identity, address or type strings
    Configuration,
    /// Cache capacity problems
    Cache,
    /// Internal plumbing failures
    Internal,
}

impl ErrorCategory {
    /// Resolve the category from a numeric error code.
    pub const fn from_code(code: u16) -> Self {
        match code / 1000 {
            1 => Self::Connection,
            2 => Self::Protocol,
            3 => Self::Data,
            4 => Self::Command,
            5 => Self::Configuration,
            6 => Self::Cache,
            _ => Self::Internal,
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Connection => "connection",
            Self::Protocol => "protocol",
            Self::Data => "data",
            Self::Command => "command",
            Self::Configuration => "configuration",
            Self::Cache => "cache",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// IEC 60870-5-104 driver error types.
#[derive(Debug, Error)]
pub enum Iec104Error {
    // ---------------------------------------------------------------- 1xxx
    /// Connection attempt failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection timeout
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// Established connection was lost
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Remote refused the connection
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// Socket level I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Not connected to remote
    #[error("Not connected")]
    NotConnected,

    /// Another connect sequence is running for the same endpoint
    #[error("Connect already in progress")]
    AlreadyConnecting,

    /// A disconnect arrived while the connect sequence was running
    #[error("Connect cancelled")]
    ConnectCancelled,

    // ---------------------------------------------------------------- 2xxx
    /// Invalid frame format
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Invalid ASDU
    #[error("Invalid ASDU: {0}")]
    InvalidAsdu(String),

    /// Unknown type identifier
    #[error("Unknown type ID: {0}")]
    UnknownTypeId(u8),

    /// Unknown cause of transmission
    #[error("Unknown cause of transmission: {0}")]
    UnknownCot(u8),

    /// ASDU addressed to a different station
    #[error("Unexpected common address {actual} (expected {expected})")]
    CommonAddressMismatch { expected: u16, actual: u16 },

    /// Sequence number mismatch
    #[error("Sequence number mismatch: expected {expected}, got {actual}")]
    SequenceMismatch { expected: u16, actual: u16 },

    /// T1 timeout (send confirmation)
    #[error("T1 timeout: no confirmation received")]
    T1Timeout,

    /// Too many unconfirmed frames
    #[error("Too many unconfirmed frames (K={0})")]
    TooManyUnconfirmed(u16),

    /// Generic protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    // ---------------------------------------------------------------- 3xxx
    /// Data type not usable for the requested operation
    #[error("Invalid data type: {0}")]
    InvalidDataType(String),

    /// Value could not be converted to or from its wire form
    #[error("Cannot convert '{value}' as {data_type}: {reason}")]
    DataConversion {
        data_type: String,
        value: String,
        reason: String,
    },

    /// Value outside the representable range
    #[error("Value {value} out of range {range}")]
    ValueOutOfRange { value: String, range: &'static str },

    /// Timestamp fields do not form a valid date
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    // ---------------------------------------------------------------- 4xxx
    /// Command could not be delivered
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// Session did not accept the command in time
    #[error("Command timeout")]
    CommandTimeout,

    /// Type identifier has no command encoding
    #[error("Unsupported command type: {0}")]
    UnsupportedCommand(String),

    /// Command parameter invalid
    #[error("Invalid command parameter: {0}")]
    InvalidCommandParameter(String),

    /// Target point is monitoring-only
    #[error("Point is read-only: {0}")]
    ReadOnly(String),

    // ---------------------------------------------------------------- 5xxx
    /// Device identity string field invalid
    #[error("Invalid device identity field '{field}': '{value}'")]
    InvalidDeviceId { field: &'static str, value: String },

    /// Tag address invalid or out of range
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Tag type alias not recognised
    #[error("Invalid {parameter} '{value}'")]
    InvalidTagType {
        parameter: &'static str,
        value: String,
    },

    /// Mandatory field missing
    #[error("Missing field '{0}'")]
    MissingField(&'static str),

    /// Device key not registered
    #[error("Unknown device '{0}'")]
    UnknownDevice(String),

    // ---------------------------------------------------------------- 6xxx
    /// Cache is full and its policy rejects new addresses
    #[error("Cache overflow (capacity {capacity})")]
    CacheOverflow { capacity: usize },

    // ---------------------------------------------------------------- 9xxx
    /// Channel closed
    #[error("Channel closed")]
    ChannelClosed,

    /// Engine has been disposed
    #[error("Engine disposed")]
    Disposed,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Iec104Error {
    /// Create a protocol error with a message.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create an invalid frame error.
    pub fn invalid_frame(msg: impl Into<String>) -> Self {
        Self::InvalidFrame(msg.into())
    }

    /// Create an invalid ASDU error.
    pub fn invalid_asdu(msg: impl Into<String>) -> Self {
        Self::InvalidAsdu(msg.into())
    }

    /// Create a data conversion error.
    pub fn conversion(
        data_type: impl std::fmt::Display,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::DataConversion {
            data_type: data_type.to_string(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Stable numeric code of this error.
    pub const fn code(&self) -> u16 {
        match self {
            Self::ConnectionFailed(_) => 1001,
            Self::ConnectionTimeout => 1002,
            Self::ConnectionLost(_) => 1003,
            Self::ConnectionRefused(_) => 1004,
            Self::Io(_) => 1005,
            Self::NotConnected => 1006,
            Self::AlreadyConnecting => 1007,
            Self::ConnectCancelled => 1008,

            Self::InvalidFrame(_) => 2001,
            Self::InvalidAsdu(_) => 2002,
            Self::UnknownTypeId(_) => 2003,
            Self::UnknownCot(_) => 2004,
            Self::CommonAddressMismatch { .. } => 2005,
            Self::SequenceMismatch { .. } => 2006,
            Self::T1Timeout => 2007,
            Self::TooManyUnconfirmed(_) => 2008,
            Self::Protocol(_) => 2099,

            Self::InvalidDataType(_) => 3001,
            Self::DataConversion { .. } => 3002,
            Self::ValueOutOfRange { .. } => 3003,
            Self::InvalidTimestamp(_) => 3005,

            Self::CommandFailed(_) => 4001,
            Self::CommandTimeout => 4002,
            Self::UnsupportedCommand(_) => 4003,
            Self::InvalidCommandParameter(_) => 4004,
            Self::ReadOnly(_) => 4005,

            Self::InvalidDeviceId { .. } => 5001,
            Self::InvalidAddress(_) => 5002,
            Self::InvalidTagType { .. } => 5003,
            Self::MissingField(_) => 5004,
            Self::UnknownDevice(_) => 5005,

            Self::CacheOverflow { .. } => 6001,

            Self::ChannelClosed => 9001,
            Self::Disposed => 9002,
            Self::Internal(_) => 9099,
        }
    }

    /// Category of this error, derived from [`code`](Self::code).
    pub const fn category(&self) -> ErrorCategory {
        ErrorCategory::from_code(self.code())
    }

    /// Check if this error indicates a connection problem.
    pub fn is_connection_error(&self) -> bool {
        self.category() == ErrorCategory::Connection || matches!(self, Self::T1Timeout)
    }

    /// Check if this error is retryable.
    ///
    /// Configuration errors are deterministic and never retryable.
    pub fn is_retryable(&self) -> bool {
        match self.category() {
            ErrorCategory::Connection => {
                !matches!(self, Self::AlreadyConnecting | Self::ConnectCancelled)
            }
            ErrorCategory::Protocol => matches!(self, Self::T1Timeout | Self::TooManyUnconfirmed(_)),
            ErrorCategory::Command => matches!(self, Self::CommandFailed(_) | Self::CommandTimeout),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Iec104Error::NotConnected;
        assert_eq!(err.to_string(), "Not connected");

        let err = Iec104Error::UnknownTypeId(255);
        assert_eq!(err.to_string(), "Unknown type ID: 255");

        let err = Iec104Error::SequenceMismatch {
            expected: 10,
            actual: 5,
        };
        assert_eq!(
            err.to_string(),
            "Sequence number mismatch: expected 10, got 5"
        );

        let err = Iec104Error::InvalidTagType {
            parameter: "tag type",
            value: "XYZ".into(),
        };
        assert_eq!(err.to_string(), "Invalid tag type 'XYZ'");
    }

    #[test]
    fn test_category_from_code_range() {
        assert_eq!(Iec104Error::ConnectionTimeout.category(), ErrorCategory::Connection);
        assert_eq!(Iec104Error::UnknownCot(99).category(), ErrorCategory::Protocol);
        assert_eq!(
            Iec104Error::conversion("SetpointFloat", "abc", "not a number").category(),
            ErrorCategory::Data
        );
        assert_eq!(Iec104Error::CommandTimeout.category(), ErrorCategory::Command);
        assert_eq!(
            Iec104Error::InvalidAddress("0".into()).category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            Iec104Error::CacheOverflow { capacity: 4 }.category(),
            ErrorCategory::Cache
        );
        assert_eq!(Iec104Error::ChannelClosed.category(), ErrorCategory::Internal);
    }

    #[test]
    fn test_codes_are_unique() {
        let errors = [
            Iec104Error::ConnectionFailed(String::new()),
            Iec104Error::ConnectionTimeout,
            Iec104Error::ConnectionLost(String::new()),
            Iec104Error::ConnectionRefused(String::new()),
            Iec104Error::NotConnected,
            Iec104Error::AlreadyConnecting,
            Iec104Error::ConnectCancelled,
            Iec104Error::InvalidFrame(String::new()),
            Iec104Error::InvalidAsdu(String::new()),
            Iec104Error::UnknownTypeId(0),
            Iec104Error::UnknownCot(0),
            Iec104Error::T1Timeout,
            Iec104Error::TooManyUnconfirmed(12),
            Iec104Error::InvalidDataType(String::new()),
            Iec104Error::InvalidTimestamp(String::new()),
            Iec104Error::CommandFailed(String::new()),
            Iec104Error::CommandTimeout,
            Iec104Error::UnsupportedCommand(String::new()),
            Iec104Error::ReadOnly(String::new()),
            Iec104Error::InvalidAddress(String::new()),
            Iec104Error::MissingField("ip"),
            Iec104Error::CacheOverflow { capacity: 1 },
            Iec104Error::ChannelClosed,
            Iec104Error::Disposed,
        ];
        let mut codes: Vec<u16> = errors.iter().map(Iec104Error::code).collect();
        let before = codes.len();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), before);
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Iec104Error::NotConnected.is_connection_error());
        assert!(Iec104Error::ConnectionTimeout.is_connection_error());
        assert!(Iec104Error::T1Timeout.is_connection_error());
        assert!(!Iec104Error::InvalidAddress("x".into()).is_connection_error());
    }

    #[test]
    fn test_is_retryable() {
        assert!(Iec104Error::ConnectionTimeout.is_retryable());
        assert!(Iec104Error::T1Timeout.is_retryable());
        assert!(Iec104Error::CommandTimeout.is_retryable());
        assert!(!Iec104Error::AlreadyConnecting.is_retryable());
        assert!(!Iec104Error::ConnectCancelled.is_retryable());
        assert!(!Iec104Error::MissingField("port").is_retryable());
        assert!(!Iec104Error::UnsupportedCommand("M_SP_NA_1".into()).is_retryable());
    }
}
