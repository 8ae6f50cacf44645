//! Device endpoint configuration.
//!
//! A device is identified by the string
//!
//! ```text
//! IP|Port|CommonAddress|Timeout[|K|W[|key=value;key=value...]]
//! ```
//!
//! `Timeout` is in milliseconds. Extended option keys are matched
//! case-insensitively with `_` and `-` ignored, so `auto_reconnect`,
//! `AutoReconnect` and `auto-reconnect` are the same key.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::client::{ClientConfig, DEFAULT_K, DEFAULT_T1_TIMEOUT, DEFAULT_T2_TIMEOUT, DEFAULT_T3_TIMEOUT, DEFAULT_W};
use crate::error::{Iec104Error, Result};

/// Reconnect and retry behaviour of one engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Reconnect after the link drops or ages out
    pub auto_reconnect: bool,
    /// Delay before a scheduled reconnect
    pub reconnect_interval: Duration,
    /// Attempts per connect call
    pub connect_retries: u32,
    /// Delay between connect attempts
    pub retry_delay: Duration,
    /// Attempts per write call
    pub write_retries: u32,
    /// Delay between write attempts
    pub write_retry_delay: Duration,
    /// Maximum age of one session before it is recycled
    pub lifetime: Option<Duration>,
    /// Maximum silence on a session before it is recycled
    pub idle_timeout: Option<Duration>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            reconnect_interval: Duration::from_secs(5),
            connect_retries: 3,
            retry_delay: Duration::from_secs(1),
            write_retries: 2,
            write_retry_delay: Duration::from_millis(500),
            lifetime: None,
            idle_timeout: None,
        }
    }
}

/// Periodic interrogation behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterrogationPolicy {
    /// Send a general interrogation after connecting and periodically
    pub auto_interrogation: bool,
    /// Period of the interrogation timer
    pub interval: Duration,
    /// Wait after STARTDT before the first interrogation
    pub settle_delay: Duration,
}

impl Default for InterrogationPolicy {
    fn default() -> Self {
        Self {
            auto_interrogation: true,
            interval: Duration::from_secs(60),
            settle_delay: Duration::from_millis(500),
        }
    }
}

/// Identity and protocol parameters of one remote device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEndpoint {
    /// Host name or IP address
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Common address of ASDU
    pub common_address: u16,
    /// Connection / request timeout
    pub timeout: Duration,
    /// K: max unconfirmed outbound I-frames
    pub k: u16,
    /// W: inbound I-frames before acknowledging (W <= K)
    pub w: u16,
    /// T0 (defaults to `timeout`)
    pub t0: Duration,
    /// T1
    pub t1: Duration,
    /// T2
    pub t2: Duration,
    /// T3
    pub t3: Duration,
    /// Reconnect policy
    pub reconnect: ReconnectPolicy,
    /// Interrogation policy
    pub interrogation: InterrogationPolicy,
    /// Clamp normalized set-points into [-1, 1] instead of rejecting them
    pub clamp_normalized: bool,
}

impl DeviceEndpoint {
    /// Endpoint with protocol defaults.
    pub fn new(host: impl Into<String>, port: u16, common_address: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            common_address,
            timeout,
            k: DEFAULT_K,
            w: DEFAULT_W,
            t0: timeout,
            t1: Duration::from_secs(DEFAULT_T1_TIMEOUT),
            t2: Duration::from_secs(DEFAULT_T2_TIMEOUT),
            t3: Duration::from_secs(DEFAULT_T3_TIMEOUT),
            reconnect: ReconnectPolicy::default(),
            interrogation: InterrogationPolicy::default(),
            clamp_normalized: false,
        }
    }

    /// Parse a device identity string.
    pub fn parse(identity: &str) -> Result<Self> {
        let fields: Vec<&str> = identity.trim().split('|').map(str::trim).collect();
        const REQUIRED: [&str; 4] = ["IP", "Port", "CommonAddress", "Timeout"];
        if let Some(missing) = REQUIRED.get(fields.len()) {
            return Err(Iec104Error::MissingField(*missing));
        }

        let host = fields[0];
        if host.is_empty() {
            return Err(invalid("IP", host));
        }
        let port: u16 = parse_field("Port", fields[1])?;
        if port == 0 {
            return Err(invalid("Port", fields[1]));
        }
        let common_address: u16 = parse_field("CommonAddress", fields[2])?;
        let timeout_ms: u64 = parse_field("Timeout", fields[3])?;
        if timeout_ms == 0 {
            return Err(invalid("Timeout", fields[3]));
        }

        let mut endpoint = Self::new(host, port, common_address, Duration::from_millis(timeout_ms));

        if let Some(k) = fields.get(4).filter(|f| !f.is_empty()) {
            endpoint.k = parse_field("K", k)?;
        }
        if let Some(w) = fields.get(5).filter(|f| !f.is_empty()) {
            endpoint.w = parse_field("W", w)?;
        }
        if endpoint.k == 0 || endpoint.k >= crate::types::SEQ_MODULO {
            return Err(invalid("K", endpoint.k));
        }
        if endpoint.w == 0 || endpoint.w > endpoint.k {
            return Err(invalid("W", endpoint.w));
        }

        if let Some(options) = fields.get(6) {
            endpoint.apply_options(options)?;
        }
        if fields.len() > 7 {
            warn!(identity, "Ignoring fields after extended options");
        }
        Ok(endpoint)
    }

    fn apply_options(&mut self, options: &str) -> Result<()> {
        for pair in options.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (raw_key, value) = pair
                .split_once('=')
                .ok_or_else(|| invalid("ExtendedOptions", pair))?;
            let value = value.trim();
            let key: String = raw_key
                .chars()
                .filter(|c| !matches!(c, '_' | '-' | ' '))
                .collect::<String>()
                .to_ascii_lowercase();

            match key.as_str() {
                "t0" => self.t0 = secs(&key, value)?,
                "t1" => self.t1 = secs(&key, value)?,
                "t2" => self.t2 = secs(&key, value)?,
                "t3" => self.t3 = secs(&key, value)?,
                "autoreconnect" => self.reconnect.auto_reconnect = flag(&key, value)?,
                "reconnectinterval" => self.reconnect.reconnect_interval = millis(&key, value)?,
                "connectretries" => self.reconnect.connect_retries = parse_option(&key, value)?,
                "retrydelay" => self.reconnect.retry_delay = millis(&key, value)?,
                "writeretries" => self.reconnect.write_retries = parse_option(&key, value)?,
                "writeretrydelay" => self.reconnect.write_retry_delay = millis(&key, value)?,
                "lifetime" => self.reconnect.lifetime = non_zero(secs(&key, value)?),
                "idletimeout" => self.reconnect.idle_timeout = non_zero(secs(&key, value)?),
                "autointerrogation" => self.interrogation.auto_interrogation = flag(&key, value)?,
                "interrogationinterval" => self.interrogation.interval = millis(&key, value)?,
                "settledelay" => self.interrogation.settle_delay = millis(&key, value)?,
                "clampnormalized" => self.clamp_normalized = flag(&key, value)?,
                _ => warn!(key = raw_key.trim(), "Unknown extended option ignored"),
            }
        }

        if self.reconnect.connect_retries == 0 {
            return Err(invalid("connectretries", 0));
        }
        if self.reconnect.write_retries == 0 {
            return Err(invalid("writeretries", 0));
        }
        if self.interrogation.interval.is_zero() {
            return Err(invalid("interrogationinterval", 0));
        }
        Ok(())
    }

    /// `host:port` socket address string.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Link configuration for this endpoint.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::new(self.address())
            .connect_timeout(self.t0)
            .t1_timeout(self.t1)
            .t2_timeout(self.t2)
            .t3_timeout(self.t3)
            .window(self.k, self.w)
            .request_timeout(self.timeout)
    }
}

impl FromStr for DeviceEndpoint {
    type Err = Iec104Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for DeviceEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}|{}|{}",
            self.host,
            self.port,
            self.common_address,
            self.timeout.as_millis(),
            self.k,
            self.w
        )
    }
}

fn invalid(field: &'static str, value: impl ToString) -> Iec104Error {
    Iec104Error::InvalidDeviceId {
        field,
        value: value.to_string(),
    }
}

fn parse_field<T: FromStr>(field: &'static str, text: &str) -> Result<T> {
    text.parse().map_err(|_| invalid(field, text))
}

fn parse_option<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| Iec104Error::InvalidDeviceId {
        field: "ExtendedOptions",
        value: format!("{key}={value}"),
    })
}

fn secs(key: &str, value: &str) -> Result<Duration> {
    parse_option(key, value).map(Duration::from_secs)
}

fn millis(key: &str, value: &str) -> Result<Duration> {
    parse_option(key, value).map(Duration::from_millis)
}

fn flag(key: &str, value: &str) -> Result<bool> {
    crate::value::parse_bool(value).ok_or_else(|| Iec104Error::InvalidDeviceId {
        field: "ExtendedOptions",
        value: format!("{key}={value}"),
    })
}

fn non_zero(duration: Duration) -> Option<Duration> {
    (!duration.is_zero()).then_some(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_identity() {
        let endpoint = DeviceEndpoint::parse("10.0.0.5|2404|1|5000").unwrap();
        assert_eq!(endpoint.host, "10.0.0.5");
        assert_eq!(endpoint.port, 2404);
        assert_eq!(endpoint.common_address, 1);
        assert_eq!(endpoint.timeout, Duration::from_millis(5000));
        assert_eq!(endpoint.k, 12);
        assert_eq!(endpoint.w, 8);
        assert_eq!(endpoint.t0, Duration::from_millis(5000));
        assert_eq!(endpoint.address(), "10.0.0.5:2404");
        assert_eq!(endpoint.to_string(), "10.0.0.5|2404|1|5000|12|8");
    }

    #[test]
    fn test_window_fields() {
        let endpoint: DeviceEndpoint = "plc-7|2405|3|1000|20|10".parse().unwrap();
        assert_eq!((endpoint.k, endpoint.w), (20, 10));

        let endpoint = DeviceEndpoint::parse("plc|2404|1|1000||").unwrap();
        assert_eq!((endpoint.k, endpoint.w), (12, 8));
    }

    #[test]
    fn test_under_length_names_missing_field() {
        assert!(matches!(
            DeviceEndpoint::parse("10.0.0.5|2404|1"),
            Err(Iec104Error::MissingField("Timeout"))
        ));
        assert!(matches!(
            DeviceEndpoint::parse("10.0.0.5"),
            Err(Iec104Error::MissingField("Port"))
        ));
    }

    #[test]
    fn test_malformed_fields_are_named() {
        let cases = [
            ("10.0.0.5|http|1|5000", "Port"),
            ("10.0.0.5|0|1|5000", "Port"),
            ("10.0.0.5|2404|70000|5000", "CommonAddress"),
            ("10.0.0.5|2404|1|soon", "Timeout"),
            ("10.0.0.5|2404|1|5000|0", "K"),
            ("10.0.0.5|2404|1|5000|4|8", "W"),
            ("|2404|1|5000", "IP"),
        ];
        for (identity, expected) in cases {
            match DeviceEndpoint::parse(identity) {
                Err(Iec104Error::InvalidDeviceId { field, .. }) => {
                    assert_eq!(field, expected, "{identity}")
                }
                other => panic!("{identity}: {other:?}"),
            }
        }
    }

    #[test]
    fn test_extended_options() {
        let endpoint = DeviceEndpoint::parse(
            "10.0.0.5|2404|1|5000|12|8|T1=20;t3=30;Auto_Reconnect=off;reconnect-interval=2500;\
             AutoInterrogation=yes;InterrogationInterval=30000;lifetime=3600;connectRetries=5;clamp_normalized=1",
        )
        .unwrap();
        assert_eq!(endpoint.t1, Duration::from_secs(20));
        assert_eq!(endpoint.t3, Duration::from_secs(30));
        assert!(!endpoint.reconnect.auto_reconnect);
        assert_eq!(endpoint.reconnect.reconnect_interval, Duration::from_millis(2500));
        assert!(endpoint.interrogation.auto_interrogation);
        assert_eq!(endpoint.interrogation.interval, Duration::from_secs(30));
        assert_eq!(endpoint.reconnect.lifetime, Some(Duration::from_secs(3600)));
        assert_eq!(endpoint.reconnect.connect_retries, 5);
        assert!(endpoint.clamp_normalized);
    }

    #[test]
    fn test_bad_option_value_names_key() {
        let err = DeviceEndpoint::parse("h|2404|1|5000|12|8|t1=fast").unwrap_err();
        assert!(matches!(
            err,
            Iec104Error::InvalidDeviceId { field: "ExtendedOptions", ref value } if value == "t1=fast"
        ));
        assert!(DeviceEndpoint::parse("h|2404|1|5000|12|8|t1").is_err());
        assert!(DeviceEndpoint::parse("h|2404|1|5000|12|8|connectretries=0").is_err());
    }

    #[test]
    fn test_unknown_option_is_ignored() {
        let endpoint = DeviceEndpoint::parse("h|2404|1|5000|12|8|colour=blue;t2=5").unwrap();
        assert_eq!(endpoint.t2, Duration::from_secs(5));
    }

    #[test]
    fn test_client_config_from_endpoint() {
        let endpoint = DeviceEndpoint::parse("h|2404|1|5000|10|5|t0=7").unwrap();
        let config = endpoint.client_config();
        assert_eq!(config.address, "h:2404");
        assert_eq!(config.connect_timeout, Duration::from_secs(7));
        assert_eq!((config.k, config.w), (10, 5));
        assert_eq!(config.request_timeout, Duration::from_millis(5000));
    }
}
