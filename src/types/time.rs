//! Binary time tags (CP24Time2a, CP56Time2a).

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};

use crate::error::{Iec104Error, Result};

/// Time tag attached to an information element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeTag {
    /// No time tag
    None,
    /// CP24Time2a (milliseconds and minutes, 3 bytes)
    Cp24,
    /// CP56Time2a (full date and time, 7 bytes)
    Cp56,
}

impl TimeTag {
    /// Encoded length in bytes.
    #[inline]
    pub const fn len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Cp24 => 3,
            Self::Cp56 => 7,
        }
    }

    /// Whether no time tag is present.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// CP24Time2a timestamp (3 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cp24Time2a {
    /// Milliseconds within the minute (0-59999)
    pub milliseconds: u16,
    /// Minutes (0-59)
    pub minutes: u8,
    /// Invalid flag
    pub invalid: bool,
}

impl Cp24Time2a {
    /// Parse from 3 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 3 {
            return Err(Iec104Error::invalid_asdu("CP24Time2a too short"));
        }
        Ok(Self {
            milliseconds: u16::from_le_bytes([bytes[0], bytes[1]]),
            minutes: bytes[2] & 0x3F,
            invalid: bytes[2] & 0x80 != 0,
        })
    }
}

/// CP56Time2a timestamp (7 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cp56Time2a {
    /// Milliseconds within the minute (0-59999)
    pub milliseconds: u16,
    /// Minutes (0-59)
    pub minutes: u8,
    /// Hours (0-23)
    pub hours: u8,
    /// Day of month (1-31)
    pub day: u8,
    /// Day of week (1-7, 1=Monday, 0=unused)
    pub day_of_week: u8,
    /// Month (1-12)
    pub month: u8,
    /// Year (0-99, years since 2000)
    pub year: u8,
    /// Invalid flag
    pub invalid: bool,
    /// Summer time flag
    pub summer_time: bool,
}

impl Cp56Time2a {
    /// Parse from 7 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 7 {
            return Err(Iec104Error::invalid_asdu("CP56Time2a too short"));
        }

        Ok(Self {
            milliseconds: u16::from_le_bytes([bytes[0], bytes[1]]),
            minutes: bytes[2] & 0x3F,
            invalid: bytes[2] & 0x80 != 0,
            hours: bytes[3] & 0x1F,
            summer_time: bytes[3] & 0x80 != 0,
            day: bytes[4] & 0x1F,
            day_of_week: (bytes[4] >> 5) & 0x07,
            month: bytes[5] & 0x0F,
            year: bytes[6] & 0x7F,
        })
    }

    /// Encode to 7 bytes.
    pub fn to_bytes(&self) -> [u8; 7] {
        let ms = self.milliseconds.to_le_bytes();
        [
            ms[0],
            ms[1],
            (self.minutes & 0x3F) | if self.invalid { 0x80 } else { 0 },
            (self.hours & 0x1F) | if self.summer_time { 0x80 } else { 0 },
            (self.day & 0x1F) | ((self.day_of_week & 0x07) << 5),
            self.month & 0x0F,
            self.year & 0x7F,
        ]
    }

    /// Build from a UTC instant.
    pub fn from_datetime(time: &DateTime<Utc>) -> Self {
        let millis = time.second() * 1000 + time.timestamp_subsec_millis().min(999);
        Self {
            milliseconds: millis as u16,
            minutes: time.minute() as u8,
            hours: time.hour() as u8,
            day: time.day() as u8,
            day_of_week: time.weekday().number_from_monday() as u8,
            month: time.month() as u8,
            year: (time.year().rem_euclid(100)) as u8,
            invalid: false,
            summer_time: false,
        }
    }

    /// Current UTC time.
    pub fn now() -> Self {
        Self::from_datetime(&Utc::now())
    }

    /// Convert to a UTC instant.
    ///
    /// Returns `Ok(None)` if the IV flag marks the time as invalid and an
    /// error if the fields do not form a calendar date.
    pub fn to_datetime(&self) -> Result<Option<DateTime<Utc>>> {
        if self.invalid {
            return Ok(None);
        }

        let seconds = u32::from(self.milliseconds / 1000);
        let millis = u32::from(self.milliseconds % 1000);
        NaiveDate::from_ymd_opt(
            2000 + i32::from(self.year),
            u32::from(self.month),
            u32::from(self.day),
        )
        .and_then(|date| {
            date.and_hms_milli_opt(
                u32::from(self.hours),
                u32::from(self.minutes),
                seconds,
                millis,
            )
        })
        .map(|naive| Some(Utc.from_utc_datetime(&naive)))
        .ok_or_else(|| Iec104Error::InvalidTimestamp(self.to_string()))
    }
}

impl std::fmt::Display for Cp56Time2a {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "20{:02}-{:02}-{:02} {:02}:{:02}:{:02}.{:03}",
            self.year,
            self.month,
            self.day,
            self.hours,
            self.minutes,
            self.milliseconds / 1000,
            self.milliseconds % 1000
        )?;
        if self.invalid {
            f.write_str(" (IV)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Cp56Time2a {
        Cp56Time2a {
            milliseconds: 30_250,
            minutes: 30,
            hours: 12,
            day: 15,
            day_of_week: 6,
            month: 6,
            year: 24,
            invalid: false,
            summer_time: true,
        }
    }

    #[test]
    fn test_cp56_bytes() {
        let time = sample();
        let parsed = Cp56Time2a::from_bytes(&time.to_bytes()).unwrap();
        assert_eq!(parsed, time);
        assert!(Cp56Time2a::from_bytes(&[0; 6]).is_err());
    }

    #[test]
    fn test_cp56_to_datetime() {
        let dt = sample().to_datetime().unwrap().unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-06-15T12:30:30.250+00:00");
    }

    #[test]
    fn test_cp56_invalid_flag_yields_none() {
        let time = Cp56Time2a {
            invalid: true,
            ..sample()
        };
        assert_eq!(time.to_datetime().unwrap(), None);
    }

    #[test]
    fn test_cp56_bad_calendar_date() {
        let time = Cp56Time2a {
            month: 13,
            ..sample()
        };
        assert!(matches!(
            time.to_datetime(),
            Err(Iec104Error::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_cp56_from_datetime() {
        let dt = Utc.with_ymd_and_hms(2025, 1, 6, 8, 5, 9).unwrap();
        let time = Cp56Time2a::from_datetime(&dt);
        assert_eq!(time.year, 25);
        assert_eq!(time.month, 1);
        assert_eq!(time.day, 6);
        assert_eq!(time.day_of_week, 1);
        assert_eq!(time.hours, 8);
        assert_eq!(time.minutes, 5);
        assert_eq!(time.milliseconds, 9_000);
        assert_eq!(time.to_datetime().unwrap(), Some(dt));
    }

    #[test]
    fn test_cp24() {
        let time = Cp24Time2a::from_bytes(&[0x10, 0x27, 0x85]).unwrap();
        assert_eq!(time.milliseconds, 10_000);
        assert_eq!(time.minutes, 5);
        assert!(time.invalid);
    }
}
