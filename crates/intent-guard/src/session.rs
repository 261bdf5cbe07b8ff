//! Trading-session window.
//!
//! A timestamp is in session when, in the configured timezone, it falls on a
//! weekday and between start and end inclusive.

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionWindow {
    tz: Tz,
    start: NaiveTime,
    end: NaiveTime,
}

impl SessionWindow {
    pub fn new(tz: Tz, start: NaiveTime, end: NaiveTime) -> Result<Self, ConfigError> {
        if start > end {
            return Err(ConfigError::EmptySessionWindow {
                start: start.format("%H:%M").to_string(),
                end: end.format("%H:%M").to_string(),
            });
        }
        Ok(Self { tz, start, end })
    }

    /// Build from an IANA timezone name and `HH:MM` bounds.
    pub fn parse(tz: &str, start: &str, end: &str) -> Result<Self, ConfigError> {
        let tz: Tz = tz
            .parse()
            .map_err(|_| ConfigError::UnknownTimezone(tz.to_string()))?;
        Self::new(tz, parse_time_of_day(start)?, parse_time_of_day(end)?)
    }

    pub fn in_session(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.tz);
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let time = local.time();
        self.start <= time && time <= self.end
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// `HH:MM-HH:MM`
    pub fn describe(&self) -> String {
        format!("{}-{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

/// Parse `HH:MM` into a time with zero seconds.
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime, ConfigError> {
    let invalid = || ConfigError::InvalidTimeOfDay(s.to_string());
    let (h, m) = s.trim().split_once(':').ok_or_else(invalid)?;
    let h: u32 = h.parse().map_err(|_| invalid())?;
    let m: u32 = m.parse().map_err(|_| invalid())?;
    NaiveTime::from_hms_opt(h, m, 0).ok_or_else(invalid)
}
