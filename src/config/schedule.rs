// src/config/schedule.rs
use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

use crate::errors::{ConfigError, ConfigResult};

/// When the scheduler fires: a local time of day in an IANA timezone,
/// optionally restricted to one weekday (weekly digest).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleSpec {
    pub time: NaiveTime,
    pub tz: Tz,
    pub weekday: Option<Weekday>,
}

impl ScheduleSpec {
    pub fn parse(time: &str, tz: &str, weekday: Option<&str>) -> ConfigResult<Self> {
        let time = NaiveTime::parse_from_str(time.trim(), "%H:%M").map_err(|_| {
            ConfigError::InvalidSchedule(format!("time '{time}' is not HH:MM"))
        })?;
        let tz: Tz = tz
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidSchedule(format!("unknown timezone '{tz}'")))?;
        let weekday = match weekday.map(str::trim).filter(|w| !w.is_empty()) {
            Some(w) => Some(w.parse::<Weekday>().map_err(|_| {
                ConfigError::InvalidSchedule(format!("unknown weekday '{w}'"))
            })?),
            None => None,
        };
        Ok(Self { time, tz, weekday })
    }

    /// First fire instant strictly after `now`.
    ///
    /// Local times that do not exist (DST gap) roll forward in 15 minute steps;
    /// ambiguous local times (DST overlap) take the earliest instant.
    pub fn next_fire_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.with_timezone(&self.tz).date_naive();
        for offset in 0..=8 {
            let date = today + Duration::days(offset);
            if let Some(wd) = self.weekday {
                if date.weekday() != wd {
                    continue;
                }
            }
            let mut naive = date.and_time(self.time);
            let mut resolved = None;
            for _ in 0..16 {
                if let Some(t) = self.tz.from_local_datetime(&naive).earliest() {
                    resolved = Some(t.with_timezone(&Utc));
                    break;
                }
                naive += Duration::minutes(15);
            }
            if let Some(t) = resolved {
                if t > now {
                    return t;
                }
            }
        }
        // Unreachable for valid zones; keep the loop alive regardless.
        now + Duration::days(1)
    }

    pub fn describe(&self) -> String {
        match self.weekday {
            Some(wd) => format!("weekly on {wd} at {} {}", self.time.format("%H:%M"), self.tz),
            None => format!("daily at {} {}", self.time.format("%H:%M"), self.tz),
        }
    }
}
