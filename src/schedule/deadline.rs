use chrono::{DateTime, FixedOffset, LocalResult, Local, TimeZone, Utc};
use config::ConfigError;
use serde::{Deserialize, Serialize};

/// Calendar form of the registration deadline, as configured.
///
/// The calendar value is read in the zone the operator lives in and resolved
/// once to an absolute instant, which is then compared against the
/// authority's (UTC) clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDeadline {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    #[serde(default)]
    pub second: u32,
}

impl TargetDeadline {
    /// Resolves in a fixed zone `utc_offset_minutes` east of UTC, or in the
    /// host's zone when `None`.
    pub fn resolve(&self, utc_offset_minutes: Option<i32>) -> Result<DateTime<Utc>, ConfigError> {
        match utc_offset_minutes {
            Some(minutes) => {
                let zone = minutes
                    .checked_mul(60)
                    .and_then(FixedOffset::east_opt)
                    .ok_or_else(|| {
                        ConfigError::Message(format!("invalid utc offset: {minutes} minutes"))
                    })?;
                self.resolve_in(&zone)
            }
            None => self.resolve_in(&Local),
        }
    }

    pub fn resolve_in<Tz: TimeZone>(&self, zone: &Tz) -> Result<DateTime<Utc>, ConfigError> {
        match zone.with_ymd_and_hms(
            self.year,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
        ) {
            LocalResult::Single(instant) => Ok(instant.with_timezone(&Utc)),
            LocalResult::Ambiguous(_, _) => Err(ConfigError::Message(format!(
                "deadline {self} is ambiguous in the configured zone"
            ))),
            LocalResult::None => Err(ConfigError::Message(format!(
                "deadline {self} is not a valid calendar instant"
            ))),
        }
    }
}

impl std::fmt::Display for TargetDeadline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}
