//! Conversion of UTC instants to minutes-of-day in the wearer's zone.

use chrono::{DateTime, Local, Timelike, Utc};
use chrono_tz::Tz;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Unknown time zone '{0}'")]
pub struct ZoneError(pub String);

/// The zone used to evaluate the sleep window.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum LocalZone {
    /// The system's local zone
    #[default]
    System,
    /// An explicit IANA zone
    Named(Tz),
}

impl LocalZone {
    /// Parse an optional IANA name; `None` selects the system zone.
    pub fn parse(name: Option<&str>) -> Result<Self, ZoneError> {
        match name {
            None => Ok(LocalZone::System),
            Some(name) => name
                .parse::<Tz>()
                .map(LocalZone::Named)
                .map_err(|_| ZoneError(name.to_string())),
        }
    }

    /// Minutes since local midnight.
    pub fn minute_of_day(&self, instant: DateTime<Utc>) -> u32 {
        match self {
            LocalZone::System => {
                let local = instant.with_timezone(&Local);
                local.hour() * 60 + local.minute()
            }
            LocalZone::Named(tz) => {
                let local = instant.with_timezone(tz);
                local.hour() * 60 + local.minute()
            }
        }
    }
}
