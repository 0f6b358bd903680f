use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid timezone")]
pub struct InvalidTimezone;

/// A resolved timezone: either a named IANA zone or a fixed offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Named(Tz),
    Fixed(FixedOffset),
}

/// Resolves a user-supplied timezone string.
///
/// Accepted, in order: empty string or "UTC"; an IANA zone name; a strict
/// `±HH:MM` offset with hours 0-23 and minutes 0-59. Nothing else.
pub fn resolve(tz: &str) -> Result<Location, InvalidTimezone> {
    if tz.is_empty() || tz == "UTC" {
        return Ok(Location::Named(Tz::UTC));
    }
    if let Ok(named) = tz.parse::<Tz>() {
        return Ok(Location::Named(named));
    }
    parse_fixed_offset(tz).map(Location::Fixed).ok_or(InvalidTimezone)
}

impl Location {
    /// Projects a stored UTC instant into this zone for display. The stored
    /// value itself never changes.
    pub fn project(self, instant: DateTime<Utc>) -> DateTime<FixedOffset> {
        match self {
            Location::Named(tz) => instant.with_timezone(&tz).fixed_offset(),
            Location::Fixed(offset) => instant.with_timezone(&offset),
        }
    }

    /// Interprets a wall-clock datetime in this zone. Returns `None` for
    /// datetimes skipped by a DST transition; ambiguous ones take the
    /// earlier offset.
    pub fn from_local(self, local: NaiveDateTime) -> Option<DateTime<FixedOffset>> {
        match self {
            Location::Named(tz) => tz
                .from_local_datetime(&local)
                .earliest()
                .map(|dt| dt.fixed_offset()),
            Location::Fixed(offset) => offset.from_local_datetime(&local).single(),
        }
    }
}

fn parse_fixed_offset(tz: &str) -> Option<FixedOffset> {
    let bytes = tz.as_bytes();
    if bytes.len() != 6 || (bytes[0] != b'+' && bytes[0] != b'-') || bytes[3] != b':' {
        return None;
    }
    let hours: u32 = tz.get(1..3)?.parse().ok()?;
    let minutes: u32 = tz.get(4..6)?.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    let seconds = (hours * 3600 + minutes * 60) as i32;
    if bytes[0] == b'-' {
        FixedOffset::west_opt(seconds)
    } else {
        FixedOffset::east_opt(seconds)
    }
}
