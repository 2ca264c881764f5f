use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One of the six fixed two-hour booking windows of a day.
///
/// Variant order is the canonical slot order; `Ord` follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Slot {
    H08,
    H10,
    H12,
    H14,
    H16,
    H18,
}

impl Slot {
    pub const ALL: [Slot; 6] = [Slot::H08, Slot::H10, Slot::H12, Slot::H14, Slot::H16, Slot::H18];

    pub fn label(self) -> &'static str {
        match self {
            Slot::H08 => "08-10",
            Slot::H10 => "10-12",
            Slot::H12 => "12-14",
            Slot::H14 => "14-16",
            Slot::H16 => "16-18",
            Slot::H18 => "18-20",
        }
    }

    pub fn start_hour(self) -> u32 {
        match self {
            Slot::H08 => 8,
            Slot::H10 => 10,
            Slot::H12 => 12,
            Slot::H14 => 14,
            Slot::H16 => 16,
            Slot::H18 => 18,
        }
    }

    pub fn end_hour(self) -> u32 {
        self.start_hour() + 2
    }

    /// True while the slot on `date` has not ended yet, as seen at `now`.
    pub fn is_open_at(self, date: NaiveDate, now: NaiveDateTime) -> bool {
        let today = now.date();
        if date != today {
            return date > today;
        }
        now.hour() < self.end_hour()
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidSlot(pub String);

impl fmt::Display for InvalidSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid time slot: {:?}", self.0)
    }
}

impl std::error::Error for InvalidSlot {}

impl FromStr for Slot {
    type Err = InvalidSlot;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Slot::ALL
            .into_iter()
            .find(|slot| slot.label() == s.trim())
            .ok_or_else(|| InvalidSlot(s.to_string()))
    }
}

impl Serialize for Slot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for Slot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidDate(pub String);

impl fmt::Display for InvalidDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid date: {:?}", self.0)
    }
}

impl std::error::Error for InvalidDate {}

/// Reduce a client-supplied date to its calendar day.
///
/// Accepts `YYYY-MM-DD`, an RFC 3339 timestamp, or a naive ISO date-time.
/// Time of day and offset are dropped; the day is kept as written.
pub fn normalize_date(raw: &str) -> Result<NaiveDate, InvalidDate> {
    let s = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(date);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.naive_local().date());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
    }
    Err(InvalidDate(raw.to_string()))
}

/// Serde adapter for request fields carrying a date in any accepted form.
pub mod lenient_date {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::normalize_date(&raw).map_err(serde::de::Error::custom)
    }
}
