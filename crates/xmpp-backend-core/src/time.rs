//! Timestamp normalization.
//!
//! Every timestamp crossing the contract is UTC. Naive values are interpreted as UTC,
//! aware values in any timezone are converted.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// Conversion of naive or timezone-aware datetimes into UTC.
pub trait IntoUtc {
    fn into_utc(self) -> DateTime<Utc>;
}

impl IntoUtc for NaiveDateTime {
    fn into_utc(self) -> DateTime<Utc> {
        self.and_utc()
    }
}

impl<Tz: TimeZone> IntoUtc for DateTime<Tz> {
    fn into_utc(self) -> DateTime<Utc> {
        self.with_timezone(&Utc)
    }
}

/// Unix timestamp (seconds) of `dt`.
pub fn datetime_to_timestamp(dt: impl IntoUtc) -> i64 {
    dt.into_utc().timestamp()
}

/// Naive UTC datetime for a Unix timestamp, `None` if out of range.
pub fn timestamp_to_datetime(timestamp: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp(timestamp, 0).map(|dt| dt.naive_utc())
}
