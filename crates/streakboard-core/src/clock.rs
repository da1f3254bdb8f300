//! Calendar-date source.
//!
//! The engine never asks for "now"; every call site obtains `today` from a
//! [`Clock`] so tests can pin the date.

use chrono::{DateTime, FixedOffset, Local, NaiveDate, TimeZone, Utc};

pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;

    /// Timestamp for record metadata such as `created_at`.
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall clock. Uses local time unless a fixed UTC offset is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock {
    offset: Option<FixedOffset>,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock whose day boundary is midnight at `hours` east of UTC.
    /// Returns `None` for offsets outside +/-23 hours.
    pub fn with_utc_offset_hours(hours: i32) -> Option<Self> {
        let offset = FixedOffset::east_opt(hours.checked_mul(3600)?)?;
        Some(Self {
            offset: Some(offset),
        })
    }
}

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        match self.offset {
            Some(offset) => calendar_date(&Utc::now().with_timezone(&offset)),
            None => calendar_date(&Local::now()),
        }
    }
}

/// A clock stuck on one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }

    fn now(&self) -> DateTime<Utc> {
        self.0
            .and_hms_opt(12, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or_else(Utc::now)
    }
}

/// Drop the time of day from a timestamp.
pub fn calendar_date<Tz: TimeZone>(ts: &DateTime<Tz>) -> NaiveDate {
    ts.date_naive()
}
