//! Dispatch gates - boolean predicates that can veto a tick
//!
//! Business-hours math stays deliberately small: one fixed UTC offset, one
//! daily window, a set of weekdays. Anything richer plugs in behind the
//! [`DispatchGate`] trait.

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc, Weekday};

/// Whether dispatch may run at `now`
pub trait DispatchGate: Send + Sync {
    fn is_open(&self, now: DateTime<Utc>) -> bool;
}

/// Never vetoes
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOpen;

impl DispatchGate for AlwaysOpen {
    fn is_open(&self, _now: DateTime<Utc>) -> bool {
        true
    }
}

/// Open during `[start_hour, end_hour)` local time on the given weekdays
#[derive(Debug, Clone)]
pub struct BusinessHours {
    offset: FixedOffset,
    start_hour: u32,
    end_hour: u32,
    days: Vec<Weekday>,
}

impl BusinessHours {
    /// Returns `None` for an out-of-range offset or an empty window
    pub fn new(utc_offset_minutes: i32, start_hour: u32, end_hour: u32, days: Vec<Weekday>) -> Option<Self> {
        let offset = FixedOffset::east_opt(utc_offset_minutes.checked_mul(60)?)?;
        if start_hour >= end_hour || end_hour > 24 {
            return None;
        }
        Some(Self {
            offset,
            start_hour,
            end_hour,
            days,
        })
    }

    /// Monday to Friday
    pub fn weekdays() -> Vec<Weekday> {
        vec![Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri]
    }
}

impl DispatchGate for BusinessHours {
    fn is_open(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.offset);
        self.days.contains(&local.weekday()) && local.hour() >= self.start_hour && local.hour() < self.end_hour
    }
}

/// Parse a weekday name ("mon", "Monday", ...)
pub fn parse_weekday(name: &str) -> Option<Weekday> {
    name.trim().parse::<Weekday>().ok()
}
