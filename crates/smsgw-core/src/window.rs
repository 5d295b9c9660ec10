//! Time-of-day send windows (`SendAfter` / `SendBefore`, UTC).

use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc};
use smsgw_common::types::Epoch;
use smsgw_common::FieldError;

const WINDOW_PAIR: &str = "Both send before and after fields required";

/// Parse `HH:MM` with hour 0..23 and minute 0..59
pub fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    let (h, m) = s.split_once(':')?;
    if h.is_empty() || m.is_empty() || h.len() > 2 || m.len() > 2 {
        return None;
    }
    let hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Field errors for a pair of window bounds
pub fn validate(send_after: &str, send_before: &str) -> Vec<FieldError> {
    let mut errors = Vec::new();
    match (send_after.is_empty(), send_before.is_empty()) {
        (true, true) => {}
        (false, true) => errors.push(FieldError::new("SendBefore", WINDOW_PAIR)),
        (true, false) => errors.push(FieldError::new("SendAfter", WINDOW_PAIR)),
        (false, false) => {
            if parse_hhmm(send_after).is_none() {
                errors.push(FieldError::new("SendAfter", "Invalid time, expected HH:MM"));
            }
            if parse_hhmm(send_before).is_none() {
                errors.push(FieldError::new("SendBefore", "Invalid time, expected HH:MM"));
            }
        }
    }
    errors
}

/// A daily window in which sending is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendWindow {
    after: NaiveTime,
    before: NaiveTime,
}

impl SendWindow {
    pub fn new(after: NaiveTime, before: NaiveTime) -> Self {
        Self { after, before }
    }

    /// Window of a message; None when unrestricted or malformed
    pub fn from_bounds(send_after: &str, send_before: &str) -> Option<Self> {
        if send_after.is_empty() || send_before.is_empty() {
            return None;
        }
        Some(Self::new(parse_hhmm(send_after)?, parse_hhmm(send_before)?))
    }

    /// Whether `now` falls inside the window. A window whose end precedes
    /// its start wraps past midnight; equal bounds never open.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let t = now.time().with_nanosecond(0).unwrap_or(now.time());
        if self.after < self.before {
            t >= self.after && t <= self.before
        } else if self.before < self.after {
            t >= self.after || t <= self.before
        } else {
            false
        }
    }

    /// One second past the next window start: today when `now` precedes
    /// the start, otherwise tomorrow
    pub fn next_opening(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive().and_time(self.after).and_utc() + Duration::seconds(1);
        if now.time() < self.after {
            today
        } else {
            today + Duration::days(1)
        }
    }

    /// None when sending may proceed, else the epoch to reschedule at
    pub fn defer_until(&self, now: DateTime<Utc>) -> Option<Epoch> {
        if self.contains(now) {
            None
        } else {
            Some(self.next_opening(now).timestamp())
        }
    }
}
