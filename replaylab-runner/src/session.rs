//! Trading session gates.
//!
//! A gate decides, per timestamp, whether new entries and/or exits may be
//! taken. Risk exits (stop-loss / take-profit) and funding are never gated.

use chrono::{DateTime, Datelike, Timelike, Weekday};
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// What a session allows at one timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPermit {
    pub entries: bool,
    pub exits: bool,
}

impl SessionPermit {
    pub const OPEN: SessionPermit = SessionPermit {
        entries: true,
        exits: true,
    };
}

pub trait SessionGate: Send + Sync {
    fn permits(&self, timestamp_ms: i64) -> SessionPermit;
}

/// Trade around the clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOpen;

impl SessionGate for AlwaysOpen {
    fn permits(&self, _timestamp_ms: i64) -> SessionPermit {
        SessionPermit::OPEN
    }
}

/// Hour-of-day window in UTC, optionally limited to some weekdays.
///
/// `start_hour..end_hour` is half-open and wraps past midnight when
/// `start_hour > end_hour`; equal hours mean the whole day. Outside the
/// window entries are refused; exits are refused too when `gate_exits`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UtcSessionGate {
    pub start_hour: u32,
    pub end_hour: u32,
    /// Empty means every day.
    pub weekdays: Vec<Weekday>,
    pub gate_exits: bool,
}

impl Default for UtcSessionGate {
    fn default() -> Self {
        Self {
            start_hour: 0,
            end_hour: 0,
            weekdays: Vec::new(),
            gate_exits: false,
        }
    }
}

impl UtcSessionGate {
    pub fn new(start_hour: u32, end_hour: u32) -> Self {
        Self {
            start_hour,
            end_hour,
            ..Self::default()
        }
    }

    pub fn on_weekdays(mut self, weekdays: impl IntoIterator<Item = Weekday>) -> Self {
        self.weekdays = weekdays.into_iter().collect();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start_hour > 23 || self.end_hour > 23 {
            return Err(ConfigError::InvalidParameter {
                name: "session".into(),
                reason: format!(
                    "hours must be 0..=23, got {}..{}",
                    self.start_hour, self.end_hour
                ),
            });
        }
        Ok(())
    }

    fn in_session(&self, timestamp_ms: i64) -> bool {
        let Some(dt) = DateTime::from_timestamp_millis(timestamp_ms) else {
            return false;
        };
        if !self.weekdays.is_empty() && !self.weekdays.contains(&dt.weekday()) {
            return false;
        }
        let hour = dt.hour();
        match self.start_hour.cmp(&self.end_hour) {
            std::cmp::Ordering::Equal => true,
            std::cmp::Ordering::Less => hour >= self.start_hour && hour < self.end_hour,
            std::cmp::Ordering::Greater => hour >= self.start_hour || hour < self.end_hour,
        }
    }
}

impl SessionGate for UtcSessionGate {
    fn permits(&self, timestamp_ms: i64) -> SessionPermit {
        let open = self.in_session(timestamp_ms);
        SessionPermit {
            entries: open,
            exits: open || !self.gate_exits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: i64 = 3_600_000;
    // 2024-01-01 00:00 UTC, a Monday.
    const MONDAY: i64 = 1_704_067_200_000;

    #[test]
    fn always_open_permits_everything() {
        assert_eq!(AlwaysOpen.permits(0), SessionPermit::OPEN);
    }

    #[test]
    fn hour_window() {
        let gate = UtcSessionGate::new(8, 16);
        assert!(!gate.permits(MONDAY + 7 * HOUR).entries);
        assert!(gate.permits(MONDAY + 8 * HOUR).entries);
        assert!(!gate.permits(MONDAY + 16 * HOUR).entries);
        assert!(gate.permits(MONDAY + 20 * HOUR).exits);
    }

    #[test]
    fn wrapping_window() {
        let gate = UtcSessionGate::new(22, 2);
        assert!(gate.permits(MONDAY + 23 * HOUR).entries);
        assert!(gate.permits(MONDAY + HOUR).entries);
        assert!(!gate.permits(MONDAY + 12 * HOUR).entries);
    }

    #[test]
    fn weekday_filter_and_gated_exits() {
        let mut gate = UtcSessionGate::new(0, 0).on_weekdays([Weekday::Tue]);
        gate.gate_exits = true;
        let monday = gate.permits(MONDAY + 12 * HOUR);
        assert!(!monday.entries);
        assert!(!monday.exits);
        assert!(gate.permits(MONDAY + 36 * HOUR).entries);
    }

    #[test]
    fn out_of_range_hours_rejected() {
        assert!(UtcSessionGate::new(0, 24).validate().is_err());
        assert!(UtcSessionGate::new(9, 17).validate().is_ok());
    }
}
