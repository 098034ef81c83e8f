//! Bar timeframes and equity-curve granularities.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const MINUTE_MS: i64 = 60_000;
pub const HOUR_MS: i64 = 60 * MINUTE_MS;
pub const DAY_MS: i64 = 24 * HOUR_MS;
/// Funding settlement interval used to scale per-bar funding.
pub const FUNDING_INTERVAL_MS: i64 = 8 * HOUR_MS;
/// 365-day year, used for annualization.
pub const YEAR_MS: i64 = 365 * DAY_MS;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unsupported timeframe '{0}' (expected one of 1m,3m,5m,15m,30m,1h,2h,4h,6h,8h,12h,1d,3d,1w)")]
pub struct TimeframeError(pub String);

/// Bar interval. Also used as the bucket size of equity curves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Timeframe {
    M1,
    M3,
    M5,
    M15,
    M30,
    H1,
    H2,
    H4,
    H6,
    H8,
    H12,
    D1,
    D3,
    W1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 14] = [
        Timeframe::M1,
        Timeframe::M3,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H2,
        Timeframe::H4,
        Timeframe::H6,
        Timeframe::H8,
        Timeframe::H12,
        Timeframe::D1,
        Timeframe::D3,
        Timeframe::W1,
    ];

    pub fn as_millis(self) -> i64 {
        match self {
            Timeframe::M1 => MINUTE_MS,
            Timeframe::M3 => 3 * MINUTE_MS,
            Timeframe::M5 => 5 * MINUTE_MS,
            Timeframe::M15 => 15 * MINUTE_MS,
            Timeframe::M30 => 30 * MINUTE_MS,
            Timeframe::H1 => HOUR_MS,
            Timeframe::H2 => 2 * HOUR_MS,
            Timeframe::H4 => 4 * HOUR_MS,
            Timeframe::H6 => 6 * HOUR_MS,
            Timeframe::H8 => 8 * HOUR_MS,
            Timeframe::H12 => 12 * HOUR_MS,
            Timeframe::D1 => DAY_MS,
            Timeframe::D3 => 3 * DAY_MS,
            Timeframe::W1 => 7 * DAY_MS,
        }
    }

    /// Canonical lower-case label, e.g. `"4h"`.
    pub fn label(self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H2 => "2h",
            Timeframe::H4 => "4h",
            Timeframe::H6 => "6h",
            Timeframe::H8 => "8h",
            Timeframe::H12 => "12h",
            Timeframe::D1 => "1d",
            Timeframe::D3 => "3d",
            Timeframe::W1 => "1w",
        }
    }

    /// Number of periods of this length in a 365-day year.
    pub fn periods_per_year(self) -> f64 {
        YEAR_MS as f64 / self.as_millis() as f64
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Timeframe {
    type Err = TimeframeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        // "7d" is accepted as an alias for one week; "60m" etc. are not.
        let key = match normalized.as_str() {
            "7d" => "1w",
            other => other,
        };
        Timeframe::ALL
            .iter()
            .copied()
            .find(|tf| tf.label() == key)
            .ok_or_else(|| TimeframeError(s.to_string()))
    }
}

impl TryFrom<String> for Timeframe {
    type Error = TimeframeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.label().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("4H".parse::<Timeframe>().unwrap(), Timeframe::H4);
        assert_eq!(" 1d ".parse::<Timeframe>().unwrap(), Timeframe::D1);
    }

    #[test]
    fn seven_days_is_one_week() {
        assert_eq!("7d".parse::<Timeframe>().unwrap(), Timeframe::W1);
        assert_eq!(Timeframe::W1.as_millis(), 7 * DAY_MS);
    }

    #[test]
    fn unknown_timeframe_is_rejected() {
        assert!("2d".parse::<Timeframe>().is_err());
        assert!("".parse::<Timeframe>().is_err());
    }

    #[test]
    fn labels_roundtrip() {
        for tf in Timeframe::ALL {
            assert_eq!(tf.label().parse::<Timeframe>().unwrap(), tf);
        }
    }

    #[test]
    fn serde_uses_label() {
        let json = serde_json::to_string(&Timeframe::M15).unwrap();
        assert_eq!(json, "\"15m\"");
        let tf: Timeframe = serde_json::from_str("\"8h\"").unwrap();
        assert_eq!(tf, Timeframe::H8);
    }

    #[test]
    fn hourly_periods_per_year() {
        assert!((Timeframe::H1.periods_per_year() - 8760.0).abs() < 1e-9);
    }
}
