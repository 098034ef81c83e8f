//! Bar — the fundamental market data unit.

use serde::{Deserialize, Serialize};

/// OHLCV bar for a single series at a single timestamp.
///
/// Every price column is nullable: storage backends hand back partially
/// populated rows and the simulator decides per operation what it can use.
/// Bars are immutable once loaded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Bar open time in milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
}

impl Bar {
    /// Fully populated bar.
    pub fn new(timestamp: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open: Some(open),
            high: Some(high),
            low: Some(low),
            close: Some(close),
            volume: Some(volume),
        }
    }

    /// Flat bar with all four prices equal.
    pub fn flat(timestamp: i64, price: f64) -> Self {
        Self::new(timestamp, price, price, price, price, 0.0)
    }

    /// Price used to fill market orders on this bar: close, falling back to
    /// open only when close is missing. A present but non-positive or
    /// non-finite close makes the bar unpriceable.
    pub fn execution_price(&self) -> Option<f64> {
        match self.close {
            Some(_) => positive(self.close),
            None => positive(self.open),
        }
    }

    /// High of the bar, or the execution price when high is missing.
    pub fn high_or_price(&self) -> Option<f64> {
        positive(self.high).or_else(|| self.execution_price())
    }

    /// Low of the bar, or the execution price when low is missing.
    pub fn low_or_price(&self) -> Option<f64> {
        positive(self.low).or_else(|| self.execution_price())
    }

    /// True if the bar carries no usable price at all.
    pub fn is_void(&self) -> bool {
        self.execution_price().is_none()
    }
}

fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_price_prefers_close() {
        let bar = Bar::new(0, 99.0, 101.0, 98.0, 100.0, 10.0);
        assert_eq!(bar.execution_price(), Some(100.0));
    }

    #[test]
    fn execution_price_falls_back_to_open() {
        let mut bar = Bar::new(0, 99.0, 101.0, 98.0, 100.0, 10.0);
        bar.close = None;
        assert_eq!(bar.execution_price(), Some(99.0));
    }

    #[test]
    fn non_positive_close_does_not_fall_back_to_open() {
        let mut bar = Bar::flat(0, 0.0);
        assert!(bar.is_void());
        bar.open = Some(5.0);
        assert_eq!(bar.execution_price(), None);
        bar.close = Some(-1.0);
        assert!(bar.is_void());
    }

    #[test]
    fn nan_close_is_void_even_with_open() {
        let mut bar = Bar::flat(0, 1.0);
        bar.close = Some(f64::NAN);
        assert!(bar.is_void());
    }

    #[test]
    fn missing_high_low_use_price() {
        let bar = Bar {
            timestamp: 0,
            open: None,
            high: None,
            low: None,
            close: Some(50.0),
            volume: None,
        };
        assert_eq!(bar.high_or_price(), Some(50.0));
        assert_eq!(bar.low_or_price(), Some(50.0));
    }

    #[test]
    fn bar_serialization_roundtrip() {
        let bar = Bar::new(1_700_000_000_000, 1.0, 2.0, 0.5, 1.5, 42.0);
        let json = serde_json::to_string(&bar).unwrap();
        let deser: Bar = serde_json::from_str(&json).unwrap();
        assert_eq!(bar, deser);
    }
}
