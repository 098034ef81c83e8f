//! Per-bar execution context handed to decision sources.

use crate::domain::{Bar, PositionSide};
use std::collections::HashMap;

/// Everything a decision source may look at for one symbol on one bar.
///
/// Contexts are rented from `EnginePools` and reset between bars, so the
/// indicator map keeps its allocation across the run.
#[derive(Debug, Clone, Default)]
pub struct BarContext {
    pub symbol: String,
    pub timestamp: i64,
    /// Index of `bar` within the symbol's series.
    pub bar_index: usize,
    pub bar: Option<Bar>,
    pub position: Option<PositionSide>,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    /// Filled by `DecisionSource::compute_indicators` when the source uses them.
    pub indicators: HashMap<String, f64>,
}

impl BarContext {
    pub fn indicator(&self, name: &str) -> Option<f64> {
        self.indicators.get(name).copied()
    }

    pub fn is_flat(&self) -> bool {
        self.position.is_none()
    }

    pub fn clear(&mut self) {
        self.symbol.clear();
        self.timestamp = 0;
        self.bar_index = 0;
        self.bar = None;
        self.position = None;
        self.unrealized_pnl = 0.0;
        self.realized_pnl = 0.0;
        self.indicators.clear();
    }
}
