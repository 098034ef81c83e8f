use serde::{Deserialize, Serialize};

/// One bucket of an equity curve.
///
/// `timestamp` is the bucket start. Cumulative fields carry the last sample
/// seen in the bucket; `period_*` fields are deltas against the previous
/// emitted point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: i64,
    pub equity: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub period_realized_pnl: f64,
    pub period_unrealized_pnl: f64,
    pub period_equity_change: f64,
}
