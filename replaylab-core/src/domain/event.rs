use super::position::PositionSide;
use super::trade::ExitReason;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Open,
    Close,
}

/// One entry of a symbol's event log. Every Trade has an Open/Close pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub timestamp: i64,
    pub kind: EventKind,
    pub side: PositionSide,
    pub price: f64,
    pub quantity: f64,
    pub fee: f64,
    /// Only set on Close events.
    pub reason: Option<ExitReason>,
    /// Only set on Close events.
    pub pnl: Option<f64>,
}
