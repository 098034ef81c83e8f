//! Per-instrument mutable simulation state.

use super::event::TradeEvent;
use super::position::Position;
use super::trade::Trade;
use serde::{Deserialize, Serialize};

/// Static per-symbol trading parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolConfig {
    /// Margin committed per entry, in quote currency.
    pub order_value: f64,
    /// Values below 1 are treated as 1.
    pub leverage: f64,
    /// Stop-loss distance as a fraction of margin (0.05 = 5%). `None` disables.
    pub stop_loss_pct: Option<f64>,
    /// Take-profit distance as a fraction of margin. `None` disables.
    pub take_profit_pct: Option<f64>,
    /// Fee per side as a fraction of notional.
    pub fee_rate: f64,
    /// Funding rate per 8h interval.
    pub funding_rate: f64,
    pub slippage_bps: f64,
    /// Close and flip when the opposite entry signal fires.
    pub auto_reverse: bool,
    pub contract_size: f64,
    /// Decimal places kept when normalizing quantity (floor).
    pub quantity_precision: u32,
    /// Smaller quantities are rejected.
    pub min_quantity: f64,
    /// Larger quantities are clamped down. `None` = unbounded.
    pub max_quantity: Option<f64>,
    /// Bars during which entries are paused after a stop-loss exit.
    pub pause_bars_after_stop: usize,
}

impl Default for SymbolConfig {
    fn default() -> Self {
        Self {
            order_value: 1_000.0,
            leverage: 1.0,
            stop_loss_pct: None,
            take_profit_pct: None,
            fee_rate: 0.0005,
            funding_rate: 0.0,
            slippage_bps: 0.0,
            auto_reverse: false,
            contract_size: 1.0,
            quantity_precision: 6,
            min_quantity: 0.0,
            max_quantity: None,
            pause_bars_after_stop: 0,
        }
    }
}

impl SymbolConfig {
    pub fn effective_leverage(&self) -> f64 {
        if self.leverage.is_finite() && self.leverage > 1.0 {
            self.leverage
        } else {
            1.0
        }
    }
}

/// Simulation state for one symbol.
///
/// Owned by the orchestrator; at most one worker touches a given state at a
/// time, so nothing in here is synchronized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolState {
    pub symbol: String,
    pub config: SymbolConfig,
    pub position: Option<Position>,
    /// Net closed-trade P&L plus funding.
    pub realized_pnl: f64,
    /// Net funding paid (positive) or received (negative). Already reflected
    /// in `realized_pnl`; kept for reporting.
    pub accumulated_funding: f64,
    pub trades: Vec<Trade>,
    pub events: Vec<TradeEvent>,
    /// Remaining bars with entries paused.
    pub paused_bars: usize,
}

impl SymbolState {
    pub fn new(symbol: impl Into<String>, config: SymbolConfig) -> Self {
        Self {
            symbol: symbol.into(),
            config,
            position: None,
            realized_pnl: 0.0,
            accumulated_funding: 0.0,
            trades: Vec::new(),
            events: Vec::new(),
            paused_bars: 0,
        }
    }

    pub fn has_position(&self) -> bool {
        self.position.is_some()
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.position
            .as_ref()
            .map(|p| p.unrealized_pnl(price))
            .unwrap_or(0.0)
    }

    pub fn is_paused(&self) -> bool {
        self.paused_bars > 0
    }

    /// Count down the entry pause by one bar.
    pub fn tick_pause(&mut self) {
        self.paused_bars = self.paused_bars.saturating_sub(1);
    }
}
