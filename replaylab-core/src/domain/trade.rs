//! Trade — a closed round trip.

use super::position::PositionSide;
use serde::{Deserialize, Serialize};

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitReason {
    /// Strategy exit branch fired.
    Signal,
    /// Closed to open the opposite side (auto-reverse).
    Reverse,
    TakeProfit,
    StopLoss,
    /// Force-closed at the end of the data.
    End,
}

/// Immutable closed-position record. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub side: PositionSide,

    // ── Entry ──
    pub entry_time: i64,
    pub entry_price: f64,

    // ── Exit ──
    pub exit_time: i64,
    pub exit_price: f64,

    // ── Size ──
    pub quantity: f64,
    pub contract_size: f64,

    // ── PnL ──
    /// Entry plus exit fee.
    pub fee: f64,
    /// Gross P&L minus fees. Funding is booked separately.
    pub pnl: f64,
    /// Net funding paid while the position was open (negative = received).
    pub funding: f64,

    pub exit_reason: ExitReason,
    pub slippage_bps: f64,
}

impl Trade {
    /// Return on the entry notional.
    pub fn return_pct(&self) -> f64 {
        let notional = self.entry_price * self.quantity * self.contract_size;
        if notional <= 0.0 {
            return 0.0;
        }
        self.pnl / notional
    }

    pub fn is_winner(&self) -> bool {
        self.pnl > 0.0
    }

    pub fn is_loser(&self) -> bool {
        self.pnl < 0.0
    }

    pub fn holding_ms(&self) -> i64 {
        (self.exit_time - self.entry_time).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_trade() -> Trade {
        Trade {
            symbol: "BTCUSDT".into(),
            side: PositionSide::Long,
            entry_time: 1_000,
            entry_price: 100.0,
            exit_time: 61_000,
            exit_price: 110.0,
            quantity: 5.0,
            contract_size: 1.0,
            fee: 1.0,
            pnl: 49.0,
            funding: 0.0,
            exit_reason: ExitReason::TakeProfit,
            slippage_bps: 0.0,
        }
    }

    #[test]
    fn return_pct_calculation() {
        let trade = sample_trade();
        assert!((trade.return_pct() - 49.0 / 500.0).abs() < 1e-12);
    }

    #[test]
    fn winner_and_duration() {
        let trade = sample_trade();
        assert!(trade.is_winner());
        assert!(!trade.is_loser());
        assert_eq!(trade.holding_ms(), 60_000);
    }

    #[test]
    fn zero_notional_return_is_zero() {
        let mut trade = sample_trade();
        trade.quantity = 0.0;
        assert_eq!(trade.return_pct(), 0.0);
    }
}
