//! Fill simulation against a single bar.

use super::action::Action;
use super::pricing::{
    apply_slippage, compute_fee, normalize_quantity, stop_loss_price, take_profit_price,
};
use crate::domain::timeframe::FUNDING_INTERVAL_MS;
use crate::domain::{
    Bar, EventKind, ExitReason, Position, PositionSide, SymbolConfig, SymbolState, Trade,
    TradeEvent,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Where an intrabar stop-loss / take-profit exit fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFillPolicy {
    /// At the stop / target level, or at the open when the bar gapped
    /// through it.
    #[default]
    TriggerPrice,
    /// At the triggering bar's close.
    BarClose,
}

/// Why an open was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Bar has neither a usable close nor open.
    NoPrice,
    /// Quantity is zero after precision and min/max limits.
    ZeroQuantity,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NoPrice => f.write_str("no valid execution price"),
            Rejection::ZeroQuantity => f.write_str("quantity is zero after normalization"),
        }
    }
}

/// Result of `Simulator::execute`.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecOutcome {
    Opened {
        side: PositionSide,
        price: f64,
        quantity: f64,
    },
    Closed {
        side: PositionSide,
        price: f64,
        pnl: f64,
    },
    /// Existing position closed with `ExitReason::Reverse`, opposite side opened.
    Reversed {
        closed: PositionSide,
        price: f64,
        quantity: f64,
    },
    /// Nothing to do (same-side duplicate, close without a matching position,
    /// opposite side without auto-reverse).
    Ignored(&'static str),
    Rejected(String),
}

impl ExecOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(
            self,
            ExecOutcome::Opened { .. } | ExecOutcome::Closed { .. } | ExecOutcome::Reversed { .. }
        )
    }

    pub fn detail(&self) -> String {
        match self {
            ExecOutcome::Opened {
                side,
                price,
                quantity,
            } => format!("opened {side:?} {quantity} @ {price}"),
            ExecOutcome::Closed { side, price, pnl } => {
                format!("closed {side:?} @ {price} pnl {pnl}")
            }
            ExecOutcome::Reversed {
                closed,
                price,
                quantity,
            } => format!(
                "reversed {closed:?} -> {:?} {quantity} @ {price}",
                closed.opposite()
            ),
            ExecOutcome::Ignored(reason) => format!("ignored: {reason}"),
            ExecOutcome::Rejected(reason) => format!("rejected: {reason}"),
        }
    }
}

/// A fully priced entry, computed without touching any state.
///
/// The batch strategy collects these as candidates; `execute` builds one and
/// applies it immediately.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OpenPlan {
    pub side: PositionSide,
    /// Execution price after slippage.
    pub price: f64,
    pub quantity: f64,
    pub contract_size: f64,
    pub fee: f64,
    pub stop_loss_price: Option<f64>,
    pub take_profit_price: Option<f64>,
}

/// Stateless fill engine; all state lives in the `SymbolState` passed in.
#[derive(Debug, Clone, Copy, Default)]
pub struct Simulator {
    pub risk_fill: RiskFillPolicy,
}

impl Simulator {
    pub fn new(risk_fill: RiskFillPolicy) -> Self {
        Self { risk_fill }
    }

    /// Price an entry on `bar` for `side`.
    pub fn plan_open(
        &self,
        config: &SymbolConfig,
        bar: &Bar,
        side: PositionSide,
    ) -> Result<OpenPlan, Rejection> {
        let market = bar.execution_price().ok_or(Rejection::NoPrice)?;
        let price = apply_slippage(market, side.entry_order_side(), config.slippage_bps);
        if !(price.is_finite() && price > 0.0) {
            return Err(Rejection::NoPrice);
        }
        let leverage = config.effective_leverage();
        let contract_size = if config.contract_size > 0.0 {
            config.contract_size
        } else {
            1.0
        };
        let raw_qty = config.order_value * leverage / (price * contract_size);
        let quantity = normalize_quantity(
            raw_qty,
            config.quantity_precision,
            config.min_quantity,
            config.max_quantity,
        );
        if quantity <= 0.0 {
            return Err(Rejection::ZeroQuantity);
        }
        Ok(OpenPlan {
            side,
            price,
            quantity,
            contract_size,
            fee: compute_fee(price, quantity, contract_size, config.fee_rate),
            stop_loss_price: stop_loss_price(side, price, config.stop_loss_pct, leverage),
            take_profit_price: take_profit_price(side, price, config.take_profit_pct, leverage),
        })
    }

    /// Install a planned position. The caller guarantees the state is flat.
    pub fn open_with_plan(&self, state: &mut SymbolState, plan: &OpenPlan, timestamp: i64) {
        debug_assert!(state.position.is_none(), "open_with_plan on a non-flat state");
        state.position = Some(Position {
            side: plan.side,
            entry_time: timestamp,
            entry_price: plan.price,
            quantity: plan.quantity,
            contract_size: plan.contract_size,
            entry_fee: plan.fee,
            stop_loss_price: plan.stop_loss_price,
            take_profit_price: plan.take_profit_price,
            funding_paid: 0.0,
        });
    }

    /// Parse and execute a raw action string. Unknown vocabulary is rejected
    /// without touching the state.
    pub fn execute_raw(
        &self,
        action: &str,
        state: &mut SymbolState,
        bar: &Bar,
        timestamp: i64,
    ) -> ExecOutcome {
        match action.parse::<Action>() {
            Ok(action) => self.execute(action, state, bar, timestamp),
            Err(e) => ExecOutcome::Rejected(e.to_string()),
        }
    }

    /// Apply a strategy action to `state` at `bar`.
    pub fn execute(
        &self,
        action: Action,
        state: &mut SymbolState,
        bar: &Bar,
        timestamp: i64,
    ) -> ExecOutcome {
        let (side, _, is_close) = action.decompose();

        if is_close {
            let held = state.position.as_ref().map(|p| p.side);
            if held != Some(side) {
                return ExecOutcome::Ignored("no matching position to close");
            }
            let Some(price) = bar.execution_price() else {
                return ExecOutcome::Rejected(Rejection::NoPrice.to_string());
            };
            let before = state.trades.len();
            if !self.close_position(state, price, timestamp, ExitReason::Signal) {
                return ExecOutcome::Rejected("close failed".into());
            }
            let trade = &state.trades[before];
            return ExecOutcome::Closed {
                side,
                price: trade.exit_price,
                pnl: trade.pnl,
            };
        }

        let held = state.position.as_ref().map(|p| p.side);
        match held {
            Some(held) if held == side => {
                return ExecOutcome::Ignored("position already open on this side");
            }
            Some(_) if !state.config.auto_reverse => {
                return ExecOutcome::Ignored("opposite position open and auto-reverse is off");
            }
            _ => {}
        }

        let plan = match self.plan_open(&state.config, bar, side) {
            Ok(plan) => plan,
            Err(rejection) => {
                debug!(symbol = %state.symbol, timestamp, %rejection, "entry rejected");
                return ExecOutcome::Rejected(rejection.to_string());
            }
        };

        match held {
            Some(held) => {
                // plan_open succeeded, so the bar has a market price.
                let market = bar.execution_price().unwrap_or(plan.price);
                if !self.close_position(state, market, timestamp, ExitReason::Reverse) {
                    return ExecOutcome::Rejected("reverse close failed".into());
                }
                self.open_with_plan(state, &plan, timestamp);
                ExecOutcome::Reversed {
                    closed: held,
                    price: plan.price,
                    quantity: plan.quantity,
                }
            }
            None => {
                self.open_with_plan(state, &plan, timestamp);
                ExecOutcome::Opened {
                    side,
                    price: plan.price,
                    quantity: plan.quantity,
                }
            }
        }
    }

    /// Accrue one bar of funding on the open position and return the amount
    /// paid (negative when received). Longs pay a positive rate, shorts
    /// receive it.
    pub fn apply_funding_rate(
        &self,
        state: &mut SymbolState,
        bar: &Bar,
        timestamp: i64,
        timeframe_ms: i64,
    ) -> f64 {
        let rate = state.config.funding_rate;
        if rate == 0.0 || !rate.is_finite() || timeframe_ms <= 0 {
            return 0.0;
        }
        let Some(price) = bar.execution_price() else {
            debug!(symbol = %state.symbol, timestamp, "funding skipped: no price");
            return 0.0;
        };
        let Some(position) = state.position.as_mut() else {
            return 0.0;
        };
        let fraction = timeframe_ms as f64 / FUNDING_INTERVAL_MS as f64;
        let paid = position.notional(price) * rate * fraction * position.side.sign();
        position.funding_paid += paid;
        state.realized_pnl -= paid;
        state.accumulated_funding += paid;
        paid
    }

    /// Check the bar's high/low against the stored stop-loss and take-profit
    /// levels and close on a hit. Take-profit wins when both trigger.
    pub fn try_process_risk(&self, state: &mut SymbolState, bar: &Bar, timestamp: i64) -> bool {
        let Some(position) = state.position.as_ref() else {
            return false;
        };
        let (Some(high), Some(low)) = (bar.high_or_price(), bar.low_or_price()) else {
            return false;
        };

        let tp_hit = position.take_profit_price.filter(|&tp| match position.side {
            PositionSide::Long => high >= tp,
            PositionSide::Short => low <= tp,
        });
        let sl_hit = position.stop_loss_price.filter(|&sl| match position.side {
            PositionSide::Long => low <= sl,
            PositionSide::Short => high >= sl,
        });

        let (level, reason) = match (tp_hit, sl_hit) {
            (Some(tp), _) => (tp, ExitReason::TakeProfit),
            (None, Some(sl)) => (sl, ExitReason::StopLoss),
            (None, None) => return false,
        };

        let fill = match self.risk_fill {
            RiskFillPolicy::TriggerPrice => gap_adjusted(level, bar, position.side, reason),
            RiskFillPolicy::BarClose => match bar.execution_price() {
                Some(price) => price,
                None => return false,
            },
        };
        self.close_position(state, fill, timestamp, reason)
    }

    /// Close the open position at market `price` (exit slippage is applied
    /// here). Returns false when there is nothing to close or the price is
    /// unusable; a second call in a row is therefore always false.
    pub fn close_position(
        &self,
        state: &mut SymbolState,
        price: f64,
        timestamp: i64,
        reason: ExitReason,
    ) -> bool {
        if !(price.is_finite() && price > 0.0) {
            debug!(symbol = %state.symbol, timestamp, price, "close skipped: bad price");
            return false;
        }
        let Some(position) = state.position.take() else {
            return false;
        };

        let config = &state.config;
        let exit_price = apply_slippage(price, position.side.exit_order_side(), config.slippage_bps);
        let exit_fee = compute_fee(
            exit_price,
            position.quantity,
            position.contract_size,
            config.fee_rate,
        );
        let gross = position.unrealized_pnl(exit_price);
        let pnl = gross - position.entry_fee - exit_fee;

        state.realized_pnl += pnl;
        state.trades.push(Trade {
            symbol: state.symbol.clone(),
            side: position.side,
            entry_time: position.entry_time,
            entry_price: position.entry_price,
            exit_time: timestamp,
            exit_price,
            quantity: position.quantity,
            contract_size: position.contract_size,
            fee: position.entry_fee + exit_fee,
            pnl,
            funding: position.funding_paid,
            exit_reason: reason,
            slippage_bps: config.slippage_bps.max(0.0),
        });
        state.events.push(TradeEvent {
            timestamp: position.entry_time,
            kind: EventKind::Open,
            side: position.side,
            price: position.entry_price,
            quantity: position.quantity,
            fee: position.entry_fee,
            reason: None,
            pnl: None,
        });
        state.events.push(TradeEvent {
            timestamp,
            kind: EventKind::Close,
            side: position.side,
            price: exit_price,
            quantity: position.quantity,
            fee: exit_fee,
            reason: Some(reason),
            pnl: Some(pnl),
        });

        if reason == ExitReason::StopLoss && config.pause_bars_after_stop > 0 {
            state.paused_bars = config.pause_bars_after_stop;
        }
        true
    }
}

/// Fill price for a triggered level. When the bar opened beyond the level
/// the order could only have filled at the open.
fn gap_adjusted(level: f64, bar: &Bar, side: PositionSide, reason: ExitReason) -> f64 {
    let Some(open) = bar.open.filter(|o| o.is_finite() && *o > 0.0) else {
        return level;
    };
    let gapped = match (side, reason) {
        (PositionSide::Long, ExitReason::TakeProfit) => open > level,
        (PositionSide::Long, _) => open < level,
        (PositionSide::Short, ExitReason::TakeProfit) => open < level,
        (PositionSide::Short, _) => open > level,
    };
    if gapped {
        open
    } else {
        level
    }
}
