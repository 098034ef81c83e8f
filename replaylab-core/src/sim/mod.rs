//! Position / order simulator.
//!
//! Turns already-resolved strategy actions into simulated fills against a
//! bar: slippage, fees, contract precision, funding accrual, intrabar
//! stop-loss / take-profit checks and trade bookkeeping. Every operation
//! mutates exactly one `SymbolState`, so callers may run different symbols
//! on different threads.

pub mod action;
pub mod pricing;
pub mod simulator;

pub use action::{Action, ActionError};
pub use pricing::{
    apply_slippage, compute_fee, normalize_quantity, stop_loss_price, take_profit_price,
};
pub use simulator::{ExecOutcome, OpenPlan, Rejection, RiskFillPolicy, Simulator};
