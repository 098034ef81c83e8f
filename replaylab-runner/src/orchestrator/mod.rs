//! Main-loop orchestration.
//!
//! Two execution strategies drive the same `Simulator`:
//! - `TimelineStrategy`: bar by bar over the shared timeline, symbols fanned
//!   out per timestamp.
//! - `BatchOpenCloseStrategy`: collect every entry signal first, then
//!   simulate each candidate forward on its own.
//!
//! Both produce a `ModeOutput`; the runner turns it into a result.

pub mod batch;
pub mod timeline;

pub use batch::BatchOpenCloseStrategy;
pub use timeline::TimelineStrategy;

use replaylab_core::domain::{EquityPoint, Series, SymbolConfig, Trade, TradeEvent};
use replaylab_core::pool::EnginePools;
use replaylab_core::sim::Simulator;
use replaylab_core::BarContext;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::cancel::CancelToken;
use crate::config::ExecutionMode;
use crate::decision::DecisionSource;
use crate::progress::Reporter;
use crate::runner::RunError;
use crate::session::SessionGate;

// ── Shared run state ────────────────────────────────────────────────

/// Counters shared by all workers of one run.
#[derive(Debug, Default)]
pub struct RunCounters {
    processed: AtomicU64,
    signals: AtomicU64,
    closed: AtomicU64,
}

impl RunCounters {
    pub fn add_processed(&self, n: u64) {
        self.processed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_signals(&self, n: u64) {
        self.signals.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_closed(&self, n: u64) {
        self.closed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn signals(&self) -> u64 {
        self.signals.load(Ordering::Relaxed)
    }

    pub fn closed(&self) -> u64 {
        self.closed.load(Ordering::Relaxed)
    }
}

/// Rolling window of the most recently closed trades.
#[derive(Debug)]
pub struct TradePreview {
    capacity: usize,
    trades: Mutex<VecDeque<Trade>>,
}

impl TradePreview {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            trades: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn extend<'a>(&self, trades: impl IntoIterator<Item = &'a Trade>) {
        if self.capacity == 0 {
            return;
        }
        let mut window = self.trades.lock().unwrap_or_else(|e| e.into_inner());
        for t in trades {
            if window.len() == self.capacity {
                window.pop_front();
            }
            window.push_back(t.clone());
        }
    }

    pub fn snapshot(&self) -> Vec<Trade> {
        let window = self.trades.lock().unwrap_or_else(|e| e.into_inner());
        window.iter().cloned().collect()
    }
}

/// Everything a strategy needs for one run.
pub struct RunContext<'a> {
    /// Normalized symbols, aligned with `series` and `configs`.
    pub symbols: &'a [String],
    pub series: &'a [Arc<Series>],
    pub configs: &'a [SymbolConfig],
    /// Sorted intersection of every series' timestamps.
    pub timeline: &'a [i64],
    pub timeframe_ms: i64,
    pub granularity_ms: i64,
    pub initial_capital: f64,

    pub allow_overlap: bool,
    pub batch_chunk_size: usize,
    pub global_overlap_filter: bool,

    pub simulator: Simulator,
    pub decisions: &'a dyn DecisionSource,
    pub session: &'a dyn SessionGate,

    pub thread_pool: &'a rayon::ThreadPool,
    pub pools: &'a EnginePools,
    pub counters: &'a RunCounters,
    pub preview: &'a TradePreview,
    pub cancel: Option<&'a CancelToken>,
    pub reporter: &'a Reporter<'a>,
}

impl RunContext<'_> {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(CancelToken::is_cancelled)
    }

    pub fn workers(&self) -> usize {
        self.thread_pool.current_num_threads().max(1)
    }

    /// Run the indicator hook on `bar_ctx`. False while a declared indicator
    /// is still missing.
    pub fn prepare_indicators(&self, bar_ctx: &mut BarContext) -> bool {
        if !self.decisions.references_indicators() {
            return true;
        }
        self.decisions.compute_indicators(bar_ctx);
        let mut names = self.pools.method_lists.scoped();
        self.decisions.indicator_names(&mut names);
        names.iter().all(|n| bar_ctx.indicators.contains_key(n))
    }

    /// Hand the decision source this timestamp's bar per symbol.
    pub fn publish_market(&self, ts: i64) {
        if !self.decisions.references_market() {
            return;
        }
        let mut market = self.pools.bar_maps.scoped();
        for (symbol, series) in self.symbols.iter().zip(self.series) {
            if let Some(bar) = series.bar_at(ts) {
                market.insert(symbol.clone(), *bar);
            }
        }
        self.decisions.observe_market(ts, &market);
    }
}

// ── Strategy output ─────────────────────────────────────────────────

/// Per-symbol outcome of a run.
#[derive(Debug, Clone, Default)]
pub struct SymbolOutput {
    pub symbol: String,
    pub trades: Vec<Trade>,
    pub events: Vec<TradeEvent>,
    pub equity: Vec<EquityPoint>,
    /// Trade P&L net of funding.
    pub realized_pnl: f64,
    pub accumulated_funding: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ModeOutput {
    pub symbols: Vec<SymbolOutput>,
    /// Aggregate equity across all symbols.
    pub equity: Vec<EquityPoint>,
}

/// A way of driving the simulator over the loaded data.
pub trait ExecutionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn run(&self, ctx: &RunContext<'_>) -> Result<ModeOutput, RunError>;
}

/// Strategy for an execution mode.
pub fn strategy_for(mode: ExecutionMode) -> Box<dyn ExecutionStrategy> {
    match mode {
        ExecutionMode::Timeline => Box::new(TimelineStrategy),
        ExecutionMode::BatchOpenClose => Box::new(BatchOpenCloseStrategy),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replaylab_core::domain::{ExitReason, PositionSide};

    fn trade(n: i64) -> Trade {
        Trade {
            symbol: "X".into(),
            side: PositionSide::Long,
            entry_time: n,
            entry_price: 1.0,
            exit_time: n + 1,
            exit_price: 1.0,
            quantity: 1.0,
            contract_size: 1.0,
            fee: 0.0,
            pnl: 0.0,
            funding: 0.0,
            exit_reason: ExitReason::End,
            slippage_bps: 0.0,
        }
    }

    #[test]
    fn preview_keeps_most_recent() {
        let preview = TradePreview::new(2);
        let trades: Vec<Trade> = (0..5).map(trade).collect();
        preview.extend(&trades);
        let snap = preview.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].entry_time, 3);
        assert_eq!(snap[1].entry_time, 4);
    }

    #[test]
    fn zero_capacity_preview_stays_empty() {
        let preview = TradePreview::new(0);
        preview.extend(&[trade(1)]);
        assert!(preview.snapshot().is_empty());
    }

    #[test]
    fn strategy_selection() {
        assert_eq!(strategy_for(ExecutionMode::Timeline).name(), "timeline");
        assert_eq!(
            strategy_for(ExecutionMode::BatchOpenClose).name(),
            "batch_open_close"
        );
    }
}
