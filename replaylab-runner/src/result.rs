//! Backtest result types.

use replaylab_core::domain::{EquityPoint, Trade, TradeEvent};
use serde::{Deserialize, Serialize};

use crate::config::{ExecutionMode, OutputOptions, RunId};
use crate::metrics::PerformanceReport;
use crate::orchestrator::SymbolOutput;

/// Current schema version for persisted results.
pub const SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// Outcome for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolResult {
    pub symbol: String,
    pub report: PerformanceReport,
    /// Trade P&L net of funding.
    pub realized_pnl: f64,
    pub accumulated_funding: f64,
    pub bar_count: usize,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trades: Vec<Trade>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<TradeEvent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub equity: Vec<EquityPoint>,
}

impl SymbolResult {
    /// Build from a strategy's output, keeping only the collections enabled
    /// in `output`. The report is always computed from the full data.
    pub(crate) fn from_output(
        out: SymbolOutput,
        report: PerformanceReport,
        bar_count: usize,
        output: &OutputOptions,
    ) -> Self {
        Self {
            symbol: out.symbol,
            report,
            realized_pnl: out.realized_pnl,
            accumulated_funding: out.accumulated_funding,
            bar_count,
            trades: if output.trades { out.trades } else { Vec::new() },
            events: if output.events { out.events } else { Vec::new() },
            equity: if output.equity { out.equity } else { Vec::new() },
        }
    }
}

/// Complete result of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub run_id: RunId,
    pub mode: ExecutionMode,
    pub initial_capital: f64,

    /// Aggregate report over every symbol's trades.
    pub report: PerformanceReport,
    pub symbols: Vec<SymbolResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub equity: Vec<EquityPoint>,

    /// Timestamps in the shared timeline.
    pub bar_count: usize,
    pub signal_count: u64,
    pub closed_count: u64,
    /// Timestamps (timeline) or candidates (batch) processed.
    pub processed: u64,
    /// Most recently closed trades, oldest first.
    pub preview: Vec<Trade>,
    pub elapsed_ms: u64,
}

impl BacktestResult {
    pub fn symbol(&self, symbol: &str) -> Option<&SymbolResult> {
        self.symbols.iter().find(|s| s.symbol == symbol)
    }

    /// All trades across symbols, ordered by exit time.
    pub fn all_trades(&self) -> Vec<&Trade> {
        let mut trades: Vec<&Trade> = self.symbols.iter().flat_map(|s| &s.trades).collect();
        trades.sort_by_key(|t| (t.exit_time, t.entry_time));
        trades
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replaylab_core::domain::{ExitReason, PositionSide};

    fn trade(symbol: &str, exit: i64) -> Trade {
        Trade {
            symbol: symbol.into(),
            side: PositionSide::Long,
            entry_time: exit - 10,
            entry_price: 100.0,
            exit_time: exit,
            exit_price: 101.0,
            quantity: 1.0,
            contract_size: 1.0,
            fee: 0.1,
            pnl: 0.9,
            funding: 0.0,
            exit_reason: ExitReason::Signal,
            slippage_bps: 0.0,
        }
    }

    fn output(symbol: &str) -> SymbolOutput {
        SymbolOutput {
            symbol: symbol.into(),
            trades: vec![trade(symbol, 50)],
            realized_pnl: 0.9,
            ..SymbolOutput::default()
        }
    }

    #[test]
    fn disabled_collections_are_dropped() {
        let output_opts = OutputOptions {
            trades: false,
            events: false,
            equity: false,
        };
        let r = SymbolResult::from_output(
            output("BTCUSDT"),
            PerformanceReport::default(),
            3,
            &output_opts,
        );
        assert!(r.trades.is_empty());
        assert_eq!(r.realized_pnl, 0.9);
        assert_eq!(r.bar_count, 3);
    }

    #[test]
    fn json_round_trip_keeps_schema_version() {
        let symbol = SymbolResult::from_output(
            output("ETHUSDT"),
            PerformanceReport::default(),
            1,
            &OutputOptions::default(),
        );
        let result = BacktestResult {
            schema_version: SCHEMA_VERSION,
            run_id: "abc".into(),
            mode: ExecutionMode::Timeline,
            initial_capital: 1_000.0,
            report: PerformanceReport::default(),
            symbols: vec![symbol],
            equity: Vec::new(),
            bar_count: 1,
            signal_count: 1,
            closed_count: 1,
            processed: 1,
            preview: Vec::new(),
            elapsed_ms: 5,
        };
        let json = result.to_json().unwrap();
        assert!(!json.contains("\"equity\""));
        let back = BacktestResult::from_json(&json).unwrap();
        assert_eq!(back.schema_version, SCHEMA_VERSION);
        assert_eq!(back.symbols[0].trades.len(), 1);
        assert!(back.symbol("ETHUSDT").is_some());
        assert!(back.symbol("BTCUSDT").is_none());
    }

    #[test]
    fn missing_schema_version_defaults() {
        let json = r#"{
            "run_id": "x", "mode": "batch_open_close", "initial_capital": 1.0,
            "report": {
                "total_trades": 0, "winning_trades": 0, "losing_trades": 0,
                "win_rate": 0.0, "total_profit": 0.0, "avg_profit": 0.0,
                "profit_factor": 0.0, "max_drawdown": 0.0,
                "max_drawdown_duration_ms": 0, "max_consecutive_wins": 0,
                "max_consecutive_losses": 0, "avg_holding_ms": 0.0,
                "total_return": 0.0, "annualized_return": 0.0, "sharpe": 0.0,
                "sortino": 0.0, "calmar": 0.0, "total_fees": 0.0,
                "total_funding": 0.0, "final_equity": 1.0
            },
            "symbols": [], "bar_count": 0, "signal_count": 0,
            "closed_count": 0, "processed": 0, "preview": [], "elapsed_ms": 0
        }"#;
        let r = BacktestResult::from_json(json).unwrap();
        assert_eq!(r.schema_version, SCHEMA_VERSION);
        assert_eq!(r.mode, ExecutionMode::BatchOpenClose);
        assert!(r.all_trades().is_empty());
    }
}
