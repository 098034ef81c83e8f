//! Serializable run request.
//!
//! A `RunRequest` captures everything needed to reproduce a backtest except
//! the decision source: which series to load, how to drive the simulation,
//! and the per-symbol trading parameters. Requests are usually read from
//! TOML and must pass `validate()` before anything is loaded.

use chrono::{DateTime, NaiveDate};
use replaylab_core::domain::{normalize_symbol, SymbolConfig, Timeframe};
use replaylab_core::sim::RiskFillPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::session::UtcSessionGate;

/// Unique identifier for a run (content-addressable hash).
pub type RunId = String;

/// Configuration errors, reported before any data is loaded.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("no symbols requested")]
    NoSymbols,
    #[error("invalid range: {0}")]
    InvalidRange(String),
    #[error("bar count must be positive")]
    ZeroCount,
    #[error("initial capital must be positive, got {0}")]
    NonPositiveCapital(f64),
    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },
    #[error("invalid timestamp '{0}' (expected epoch millis, RFC 3339 or YYYY-MM-DD)")]
    InvalidTimestamp(String),
    #[error("toml parse error: {0}")]
    Toml(String),
}

impl ConfigError {
    fn param(name: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// How the orchestrator drives the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Bar-by-bar over the shared timeline.
    #[default]
    Timeline,
    /// Collect entries first, then simulate each one forward independently.
    BatchOpenClose,
}

/// A point in time in a request: epoch milliseconds, an RFC 3339 timestamp
/// or a `YYYY-MM-DD` date (midnight UTC).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeBound {
    Millis(i64),
    Text(String),
}

impl TimeBound {
    pub fn to_millis(&self) -> Result<i64, ConfigError> {
        match self {
            TimeBound::Millis(ms) => Ok(*ms),
            TimeBound::Text(text) => {
                let text = text.trim();
                if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
                    return Ok(dt.timestamp_millis());
                }
                if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
                    if let Some(dt) = date.and_hms_opt(0, 0, 0) {
                        return Ok(dt.and_utc().timestamp_millis());
                    }
                }
                text.parse::<i64>()
                    .map_err(|_| ConfigError::InvalidTimestamp(text.to_string()))
            }
        }
    }
}

/// Which bars to load for each symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataWindow {
    Range { start_ms: i64, end_ms: i64 },
    Count { end_ms: Option<i64>, count: usize },
}

/// Which per-symbol artifacts to keep in the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputOptions {
    pub trades: bool,
    pub events: bool,
    pub equity: bool,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            trades: true,
            events: false,
            equity: true,
        }
    }
}

/// Per-symbol overrides merged onto `RunRequest::defaults`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolOverride {
    pub order_value: Option<f64>,
    pub leverage: Option<f64>,
    pub stop_loss_pct: Option<f64>,
    pub take_profit_pct: Option<f64>,
    pub fee_rate: Option<f64>,
    pub funding_rate: Option<f64>,
    pub slippage_bps: Option<f64>,
    pub auto_reverse: Option<bool>,
    pub contract_size: Option<f64>,
    pub quantity_precision: Option<u32>,
    pub min_quantity: Option<f64>,
    pub max_quantity: Option<f64>,
    pub pause_bars_after_stop: Option<usize>,
}

impl SymbolOverride {
    pub fn apply(&self, base: &SymbolConfig) -> SymbolConfig {
        let mut c = base.clone();
        if let Some(v) = self.order_value {
            c.order_value = v;
        }
        if let Some(v) = self.leverage {
            c.leverage = v;
        }
        if self.stop_loss_pct.is_some() {
            c.stop_loss_pct = self.stop_loss_pct;
        }
        if self.take_profit_pct.is_some() {
            c.take_profit_pct = self.take_profit_pct;
        }
        if let Some(v) = self.fee_rate {
            c.fee_rate = v;
        }
        if let Some(v) = self.funding_rate {
            c.funding_rate = v;
        }
        if let Some(v) = self.slippage_bps {
            c.slippage_bps = v;
        }
        if let Some(v) = self.auto_reverse {
            c.auto_reverse = v;
        }
        if let Some(v) = self.contract_size {
            c.contract_size = v;
        }
        if let Some(v) = self.quantity_precision {
            c.quantity_precision = v;
        }
        if let Some(v) = self.min_quantity {
            c.min_quantity = v;
        }
        if self.max_quantity.is_some() {
            c.max_quantity = self.max_quantity;
        }
        if let Some(v) = self.pause_bars_after_stop {
            c.pause_bars_after_stop = v;
        }
        c
    }
}

/// Serializable request for a single backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunRequest {
    pub exchange: String,
    pub symbols: Vec<String>,
    pub timeframe: Timeframe,

    /// Inclusive range start. Used together with `end`.
    pub start: Option<TimeBound>,
    /// Inclusive range end, or the anchor of a `count` request.
    pub end: Option<TimeBound>,
    /// Load the last `count` bars up to `end` instead of a range.
    pub count: Option<usize>,

    pub mode: ExecutionMode,
    /// Worker threads; 0 picks the number of CPUs.
    pub parallelism: usize,
    pub initial_capital: f64,
    /// Equity curve bucket size; the bar timeframe when unset.
    pub equity_granularity: Option<Timeframe>,

    /// Batch mode: allow a symbol's trades to overlap in time.
    pub allow_overlap: bool,
    /// Batch mode: candidates per chunk.
    pub batch_chunk_size: usize,
    /// Batch mode: keep the non-overlap filter state across chunks.
    pub global_overlap_filter: bool,

    pub risk_fill: RiskFillPolicy,
    /// Most recent trades kept in the live preview window.
    pub preview_size: usize,
    /// Resolver table page size (floored at 500).
    pub page_size: usize,
    /// Minimum interval between progress events.
    pub progress_interval_ms: u64,

    pub output: OutputOptions,
    /// Trading session restriction; trade around the clock when unset.
    pub session: Option<UtcSessionGate>,

    pub defaults: SymbolConfig,
    /// Keyed by symbol (normalized on lookup).
    pub overrides: BTreeMap<String, SymbolOverride>,
}

impl Default for RunRequest {
    fn default() -> Self {
        Self {
            exchange: "binance".into(),
            symbols: Vec::new(),
            timeframe: Timeframe::H1,
            start: None,
            end: None,
            count: None,
            mode: ExecutionMode::Timeline,
            parallelism: 0,
            initial_capital: 10_000.0,
            equity_granularity: None,
            allow_overlap: false,
            batch_chunk_size: 1_000,
            global_overlap_filter: false,
            risk_fill: RiskFillPolicy::TriggerPrice,
            preview_size: 50,
            page_size: replaylab_core::data::DEFAULT_PAGE_SIZE,
            progress_interval_ms: 200,
            output: OutputOptions::default(),
            session: None,
            defaults: SymbolConfig::default(),
            overrides: BTreeMap::new(),
        }
    }
}

impl RunRequest {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Toml(e.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Toml(e.to_string()))
    }

    /// Deterministic hash of the request.
    ///
    /// Two identical requests share a run id, so results can be cached and
    /// compared across runs.
    pub fn run_id(&self) -> RunId {
        let json = serde_json::to_vec(self).unwrap_or_else(|_| format!("{self:?}").into_bytes());
        blake3::hash(&json).to_hex().to_string()
    }

    /// Check every field that would otherwise fail mid-run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbols.iter().all(|s| normalize_symbol(s).is_empty()) {
            return Err(ConfigError::NoSymbols);
        }
        if self.exchange.trim().is_empty() {
            return Err(ConfigError::param("exchange", "must not be empty"));
        }
        self.window()?;
        if !(self.initial_capital.is_finite() && self.initial_capital > 0.0) {
            return Err(ConfigError::NonPositiveCapital(self.initial_capital));
        }
        if self.batch_chunk_size == 0 {
            return Err(ConfigError::param("batch_chunk_size", "must be positive"));
        }
        if let Some(session) = &self.session {
            session.validate()?;
        }
        validate_symbol_config("defaults", &self.defaults)?;
        for symbol in &self.symbols {
            validate_symbol_config(symbol, &self.symbol_config(symbol))?;
        }
        Ok(())
    }

    /// The data window described by `start` / `end` / `count`.
    pub fn window(&self) -> Result<DataWindow, ConfigError> {
        let end = self.end.as_ref().map(TimeBound::to_millis).transpose()?;
        match (self.count, &self.start) {
            (Some(_), Some(_)) => Err(ConfigError::InvalidRange(
                "set either start/end or count, not both".into(),
            )),
            (Some(0), None) => Err(ConfigError::ZeroCount),
            (Some(count), None) => Ok(DataWindow::Count { end_ms: end, count }),
            (None, Some(start)) => {
                let start_ms = start.to_millis()?;
                let end_ms = end
                    .ok_or_else(|| ConfigError::InvalidRange("start without end".into()))?;
                if start_ms >= end_ms {
                    return Err(ConfigError::InvalidRange(format!(
                        "start {start_ms} is not before end {end_ms}"
                    )));
                }
                Ok(DataWindow::Range { start_ms, end_ms })
            }
            (None, None) => Err(ConfigError::InvalidRange(
                "neither a start/end range nor a bar count".into(),
            )),
        }
    }

    /// Defaults merged with the symbol's override, if any.
    pub fn symbol_config(&self, symbol: &str) -> SymbolConfig {
        let normalized = normalize_symbol(symbol);
        self.overrides
            .iter()
            .find(|(k, _)| normalize_symbol(k) == normalized)
            .map(|(_, o)| o.apply(&self.defaults))
            .unwrap_or_else(|| self.defaults.clone())
    }

    /// Normalized, de-duplicated symbol list in request order.
    pub fn normalized_symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(self.symbols.len());
        for s in &self.symbols {
            let n = normalize_symbol(s);
            if !n.is_empty() && !out.contains(&n) {
                out.push(n);
            }
        }
        out
    }

    pub fn granularity(&self) -> Timeframe {
        self.equity_granularity.unwrap_or(self.timeframe)
    }

    /// Worker count for `symbol_count` symbols: configured (or CPU count when
    /// 0), capped by CPU count and by the number of symbols.
    pub fn worker_count(&self, symbol_count: usize) -> usize {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let configured = if self.parallelism == 0 {
            cpus
        } else {
            self.parallelism
        };
        configured.min(cpus).min(symbol_count).max(1)
    }
}

fn validate_symbol_config(name: &str, c: &SymbolConfig) -> Result<(), ConfigError> {
    let positive = |field: &str, v: f64| {
        if v.is_finite() && v > 0.0 {
            Ok(())
        } else {
            Err(ConfigError::param(
                format!("{name}.{field}"),
                format!("must be positive, got {v}"),
            ))
        }
    };
    let non_negative = |field: &str, v: f64| {
        if v.is_finite() && v >= 0.0 {
            Ok(())
        } else {
            Err(ConfigError::param(
                format!("{name}.{field}"),
                format!("must be non-negative, got {v}"),
            ))
        }
    };
    positive("order_value", c.order_value)?;
    positive("contract_size", c.contract_size)?;
    non_negative("fee_rate", c.fee_rate)?;
    non_negative("slippage_bps", c.slippage_bps)?;
    non_negative("min_quantity", c.min_quantity)?;
    if !c.leverage.is_finite() {
        return Err(ConfigError::param(format!("{name}.leverage"), "must be finite"));
    }
    if !c.funding_rate.is_finite() {
        return Err(ConfigError::param(
            format!("{name}.funding_rate"),
            "must be finite",
        ));
    }
    if let Some(max) = c.max_quantity {
        positive("max_quantity", max)?;
        if max < c.min_quantity {
            return Err(ConfigError::param(
                format!("{name}.max_quantity"),
                "must not be below min_quantity",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RunRequest {
        RunRequest {
            symbols: vec!["BTC/USDT".into()],
            start: Some(TimeBound::Text("2024-01-01".into())),
            end: Some(TimeBound::Text("2024-02-01".into())),
            ..RunRequest::default()
        }
    }

    #[test]
    fn run_id_deterministic() {
        assert_eq!(request().run_id(), request().run_id());
        assert_eq!(request().run_id().len(), 64);
    }

    #[test]
    fn run_id_changes_with_params() {
        let mut other = request();
        other.defaults.fee_rate = 0.001;
        assert_ne!(request().run_id(), other.run_id());
    }

    #[test]
    fn date_bounds_parse() {
        let window = request().window().unwrap();
        assert_eq!(
            window,
            DataWindow::Range {
                start_ms: 1_704_067_200_000,
                end_ms: 1_706_745_600_000,
            }
        );
        let rfc = TimeBound::Text("2024-01-01T01:00:00Z".into());
        assert_eq!(rfc.to_millis().unwrap(), 1_704_070_800_000);
        assert!(TimeBound::Text("yesterday".into()).to_millis().is_err());
    }

    #[test]
    fn empty_symbols_rejected() {
        let mut r = request();
        r.symbols = vec!["  ".into()];
        assert_eq!(r.validate(), Err(ConfigError::NoSymbols));
    }

    #[test]
    fn inverted_range_rejected() {
        let mut r = request();
        std::mem::swap(&mut r.start, &mut r.end);
        assert!(matches!(r.validate(), Err(ConfigError::InvalidRange(_))));
    }

    #[test]
    fn zero_count_rejected() {
        let mut r = request();
        r.start = None;
        r.count = Some(0);
        assert_eq!(r.validate(), Err(ConfigError::ZeroCount));
    }

    #[test]
    fn non_positive_capital_rejected() {
        let mut r = request();
        r.initial_capital = 0.0;
        assert!(matches!(
            r.validate(),
            Err(ConfigError::NonPositiveCapital(_))
        ));
    }

    #[test]
    fn bad_symbol_parameter_rejected() {
        let mut r = request();
        r.overrides.insert(
            "btcusdt".into(),
            SymbolOverride {
                order_value: Some(-5.0),
                ..SymbolOverride::default()
            },
        );
        assert!(matches!(
            r.validate(),
            Err(ConfigError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn override_merges_onto_defaults() {
        let mut r = request();
        r.defaults.fee_rate = 0.001;
        r.overrides.insert(
            "BTC-USDT".into(),
            SymbolOverride {
                leverage: Some(5.0),
                ..SymbolOverride::default()
            },
        );
        let c = r.symbol_config("btcusdt");
        assert_eq!(c.leverage, 5.0);
        assert_eq!(c.fee_rate, 0.001);
        assert_eq!(r.symbol_config("ETHUSDT").leverage, 1.0);
    }

    #[test]
    fn worker_count_is_bounded_by_symbols() {
        let mut r = request();
        r.parallelism = 64;
        assert_eq!(r.worker_count(1), 1);
        assert!(r.worker_count(3) <= 3);
    }

    #[test]
    fn toml_round_trip() {
        let text = r#"
            exchange = "okx"
            symbols = ["BTCUSDT", "ETHUSDT"]
            timeframe = "4h"
            start = "2024-01-01"
            end = 1706745600000
            mode = "batch_open_close"
            risk_fill = "bar_close"

            [defaults]
            order_value = 500.0
            take_profit_pct = 0.05

            [overrides.ETHUSDT]
            leverage = 3.0
        "#;
        let r = RunRequest::from_toml_str(text).unwrap();
        assert_eq!(r.timeframe, Timeframe::H4);
        assert_eq!(r.mode, ExecutionMode::BatchOpenClose);
        assert_eq!(r.risk_fill, RiskFillPolicy::BarClose);
        assert_eq!(r.defaults.order_value, 500.0);
        assert_eq!(r.symbol_config("ETHUSDT").leverage, 3.0);
        assert!(r.validate().is_ok());
        let again = RunRequest::from_toml_str(&r.to_toml_string().unwrap()).unwrap();
        assert_eq!(again.run_id(), r.run_id());
    }
}
