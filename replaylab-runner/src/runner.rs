//! Top-level entry point: validate, load, orchestrate, report.
//!
//! `run_backtest()` is the only function a caller needs. It owns the whole
//! lifecycle of a run: the request is validated before any data is touched,
//! every symbol is resolved through the `Resolver`, the shared timeline is
//! built, a private rayon pool is sized for the run, and the selected
//! execution strategy produces trades that the statistics engine turns into
//! reports. The caller gets a complete `BacktestResult` or one error.

use replaylab_core::data::{build_intersection_in, DataError, Resolver};
use replaylab_core::domain::{Series, SymbolConfig};
use replaylab_core::pool::{EnginePools, PoolWarmup};
use replaylab_core::sim::Simulator;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::{ConfigError, DataWindow, RunRequest};
use crate::decision::DecisionSource;
use crate::metrics::PerformanceReport;
use crate::orchestrator::{strategy_for, ModeOutput, RunContext, RunCounters, TradePreview};
use crate::progress::{
    NullProgress, ProgressEvent, ProgressSink, Reporter, Stage, ThrottledProgress,
};
use crate::result::{BacktestResult, SymbolResult, SCHEMA_VERSION};
use crate::session::{AlwaysOpen, SessionGate};

/// Errors from the runner.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("data error: {0}")]
    Data(#[from] DataError),
    #[error("run cancelled")]
    Cancelled,
    #[error("thread pool: {0}")]
    ThreadPool(String),
}

/// Optional collaborators for a run.
#[derive(Default, Clone, Copy)]
pub struct RunOptions<'a> {
    /// Progress receiver, rate-limited by `RunRequest::progress_interval_ms`.
    pub progress: Option<&'a dyn ProgressSink>,
    pub cancel: Option<&'a CancelToken>,
    /// Overrides `RunRequest::session`.
    pub session: Option<&'a dyn SessionGate>,
}

impl<'a> RunOptions<'a> {
    pub fn with_progress(mut self, progress: &'a dyn ProgressSink) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancel(mut self, cancel: &'a CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_session(mut self, session: &'a dyn SessionGate) -> Self {
        self.session = Some(session);
        self
    }
}

/// Series loaded for one symbol.
struct Loaded {
    symbol: String,
    config: SymbolConfig,
    series: Arc<Series>,
}

/// Run a backtest.
pub fn run_backtest(
    request: &RunRequest,
    resolver: &Resolver,
    decisions: &dyn DecisionSource,
    options: RunOptions<'_>,
) -> Result<BacktestResult, RunError> {
    let started = Instant::now();
    request.validate()?;
    let window = request.window()?;
    let run_id = request.run_id();

    let sink: &dyn ProgressSink = options.progress.unwrap_or(&NullProgress);
    let throttled = ThrottledProgress::new(
        |e: &ProgressEvent| sink.emit(e),
        Duration::from_millis(request.progress_interval_ms),
    );
    let reporter = Reporter::new(&throttled, started);

    info!(
        run_id = %&run_id[..12],
        mode = ?request.mode,
        symbols = request.symbols.len(),
        timeframe = %request.timeframe,
        "run started"
    );

    // ── Load ──
    let symbols = request.normalized_symbols();
    let mut loaded = Vec::with_capacity(symbols.len());
    for (n, symbol) in symbols.iter().enumerate() {
        if options.cancel.is_some_and(CancelToken::is_cancelled) {
            return Err(RunError::Cancelled);
        }
        loaded.push(load_symbol(request, resolver, symbol, window)?);
        reporter.report(Stage::Loading, n as u64 + 1, symbols.len() as u64);
    }
    reporter.complete(Stage::Loading, symbols.len() as u64, symbols.len() as u64);

    let workers = request.worker_count(loaded.len());
    let pools = EnginePools::new();
    pools.warmup(PoolWarmup::for_workers(workers));

    let stamps: Vec<Vec<i64>> = loaded.iter().map(|l| l.series.timestamps()).collect();
    let slices: Vec<&[i64]> = stamps.iter().map(Vec::as_slice).collect();
    let timeline = {
        let mut common = pools.timestamp_sets.scoped();
        let mut scratch = pools.timestamp_sets.scoped();
        build_intersection_in(&slices, &mut common, &mut scratch)
    };
    drop(stamps);

    if timeline.is_empty() {
        warn!("symbols share no timestamps; nothing to simulate");
        return Ok(empty_result(request, run_id, loaded, started));
    }
    debug!(bars = timeline.len(), "timeline built");

    // ── Orchestrate ──
    let thread_pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("replaylab-worker-{i}"))
        .build()
        .map_err(|e| RunError::ThreadPool(e.to_string()))?;

    let session: &dyn SessionGate = match (options.session, &request.session) {
        (Some(gate), _) => gate,
        (None, Some(gate)) => gate,
        (None, None) => &AlwaysOpen,
    };

    let names: Vec<String> = loaded.iter().map(|l| l.symbol.clone()).collect();
    let series: Vec<Arc<Series>> = loaded.iter().map(|l| Arc::clone(&l.series)).collect();
    let configs: Vec<SymbolConfig> = loaded.iter().map(|l| l.config.clone()).collect();
    let counters = RunCounters::default();
    let preview = TradePreview::new(request.preview_size);
    let granularity = request.granularity();

    let ctx = RunContext {
        symbols: &names,
        series: &series,
        configs: &configs,
        timeline: &timeline,
        timeframe_ms: request.timeframe.as_millis(),
        granularity_ms: granularity.as_millis(),
        initial_capital: request.initial_capital,
        allow_overlap: request.allow_overlap,
        batch_chunk_size: request.batch_chunk_size,
        global_overlap_filter: request.global_overlap_filter,
        simulator: Simulator::new(request.risk_fill),
        decisions,
        session,
        thread_pool: &thread_pool,
        pools: &pools,
        counters: &counters,
        preview: &preview,
        cancel: options.cancel,
        reporter: &reporter,
    };

    let strategy = strategy_for(request.mode);
    info!(strategy = strategy.name(), workers, bars = timeline.len(), "simulating");
    let output = strategy.run(&ctx)?;

    // ── Report ──
    reporter.report(Stage::Finalizing, 0, 1);
    let ModeOutput { symbols: outputs, equity } = output;

    let mut all_trades = Vec::new();
    let mut results = Vec::with_capacity(outputs.len());
    for (out, l) in outputs.into_iter().zip(&loaded) {
        let report = PerformanceReport::compute(
            &out.trades,
            &out.equity,
            request.initial_capital,
            granularity,
        );
        all_trades.extend(out.trades.iter().cloned());
        results.push(SymbolResult::from_output(out, report, l.series.len(), &request.output));
    }
    all_trades.sort_by_key(|t| (t.exit_time, t.entry_time));
    let report =
        PerformanceReport::compute(&all_trades, &equity, request.initial_capital, granularity);
    reporter.complete(Stage::Finalizing, 1, 1);

    debug!(pools = ?pools.stats(), "pool usage");
    let elapsed_ms = started.elapsed().as_millis() as u64;
    info!(
        trades = report.total_trades,
        total_profit = report.total_profit,
        elapsed_ms,
        "run finished"
    );

    Ok(BacktestResult {
        schema_version: SCHEMA_VERSION,
        run_id,
        mode: request.mode,
        initial_capital: request.initial_capital,
        report,
        symbols: results,
        equity: if request.output.equity { equity } else { Vec::new() },
        bar_count: timeline.len(),
        signal_count: counters.signals(),
        closed_count: counters.closed(),
        processed: counters.processed(),
        preview: preview.snapshot(),
        elapsed_ms,
    })
}

fn load_symbol(
    request: &RunRequest,
    resolver: &Resolver,
    symbol: &str,
    window: DataWindow,
) -> Result<Loaded, RunError> {
    let resolved = match window {
        DataWindow::Range { start_ms, end_ms } => resolver.load_bars_by_range(
            &request.exchange,
            symbol,
            request.timeframe,
            start_ms,
            end_ms,
        )?,
        DataWindow::Count { end_ms, count } => resolver.load_bars_by_count(
            &request.exchange,
            symbol,
            request.timeframe,
            end_ms,
            count,
        )?,
    };
    if !resolved.complete {
        warn!(
            symbol,
            bars = resolved.series.len(),
            source = ?resolved.source,
            "running on partial data"
        );
    }
    Ok(Loaded {
        symbol: symbol.to_string(),
        config: request.symbol_config(symbol),
        series: Arc::new(resolved.series),
    })
}

fn empty_result(
    request: &RunRequest,
    run_id: String,
    loaded: Vec<Loaded>,
    started: Instant,
) -> BacktestResult {
    let report = PerformanceReport::compute(&[], &[], request.initial_capital, request.granularity());
    let symbols = loaded
        .into_iter()
        .map(|l| SymbolResult {
            symbol: l.symbol,
            report: report.clone(),
            realized_pnl: 0.0,
            accumulated_funding: 0.0,
            bar_count: l.series.len(),
            trades: Vec::new(),
            events: Vec::new(),
            equity: Vec::new(),
        })
        .collect();
    BacktestResult {
        schema_version: SCHEMA_VERSION,
        run_id,
        mode: request.mode,
        initial_capital: request.initial_capital,
        report,
        symbols,
        equity: Vec::new(),
        bar_count: 0,
        signal_count: 0,
        closed_count: 0,
        processed: 0,
        preview: Vec::new(),
        elapsed_ms: started.elapsed().as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeBound;
    use crate::decision::NoDecisions;
    use replaylab_core::data::{BarCache, StaticProvider};
    use replaylab_core::domain::{Bar, SeriesKey, Timeframe};

    fn request(symbols: &[&str]) -> RunRequest {
        RunRequest {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            timeframe: Timeframe::M1,
            start: Some(TimeBound::Millis(0)),
            end: Some(TimeBound::Millis(600_000)),
            ..RunRequest::default()
        }
    }

    fn resolver_with(symbol: &str, bars: Vec<Bar>) -> Resolver {
        let key = SeriesKey::new("binance", symbol, Timeframe::M1);
        let provider = StaticProvider::new().with_bars(key, bars);
        Resolver::new(Arc::new(BarCache::new())).with_provider(Arc::new(provider))
    }

    #[test]
    fn invalid_request_fails_before_loading() {
        let req = RunRequest::default();
        let resolver = Resolver::new(Arc::new(BarCache::new()));
        let err = run_backtest(&req, &resolver, &NoDecisions, RunOptions::default()).unwrap_err();
        assert!(matches!(err, RunError::Config(ConfigError::NoSymbols)));
    }

    #[test]
    fn no_decisions_produce_no_trades() {
        let bars: Vec<Bar> = (0..10).map(|i| Bar::flat(i * 60_000, 100.0)).collect();
        let resolver = resolver_with("BTCUSDT", bars);
        let result = run_backtest(
            &request(&["BTCUSDT"]),
            &resolver,
            &NoDecisions,
            RunOptions::default(),
        )
        .unwrap();
        assert_eq!(result.bar_count, 10);
        assert_eq!(result.report.total_trades, 0);
        assert_eq!(result.processed, 10);
        assert_eq!(result.symbols[0].bar_count, 10);
    }

    #[test]
    fn pre_cancelled_token_stops_the_run() {
        let bars: Vec<Bar> = (0..10).map(|i| Bar::flat(i * 60_000, 100.0)).collect();
        let resolver = resolver_with("BTCUSDT", bars);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = run_backtest(
            &request(&["BTCUSDT"]),
            &resolver,
            &NoDecisions,
            RunOptions::default().with_cancel(&cancel),
        )
        .unwrap_err();
        assert!(matches!(err, RunError::Cancelled));
    }
}
