//! Batch open-close mode.
//!
//! Phase 1 scans every symbol's series for entry signals (in parallel, no
//! state). Phase 2 simulates each candidate forward from its entry bar on a
//! scratch state until stop-loss / take-profit or the end of the data.
//!
//! When overlap is disallowed, candidates run in ascending time order and a
//! greedy per-symbol filter keeps a trade only if it enters at or after the
//! previous accepted exit. The filter state resets at every chunk boundary,
//! so a trade from one chunk can overlap one from the next; set
//! `global_overlap_filter` to carry the state across chunks.

use rayon::prelude::*;
use replaylab_core::domain::{ExitReason, Series, SymbolState, Trade, TradeEvent};
use replaylab_core::sim::{Action, OpenPlan};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::{ExecutionStrategy, ModeOutput, RunContext, SymbolOutput};
use crate::equity::EquityCurveBuilder;
use crate::progress::Stage;
use crate::runner::RunError;

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOpenCloseStrategy;

/// An entry signal priced on its bar.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    symbol: usize,
    index: usize,
    timestamp: i64,
    plan: OpenPlan,
}

/// A candidate simulated to its exit.
#[derive(Debug, Clone)]
struct Simulated {
    symbol: usize,
    trade: Trade,
    events: Vec<TradeEvent>,
}

impl ExecutionStrategy for BatchOpenCloseStrategy {
    fn name(&self) -> &'static str {
        "batch_open_close"
    }

    fn run(&self, ctx: &RunContext<'_>) -> Result<ModeOutput, RunError> {
        let mut candidates = collect_candidates(ctx)?;
        if ctx.allow_overlap {
            candidates.sort_by(|a, b| (b.timestamp, b.symbol).cmp(&(a.timestamp, a.symbol)));
        } else {
            candidates.sort_by_key(|c| (c.timestamp, c.symbol));
        }
        let total = candidates.len() as u64;
        info!(
            candidates = total,
            chunk_size = ctx.batch_chunk_size,
            allow_overlap = ctx.allow_overlap,
            "batch simulation started"
        );

        let mut outputs: Vec<SymbolOutput> = ctx
            .symbols
            .iter()
            .map(|s| SymbolOutput {
                symbol: s.clone(),
                ..SymbolOutput::default()
            })
            .collect();
        let mut last_exit: HashMap<usize, i64> = HashMap::new();
        let mut done = 0u64;

        for chunk in candidates.chunks(ctx.batch_chunk_size.max(1)) {
            if ctx.is_cancelled() {
                info!(processed = done, "batch run cancelled");
                return Err(RunError::Cancelled);
            }
            let simulated = simulate_chunk(ctx, chunk)?;

            if !ctx.global_overlap_filter {
                last_exit.clear();
            }
            for sim in simulated.into_iter().flatten() {
                if !ctx.allow_overlap {
                    let free_from = last_exit.get(&sim.symbol).copied().unwrap_or(i64::MIN);
                    if sim.trade.entry_time < free_from {
                        continue;
                    }
                    last_exit.insert(sim.symbol, sim.trade.exit_time);
                }
                accept(ctx, &mut outputs[sim.symbol], sim);
            }

            done += chunk.len() as u64;
            ctx.counters.add_processed(chunk.len() as u64);
            ctx.reporter.report(Stage::Simulating, done, total);
        }
        ctx.reporter.complete(Stage::Simulating, done, total);

        for out in &mut outputs {
            out.trades.sort_by_key(|t| (t.entry_time, t.exit_time));
            out.events.sort_by_key(|e| e.timestamp);
            out.equity = exit_curve(ctx, out.trades.iter());
        }
        let mut all: Vec<&Trade> = outputs.iter().flat_map(|o| o.trades.iter()).collect();
        all.sort_by_key(|t| t.exit_time);
        let equity = exit_curve(ctx, all.into_iter());

        Ok(ModeOutput {
            symbols: outputs,
            equity,
        })
    }
}

fn accept(ctx: &RunContext<'_>, out: &mut SymbolOutput, sim: Simulated) {
    ctx.counters.add_closed(1);
    ctx.preview.extend(std::iter::once(&sim.trade));
    out.realized_pnl += sim.trade.pnl - sim.trade.funding;
    out.accumulated_funding += sim.trade.funding;
    out.events.extend(sim.events);
    out.trades.push(sim.trade);
}

/// Equity sampled at each exit from cumulative realized P&L.
fn exit_curve<'t>(
    ctx: &RunContext<'_>,
    trades: impl Iterator<Item = &'t Trade>,
) -> Vec<replaylab_core::domain::EquityPoint> {
    let mut ordered: Vec<&Trade> = trades.collect();
    ordered.sort_by_key(|t| t.exit_time);
    let mut builder = EquityCurveBuilder::new(ctx.granularity_ms, ctx.initial_capital);
    let mut realized = 0.0;
    for t in ordered {
        realized += t.pnl - t.funding;
        builder.push(t.exit_time, realized, 0.0);
    }
    builder.finish()
}

// ── Phase 1 ─────────────────────────────────────────────────────────

fn collect_candidates(ctx: &RunContext<'_>) -> Result<Vec<Candidate>, RunError> {
    let total = ctx.symbols.len() as u64;
    let per_symbol: Vec<Result<Vec<Candidate>, RunError>> = ctx.thread_pool.install(|| {
        ctx.series
            .par_iter()
            .enumerate()
            .map(|(symbol, series)| scan_symbol(ctx, symbol, series))
            .collect()
    });

    let mut out = Vec::new();
    for (n, result) in per_symbol.into_iter().enumerate() {
        out.extend(result?);
        ctx.reporter.report(Stage::Collecting, n as u64 + 1, total);
    }
    ctx.reporter.complete(Stage::Collecting, total, total);
    Ok(out)
}

fn scan_symbol(
    ctx: &RunContext<'_>,
    symbol: usize,
    series: &Arc<Series>,
) -> Result<Vec<Candidate>, RunError> {
    let config = &ctx.configs[symbol];
    let name = &ctx.symbols[symbol];
    let mut found = Vec::new();
    let mut bar_ctx = ctx.pools.contexts.scoped();

    for (index, bar) in series.bars().iter().enumerate() {
        if ctx.is_cancelled() {
            return Err(RunError::Cancelled);
        }
        if !ctx.session.permits(bar.timestamp).entries {
            continue;
        }
        bar_ctx.clear();
        bar_ctx.symbol.push_str(name);
        bar_ctx.timestamp = bar.timestamp;
        bar_ctx.bar_index = index;
        bar_ctx.bar = Some(*bar);
        if !ctx.prepare_indicators(&mut bar_ctx) {
            continue;
        }
        let Some(action) = ctx.decisions.entry_signal(&bar_ctx) else {
            continue;
        };
        if action.is_close() {
            continue;
        }
        ctx.counters.add_signals(1);
        match ctx.simulator.plan_open(config, bar, action.position_side()) {
            Ok(plan) => found.push(Candidate {
                symbol,
                index,
                timestamp: bar.timestamp,
                plan,
            }),
            Err(rejection) => {
                debug!(symbol = %name, ts = bar.timestamp, %rejection, "candidate dropped");
            }
        }
    }
    Ok(found)
}

// ── Phase 2 ─────────────────────────────────────────────────────────

/// Simulate one chunk, split into per-worker slices. Output order matches
/// the chunk; `None` marks a candidate that could not be simulated.
fn simulate_chunk(
    ctx: &RunContext<'_>,
    chunk: &[Candidate],
) -> Result<Vec<Option<Simulated>>, RunError> {
    let slice = chunk.len().div_ceil(ctx.workers()).max(1);
    let slices: Vec<Result<Vec<Option<Simulated>>, RunError>> = ctx.thread_pool.install(|| {
        chunk
            .par_chunks(slice)
            .map(|part| {
                let mut out = Vec::with_capacity(part.len());
                for candidate in part {
                    if ctx.is_cancelled() {
                        return Err(RunError::Cancelled);
                    }
                    out.push(simulate_candidate(ctx, candidate));
                }
                Ok(out)
            })
            .collect()
    });

    let mut out = Vec::with_capacity(chunk.len());
    for part in slices {
        out.extend(part?);
    }
    Ok(out)
}

fn simulate_candidate(ctx: &RunContext<'_>, c: &Candidate) -> Option<Simulated> {
    let series = &ctx.series[c.symbol];
    let bars = series.bars();
    let sim = &ctx.simulator;
    let mut scratch = ctx.pools.result_lists.scoped();
    let mut state = SymbolState::new(ctx.symbols[c.symbol].clone(), ctx.configs[c.symbol].clone());
    state.trades = std::mem::take(&mut *scratch);
    sim.open_with_plan(&mut state, &c.plan, c.timestamp);

    let mut last_price = bars[c.index].execution_price();
    let mut last_ts = c.timestamp;
    for bar in &bars[c.index + 1..] {
        if let Some(price) = bar.execution_price() {
            last_price = Some(price);
            last_ts = bar.timestamp;
        }
        sim.apply_funding_rate(&mut state, bar, bar.timestamp, ctx.timeframe_ms);
        if sim.try_process_risk(&mut state, bar, bar.timestamp) {
            break;
        }
    }
    if state.has_position() {
        let closed = last_price
            .is_some_and(|p| sim.close_position(&mut state, p, last_ts, ExitReason::End));
        if !closed {
            debug!(
                symbol = %state.symbol,
                ts = c.timestamp,
                action = %Action::open(c.plan.side),
                "candidate could not be closed"
            );
            return None;
        }
    }

    let trade = state.trades.pop();
    *scratch = std::mem::take(&mut state.trades);
    Some(Simulated {
        symbol: c.symbol,
        trade: trade?,
        events: state.events,
    })
}
