//! Timeline mode: sequential over timestamps, parallel over symbols.
//!
//! Per timestamp the decision source first sees a market snapshot (when it
//! asks for one), then every symbol runs one step on its own `Lane` (state
//! plus equity builder), so workers never share mutable data. The aggregate
//! equity sample is taken sequentially once all lanes have stepped.

use rayon::prelude::*;
use replaylab_core::domain::{ExitReason, Series, SymbolState};
use replaylab_core::sim::ExecOutcome;
use std::sync::Arc;
use tracing::{debug, info};

use super::{ExecutionStrategy, ModeOutput, RunContext, SymbolOutput};
use crate::equity::EquityCurveBuilder;
use crate::progress::Stage;
use crate::runner::RunError;

#[derive(Debug, Clone, Copy, Default)]
pub struct TimelineStrategy;

/// One symbol's mutable run state.
struct Lane {
    state: SymbolState,
    equity: EquityCurveBuilder,
    last_price: Option<f64>,
}

impl Lane {
    fn unrealized(&self) -> f64 {
        self.last_price
            .map(|p| self.state.unrealized_pnl(p))
            .unwrap_or(0.0)
    }
}

impl ExecutionStrategy for TimelineStrategy {
    fn name(&self) -> &'static str {
        "timeline"
    }

    fn run(&self, ctx: &RunContext<'_>) -> Result<ModeOutput, RunError> {
        let total = ctx.timeline.len() as u64;
        let mut lanes: Vec<Lane> = ctx
            .symbols
            .iter()
            .zip(ctx.configs)
            .map(|(symbol, config)| Lane {
                state: SymbolState::new(symbol.clone(), config.clone()),
                equity: EquityCurveBuilder::new(ctx.granularity_ms, ctx.initial_capital),
                last_price: None,
            })
            .collect();
        let mut aggregate = EquityCurveBuilder::new(ctx.granularity_ms, ctx.initial_capital);

        info!(
            symbols = lanes.len(),
            timestamps = total,
            workers = ctx.workers(),
            "timeline run started"
        );

        for (n, &ts) in ctx.timeline.iter().enumerate() {
            if ctx.is_cancelled() {
                info!(processed = n, "timeline run cancelled");
                return Err(RunError::Cancelled);
            }

            ctx.publish_market(ts);
            ctx.thread_pool.install(|| {
                lanes
                    .par_iter_mut()
                    .zip(ctx.series.par_iter())
                    .for_each(|(lane, series)| step(ctx, lane, series, ts));
            });

            let realized: f64 = lanes.iter().map(|l| l.state.realized_pnl).sum();
            let unrealized: f64 = lanes.iter().map(Lane::unrealized).sum();
            aggregate.push(ts, realized, unrealized);

            ctx.counters.add_processed(1);
            ctx.reporter.report(Stage::Timeline, n as u64 + 1, total);
        }

        // Force-close whatever is still open at the last known price.
        if let Some(&last_ts) = ctx.timeline.last() {
            for lane in &mut lanes {
                let before = lane.state.trades.len();
                if let Some(price) = lane.last_price {
                    if ctx
                        .simulator
                        .close_position(&mut lane.state, price, last_ts, ExitReason::End)
                    {
                        ctx.counters.add_closed(1);
                        ctx.preview.extend(&lane.state.trades[before..]);
                    }
                } else if lane.state.has_position() {
                    debug!(symbol = %lane.state.symbol, "no price to close open position");
                }
                let unrealized = lane.unrealized();
                lane.equity.push(last_ts, lane.state.realized_pnl, unrealized);
            }
            let realized: f64 = lanes.iter().map(|l| l.state.realized_pnl).sum();
            let unrealized: f64 = lanes.iter().map(Lane::unrealized).sum();
            aggregate.push(last_ts, realized, unrealized);
        }
        ctx.reporter.complete(Stage::Timeline, total, total);

        let symbols = lanes
            .into_iter()
            .map(|lane| SymbolOutput {
                symbol: lane.state.symbol,
                trades: lane.state.trades,
                events: lane.state.events,
                equity: lane.equity.finish(),
                realized_pnl: lane.state.realized_pnl,
                accumulated_funding: lane.state.accumulated_funding,
            })
            .collect();
        Ok(ModeOutput {
            symbols,
            equity: aggregate.finish(),
        })
    }
}

/// Process one symbol at one timestamp: funding and risk on the open
/// position, then the exit and entry branches, then an equity sample.
fn step(ctx: &RunContext<'_>, lane: &mut Lane, series: &Arc<Series>, ts: i64) {
    let Some(index) = series.index_of(ts) else {
        return;
    };
    let bar = series.bars()[index];
    if let Some(price) = bar.execution_price() {
        lane.last_price = Some(price);
    } else {
        debug!(symbol = %lane.state.symbol, ts, "bar without price");
    }

    let sim = &ctx.simulator;
    let state = &mut lane.state;
    let trades_before = state.trades.len();
    let was_paused = state.is_paused();
    if was_paused {
        state.tick_pause();
    }

    if state.has_position() {
        sim.apply_funding_rate(state, &bar, ts, ctx.timeframe_ms);
        sim.try_process_risk(state, &bar, ts);
    }

    let mut bar_ctx = ctx.pools.contexts.scoped();
    bar_ctx.symbol.push_str(&state.symbol);
    bar_ctx.timestamp = ts;
    bar_ctx.bar_index = index;
    bar_ctx.bar = Some(bar);
    bar_ctx.position = state.position.as_ref().map(|p| p.side);
    bar_ctx.unrealized_pnl = lane.last_price.map_or(0.0, |p| state.unrealized_pnl(p));
    bar_ctx.realized_pnl = state.realized_pnl;
    let ready = ctx.prepare_indicators(&mut bar_ctx);
    if !ready {
        debug!(symbol = %state.symbol, ts, "indicators warming up");
    }

    let permit = ctx.session.permits(ts);
    let mut signals = 0;

    if ready && permit.exits && state.has_position() {
        match ctx.decisions.exit_signal(&bar_ctx) {
            Some(action) if action.is_close() => {
                signals += 1;
                let outcome = sim.execute(action, state, &bar, ts);
                log_outcome(&state.symbol, ts, &outcome);
                bar_ctx.position = state.position.as_ref().map(|p| p.side);
            }
            Some(action) => {
                debug!(symbol = %state.symbol, ts, %action, "opening action from exit branch ignored");
            }
            None => {}
        }
    }

    if ready && permit.entries && !was_paused && !state.is_paused() {
        match ctx.decisions.entry_signal(&bar_ctx) {
            Some(action) if !action.is_close() => {
                signals += 1;
                let outcome = sim.execute(action, state, &bar, ts);
                log_outcome(&state.symbol, ts, &outcome);
            }
            Some(action) => {
                debug!(symbol = %state.symbol, ts, %action, "closing action from entry branch ignored");
            }
            None => {}
        }
    }
    drop(bar_ctx);

    let closed = state.trades.len() - trades_before;
    if closed > 0 {
        ctx.counters.add_closed(closed as u64);
        ctx.preview.extend(&state.trades[trades_before..]);
    }
    if signals > 0 {
        ctx.counters.add_signals(signals);
    }

    let unrealized = lane.unrealized();
    lane.equity.push(ts, lane.state.realized_pnl, unrealized);
}

fn log_outcome(symbol: &str, ts: i64, outcome: &ExecOutcome) {
    if !outcome.is_ok() {
        debug!(symbol, ts, detail = %outcome.detail(), "action not executed");
    }
}
