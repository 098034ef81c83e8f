//! Performance statistics — pure functions over trades and equity curves.
//!
//! Every ratio degrades to 0.0 when there are fewer than two samples or its
//! denominator is (near) zero, so reports never carry NaN or infinity.

use replaylab_core::domain::timeframe::YEAR_MS;
use replaylab_core::domain::{EquityPoint, Timeframe, Trade};
use serde::{Deserialize, Serialize};

const EPS: f64 = 1e-12;

/// Aggregate statistics for one symbol or a whole run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub total_profit: f64,
    pub avg_profit: f64,
    pub profit_factor: f64,
    /// Peak-to-trough decline as a positive fraction of the peak.
    pub max_drawdown: f64,
    pub max_drawdown_duration_ms: i64,
    pub max_consecutive_wins: usize,
    pub max_consecutive_losses: usize,
    pub avg_holding_ms: f64,
    pub total_return: f64,
    pub annualized_return: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub calmar: f64,
    pub total_fees: f64,
    pub total_funding: f64,
    pub final_equity: f64,
}

impl PerformanceReport {
    /// Compute every statistic.
    ///
    /// With a non-empty `equity` curve, drawdown and risk ratios come from
    /// per-bucket returns annualized with `granularity`. Without one, a curve
    /// is rebuilt from trade P&L in exit order and the ratios use per-trade
    /// returns.
    pub fn compute(
        trades: &[Trade],
        equity: &[EquityPoint],
        initial_capital: f64,
        granularity: Timeframe,
    ) -> Self {
        let (curve, periods_per_year, span_ms) = if equity.is_empty() {
            let curve = trade_curve(trades, initial_capital);
            let span = trade_span_ms(trades);
            (curve, None, span)
        } else {
            let mut curve = Vec::with_capacity(equity.len() + 1);
            curve.push((equity[0].timestamp, initial_capital));
            curve.extend(equity.iter().map(|p| (p.timestamp, p.equity)));
            let last = equity[equity.len() - 1].timestamp;
            let span = last - equity[0].timestamp + granularity.as_millis();
            (curve, Some(granularity.periods_per_year()), span)
        };
        let values: Vec<f64> = curve.iter().map(|&(_, v)| v).collect();

        let returns = match periods_per_year {
            Some(_) => period_returns(&values),
            None => trades.iter().map(Trade::return_pct).collect(),
        };
        let annualizer = periods_per_year.unwrap_or(1.0).sqrt();

        let final_equity = values.last().copied().unwrap_or(initial_capital);
        let tr = total_return(initial_capital, final_equity);
        let ann = annualized_return(tr, span_ms);
        let (dd, dd_duration) = max_drawdown(&curve);
        let total_profit: f64 = trades.iter().map(|t| t.pnl).sum();

        Self {
            total_trades: trades.len(),
            winning_trades: trades.iter().filter(|t| t.is_winner()).count(),
            losing_trades: trades.iter().filter(|t| t.is_loser()).count(),
            win_rate: win_rate(trades),
            total_profit,
            avg_profit: if trades.is_empty() {
                0.0
            } else {
                total_profit / trades.len() as f64
            },
            profit_factor: profit_factor(trades),
            max_drawdown: dd,
            max_drawdown_duration_ms: dd_duration,
            max_consecutive_wins: max_consecutive(trades, true),
            max_consecutive_losses: max_consecutive(trades, false),
            avg_holding_ms: avg_holding_ms(trades),
            total_return: tr,
            annualized_return: ann,
            sharpe: sharpe_ratio(&returns, annualizer),
            sortino: sortino_ratio(&returns, annualizer),
            calmar: calmar_ratio(ann, dd),
            total_fees: trades.iter().map(|t| t.fee).sum(),
            total_funding: trades.iter().map(|t| t.funding).sum(),
            final_equity,
        }
    }
}

// ─── Individual metric functions ────────────────────────────────────

/// (final - initial) / initial.
pub fn total_return(initial: f64, final_equity: f64) -> f64 {
    if initial <= EPS || !final_equity.is_finite() {
        return 0.0;
    }
    (final_equity - initial) / initial
}

/// `(1 + r)^(1/years) - 1` over a span in milliseconds.
pub fn annualized_return(total_return: f64, span_ms: i64) -> f64 {
    if span_ms <= 0 || total_return <= -1.0 {
        return 0.0;
    }
    let years = span_ms as f64 / YEAR_MS as f64;
    if years < EPS {
        return 0.0;
    }
    let ann = (1.0 + total_return).powf(1.0 / years) - 1.0;
    if ann.is_finite() {
        ann
    } else {
        0.0
    }
}

/// Mean / sample std of `returns`, scaled by `annualizer`.
pub fn sharpe_ratio(returns: &[f64], annualizer: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let std = std_dev(returns);
    if std < EPS {
        return 0.0;
    }
    finite(mean_f64(returns) / std * annualizer)
}

/// Mean / downside deviation of `returns`, scaled by `annualizer`.
pub fn sortino_ratio(returns: &[f64], annualizer: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let downside_sq: f64 = returns.iter().filter(|&&r| r < 0.0).map(|r| r * r).sum();
    let downside_std = (downside_sq / returns.len() as f64).sqrt();
    if downside_std < EPS {
        return 0.0;
    }
    finite(mean_f64(returns) / downside_std * annualizer)
}

/// annualized return / max drawdown.
pub fn calmar_ratio(annualized_return: f64, max_drawdown: f64) -> f64 {
    if max_drawdown < EPS {
        return 0.0;
    }
    finite(annualized_return / max_drawdown)
}

/// Largest peak-to-trough decline (positive fraction) and the longest time
/// spent below a previous peak, in milliseconds.
pub fn max_drawdown(curve: &[(i64, f64)]) -> (f64, i64) {
    if curve.len() < 2 {
        return (0.0, 0);
    }
    let (mut peak_ts, mut peak) = curve[0];
    let mut max_dd = 0.0_f64;
    let mut max_duration = 0_i64;

    for &(ts, eq) in curve {
        if eq >= peak {
            peak = eq;
            peak_ts = ts;
            continue;
        }
        if peak > EPS {
            max_dd = max_dd.max((peak - eq) / peak);
        }
        max_duration = max_duration.max(ts - peak_ts);
    }
    (max_dd, max_duration)
}

pub fn win_rate(trades: &[Trade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    trades.iter().filter(|t| t.is_winner()).count() as f64 / trades.len() as f64
}

/// Gross profit / |gross loss|; 0.0 when there are no losses.
pub fn profit_factor(trades: &[Trade]) -> f64 {
    let gross_profit: f64 = trades.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).sum();
    let gross_loss: f64 = trades
        .iter()
        .filter(|t| t.pnl < 0.0)
        .map(|t| t.pnl.abs())
        .sum();
    if gross_loss < 1e-10 {
        return 0.0;
    }
    finite(gross_profit / gross_loss)
}

pub fn avg_holding_ms(trades: &[Trade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    trades.iter().map(|t| t.holding_ms() as f64).sum::<f64>() / trades.len() as f64
}

// ─── Helpers ────────────────────────────────────────────────────────

/// Simple returns between consecutive equity values.
pub fn period_returns(values: &[f64]) -> Vec<f64> {
    values
        .windows(2)
        .map(|w| if w[0] > EPS { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect()
}

/// Equity rebuilt from trades in exit order: starting capital, then one
/// point per exit (P&L net of funding).
fn trade_curve(trades: &[Trade], initial_capital: f64) -> Vec<(i64, f64)> {
    let mut ordered: Vec<&Trade> = trades.iter().collect();
    ordered.sort_by_key(|t| t.exit_time);
    let start = ordered.first().map_or(0, |t| t.entry_time);
    let mut equity = initial_capital;
    let mut curve = Vec::with_capacity(ordered.len() + 1);
    curve.push((start, equity));
    for t in ordered {
        equity += t.pnl - t.funding;
        curve.push((t.exit_time, equity));
    }
    curve
}

fn trade_span_ms(trades: &[Trade]) -> i64 {
    let first = trades.iter().map(|t| t.entry_time).min();
    let last = trades.iter().map(|t| t.exit_time).max();
    match (first, last) {
        (Some(a), Some(b)) => b - a,
        _ => 0,
    }
}

fn max_consecutive(trades: &[Trade], winners: bool) -> usize {
    let mut max_streak = 0;
    let mut current = 0;
    for trade in trades {
        let hit = if winners {
            trade.is_winner()
        } else {
            trade.is_loser()
        };
        if hit {
            current += 1;
            max_streak = max_streak.max(current);
        } else {
            current = 0;
        }
    }
    max_streak
}

pub(crate) fn mean_f64(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean_f64(values);
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

fn finite(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replaylab_core::domain::timeframe::DAY_MS;
    use replaylab_core::domain::{ExitReason, PositionSide};

    fn trade(pnl: f64, entry: i64, exit: i64) -> Trade {
        Trade {
            symbol: "BTCUSDT".into(),
            side: PositionSide::Long,
            entry_time: entry,
            entry_price: 100.0,
            exit_time: exit,
            exit_price: 100.0 + pnl / 10.0,
            quantity: 10.0,
            contract_size: 1.0,
            fee: 0.5,
            pnl,
            funding: 0.0,
            exit_reason: ExitReason::Signal,
            slippage_bps: 0.0,
        }
    }

    fn point(ts: i64, equity: f64) -> EquityPoint {
        EquityPoint {
            timestamp: ts,
            equity,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            period_realized_pnl: 0.0,
            period_unrealized_pnl: 0.0,
            period_equity_change: 0.0,
        }
    }

    #[test]
    fn empty_report_is_all_zero() {
        let r = PerformanceReport::compute(&[], &[], 1_000.0, Timeframe::D1);
        assert_eq!(r.total_trades, 0);
        assert_eq!(r.sharpe, 0.0);
        assert_eq!(r.max_drawdown, 0.0);
        assert_eq!(r.final_equity, 1_000.0);
        assert_eq!(r.total_return, 0.0);
    }

    #[test]
    fn win_loss_counts_and_profit_factor() {
        let trades = vec![
            trade(30.0, 0, 1),
            trade(-10.0, 1, 2),
            trade(20.0, 2, 3),
            trade(-10.0, 3, 4),
        ];
        let r = PerformanceReport::compute(&trades, &[], 1_000.0, Timeframe::H1);
        assert_eq!(r.winning_trades, 2);
        assert_eq!(r.losing_trades, 2);
        assert_eq!(r.win_rate, 0.5);
        assert!((r.profit_factor - 2.5).abs() < 1e-12);
        assert!((r.total_profit - 30.0).abs() < 1e-12);
        assert!((r.total_fees - 2.0).abs() < 1e-12);
        assert_eq!(r.max_consecutive_wins, 1);
    }

    #[test]
    fn profit_factor_without_losses_is_zero() {
        assert_eq!(profit_factor(&[trade(5.0, 0, 1)]), 0.0);
        assert_eq!(profit_factor(&[]), 0.0);
    }

    #[test]
    fn consecutive_streaks() {
        let trades: Vec<Trade> = [1.0, 1.0, -1.0, -1.0, -1.0, 1.0]
            .iter()
            .map(|&p| trade(p, 0, 1))
            .collect();
        assert_eq!(max_consecutive(&trades, true), 2);
        assert_eq!(max_consecutive(&trades, false), 3);
    }

    #[test]
    fn drawdown_and_duration() {
        let curve = [(0, 100.0), (10, 120.0), (20, 90.0), (30, 100.0), (40, 130.0)];
        let (dd, dur) = max_drawdown(&curve);
        assert!((dd - 0.25).abs() < 1e-12);
        assert_eq!(dur, 20);
    }

    #[test]
    fn drawdown_monotonic_is_zero() {
        let curve = [(0, 1.0), (1, 2.0), (2, 3.0)];
        assert_eq!(max_drawdown(&curve), (0.0, 0));
    }

    #[test]
    fn sharpe_constant_returns_is_zero() {
        assert_eq!(sharpe_ratio(&[0.01, 0.01, 0.01], 1.0), 0.0);
        assert_eq!(sharpe_ratio(&[0.01], 1.0), 0.0);
    }

    #[test]
    fn sortino_without_downside_is_zero() {
        assert_eq!(sortino_ratio(&[0.01, 0.02, 0.03], 1.0), 0.0);
        assert!(sortino_ratio(&[0.02, -0.01, 0.03], 1.0) > 0.0);
    }

    #[test]
    fn annualized_return_one_year() {
        assert!((annualized_return(0.1, YEAR_MS) - 0.1).abs() < 1e-12);
        assert_eq!(annualized_return(0.1, 0), 0.0);
        assert_eq!(annualized_return(-1.5, YEAR_MS), 0.0);
    }

    #[test]
    fn curve_based_ratios_are_finite() {
        let equity: Vec<EquityPoint> = (0..30)
            .map(|i| point(i * DAY_MS, 1_000.0 + (i as f64 * 0.7).sin() * 50.0 + i as f64))
            .collect();
        let r = PerformanceReport::compute(&[], &equity, 1_000.0, Timeframe::D1);
        for v in [r.sharpe, r.sortino, r.calmar, r.annualized_return, r.max_drawdown] {
            assert!(v.is_finite());
        }
        assert!(r.max_drawdown > 0.0);
        assert_eq!(r.final_equity, equity[29].equity);
    }

    #[test]
    fn calmar_zero_without_drawdown() {
        assert_eq!(calmar_ratio(0.5, 0.0), 0.0);
        assert!((calmar_ratio(0.5, 0.25) - 2.0).abs() < 1e-12);
    }
}
