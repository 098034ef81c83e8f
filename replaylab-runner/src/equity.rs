//! Bucketed equity curve construction.

use replaylab_core::domain::EquityPoint;
use tracing::debug;

/// Collects (timestamp, realized, unrealized) samples and emits one
/// `EquityPoint` per granularity bucket.
///
/// A point is stamped at its bucket start and carries the last sample seen
/// in the bucket. Period fields are deltas against the previously emitted
/// point (or against the starting equity for the first point), so
/// consecutive points are always at least one granularity apart.
#[derive(Debug, Clone)]
pub struct EquityCurveBuilder {
    granularity_ms: i64,
    initial_equity: f64,
    bucket: Option<i64>,
    pending: Option<(f64, f64)>,
    last: Option<EquityPoint>,
    points: Vec<EquityPoint>,
}

impl EquityCurveBuilder {
    pub fn new(granularity_ms: i64, initial_equity: f64) -> Self {
        Self {
            granularity_ms: granularity_ms.max(1),
            initial_equity,
            bucket: None,
            pending: None,
            last: None,
            points: Vec::new(),
        }
    }

    pub fn with_capacity(granularity_ms: i64, initial_equity: f64, capacity: usize) -> Self {
        let mut b = Self::new(granularity_ms, initial_equity);
        b.points.reserve(capacity);
        b
    }

    /// Record a sample. Samples older than the open bucket are ignored.
    pub fn push(&mut self, timestamp: i64, realized_pnl: f64, unrealized_pnl: f64) {
        let bucket = timestamp.div_euclid(self.granularity_ms) * self.granularity_ms;
        match self.bucket {
            Some(open) if bucket < open => {
                debug!(timestamp, open, "equity sample older than open bucket");
                return;
            }
            Some(open) if bucket > open => self.flush(),
            _ => {}
        }
        self.bucket = Some(bucket);
        self.pending = Some((realized_pnl, unrealized_pnl));
    }

    fn flush(&mut self) {
        let (Some(bucket), Some((realized, unrealized))) = (self.bucket, self.pending.take())
        else {
            return;
        };
        let equity = self.initial_equity + realized + unrealized;
        let (prev_realized, prev_unrealized, prev_equity) = match &self.last {
            Some(p) => (p.realized_pnl, p.unrealized_pnl, p.equity),
            None => (0.0, 0.0, self.initial_equity),
        };
        let point = EquityPoint {
            timestamp: bucket,
            equity,
            realized_pnl: realized,
            unrealized_pnl: unrealized,
            period_realized_pnl: realized - prev_realized,
            period_unrealized_pnl: unrealized - prev_unrealized,
            period_equity_change: equity - prev_equity,
        };
        self.points.push(point);
        self.last = Some(point);
    }

    /// Points emitted so far (the open bucket is not included).
    pub fn points(&self) -> &[EquityPoint] {
        &self.points
    }

    /// Flush the open bucket and return the curve.
    pub fn finish(mut self) -> Vec<EquityPoint> {
        self.flush();
        self.points
    }
}
