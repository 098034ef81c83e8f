//! Market data provider trait and structured error types.
//!
//! A `MarketDataProvider` is an external source of bars (exchange REST
//! client, vendor feed, fixture). The resolver sits above it and decides
//! whether what came back is enough; providers don't know about the cache
//! or the table tier.

use crate::domain::{Bar, Series, SeriesKey, TimeframeError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Structured error types for data operations.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("no data for {key} in any tier")]
    NoData { key: SeriesKey },

    #[error("no table '{table}'")]
    MissingTable { table: String },

    #[error("provider '{provider}' failed: {message}")]
    Provider { provider: String, message: String },

    #[error("table I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error in {path}: {message}")]
    Csv { path: String, message: String },

    #[error(transparent)]
    InvalidTimeframe(#[from] TimeframeError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Which tier served a resolve call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Cache,
    Provider,
    Table,
}

/// An external source of bars.
///
/// Both methods return bars sorted ascending; an empty vector means the
/// provider has nothing for the key. Errors are logged by the resolver and
/// treated like an empty answer.
pub trait MarketDataProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Bars with `start_ms <= timestamp <= end_ms`.
    fn fetch_range(&self, key: &SeriesKey, start_ms: i64, end_ms: i64)
        -> Result<Vec<Bar>, DataError>;

    /// The last `count` bars with `timestamp <= end_ms` (latest when `None`).
    fn fetch_latest(
        &self,
        key: &SeriesKey,
        end_ms: Option<i64>,
        count: usize,
    ) -> Result<Vec<Bar>, DataError>;
}

/// Provider that serves a fixed set of series from memory.
#[derive(Debug, Default, Clone)]
pub struct StaticProvider {
    series: HashMap<SeriesKey, Series>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bars(mut self, key: SeriesKey, bars: Vec<Bar>) -> Self {
        self.series.insert(key.clone(), Series::new(key, bars));
        self
    }
}

impl MarketDataProvider for StaticProvider {
    fn name(&self) -> &str {
        "static"
    }

    fn fetch_range(
        &self,
        key: &SeriesKey,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Bar>, DataError> {
        Ok(self
            .series
            .get(key)
            .map(|s| s.slice_range(start_ms, end_ms).to_vec())
            .unwrap_or_default())
    }

    fn fetch_latest(
        &self,
        key: &SeriesKey,
        end_ms: Option<i64>,
        count: usize,
    ) -> Result<Vec<Bar>, DataError> {
        Ok(self
            .series
            .get(key)
            .map(|s| s.tail(end_ms, count).to_vec())
            .unwrap_or_default())
    }
}
