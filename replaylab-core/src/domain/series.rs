//! Series — an ordered run of bars for one (exchange, symbol, timeframe).

use super::bar::Bar;
use super::timeframe::Timeframe;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Normalized cache/table key for a bar series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub exchange: String,
    pub symbol: String,
    pub timeframe: Timeframe,
}

impl SeriesKey {
    /// Build a normalized key: exchange lower-cased, symbol upper-cased with
    /// `/`, `-` and `_` separators stripped (`btc/usdt` → `BTCUSDT`).
    pub fn new(exchange: &str, symbol: &str, timeframe: Timeframe) -> Self {
        Self {
            exchange: exchange.trim().to_ascii_lowercase(),
            symbol: normalize_symbol(symbol),
            timeframe,
        }
    }

    /// Flat table name, e.g. `binance_BTCUSDT_1h`.
    pub fn table_name(&self) -> String {
        format!("{}_{}_{}", self.exchange, self.symbol, self.timeframe)
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.exchange, self.symbol, self.timeframe)
    }
}

/// Upper-case a symbol and strip common pair separators.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol
        .trim()
        .chars()
        .filter(|c| !matches!(c, '/' | '-' | '_' | ' '))
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Bars for one key, sorted by timestamp with an exact-match index.
#[derive(Debug, Clone)]
pub struct Series {
    pub key: SeriesKey,
    bars: Vec<Bar>,
    index: HashMap<i64, usize>,
}

impl Series {
    /// Sort bars by timestamp and drop duplicate timestamps (first wins).
    pub fn new(key: SeriesKey, mut bars: Vec<Bar>) -> Self {
        bars.sort_by_key(|b| b.timestamp);
        bars.dedup_by_key(|b| b.timestamp);
        let index = bars
            .iter()
            .enumerate()
            .map(|(i, b)| (b.timestamp, i))
            .collect();
        Self { key, bars, index }
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn first_timestamp(&self) -> Option<i64> {
        self.bars.first().map(|b| b.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.bars.last().map(|b| b.timestamp)
    }

    pub fn timestamps(&self) -> Vec<i64> {
        self.bars.iter().map(|b| b.timestamp).collect()
    }

    /// Exact-match lookup (hash index). Used in the simulation hot path.
    pub fn index_of(&self, timestamp: i64) -> Option<usize> {
        self.index.get(&timestamp).copied()
    }

    pub fn bar_at(&self, timestamp: i64) -> Option<&Bar> {
        self.index_of(timestamp).map(|i| &self.bars[i])
    }

    /// Index of the first bar with `timestamp >= ts`.
    pub fn first_index_at_or_after(&self, ts: i64) -> Option<usize> {
        let i = self.bars.partition_point(|b| b.timestamp < ts);
        (i < self.bars.len()).then_some(i)
    }

    /// Index of the last bar with `timestamp <= ts`.
    pub fn last_index_at_or_before(&self, ts: i64) -> Option<usize> {
        let i = self.bars.partition_point(|b| b.timestamp <= ts);
        i.checked_sub(1)
    }

    /// Bars with `start <= timestamp <= end`.
    pub fn slice_range(&self, start: i64, end: i64) -> &[Bar] {
        match (
            self.first_index_at_or_after(start),
            self.last_index_at_or_before(end),
        ) {
            (Some(lo), Some(hi)) if lo <= hi => &self.bars[lo..=hi],
            _ => &[],
        }
    }

    /// New series restricted to `[start, end]`.
    pub fn restricted(&self, start: i64, end: i64) -> Series {
        Series::new(self.key.clone(), self.slice_range(start, end).to_vec())
    }

    /// Last `count` bars with `timestamp <= end` (all bars when `end` is None).
    pub fn tail(&self, end: Option<i64>, count: usize) -> &[Bar] {
        let hi = match end {
            Some(ts) => match self.last_index_at_or_before(ts) {
                Some(i) => i + 1,
                None => return &[],
            },
            None => self.bars.len(),
        };
        let lo = hi.saturating_sub(count);
        &self.bars[lo..hi]
    }

    /// Merge another batch of bars into this series (existing bars win).
    pub fn merged_with(&self, extra: &[Bar]) -> Series {
        let mut bars = self.bars.clone();
        bars.extend(extra.iter().filter(|b| !self.index.contains_key(&b.timestamp)));
        Series::new(self.key.clone(), bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(ts: &[i64]) -> Series {
        let key = SeriesKey::new("Binance", "btc/usdt", Timeframe::M1);
        Series::new(key, ts.iter().map(|&t| Bar::flat(t, 100.0)).collect())
    }

    #[test]
    fn key_normalization() {
        let key = SeriesKey::new(" OKX ", "eth-usdt", Timeframe::H1);
        assert_eq!(key.exchange, "okx");
        assert_eq!(key.symbol, "ETHUSDT");
        assert_eq!(key.table_name(), "okx_ETHUSDT_1h");
    }

    #[test]
    fn new_sorts_and_dedups() {
        let s = series(&[30, 10, 20, 10]);
        assert_eq!(s.timestamps(), vec![10, 20, 30]);
    }

    #[test]
    fn binary_search_bounds() {
        let s = series(&[10, 20, 30, 40]);
        assert_eq!(s.first_index_at_or_after(5), Some(0));
        assert_eq!(s.first_index_at_or_after(20), Some(1));
        assert_eq!(s.first_index_at_or_after(21), Some(2));
        assert_eq!(s.first_index_at_or_after(41), None);
        assert_eq!(s.last_index_at_or_before(5), None);
        assert_eq!(s.last_index_at_or_before(30), Some(2));
        assert_eq!(s.last_index_at_or_before(39), Some(2));
        assert_eq!(s.last_index_at_or_before(100), Some(3));
    }

    #[test]
    fn slice_range_inclusive() {
        let s = series(&[10, 20, 30, 40]);
        let ts: Vec<i64> = s.slice_range(15, 40).iter().map(|b| b.timestamp).collect();
        assert_eq!(ts, vec![20, 30, 40]);
        assert!(s.slice_range(21, 29).is_empty());
        assert!(s.slice_range(50, 10).is_empty());
    }

    #[test]
    fn exact_lookup() {
        let s = series(&[10, 20, 30]);
        assert_eq!(s.index_of(20), Some(1));
        assert_eq!(s.index_of(25), None);
    }

    #[test]
    fn tail_counts_back_from_end() {
        let s = series(&[10, 20, 30, 40, 50]);
        let ts: Vec<i64> = s.tail(Some(40), 2).iter().map(|b| b.timestamp).collect();
        assert_eq!(ts, vec![30, 40]);
        assert_eq!(s.tail(None, 10).len(), 5);
        assert!(s.tail(Some(5), 3).is_empty());
    }

    #[test]
    fn merge_keeps_existing() {
        let s = series(&[10, 20]);
        let merged = s.merged_with(&[Bar::flat(20, 1.0), Bar::flat(30, 1.0)]);
        assert_eq!(merged.timestamps(), vec![10, 20, 30]);
        assert_eq!(merged.bar_at(20).unwrap().close, Some(100.0));
    }
}
