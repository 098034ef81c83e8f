//! Tiered bar resolution: cache, then provider, then paginated table.
//!
//! Each tier is asked in turn. A tier whose answer covers the request ends
//! the search; otherwise the longest partial answer seen so far is kept and
//! the next tier is tried. A cache answer with a hole in it never counts as
//! covering. Provider and table loads are merged into the
//! cache. The resolver never substitutes a different timeframe.

use super::cache::BarCache;
use super::provider::{DataError, DataSource, MarketDataProvider};
use super::table::BarTable;
use crate::domain::{Bar, Series, SeriesKey, Timeframe};
use std::sync::Arc;
use tracing::{debug, warn};

/// Smallest page the table tier will request.
pub const MIN_PAGE_SIZE: usize = 500;
pub const DEFAULT_PAGE_SIZE: usize = 1_000;

/// Outcome of a resolve call.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub series: Series,
    /// Tier that produced `series`.
    pub source: DataSource,
    /// False when no tier covered the request and the best partial answer
    /// was returned instead.
    pub complete: bool,
}

enum Request {
    Range { start: i64, end: i64 },
    Count { end: Option<i64>, count: usize },
}

impl Request {
    /// Whether a tier's answer covers the request. Cache answers must also
    /// be gap-free: the cache is a merge of earlier loads, so a hole wider
    /// than one step means a load is missing, not that the market was shut.
    fn is_satisfied_by(&self, bars: &[Bar], step: i64, source: DataSource) -> bool {
        let covered = match *self {
            Request::Range { start, end } => match (bars.first(), bars.last()) {
                (Some(first), Some(last)) => {
                    first.timestamp <= start.saturating_add(step)
                        && last.timestamp >= end.saturating_sub(step)
                }
                _ => false,
            },
            Request::Count { count, .. } => bars.len() >= count,
        };
        covered && (source != DataSource::Cache || is_contiguous(bars, step))
    }
}

fn is_contiguous(bars: &[Bar], step: i64) -> bool {
    bars.windows(2).all(|w| w[1].timestamp - w[0].timestamp <= step)
}

/// Market data resolver.
pub struct Resolver {
    cache: Arc<BarCache>,
    provider: Option<Arc<dyn MarketDataProvider>>,
    table: Option<Arc<dyn BarTable>>,
    page_size: usize,
}

impl Resolver {
    /// Resolver over a cache only. Add slower tiers with the builder methods.
    pub fn new(cache: Arc<BarCache>) -> Self {
        Self {
            cache,
            provider: None,
            table: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn MarketDataProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_table(mut self, table: Arc<dyn BarTable>) -> Self {
        self.table = Some(table);
        self
    }

    /// Table page size, floored at `MIN_PAGE_SIZE`.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(MIN_PAGE_SIZE);
        self
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn cache(&self) -> &Arc<BarCache> {
        &self.cache
    }

    /// Bars with `start_ms <= timestamp <= end_ms`.
    pub fn load_bars_by_range(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Resolved, DataError> {
        if start_ms > end_ms {
            return Err(DataError::InvalidRequest(format!(
                "start {start_ms} is after end {end_ms}"
            )));
        }
        let key = SeriesKey::new(exchange, symbol, timeframe);
        self.resolve(
            key,
            Request::Range {
                start: start_ms,
                end: end_ms,
            },
        )
    }

    /// The last `count` bars with `timestamp <= end_ms` (latest when `None`).
    pub fn load_bars_by_count(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
        end_ms: Option<i64>,
        count: usize,
    ) -> Result<Resolved, DataError> {
        if count == 0 {
            return Err(DataError::InvalidRequest("count must be positive".into()));
        }
        let key = SeriesKey::new(exchange, symbol, timeframe);
        self.resolve(key, Request::Count { end: end_ms, count })
    }

    fn resolve(&self, key: SeriesKey, request: Request) -> Result<Resolved, DataError> {
        let step = key.timeframe.as_millis();
        let mut best: Option<(Vec<Bar>, DataSource)> = None;

        for source in [DataSource::Cache, DataSource::Provider, DataSource::Table] {
            let Some(bars) = self.load_tier(source, &key, &request) else {
                continue;
            };
            if bars.is_empty() {
                continue;
            }
            if source != DataSource::Cache {
                self.cache.merge(&key, &bars);
            }
            if request.is_satisfied_by(&bars, step, source) {
                debug!(%key, ?source, bars = bars.len(), "resolved");
                return Ok(Resolved {
                    series: Series::new(key, bars),
                    source,
                    complete: true,
                });
            }
            debug!(%key, ?source, bars = bars.len(), "tier answer insufficient");
            if best.as_ref().map_or(true, |(b, _)| bars.len() > b.len()) {
                best = Some((bars, source));
            }
        }

        match best {
            Some((bars, source)) => {
                warn!(%key, ?source, bars = bars.len(), "returning partial data");
                Ok(Resolved {
                    series: Series::new(key, bars),
                    source,
                    complete: false,
                })
            }
            None => Err(DataError::NoData { key }),
        }
    }

    /// `None` when the tier is not configured.
    fn load_tier(&self, source: DataSource, key: &SeriesKey, request: &Request) -> Option<Vec<Bar>> {
        match source {
            DataSource::Cache => {
                let series = self.cache.get(key)?;
                Some(match *request {
                    Request::Range { start, end } => series.slice_range(start, end).to_vec(),
                    Request::Count { end, count } => series.tail(end, count).to_vec(),
                })
            }
            DataSource::Provider => {
                let provider = self.provider.as_ref()?;
                let fetched = match *request {
                    Request::Range { start, end } => provider.fetch_range(key, start, end),
                    Request::Count { end, count } => provider.fetch_latest(key, end, count),
                };
                match fetched {
                    Ok(bars) => Some(clip(bars, request)),
                    Err(e) => {
                        warn!(%key, provider = provider.name(), error = %e, "provider failed");
                        Some(Vec::new())
                    }
                }
            }
            DataSource::Table => {
                let table = self.table.as_ref()?;
                let loaded = match *request {
                    Request::Range { start, end } => self.scan_range(table.as_ref(), key, start, end),
                    Request::Count { end, count } => {
                        self.scan_count(table.as_ref(), key, end, count)
                    }
                };
                match loaded {
                    Ok(bars) => Some(bars),
                    Err(DataError::MissingTable { table }) => {
                        debug!(%key, table, "no table");
                        Some(Vec::new())
                    }
                    Err(e) => {
                        warn!(%key, error = %e, "table scan failed");
                        Some(Vec::new())
                    }
                }
            }
        }
    }

    fn scan_range(
        &self,
        table: &dyn BarTable,
        key: &SeriesKey,
        start: i64,
        end: i64,
    ) -> Result<Vec<Bar>, DataError> {
        let name = key.table_name();
        let mut out = Vec::new();
        let mut cursor = start.saturating_sub(1);
        loop {
            let page = table.scan_after(&name, cursor, end, self.page_size)?;
            let full = page.len() >= self.page_size;
            match page.last() {
                Some(last) => cursor = last.timestamp,
                None => break,
            }
            out.extend(page);
            if !full {
                break;
            }
        }
        Ok(out)
    }

    fn scan_count(
        &self,
        table: &dyn BarTable,
        key: &SeriesKey,
        end: Option<i64>,
        count: usize,
    ) -> Result<Vec<Bar>, DataError> {
        let name = key.table_name();
        let mut out = Vec::with_capacity(count);
        let mut cursor = end.map_or(i64::MAX, |e| e.saturating_add(1));
        while out.len() < count {
            let page = table.scan_before(&name, cursor, self.page_size)?;
            let full = page.len() >= self.page_size;
            match page.last() {
                Some(oldest) => cursor = oldest.timestamp,
                None => break,
            }
            out.extend(page);
            if !full {
                break;
            }
        }
        out.truncate(count);
        out.reverse();
        Ok(out)
    }
}

/// Sort a provider answer and drop anything outside the request.
fn clip(mut bars: Vec<Bar>, request: &Request) -> Vec<Bar> {
    bars.sort_by_key(|b| b.timestamp);
    bars.dedup_by_key(|b| b.timestamp);
    match *request {
        Request::Range { start, end } => {
            bars.retain(|b| b.timestamp >= start && b.timestamp <= end);
            bars
        }
        Request::Count { end, count } => {
            if let Some(end) = end {
                bars.retain(|b| b.timestamp <= end);
            }
            let skip = bars.len().saturating_sub(count);
            bars.split_off(skip)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::StaticProvider;
    use crate::data::table::MemoryBarTable;
    use crate::domain::timeframe::MINUTE_MS;

    fn minute_bars(from: i64, n: i64) -> Vec<Bar> {
        (0..n)
            .map(|i| Bar::flat((from + i) * MINUTE_MS, 100.0 + i as f64))
            .collect()
    }

    fn key() -> SeriesKey {
        SeriesKey::new("binance", "BTCUSDT", Timeframe::M1)
    }

    #[test]
    fn page_size_has_floor() {
        let r = Resolver::new(Arc::new(BarCache::new())).with_page_size(10);
        assert_eq!(r.page_size(), MIN_PAGE_SIZE);
    }

    #[test]
    fn empty_everywhere_is_no_data() {
        let r = Resolver::new(Arc::new(BarCache::new()))
            .with_table(Arc::new(MemoryBarTable::new()));
        let err = r
            .load_bars_by_range("binance", "BTCUSDT", Timeframe::M1, 0, MINUTE_MS * 10)
            .unwrap_err();
        assert!(matches!(err, DataError::NoData { .. }));
    }

    #[test]
    fn cache_hit_short_circuits() {
        let cache = Arc::new(BarCache::new());
        cache.merge(&key(), &minute_bars(0, 10));
        let r = Resolver::new(cache);
        let got = r
            .load_bars_by_range("Binance", "btc/usdt", Timeframe::M1, 0, 9 * MINUTE_MS)
            .unwrap();
        assert_eq!(got.source, DataSource::Cache);
        assert!(got.complete);
        assert_eq!(got.series.len(), 10);
    }

    #[test]
    fn insufficient_cache_falls_through_to_table() {
        let cache = Arc::new(BarCache::new());
        cache.merge(&key(), &minute_bars(0, 3));
        let table = MemoryBarTable::new();
        table.insert(key().table_name(), minute_bars(0, 1_200));
        let r = Resolver::new(Arc::clone(&cache)).with_table(Arc::new(table));
        let got = r
            .load_bars_by_range("binance", "BTCUSDT", Timeframe::M1, 0, 1_199 * MINUTE_MS)
            .unwrap();
        assert_eq!(got.source, DataSource::Table);
        assert_eq!(got.series.len(), 1_200);
        // merged back into the cache
        assert_eq!(cache.get(&key()).map(|s| s.len()), Some(1_200));
    }

    #[test]
    fn holey_cache_falls_through_to_table() {
        let table = MemoryBarTable::new();
        table.insert(key().table_name(), minute_bars(0, 101));
        let cache = Arc::new(BarCache::new());
        let r = Resolver::new(Arc::clone(&cache)).with_table(Arc::new(table));

        // Two narrow loads leave the cache holding both ends of the range.
        r.load_bars_by_range("binance", "BTCUSDT", Timeframe::M1, 0, 10 * MINUTE_MS)
            .unwrap();
        r.load_bars_by_range("binance", "BTCUSDT", Timeframe::M1, 90 * MINUTE_MS, 100 * MINUTE_MS)
            .unwrap();
        assert_eq!(cache.get(&key()).map(|s| s.len()), Some(22));

        let got = r
            .load_bars_by_range("binance", "BTCUSDT", Timeframe::M1, 0, 100 * MINUTE_MS)
            .unwrap();
        assert_eq!(got.source, DataSource::Table);
        assert!(got.complete);
        assert_eq!(got.series.len(), 101);
        assert_eq!(cache.get(&key()).map(|s| s.len()), Some(101));

        // Now gap-free, the cache answers on its own.
        let again = r
            .load_bars_by_range("binance", "BTCUSDT", Timeframe::M1, 0, 100 * MINUTE_MS)
            .unwrap();
        assert_eq!(again.source, DataSource::Cache);
    }

    #[test]
    fn holey_cache_count_falls_through() {
        let table = MemoryBarTable::new();
        table.insert(key().table_name(), minute_bars(0, 101));
        let cache = Arc::new(BarCache::new());
        cache.merge(&key(), &minute_bars(0, 11));
        cache.merge(&key(), &minute_bars(90, 11));
        let r = Resolver::new(Arc::clone(&cache)).with_table(Arc::new(table));

        let got = r
            .load_bars_by_count("binance", "BTCUSDT", Timeframe::M1, Some(100 * MINUTE_MS), 20)
            .unwrap();
        assert_eq!(got.source, DataSource::Table);
        assert_eq!(got.series.first_timestamp(), Some(81 * MINUTE_MS));
    }

    #[test]
    fn partial_answer_is_returned_when_nothing_covers() {
        let provider = StaticProvider::new().with_bars(key(), minute_bars(5, 5));
        let r = Resolver::new(Arc::new(BarCache::new())).with_provider(Arc::new(provider));
        let got = r
            .load_bars_by_range("binance", "BTCUSDT", Timeframe::M1, 0, 20 * MINUTE_MS)
            .unwrap();
        assert!(!got.complete);
        assert_eq!(got.source, DataSource::Provider);
        assert_eq!(got.series.len(), 5);
    }

    #[test]
    fn count_request_pages_backwards() {
        let table = MemoryBarTable::new();
        table.insert(key().table_name(), minute_bars(0, 2_000));
        let r = Resolver::new(Arc::new(BarCache::new()))
            .with_table(Arc::new(table))
            .with_page_size(500);
        let got = r
            .load_bars_by_count(
                "binance",
                "BTCUSDT",
                Timeframe::M1,
                Some(1_499 * MINUTE_MS),
                1_200,
            )
            .unwrap();
        assert!(got.complete);
        assert_eq!(got.series.len(), 1_200);
        assert_eq!(got.series.first_timestamp(), Some(300 * MINUTE_MS));
        assert_eq!(got.series.last_timestamp(), Some(1_499 * MINUTE_MS));
    }

    #[test]
    fn never_substitutes_timeframe() {
        let cache = Arc::new(BarCache::new());
        cache.merge(&key(), &minute_bars(0, 10));
        let r = Resolver::new(cache);
        assert!(r
            .load_bars_by_range("binance", "BTCUSDT", Timeframe::M5, 0, 9 * MINUTE_MS)
            .is_err());
    }

    #[test]
    fn inverted_range_is_rejected() {
        let r = Resolver::new(Arc::new(BarCache::new()));
        assert!(matches!(
            r.load_bars_by_range("binance", "BTCUSDT", Timeframe::M1, 10, 0),
            Err(DataError::InvalidRequest(_))
        ));
    }
}
