//! In-memory bar cache: the fastest resolver tier.

use crate::domain::{Bar, Series, SeriesKey};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Shared, thread-safe map from normalized key to series.
///
/// Series are handed out as `Arc`s; merging new bars replaces the entry
/// with a fresh series, so readers holding an old `Arc` keep a consistent
/// snapshot.
#[derive(Debug, Default)]
pub struct BarCache {
    entries: RwLock<HashMap<SeriesKey, Arc<Series>>>,
}

impl BarCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &SeriesKey) -> Option<Arc<Series>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    /// Merge bars into the cached series for `key` (existing bars win) and
    /// return the merged series.
    pub fn merge(&self, key: &SeriesKey, bars: &[Bar]) -> Arc<Series> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let merged = match entries.get(key) {
            Some(existing) => Arc::new(existing.merged_with(bars)),
            None => Arc::new(Series::new(key.clone(), bars.to_vec())),
        };
        entries.insert(key.clone(), Arc::clone(&merged));
        merged
    }

    pub fn remove(&self, key: &SeriesKey) -> Option<Arc<Series>> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(key)
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.clear();
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<SeriesKey> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<SeriesKey> = entries.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Timeframe;

    #[test]
    fn merge_keeps_existing_bars() {
        let cache = BarCache::new();
        let key = SeriesKey::new("binance", "BTCUSDT", Timeframe::M1);
        cache.merge(&key, &[Bar::flat(1, 10.0), Bar::flat(2, 20.0)]);
        let merged = cache.merge(&key, &[Bar::flat(2, 99.0), Bar::flat(3, 30.0)]);
        assert_eq!(merged.timestamps(), vec![1, 2, 3]);
        assert_eq!(merged.bar_at(2).and_then(|b| b.close), Some(20.0));
    }

    #[test]
    fn lookup_uses_normalized_key() {
        let cache = BarCache::new();
        cache.merge(
            &SeriesKey::new("Binance", "btc/usdt", Timeframe::H1),
            &[Bar::flat(1, 10.0)],
        );
        assert!(cache
            .get(&SeriesKey::new("binance", "BTC-USDT", Timeframe::H1))
            .is_some());
        assert!(cache
            .get(&SeriesKey::new("binance", "BTCUSDT", Timeframe::H4))
            .is_none());
    }
}
