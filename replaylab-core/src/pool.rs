//! Object pools for hot-loop scratch allocations.
//!
//! `Pool<T>` is a free list over `crossbeam::queue::SegQueue`: renting never
//! blocks (a miss allocates a fresh `T`), and every item is reset before it
//! goes back on the list, so a renter always sees a clean value.

use crate::context::BarContext;
use crate::domain::{Bar, Trade};
use crossbeam::queue::SegQueue;
use std::collections::{HashMap, HashSet};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

/// A value that can be returned to a pool and reused.
pub trait Poolable: Default + Send {
    /// Restore the value to its freshly constructed state, keeping capacity.
    fn reset(&mut self);
}

impl<K: Send, V: Send> Poolable for HashMap<K, V> {
    fn reset(&mut self) {
        self.clear();
    }
}

impl<T: Send> Poolable for Vec<T> {
    fn reset(&mut self) {
        self.clear();
    }
}

impl<T: Send> Poolable for HashSet<T> {
    fn reset(&mut self) {
        self.clear();
    }
}

impl Poolable for BarContext {
    fn reset(&mut self) {
        self.clear();
    }
}

/// Counters for one pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub hits: u64,
    pub misses: u64,
    pub returned: u64,
    pub idle: usize,
}

impl PoolStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Unbounded lock-free free list.
#[derive(Debug, Default)]
pub struct Pool<T: Poolable> {
    free: SegQueue<T>,
    hits: AtomicU64,
    misses: AtomicU64,
    returned: AtomicU64,
}

impl<T: Poolable> Pool<T> {
    pub fn new() -> Self {
        Self {
            free: SegQueue::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            returned: AtomicU64::new(0),
        }
    }

    /// Take an item, allocating when the free list is empty.
    pub fn rent(&self) -> T {
        match self.free.pop() {
            Some(item) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                item
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                T::default()
            }
        }
    }

    /// Reset `item` and put it back on the free list.
    pub fn give_back(&self, mut item: T) {
        item.reset();
        self.returned.fetch_add(1, Ordering::Relaxed);
        self.free.push(item);
    }

    /// Pre-allocate `n` idle items.
    pub fn warmup(&self, n: usize) {
        for _ in 0..n {
            self.free.push(T::default());
        }
    }

    /// Rent an item that returns itself to the pool when dropped.
    pub fn scoped(&self) -> Pooled<'_, T> {
        Pooled {
            item: Some(self.rent()),
            pool: self,
        }
    }

    pub fn idle(&self) -> usize {
        self.free.len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            returned: self.returned.load(Ordering::Relaxed),
            idle: self.free.len(),
        }
    }
}

/// RAII guard from `Pool::scoped`.
pub struct Pooled<'a, T: Poolable> {
    item: Option<T>,
    pool: &'a Pool<T>,
}

impl<T: Poolable> Pooled<'_, T> {
    /// Keep the item instead of returning it to the pool.
    pub fn detach(mut self) -> T {
        self.item.take().unwrap_or_default()
    }
}

impl<T: Poolable> Deref for Pooled<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only `detach` and `drop` take the item, and both consume the guard.
        match &self.item {
            Some(item) => item,
            None => unreachable!("pooled item accessed after detach"),
        }
    }
}

impl<T: Poolable> DerefMut for Pooled<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.item {
            Some(item) => item,
            None => unreachable!("pooled item accessed after detach"),
        }
    }
}

impl<T: Poolable> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.give_back(item);
        }
    }
}

// ── Engine pool bundle ──────────────────────────────────────────────

/// How many items of each kind `EnginePools::warmup` pre-allocates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolWarmup {
    pub bar_maps: usize,
    pub result_lists: usize,
    pub method_lists: usize,
    pub timestamp_sets: usize,
    pub contexts: usize,
}

impl PoolWarmup {
    /// Sized for `workers` threads each holding a handful of scratch items.
    pub fn for_workers(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            bar_maps: workers,
            result_lists: workers * 2,
            method_lists: workers,
            timestamp_sets: workers,
            contexts: workers * 4,
        }
    }
}

impl Default for PoolWarmup {
    fn default() -> Self {
        Self::for_workers(1)
    }
}

/// Snapshot of every pool's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnginePoolStats {
    pub bar_maps: PoolStats,
    pub result_lists: PoolStats,
    pub method_lists: PoolStats,
    pub timestamp_sets: PoolStats,
    pub contexts: PoolStats,
}

/// Pools shared by one backtest run.
#[derive(Debug, Default)]
pub struct EnginePools {
    /// Symbol → current bar snapshots handed to market observers.
    pub bar_maps: Pool<HashMap<String, Bar>>,
    /// Scratch trade lists for candidate simulation.
    pub result_lists: Pool<Vec<Trade>>,
    /// Declared indicator names, checked per bar.
    pub method_lists: Pool<Vec<String>>,
    /// Scratch sets for timeline intersection.
    pub timestamp_sets: Pool<HashSet<i64>>,
    /// Per-bar decision contexts.
    pub contexts: Pool<BarContext>,
}

impl EnginePools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warmup(&self, sizes: PoolWarmup) {
        self.bar_maps.warmup(sizes.bar_maps);
        self.result_lists.warmup(sizes.result_lists);
        self.method_lists.warmup(sizes.method_lists);
        self.timestamp_sets.warmup(sizes.timestamp_sets);
        self.contexts.warmup(sizes.contexts);
    }

    pub fn stats(&self) -> EnginePoolStats {
        EnginePoolStats {
            bar_maps: self.bar_maps.stats(),
            result_lists: self.result_lists.stats(),
            method_lists: self.method_lists.stats(),
            timestamp_sets: self.timestamp_sets.stats(),
            contexts: self.contexts.stats(),
        }
    }
}
