//! Paginated bar tables: the slowest resolver tier.
//!
//! A table is addressed by `SeriesKey::table_name()` and read one page at a
//! time. Two backends ship here: `MemoryBarTable` for tests and embedding,
//! and `CsvBarTable` for a directory of `{table}.csv` files.
//!
//! CSV layout: header `timestamp,open,high,low,close,volume`, one row per
//! bar, timestamps in epoch milliseconds. Empty cells are missing values.

use super::provider::DataError;
use crate::domain::Bar;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Page-oriented access to stored bars.
pub trait BarTable: Send + Sync {
    /// Bars with `after < timestamp <= until`, ascending, at most `limit`.
    fn scan_after(
        &self,
        table: &str,
        after: i64,
        until: i64,
        limit: usize,
    ) -> Result<Vec<Bar>, DataError>;

    /// Bars with `timestamp < before`, descending, at most `limit`.
    fn scan_before(&self, table: &str, before: i64, limit: usize) -> Result<Vec<Bar>, DataError>;
}

// ── Shared page helpers ─────────────────────────────────────────────

fn page_after(bars: &[Bar], after: i64, until: i64, limit: usize) -> Vec<Bar> {
    let lo = bars.partition_point(|b| b.timestamp <= after);
    bars[lo..]
        .iter()
        .take_while(|b| b.timestamp <= until)
        .take(limit)
        .copied()
        .collect()
}

fn page_before(bars: &[Bar], before: i64, limit: usize) -> Vec<Bar> {
    let hi = bars.partition_point(|b| b.timestamp < before);
    bars[..hi].iter().rev().take(limit).copied().collect()
}

fn sorted(mut bars: Vec<Bar>) -> Vec<Bar> {
    bars.sort_by_key(|b| b.timestamp);
    bars.dedup_by_key(|b| b.timestamp);
    bars
}

// ── In-memory table ─────────────────────────────────────────────────

/// Tables held in memory, keyed by table name.
#[derive(Debug, Default)]
pub struct MemoryBarTable {
    tables: RwLock<HashMap<String, Arc<Vec<Bar>>>>,
}

impl MemoryBarTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a table.
    pub fn insert(&self, table: impl Into<String>, bars: Vec<Bar>) {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        tables.insert(table.into(), Arc::new(sorted(bars)));
    }

    fn get(&self, table: &str) -> Result<Arc<Vec<Bar>>, DataError> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        tables.get(table).cloned().ok_or_else(|| DataError::MissingTable {
            table: table.to_string(),
        })
    }
}

impl BarTable for MemoryBarTable {
    fn scan_after(
        &self,
        table: &str,
        after: i64,
        until: i64,
        limit: usize,
    ) -> Result<Vec<Bar>, DataError> {
        Ok(page_after(&self.get(table)?, after, until, limit))
    }

    fn scan_before(&self, table: &str, before: i64, limit: usize) -> Result<Vec<Bar>, DataError> {
        Ok(page_before(&self.get(table)?, before, limit))
    }
}

// ── CSV directory table ─────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    timestamp: i64,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    volume: Option<f64>,
}

impl From<CsvRow> for Bar {
    fn from(row: CsvRow) -> Self {
        Bar {
            timestamp: row.timestamp,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
        }
    }
}

impl From<&Bar> for CsvRow {
    fn from(bar: &Bar) -> Self {
        CsvRow {
            timestamp: bar.timestamp,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
        }
    }
}

/// A directory of `{table}.csv` files.
///
/// Each file is parsed once on first access and kept for the life of the
/// table; `write` refreshes the parsed copy.
#[derive(Debug)]
pub struct CsvBarTable {
    dir: PathBuf,
    loaded: RwLock<HashMap<String, Arc<Vec<Bar>>>>,
}

impl CsvBarTable {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            loaded: RwLock::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}.csv"))
    }

    /// Table names present in the directory.
    pub fn list_tables(&self) -> Result<Vec<String>, DataError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Write a table atomically (`.tmp` then rename).
    pub fn write(&self, table: &str, bars: &[Bar]) -> Result<(), DataError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path(table);
        let tmp_path = path.with_extension("csv.tmp");
        let csv_err = |e: csv::Error| DataError::Csv {
            path: tmp_path.display().to_string(),
            message: e.to_string(),
        };

        let bars = sorted(bars.to_vec());
        {
            let mut writer = csv::Writer::from_path(&tmp_path).map_err(csv_err)?;
            for bar in &bars {
                writer.serialize(CsvRow::from(bar)).map_err(csv_err)?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            DataError::Io(e)
        })?;

        let mut loaded = self.loaded.write().unwrap_or_else(|e| e.into_inner());
        loaded.insert(table.to_string(), Arc::new(bars));
        Ok(())
    }

    fn get(&self, table: &str) -> Result<Arc<Vec<Bar>>, DataError> {
        {
            let loaded = self.loaded.read().unwrap_or_else(|e| e.into_inner());
            if let Some(bars) = loaded.get(table) {
                return Ok(Arc::clone(bars));
            }
        }
        let bars = Arc::new(self.read_file(table)?);
        let mut loaded = self.loaded.write().unwrap_or_else(|e| e.into_inner());
        Ok(Arc::clone(
            loaded.entry(table.to_string()).or_insert(bars),
        ))
    }

    fn read_file(&self, table: &str) -> Result<Vec<Bar>, DataError> {
        let path = self.path(table);
        if !path.exists() {
            return Err(DataError::MissingTable {
                table: table.to_string(),
            });
        }
        let csv_err = |e: csv::Error| DataError::Csv {
            path: path.display().to_string(),
            message: e.to_string(),
        };
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&path)
            .map_err(csv_err)?;
        let mut bars = Vec::new();
        for row in reader.deserialize::<CsvRow>() {
            bars.push(Bar::from(row.map_err(csv_err)?));
        }
        tracing::debug!(table, rows = bars.len(), "loaded csv table");
        Ok(sorted(bars))
    }
}

impl BarTable for CsvBarTable {
    fn scan_after(
        &self,
        table: &str,
        after: i64,
        until: i64,
        limit: usize,
    ) -> Result<Vec<Bar>, DataError> {
        Ok(page_after(&self.get(table)?, after, until, limit))
    }

    fn scan_before(&self, table: &str, before: i64, limit: usize) -> Result<Vec<Bar>, DataError> {
        Ok(page_before(&self.get(table)?, before, limit))
    }
}
