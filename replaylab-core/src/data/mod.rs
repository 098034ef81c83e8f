//! Market data resolution.
//!
//! - `provider`: `MarketDataProvider` trait and `DataError`
//! - `table`: paginated `BarTable` backends (memory, CSV directory)
//! - `cache`: shared in-memory `BarCache`
//! - `resolver`: tiered `Resolver` (cache → provider → table)
//! - `intersect`: common driving timeline across symbols

pub mod cache;
pub mod intersect;
pub mod provider;
pub mod resolver;
pub mod table;

pub use cache::BarCache;
pub use intersect::{build_intersection, build_intersection_in};
pub use provider::{DataError, DataSource, MarketDataProvider, StaticProvider};
pub use resolver::{Resolved, Resolver, DEFAULT_PAGE_SIZE, MIN_PAGE_SIZE};
pub use table::{BarTable, CsvBarTable, MemoryBarTable};
