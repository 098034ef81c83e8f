//! ReplayLab Core — domain types, market data resolution, fill simulation, object pools.
//!
//! This crate contains the building blocks of the replay engine:
//! - Domain types (bars, series, positions, trades, events, equity points, symbol state)
//! - Tiered market data resolver (cache → provider → paginated table)
//! - Timeline intersection across symbols
//! - Position / order simulator (slippage, fees, funding, stop-loss / take-profit)
//! - Per-bar decision context
//! - Lock-free object pools for hot-loop scratch values

pub mod context;
pub mod data;
pub mod domain;
pub mod pool;
pub mod sim;

pub use context::BarContext;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything that crosses worker threads is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        // Domain types
        require_send::<domain::Bar>();
        require_sync::<domain::Bar>();
        require_send::<domain::Series>();
        require_sync::<domain::Series>();
        require_send::<domain::SymbolState>();
        require_sync::<domain::SymbolState>();
        require_send::<domain::Trade>();
        require_sync::<domain::Trade>();
        require_send::<domain::TradeEvent>();
        require_sync::<domain::TradeEvent>();
        require_send::<domain::EquityPoint>();
        require_sync::<domain::EquityPoint>();

        // Data layer
        require_send::<data::BarCache>();
        require_sync::<data::BarCache>();
        require_send::<data::Resolver>();
        require_sync::<data::Resolver>();
        require_send::<data::CsvBarTable>();
        require_sync::<data::CsvBarTable>();
        require_send::<data::DataError>();
        require_sync::<data::DataError>();

        // Simulator
        require_send::<sim::Simulator>();
        require_sync::<sim::Simulator>();
        require_send::<sim::OpenPlan>();
        require_sync::<sim::OpenPlan>();

        // Pools
        require_send::<pool::EnginePools>();
        require_sync::<pool::EnginePools>();
        require_send::<BarContext>();
        require_sync::<BarContext>();
    }

    /// The resolver's tiers are trait objects; both must be usable behind `Arc`.
    #[test]
    fn tier_traits_are_object_safe() {
        fn _provider(_: &dyn data::MarketDataProvider) {}
        fn _table(_: &dyn data::BarTable) {}
    }
}
