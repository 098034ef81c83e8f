//! ReplayLab Runner — backtest orchestration, equity curves, statistics.
//!
//! This crate builds on `replaylab-core` to provide:
//! - Serializable run requests with validation and content-hash run ids
//! - Timeline and batch open-close execution strategies
//! - Decision source and session gate traits for external collaborators
//! - Non-blocking progress reporting and cooperative cancellation
//! - Bucketed equity curves and performance reports
//! - `run_backtest()`, the single entry point tying it all together

pub mod cancel;
pub mod config;
pub mod decision;
pub mod equity;
pub mod metrics;
pub mod orchestrator;
pub mod progress;
pub mod result;
pub mod runner;
pub mod session;

pub use cancel::CancelToken;
pub use config::{
    ConfigError, DataWindow, ExecutionMode, OutputOptions, RunId, RunRequest, SymbolOverride,
    TimeBound,
};
pub use decision::{DecisionSource, NoDecisions, ScheduledDecisions};
pub use equity::EquityCurveBuilder;
pub use metrics::PerformanceReport;
pub use orchestrator::{BatchOpenCloseStrategy, ExecutionStrategy, TimelineStrategy};
pub use progress::{
    ChannelProgress, NullProgress, ProgressEvent, ProgressSink, Stage, ThrottledProgress,
};
pub use result::{BacktestResult, SymbolResult, SCHEMA_VERSION};
pub use runner::{run_backtest, RunError, RunOptions};
pub use session::{AlwaysOpen, SessionGate, SessionPermit, UtcSessionGate};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn result_types_are_send_sync() {
        assert_send::<BacktestResult>();
        assert_sync::<BacktestResult>();
        assert_send::<PerformanceReport>();
        assert_sync::<PerformanceReport>();
    }

    #[test]
    fn config_types_are_send_sync() {
        assert_send::<RunRequest>();
        assert_sync::<RunRequest>();
        assert_send::<UtcSessionGate>();
        assert_sync::<UtcSessionGate>();
    }

    #[test]
    fn shared_run_state_is_send_sync() {
        assert_send::<CancelToken>();
        assert_sync::<CancelToken>();
        assert_send::<ChannelProgress>();
        assert_sync::<ChannelProgress>();
        assert_send::<orchestrator::RunCounters>();
        assert_sync::<orchestrator::RunCounters>();
        assert_send::<orchestrator::TradePreview>();
        assert_sync::<orchestrator::TradePreview>();
        assert_send::<RunError>();
    }

    #[test]
    fn collaborator_traits_are_object_safe() {
        fn _decisions(_: &dyn DecisionSource) {}
        fn _session(_: &dyn SessionGate) {}
        fn _progress(_: &dyn ProgressSink) {}
        fn _strategy(_: &dyn ExecutionStrategy) {}
    }
}
