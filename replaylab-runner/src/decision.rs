//! Decision sources: where entry and exit actions come from.
//!
//! The condition language that normally produces these decisions lives
//! outside this crate; the orchestrator only needs the narrow trait below.

use replaylab_core::domain::{normalize_symbol, Bar};
use replaylab_core::sim::Action;
use replaylab_core::BarContext;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::config::{ConfigError, TimeBound};

/// Strategy decisions for one symbol on one bar.
///
/// `entry_signal` should return an opening action (`Long` / `Short`) and
/// `exit_signal` a closing one (`CloseLong` / `CloseShort`); the
/// orchestrator ignores anything of the wrong kind.
pub trait DecisionSource: Send + Sync {
    fn entry_signal(&self, ctx: &BarContext) -> Option<Action>;

    fn exit_signal(&self, ctx: &BarContext) -> Option<Action>;

    /// Whether `compute_indicators` must run before the signals are asked.
    fn references_indicators(&self) -> bool {
        false
    }

    fn compute_indicators(&self, _ctx: &mut BarContext) {}

    /// Indicators the signals read. While any of them is missing from the
    /// context after `compute_indicators`, the bar is treated as warm-up and
    /// no signal is asked.
    fn indicator_names(&self, _names: &mut Vec<String>) {}

    /// Whether `observe_market` should be called.
    fn references_market(&self) -> bool {
        false
    }

    /// Current bar of every symbol that has one at `timestamp`. Timeline
    /// mode calls this once per timestamp, before any symbol is stepped.
    fn observe_market(&self, _timestamp: i64, _bars: &HashMap<String, Bar>) {}
}

/// One row of a decision schedule file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledSignal {
    pub symbol: String,
    pub at: TimeBound,
    pub action: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ScheduleFile {
    #[serde(default, rename = "signal")]
    signals: Vec<ScheduledSignal>,
}

/// Explicit timestamp → action table per symbol.
///
/// Opening actions are served from `entry_signal`, closing actions from
/// `exit_signal`. Useful for replays of recorded decisions and for tests.
#[derive(Debug, Clone, Default)]
pub struct ScheduledDecisions {
    entries: HashMap<String, BTreeMap<i64, Action>>,
    exits: HashMap<String, BTreeMap<i64, Action>>,
}

impl ScheduledDecisions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: &str, timestamp: i64, action: Action) {
        let table = if action.is_close() {
            &mut self.exits
        } else {
            &mut self.entries
        };
        table
            .entry(normalize_symbol(symbol))
            .or_default()
            .insert(timestamp, action);
    }

    pub fn with(mut self, symbol: &str, timestamp: i64, action: Action) -> Self {
        self.insert(symbol, timestamp, action);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum::<usize>()
            + self.exits.values().map(BTreeMap::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parse `[[signal]]` tables with `symbol`, `at` and `action` keys.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let file: ScheduleFile =
            toml::from_str(text).map_err(|e| ConfigError::Toml(e.to_string()))?;
        let mut out = Self::new();
        for signal in file.signals {
            let action = signal
                .action
                .parse::<Action>()
                .map_err(|e| ConfigError::InvalidParameter {
                    name: format!("signal.{}", signal.symbol),
                    reason: e.to_string(),
                })?;
            out.insert(&signal.symbol, signal.at.to_millis()?, action);
        }
        Ok(out)
    }

    fn lookup(
        table: &HashMap<String, BTreeMap<i64, Action>>,
        ctx: &BarContext,
    ) -> Option<Action> {
        table
            .get(&ctx.symbol)
            .and_then(|m| m.get(&ctx.timestamp))
            .copied()
    }
}

impl DecisionSource for ScheduledDecisions {
    fn entry_signal(&self, ctx: &BarContext) -> Option<Action> {
        Self::lookup(&self.entries, ctx)
    }

    fn exit_signal(&self, ctx: &BarContext) -> Option<Action> {
        Self::lookup(&self.exits, ctx)
    }
}

/// Never trades.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDecisions;

impl DecisionSource for NoDecisions {
    fn entry_signal(&self, _ctx: &BarContext) -> Option<Action> {
        None
    }

    fn exit_signal(&self, _ctx: &BarContext) -> Option<Action> {
        None
    }
}
