use crate::domain::{OrderSide, PositionSide};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown action '{0}' (expected Long, Short, CloseLong or CloseShort)")]
pub struct ActionError(pub String);

/// Raw action handed over by the strategy decision source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Long,
    Short,
    CloseLong,
    CloseShort,
}

impl Action {
    /// (position side, order side, is_close)
    pub fn decompose(self) -> (PositionSide, OrderSide, bool) {
        match self {
            Action::Long => (PositionSide::Long, OrderSide::Buy, false),
            Action::Short => (PositionSide::Short, OrderSide::Sell, false),
            Action::CloseLong => (PositionSide::Long, OrderSide::Sell, true),
            Action::CloseShort => (PositionSide::Short, OrderSide::Buy, true),
        }
    }

    pub fn is_close(self) -> bool {
        self.decompose().2
    }

    pub fn position_side(self) -> PositionSide {
        self.decompose().0
    }

    pub fn open(side: PositionSide) -> Self {
        match side {
            PositionSide::Long => Action::Long,
            PositionSide::Short => Action::Short,
        }
    }

    pub fn close(side: PositionSide) -> Self {
        match side {
            PositionSide::Long => Action::CloseLong,
            PositionSide::Short => Action::CloseShort,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Long => "Long",
            Action::Short => "Short",
            Action::CloseLong => "CloseLong",
            Action::CloseShort => "CloseShort",
        };
        f.write_str(s)
    }
}

impl FromStr for Action {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match key.as_str() {
            "long" => Ok(Action::Long),
            "short" => Ok(Action::Short),
            "closelong" => Ok(Action::CloseLong),
            "closeshort" => Ok(Action::CloseShort),
            _ => Err(ActionError(s.to_string())),
        }
    }
}
