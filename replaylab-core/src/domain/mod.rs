//! Domain types for ReplayLab

pub mod bar;
pub mod equity;
pub mod event;
pub mod position;
pub mod series;
pub mod state;
pub mod timeframe;
pub mod trade;

pub use bar::Bar;
pub use equity::EquityPoint;
pub use event::{EventKind, TradeEvent};
pub use position::{OrderSide, Position, PositionSide};
pub use series::{normalize_symbol, Series, SeriesKey};
pub use state::{SymbolConfig, SymbolState};
pub use timeframe::{Timeframe, TimeframeError};
pub use trade::{ExitReason, Trade};

/// Symbol type alias
pub type Symbol = String;
