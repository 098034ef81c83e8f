use serde::{Deserialize, Serialize};

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn opposite(self) -> Self {
        match self {
            PositionSide::Long => PositionSide::Short,
            PositionSide::Short => PositionSide::Long,
        }
    }

    /// Order side that opens a position of this direction.
    pub fn entry_order_side(self) -> OrderSide {
        match self {
            PositionSide::Long => OrderSide::Buy,
            PositionSide::Short => OrderSide::Sell,
        }
    }

    /// Order side that closes a position of this direction.
    pub fn exit_order_side(self) -> OrderSide {
        self.entry_order_side().opposite()
    }

    /// +1 for long, -1 for short.
    pub fn sign(self) -> f64 {
        match self {
            PositionSide::Long => 1.0,
            PositionSide::Short => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

/// Open position on one symbol. Replaced by a `Trade` when closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub side: PositionSide,
    pub entry_time: i64,
    pub entry_price: f64,
    /// Contracts held (always positive; direction lives in `side`).
    pub quantity: f64,
    pub contract_size: f64,
    pub entry_fee: f64,
    pub stop_loss_price: Option<f64>,
    pub take_profit_price: Option<f64>,
    /// Net funding paid while open (negative when received).
    pub funding_paid: f64,
}

impl Position {
    pub fn is_long(&self) -> bool {
        self.side == PositionSide::Long
    }

    pub fn is_short(&self) -> bool {
        self.side == PositionSide::Short
    }

    pub fn notional(&self, price: f64) -> f64 {
        price * self.quantity * self.contract_size
    }

    /// Gross P&L at `price`, before fees and funding.
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.quantity * self.contract_size * self.side.sign()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(side: PositionSide) -> Position {
        Position {
            side,
            entry_time: 0,
            entry_price: 100.0,
            quantity: 2.0,
            contract_size: 0.5,
            entry_fee: 0.0,
            stop_loss_price: None,
            take_profit_price: None,
            funding_paid: 0.0,
        }
    }

    #[test]
    fn long_profits_when_price_rises() {
        assert!((position(PositionSide::Long).unrealized_pnl(110.0) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn short_profits_when_price_falls() {
        assert!((position(PositionSide::Short).unrealized_pnl(90.0) - 10.0).abs() < 1e-12);
        assert!((position(PositionSide::Short).unrealized_pnl(110.0) + 10.0).abs() < 1e-12);
    }

    #[test]
    fn order_sides() {
        assert_eq!(PositionSide::Long.entry_order_side(), OrderSide::Buy);
        assert_eq!(PositionSide::Long.exit_order_side(), OrderSide::Sell);
        assert_eq!(PositionSide::Short.exit_order_side(), OrderSide::Buy);
    }
}
