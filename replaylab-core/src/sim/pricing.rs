//! Pure pricing helpers: slippage, fees, quantity normalization, SL/TP levels.

use crate::domain::{OrderSide, PositionSide};

/// Adjust `price` by `bps` basis points against the taker: up for buys,
/// down for sells. Non-positive or non-finite `bps` leaves the price as is.
pub fn apply_slippage(price: f64, side: OrderSide, bps: f64) -> f64 {
    if !bps.is_finite() || bps <= 0.0 {
        return price;
    }
    let factor = bps / 10_000.0;
    match side {
        OrderSide::Buy => price * (1.0 + factor),
        OrderSide::Sell => price * (1.0 - factor),
    }
}

/// Fee for one side of a fill. Zero when any input is non-positive.
pub fn compute_fee(price: f64, quantity: f64, contract_size: f64, fee_rate: f64) -> f64 {
    if !(fee_rate > 0.0 && price > 0.0 && quantity > 0.0 && contract_size > 0.0) {
        return 0.0;
    }
    price * quantity * contract_size * fee_rate
}

/// Floor `raw` to `precision` decimal places, clamp it to `max`, and reject
/// (return 0) anything below `min`.
pub fn normalize_quantity(raw: f64, precision: u32, min: f64, max: Option<f64>) -> f64 {
    if !raw.is_finite() || raw <= 0.0 {
        return 0.0;
    }
    let factor = 10f64.powi(precision.min(12) as i32);
    let floor = |q: f64| ((q * factor) + 1e-9).floor() / factor;
    let mut qty = floor(raw);
    if let Some(max) = max.filter(|m| *m > 0.0) {
        if qty > max {
            qty = floor(max);
        }
    }
    if qty <= 0.0 || qty < min {
        return 0.0;
    }
    qty
}

/// `entry * (1 - pct/leverage)` for longs, `entry * (1 + pct/leverage)` for
/// shorts. `None` when disabled or the level would be non-positive.
pub fn stop_loss_price(side: PositionSide, entry: f64, pct: Option<f64>, leverage: f64) -> Option<f64> {
    level(entry, pct, leverage, -side.sign())
}

/// `entry * (1 + pct/leverage)` for longs, `entry * (1 - pct/leverage)` for
/// shorts.
pub fn take_profit_price(
    side: PositionSide,
    entry: f64,
    pct: Option<f64>,
    leverage: f64,
) -> Option<f64> {
    level(entry, pct, leverage, side.sign())
}

fn level(entry: f64, pct: Option<f64>, leverage: f64, direction: f64) -> Option<f64> {
    let pct = pct.filter(|p| p.is_finite() && *p > 0.0)?;
    let leverage = if leverage.is_finite() && leverage > 1.0 {
        leverage
    } else {
        1.0
    };
    let price = entry * (1.0 + direction * pct / leverage);
    (price > 0.0).then_some(price)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slippage_direction() {
        assert!((apply_slippage(100.0, OrderSide::Buy, 10.0) - 100.1).abs() < 1e-9);
        assert!((apply_slippage(100.0, OrderSide::Sell, 10.0) - 99.9).abs() < 1e-9);
        assert_eq!(apply_slippage(100.0, OrderSide::Buy, 0.0), 100.0);
        assert_eq!(apply_slippage(100.0, OrderSide::Sell, -5.0), 100.0);
    }

    #[test]
    fn fee_is_zero_for_degenerate_inputs() {
        assert_eq!(compute_fee(100.0, 1.0, 1.0, 0.0), 0.0);
        assert_eq!(compute_fee(0.0, 1.0, 1.0, 0.001), 0.0);
        assert_eq!(compute_fee(100.0, 0.0, 1.0, 0.001), 0.0);
        assert_eq!(compute_fee(100.0, 1.0, 0.0, 0.001), 0.0);
        assert!((compute_fee(100.0, 2.0, 0.5, 0.001) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn quantity_floors_to_precision() {
        assert_eq!(normalize_quantity(1.23456, 2, 0.0, None), 1.23);
        assert_eq!(normalize_quantity(0.999, 0, 0.0, None), 0.0);
        assert_eq!(normalize_quantity(3.0, 0, 0.0, None), 3.0);
    }

    #[test]
    fn quantity_float_noise_does_not_lose_a_step() {
        // 0.29 * 100 = 28.999999999999996 in f64
        assert_eq!(normalize_quantity(0.29, 2, 0.0, None), 0.29);
    }

    #[test]
    fn quantity_clamps_to_max_and_rejects_below_min() {
        assert_eq!(normalize_quantity(50.0, 3, 0.0, Some(10.0)), 10.0);
        assert_eq!(normalize_quantity(0.5, 3, 1.0, None), 0.0);
        assert_eq!(normalize_quantity(f64::NAN, 3, 0.0, None), 0.0);
    }

    #[test]
    fn stop_and_take_profit_levels() {
        let long_sl = stop_loss_price(PositionSide::Long, 100.0, Some(0.05), 1.0).unwrap();
        let long_tp = take_profit_price(PositionSide::Long, 100.0, Some(0.05), 1.0).unwrap();
        assert!((long_sl - 95.0).abs() < 1e-9);
        assert!((long_tp - 105.0).abs() < 1e-9);

        let short_sl = stop_loss_price(PositionSide::Short, 100.0, Some(0.1), 2.0).unwrap();
        let short_tp = take_profit_price(PositionSide::Short, 100.0, Some(0.1), 2.0).unwrap();
        assert!((short_sl - 105.0).abs() < 1e-9);
        assert!((short_tp - 95.0).abs() < 1e-9);
    }

    #[test]
    fn levels_disabled_or_degenerate() {
        assert_eq!(stop_loss_price(PositionSide::Long, 100.0, None, 1.0), None);
        assert_eq!(stop_loss_price(PositionSide::Long, 100.0, Some(0.0), 1.0), None);
        // leverage below 1 is floored
        let sl = stop_loss_price(PositionSide::Long, 100.0, Some(0.1), 0.1).unwrap();
        assert!((sl - 90.0).abs() < 1e-9);
        // short take-profit at or below zero is dropped
        assert_eq!(take_profit_price(PositionSide::Short, 100.0, Some(1.5), 1.0), None);
    }
}
