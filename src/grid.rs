//! Precision & Grid Calculator.
//!
//! Pure functions only: given a base price, side, and exchange precision
//! rules, produce exchange-legal DCA level prices and quantities. Nothing in
//! this module performs I/O.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{DcaLevel, Side};
use crate::errors::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecisionRules {
    pub tick_size: Decimal,
    pub step_size: Decimal,
    pub min_qty: Decimal,
    pub min_notional: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridLevel {
    pub leg_index: u32,
    pub gap_percent: Decimal,
    pub weight_percent: Decimal,
    pub tp_percent: Decimal,
    pub price: Decimal,
    pub tp_price: Decimal,
    pub quantity: Decimal,
}

/// Snap `value` down toward zero distance from conservatism: for a buy-side
/// price this rounds down (never pay more than computed); for quantities it
/// always rounds down (never claim more size than funded).
fn floor_snap(value: Decimal, increment: Decimal) -> Decimal {
    if increment.is_zero() {
        return value;
    }
    (value / increment).floor() * increment
}

/// Snap a short-side target upward in magnitude terms (i.e. the conservative
/// direction for prices that move opposite to the long convention).
fn ceil_snap(value: Decimal, increment: Decimal) -> Decimal {
    if increment.is_zero() {
        return value;
    }
    (value / increment).ceil() * increment
}

/// Floor-snap an arbitrary quantity to `step_size`, for callers outside the
/// grid (the risk engine's partial-close planner) that need the same
/// conservative rounding without building a full [`GridLevel`].
pub fn snap_quantity(value: Decimal, step_size: Decimal) -> Decimal {
    floor_snap(value, step_size)
}

/// Compute level prices and TP prices for a grid anchored at `base_price`.
///
/// Long legs snap both entry and TP prices down to `tick_size`. Short legs
/// mirror the formulas with inverted sign: the entry `price` snaps up (the
/// conservative direction when moving against a short), but `tp_price`
/// snaps down — rounding a short's take-profit target downward never
/// claims more profit than computed.
pub fn calculate_levels(
    base_price: Decimal,
    side: Side,
    levels: &[DcaLevel],
    precision: &PrecisionRules,
) -> Vec<GridLevel> {
    let hundred = Decimal::new(100, 0);
    levels
        .iter()
        .enumerate()
        .map(|(idx, level)| {
            let (price, tp_price) = match side {
                Side::Long => {
                    let price = base_price * (Decimal::ONE + level.gap_percent / hundred);
                    let tp_price = price * (Decimal::ONE + level.tp_percent / hundred);
                    (floor_snap(price, precision.tick_size), floor_snap(tp_price, precision.tick_size))
                }
                Side::Short => {
                    let price = base_price * (Decimal::ONE - level.gap_percent / hundred);
                    let tp_price = price * (Decimal::ONE - level.tp_percent / hundred);
                    (ceil_snap(price, precision.tick_size), floor_snap(tp_price, precision.tick_size))
                }
            };
            GridLevel {
                leg_index: idx as u32,
                gap_percent: level.gap_percent,
                weight_percent: level.weight_percent,
                tp_percent: level.tp_percent,
                price,
                tp_price,
                quantity: Decimal::ZERO,
            }
        })
        .collect()
}

/// Size each level against `total_capital` and validate it clears the
/// exchange's minimum quantity and notional. Fails naming the first
/// offending leg; weight percentages need not sum to 100.
pub fn calculate_quantities(
    mut levels: Vec<GridLevel>,
    total_capital: Decimal,
    precision: &PrecisionRules,
) -> Result<Vec<GridLevel>> {
    let hundred = Decimal::new(100, 0);
    for level in levels.iter_mut() {
        if level.price.is_zero() {
            return Err(EngineError::validation(format!(
                "leg {}: computed price is zero",
                level.leg_index
            )));
        }
        let notional = total_capital * level.weight_percent / hundred;
        let raw_qty = notional / level.price;
        let quantity = floor_snap(raw_qty, precision.step_size);
        if quantity < precision.min_qty {
            return Err(EngineError::validation(format!(
                "leg {}: quantity {} below exchange minimum {}",
                level.leg_index, quantity, precision.min_qty
            )));
        }
        if quantity * level.price < precision.min_notional {
            return Err(EngineError::validation(format!(
                "leg {}: notional {} below exchange minimum {}",
                level.leg_index,
                quantity * level.price,
                precision.min_notional
            )));
        }
        level.quantity = quantity;
    }
    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn precision() -> PrecisionRules {
        PrecisionRules {
            tick_size: dec!(0.01),
            step_size: dec!(0.00001),
            min_qty: dec!(0.00001),
            min_notional: dec!(10),
        }
    }

    fn levels() -> Vec<DcaLevel> {
        vec![
            DcaLevel { gap_percent: dec!(0), weight_percent: dec!(50), tp_percent: dec!(1) },
            DcaLevel { gap_percent: dec!(-2), weight_percent: dec!(50), tp_percent: dec!(1) },
        ]
    }

    #[test]
    fn long_grid_matches_scenario_s1() {
        let levels = calculate_levels(dec!(50000), Side::Long, &levels(), &precision());
        assert_eq!(levels[0].price, dec!(50000.00));
        assert_eq!(levels[1].price, dec!(49000.00));
        assert_eq!(levels[0].tp_price, dec!(50500.00));
        assert_eq!(levels[1].tp_price, dec!(49490.00));

        let sized = calculate_quantities(levels, dec!(1000) * dec!(0.10), &precision()).unwrap();
        assert_eq!(sized[0].quantity, dec!(0.00100));
        assert_eq!(sized[1].quantity, dec!(0.00102));
    }

    #[test]
    fn rejects_dust_below_min_notional() {
        let levels = calculate_levels(dec!(50000), Side::Long, &levels(), &precision());
        let err = calculate_quantities(levels, dec!(1), &precision()).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn short_grid_inverts_and_snaps_conservatively() {
        let levels = calculate_levels(dec!(50000), Side::Short, &levels(), &precision());
        assert_eq!(levels[0].price, dec!(50000.00));
        assert_eq!(levels[1].price, dec!(51000.00));
        assert!(levels[1].tp_price < levels[1].price);
    }

    #[test]
    fn short_tp_price_floor_snaps_while_entry_price_ceil_snaps() {
        let levels = vec![DcaLevel { gap_percent: dec!(0), weight_percent: dec!(100), tp_percent: dec!(1.5) }];
        let coarse = PrecisionRules { tick_size: dec!(1), step_size: dec!(0.00001), min_qty: dec!(0.00001), min_notional: dec!(10) };
        let grid = calculate_levels(dec!(100), Side::Short, &levels, &coarse);
        // entry: raw 100, already a multiple of tick_size, ceil_snap leaves it unchanged.
        assert_eq!(grid[0].price, dec!(100));
        // tp: raw 100 * (1 - 1.5/100) = 98.5, floor-snapped down to 98 rather than
        // ceil-snapped up to 99 — a short's take-profit never claims more than computed.
        assert_eq!(grid[0].tp_price, dec!(98));
    }
}
