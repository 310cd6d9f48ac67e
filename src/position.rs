//! Pure position arithmetic: no I/O, no clock, no store access.
//!
//! All quantities and prices are `Decimal`. The average-cost division
//! keeps full precision; rounding happens only at the display edge.

use rust_decimal::Decimal;

use crate::error::LedgerError;
use crate::models::TradeAction;

/// A holding's mutable state: shares held and their average cost basis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub quantity: Decimal,
    pub average_cost: Decimal,
}

impl Position {
    pub fn flat() -> Self {
        Position {
            quantity: Decimal::ZERO,
            average_cost: Decimal::ZERO,
        }
    }
}

/// Fold a buy into a position, recomputing the weighted-average cost.
///
/// `quantity` must be > 0 (validated upstream), so the divisor is never
/// zero.
pub fn apply_buy(current: Position, quantity: Decimal, price: Decimal) -> Position {
    let new_quantity = current.quantity + quantity;
    let new_average_cost =
        (current.average_cost * current.quantity + price * quantity) / new_quantity;
    Position {
        quantity: new_quantity,
        average_cost: new_average_cost,
    }
}

/// Fold a sell into a position. The cost basis of the remaining shares
/// is untouched; only the quantity shrinks.
pub fn apply_sell(current: Position, quantity: Decimal) -> Result<Position, LedgerError> {
    if quantity > current.quantity {
        return Err(LedgerError::InsufficientShares {
            owned: current.quantity,
            requested: quantity,
        });
    }
    Ok(Position {
        quantity: current.quantity - quantity,
        average_cost: current.average_cost,
    })
}

/// Signed cash impact of a trade: buys debit, sells credit.
pub fn balance_delta(action: TradeAction, quantity: Decimal, price: Decimal) -> Decimal {
    match action {
        TradeAction::Buy => -(quantity * price),
        TradeAction::Sell => quantity * price,
    }
}

/// Gain or loss recognized at the moment of a sell. Derived value,
/// never persisted.
pub fn realized_gain(average_cost: Decimal, quantity: Decimal, sale_price: Decimal) -> Decimal {
    quantity * (sale_price - average_cost)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn buy_into_empty_position_takes_trade_price_as_cost() {
        let pos = apply_buy(Position::flat(), dec!(10), dec!(150.00));
        assert_eq!(pos.quantity, dec!(10));
        assert_eq!(pos.average_cost, dec!(150.00));
    }

    #[test]
    fn buy_recomputes_weighted_average_cost() {
        let pos = apply_buy(Position::flat(), dec!(10), dec!(150.00));
        let pos = apply_buy(pos, dec!(5), dec!(180.00));
        assert_eq!(pos.quantity, dec!(15));
        // (150*10 + 180*5) / 15 = 160
        assert_eq!(pos.average_cost, dec!(160.00));
    }

    #[test]
    fn average_cost_is_order_independent_for_buys() {
        let a = apply_buy(
            apply_buy(Position::flat(), dec!(3), dec!(10.00)),
            dec!(7),
            dec!(20.00),
        );
        let b = apply_buy(
            apply_buy(Position::flat(), dec!(7), dec!(20.00)),
            dec!(3),
            dec!(10.00),
        );
        assert_eq!(a.quantity, b.quantity);
        assert_eq!(a.average_cost, b.average_cost);
    }

    #[test]
    fn fractional_buys_keep_full_precision() {
        let pos = apply_buy(Position::flat(), dec!(0.001), dec!(3.00));
        let pos = apply_buy(pos, dec!(0.002), dec!(6.00));
        assert_eq!(pos.quantity, dec!(0.003));
        assert_eq!(pos.average_cost, dec!(5.00));
    }

    #[test]
    fn sell_leaves_average_cost_unchanged() {
        let pos = apply_buy(Position::flat(), dec!(15), dec!(160.00));
        let pos = apply_sell(pos, dec!(8)).unwrap();
        assert_eq!(pos.quantity, dec!(7));
        assert_eq!(pos.average_cost, dec!(160.00));
    }

    #[test]
    fn sell_to_zero_closes_the_position() {
        let pos = apply_buy(Position::flat(), dec!(4), dec!(25.00));
        let pos = apply_sell(pos, dec!(4)).unwrap();
        assert_eq!(pos.quantity, Decimal::ZERO);
        assert_eq!(pos.average_cost, dec!(25.00));
    }

    #[test]
    fn overselling_is_rejected_with_owned_and_requested() {
        let pos = apply_buy(Position::flat(), dec!(2), dec!(50.00));
        match apply_sell(pos, dec!(3)) {
            Err(LedgerError::InsufficientShares { owned, requested }) => {
                assert_eq!(owned, dec!(2));
                assert_eq!(requested, dec!(3));
            }
            other => panic!("expected InsufficientShares, got {other:?}"),
        }
    }

    #[test]
    fn balance_delta_signs() {
        assert_eq!(
            balance_delta(TradeAction::Buy, dec!(10), dec!(150.00)),
            dec!(-1500.00)
        );
        assert_eq!(
            balance_delta(TradeAction::Sell, dec!(8), dec!(200.00)),
            dec!(1600.00)
        );
    }

    #[test]
    fn realized_gain_uses_average_cost_not_last_price() {
        assert_eq!(
            realized_gain(dec!(160.00), dec!(8), dec!(200.00)),
            dec!(320.00)
        );
        assert_eq!(
            realized_gain(dec!(160.00), dec!(8), dec!(100.00)),
            dec!(-480.00)
        );
    }
}
