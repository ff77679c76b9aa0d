//! Money and cost arithmetic.
//!
//! Amounts are `Decimal` end to end. Monetary figures (line amounts, totals,
//! installments) settle to cents; running average costs keep more precision
//! so repeated averaging does not drift.

use rust_decimal::{Decimal, RoundingStrategy};

/// Decimal places of every monetary figure.
pub const MONEY_SCALE: u32 = 2;

/// Decimal places kept on unit costs.
pub const COST_SCALE: u32 = 6;

/// Round to cents, half away from zero.
#[inline]
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Round a unit cost to [`COST_SCALE`] places, half away from zero.
#[inline]
pub fn round_cost(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(COST_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// `amount * pct / 100`, unrounded.
#[inline]
pub fn percent_of(amount: Decimal, pct: Decimal) -> Decimal {
    amount * pct / Decimal::ONE_HUNDRED
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn money_rounds_half_away_from_zero() {
        assert_eq!(round_money(dec!(2.345)), dec!(2.35));
        assert_eq!(round_money(dec!(-2.345)), dec!(-2.35));
        assert_eq!(round_money(dec!(2.344)), dec!(2.34));
    }

    #[test]
    fn vat_on_scenario_taxable() {
        assert_eq!(round_money(percent_of(dec!(105), dec!(22))), dec!(23.10));
    }

    #[test]
    fn cost_keeps_six_places() {
        assert_eq!(round_cost(dec!(10) / dec!(3)), dec!(3.333333));
    }

    proptest! {
        #[test]
        fn money_rounding_stays_within_half_a_cent(mills in -10_000_000i64..10_000_000) {
            let value = Decimal::new(mills, 3);
            let rounded = round_money(value);

            prop_assert!(rounded.scale() <= MONEY_SCALE);
            prop_assert!((rounded - value).abs() <= dec!(0.005));
            prop_assert_eq!(round_money(rounded), rounded);
        }

        #[test]
        fn money_rounding_is_symmetric_around_zero(mills in 0i64..10_000_000) {
            let value = Decimal::new(mills, 3);
            prop_assert_eq!(round_money(-value), -round_money(value));
        }
    }
}
