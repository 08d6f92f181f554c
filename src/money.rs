//! Decimal-safe monetary arithmetic.
//!
//! All monetary values in the system are `rust_decimal::Decimal`; floating
//! point never touches money. Amounts are rounded to two decimal places,
//! midpoint away from zero.

use rust_decimal::{Decimal, RoundingStrategy};

/// Number of decimal places kept on monetary amounts.
pub const MONEY_SCALE: u32 = 2;

/// Rounds an amount to monetary precision.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Line total for a quantity of a unit price.
pub fn line_total(unit_price: Decimal, quantity: i32) -> Decimal {
    round_money(unit_price * Decimal::from(quantity))
}

/// Applies a fractional rate (e.g. a tax rate) to an amount.
pub fn apply_rate(amount: Decimal, rate: Decimal) -> Decimal {
    round_money(amount * rate)
}

/// Renders an amount with its currency code, e.g. `USD 12.50`.
pub fn format_amount(currency: &str, amount: Decimal) -> String {
    format!("{} {:.2}", currency, round_money(amount))
}
