//! Money arithmetic.
//!
//! All amounts are INR held in [`Decimal`] with exactly two fractional digits.
//! Every derived figure passes through [`round_money`] (half-up, i.e. midpoint
//! away from zero), never through floating point.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{DomainError, DomainResult};

/// Largest single amount the ledger accepts (one lakh crore).
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(2_764_472_320, 232_830, 0, false, 0);

/// Round to paise, half-up, and normalise the scale to 2.
pub fn round_money(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}

/// `round(amount * percentage / 100, 2)`.
pub fn percentage_of(amount: Decimal, percentage: Decimal) -> Decimal {
    round_money(amount * percentage / Decimal::ONE_HUNDRED)
}

/// Overflow-safe [`percentage_of`]; `None` when the product leaves `Decimal`'s range.
pub fn checked_percentage_of(amount: Decimal, percentage: Decimal) -> Option<Decimal> {
    amount
        .checked_mul(percentage)?
        .checked_div(Decimal::ONE_HUNDRED)
        .map(round_money)
}

/// Sum already-rounded amounts; the result keeps scale 2.
pub fn sum<I>(amounts: I) -> Decimal
where
    I: IntoIterator<Item = Decimal>,
{
    round_money(amounts.into_iter().fold(Decimal::ZERO, |acc, a| acc + a))
}

pub fn ensure_positive(field: &str, amount: Decimal) -> DomainResult<Decimal> {
    if amount <= Decimal::ZERO {
        return Err(DomainError::validation(format!("{field} must be greater than zero")));
    }
    if amount > MAX_AMOUNT {
        return Err(DomainError::validation(format!("{field} exceeds {MAX_AMOUNT}")));
    }
    if amount.normalize().scale() > 2 {
        return Err(DomainError::validation(format!(
            "{field} must not have more than two decimal places"
        )));
    }
    Ok(round_money(amount))
}

/// Percentages are accepted in `[0, 100]` with up to four fractional digits.
pub fn ensure_percentage(field: &str, percentage: Decimal) -> DomainResult<Decimal> {
    if percentage < Decimal::ZERO || percentage > Decimal::ONE_HUNDRED {
        return Err(DomainError::validation(format!("{field} must be between 0 and 100")));
    }
    if percentage.normalize().scale() > 4 {
        return Err(DomainError::validation(format!(
            "{field} must not have more than four decimal places"
        )));
    }
    Ok(percentage)
}
