//! Line and document arithmetic.
//!
//! `taxable = qty * unit_price * (1 - discount_pct/100) - discount_amount`,
//! `vat = taxable * rate/100`, `total = taxable + vat`; each figure is
//! rounded to cents on its own, and header totals are plain sums of the
//! rounded line figures so they always balance to the cent.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use gestio_core::{money::percent_of, round_money, DomainError, DomainResult};

/// Percentage and/or flat discount on a line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineDiscount {
    #[serde(default)]
    pub percent: Decimal,
    /// Flat amount off the whole line, after the percentage.
    #[serde(default)]
    pub amount: Decimal,
}

impl LineDiscount {
    pub fn percent(percent: Decimal) -> Self {
        Self {
            percent,
            amount: Decimal::ZERO,
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.percent < Decimal::ZERO || self.percent > Decimal::ONE_HUNDRED {
            return Err(DomainError::field("discount.percent", "must be between 0 and 100"));
        }
        if self.amount < Decimal::ZERO {
            return Err(DomainError::field("discount.amount", "must not be negative"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAmounts {
    pub taxable: Decimal,
    pub vat: Decimal,
    pub total: Decimal,
}

/// Amounts of one line. Fails on non-positive quantity, negative price or a
/// discount larger than the line.
pub fn line_amounts(
    quantity: Decimal,
    unit_price: Decimal,
    discount: LineDiscount,
    vat_rate: Decimal,
) -> DomainResult<LineAmounts> {
    if quantity <= Decimal::ZERO {
        return Err(DomainError::field("quantity", "must be greater than zero"));
    }
    if unit_price < Decimal::ZERO {
        return Err(DomainError::field("unit_price", "must not be negative"));
    }
    if vat_rate < Decimal::ZERO || vat_rate > Decimal::ONE_HUNDRED {
        return Err(DomainError::field("vat_rate", "must be between 0 and 100"));
    }
    discount.validate()?;

    let gross = quantity * unit_price;
    let taxable = round_money(gross - percent_of(gross, discount.percent) - discount.amount);
    if taxable < Decimal::ZERO {
        return Err(DomainError::field("discount.amount", "exceeds the line amount"));
    }
    let vat = round_money(percent_of(taxable, vat_rate));
    Ok(LineAmounts {
        taxable,
        vat,
        total: taxable + vat,
    })
}

/// Header totals, derived from lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentTotals {
    pub taxable: Decimal,
    pub vat: Decimal,
    pub total: Decimal,
}

impl DocumentTotals {
    pub fn from_lines<'a>(lines: impl IntoIterator<Item = &'a LineAmounts>) -> Self {
        lines.into_iter().fold(Self::default(), |acc, line| Self {
            taxable: acc.taxable + line.taxable,
            vat: acc.vat + line.vat,
            total: acc.total + line.total,
        })
    }
}
