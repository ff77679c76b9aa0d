//! Payment schedule (scadenze) generation.

use chrono::{Datelike, Days, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use gestio_core::{round_money, DomainError, DomainResult};

use crate::invoice::InvoiceId;
use crate::payment::PaymentMethod;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub invoice_id: InvoiceId,
    pub installment: u32,
    pub due_date: NaiveDate,
    pub amount: Decimal,
}

/// Split `total` into due-dated installments.
///
/// Every installment but the last is rounded to the cent; the last one takes
/// whatever remains so the entries add up to `total` exactly. Without a
/// payment method there is nothing to schedule.
pub fn generate_schedule(
    invoice_id: InvoiceId,
    total: Decimal,
    invoice_date: NaiveDate,
    method: Option<&PaymentMethod>,
) -> DomainResult<Vec<ScheduleEntry>> {
    let Some(method) = method else {
        return Ok(Vec::new());
    };
    method.validate()?;

    let shares = method.shares();
    let last = shares.len() - 1;
    let mut allocated = Decimal::ZERO;
    let mut entries = Vec::with_capacity(shares.len());

    for (idx, (rule, share)) in method.installments.iter().zip(shares).enumerate() {
        let amount = if idx == last {
            total - allocated
        } else {
            round_money(total * share / Decimal::ONE_HUNDRED)
        };
        allocated += amount;

        entries.push(ScheduleEntry {
            invoice_id,
            installment: idx as u32 + 1,
            due_date: due_date(invoice_date, rule.days, method.end_of_month)?,
            amount,
        });
    }

    Ok(entries)
}

fn due_date(from: NaiveDate, days: u32, end_of_month: bool) -> DomainResult<NaiveDate> {
    let due = from
        .checked_add_days(Days::new(u64::from(days)))
        .ok_or_else(|| DomainError::field("installments", format!("offset of {days} days is out of range")))?;
    if end_of_month { last_day_of_month(due) } else { Ok(due) }
}

fn last_day_of_month(date: NaiveDate) -> DomainResult<NaiveDate> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.pred_opt())
        .ok_or_else(|| DomainError::field("installments", "due date out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::InstallmentRule;
    use gestio_core::TenantId;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn thirty_sixty_split_of_one_thousand() {
        let method =
            PaymentMethod::equal_split(TenantId::new(), "RB3060", "RiBa 30/60", &[30, 60]).unwrap();
        let invoice_id = InvoiceId::new();

        let entries = generate_schedule(invoice_id, dec!(1000.00), date(2026, 3, 1), Some(&method))
            .unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].amount, dec!(500.00));
        assert_eq!(entries[1].amount, dec!(500.00));
        assert_eq!(entries[0].due_date, date(2026, 3, 31));
        assert_eq!(entries[1].due_date, date(2026, 4, 30));
        assert!(entries.iter().all(|e| e.invoice_id == invoice_id));
    }

    #[test]
    fn remainder_goes_to_the_last_installment() {
        let method =
            PaymentMethod::equal_split(TenantId::new(), "3X", "30/60/90", &[30, 60, 90]).unwrap();
        let entries = generate_schedule(
            InvoiceId::new(),
            dec!(100.00),
            date(2026, 1, 15),
            Some(&method),
        )
        .unwrap();

        let amounts: Vec<_> = entries.iter().map(|e| e.amount).collect();
        assert_eq!(amounts, vec![dec!(33.33), dec!(33.33), dec!(33.34)]);
    }

    #[test]
    fn no_method_means_no_schedule() {
        let entries = generate_schedule(InvoiceId::new(), dec!(128.10), date(2026, 1, 1), None)
            .unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn end_of_month_due_dates() {
        let method = PaymentMethod::equal_split(TenantId::new(), "30FM", "30 fine mese", &[30])
            .unwrap()
            .at_end_of_month();
        let entries = generate_schedule(
            InvoiceId::new(),
            dec!(10),
            date(2026, 1, 31),
            Some(&method),
        )
        .unwrap();
        // 31 Jan + 30 days = 2 Mar, moved to the end of March
        assert_eq!(entries[0].due_date, date(2026, 3, 31));

        let december = generate_schedule(
            InvoiceId::new(),
            dec!(10),
            date(2026, 11, 20),
            Some(&method),
        )
        .unwrap();
        assert_eq!(december[0].due_date, date(2026, 12, 31));
    }

    #[test]
    fn explicit_shares() {
        let method = PaymentMethod::new(
            TenantId::new(),
            "ANT30",
            "30% anticipo, saldo a 60",
            vec![
                InstallmentRule { days: 0, share_pct: Some(dec!(30)) },
                InstallmentRule { days: 60, share_pct: Some(dec!(70)) },
            ],
        )
        .unwrap();
        let entries = generate_schedule(
            InvoiceId::new(),
            dec!(999.99),
            date(2026, 5, 10),
            Some(&method),
        )
        .unwrap();
        assert_eq!(entries[0].amount, dec!(300.00));
        assert_eq!(entries[1].amount, dec!(699.99));
        assert_eq!(entries[0].due_date, date(2026, 5, 10));
    }

    proptest! {
        #[test]
        fn schedule_sums_to_total(
            cents in -10_000_000i64..10_000_000,
            offsets in proptest::collection::vec(0u32..365, 1..7),
        ) {
            let mut offsets = offsets;
            offsets.sort_unstable();
            let method = PaymentMethod::equal_split(TenantId::new(), "P", "p", &offsets).unwrap();
            let total = Decimal::new(cents, 2);

            let entries = generate_schedule(
                InvoiceId::new(),
                total,
                date(2026, 6, 30),
                Some(&method),
            )
            .unwrap();

            prop_assert_eq!(entries.len(), offsets.len());
            let sum: Decimal = entries.iter().map(|e| e.amount).sum();
            prop_assert_eq!(sum, total);
        }
    }
}
