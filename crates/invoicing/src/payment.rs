//! Payment methods: how an invoice total is split into due-dated installments.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use gestio_core::{DomainError, DomainResult, TenantId};

/// One installment: due `days` after the invoice date, for `share_pct` of the
/// total. `None` shares mean "split equally".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallmentRule {
    pub days: u32,
    pub share_pct: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub tenant_id: TenantId,
    pub code: String,
    pub description: String,
    pub installments: Vec<InstallmentRule>,
    /// Due dates move to the last day of their month ("fine mese").
    #[serde(default)]
    pub end_of_month: bool,
}

impl PaymentMethod {
    pub fn new(
        tenant_id: TenantId,
        code: impl Into<String>,
        description: impl Into<String>,
        installments: Vec<InstallmentRule>,
    ) -> DomainResult<Self> {
        let method = Self {
            tenant_id,
            code: code.into().trim().to_uppercase(),
            description: description.into(),
            installments,
            end_of_month: false,
        };
        method.validate()?;
        Ok(method)
    }

    /// "30/60/90"-style method: equal shares at each offset.
    pub fn equal_split(
        tenant_id: TenantId,
        code: impl Into<String>,
        description: impl Into<String>,
        days: &[u32],
    ) -> DomainResult<Self> {
        let installments = days
            .iter()
            .map(|&days| InstallmentRule { days, share_pct: None })
            .collect();
        Self::new(tenant_id, code, description, installments)
    }

    pub fn at_end_of_month(mut self) -> Self {
        self.end_of_month = true;
        self
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.code.is_empty() {
            return Err(DomainError::field("code", "must not be empty"));
        }
        if self.installments.is_empty() {
            return Err(DomainError::field("installments", "at least one installment is required"));
        }

        let explicit = self.installments.iter().filter(|i| i.share_pct.is_some()).count();
        if explicit != 0 && explicit != self.installments.len() {
            return Err(DomainError::field(
                "installments",
                "either every installment has a share or none does",
            ));
        }
        if explicit > 0 {
            let mut sum = Decimal::ZERO;
            for rule in &self.installments {
                let share = rule.share_pct.unwrap_or_default();
                if share <= Decimal::ZERO {
                    return Err(DomainError::field("installments", "shares must be positive"));
                }
                sum += share;
            }
            if sum != Decimal::ONE_HUNDRED {
                return Err(DomainError::field(
                    "installments",
                    format!("shares must add up to 100 (got {sum})"),
                ));
            }
        }

        if self.installments.windows(2).any(|w| w[1].days < w[0].days) {
            return Err(DomainError::field("installments", "offsets must not decrease"));
        }
        Ok(())
    }

    /// Percentage of the total owed by each installment, in order.
    pub fn shares(&self) -> Vec<Decimal> {
        let n = Decimal::from(self.installments.len() as u64);
        self.installments
            .iter()
            .map(|rule| rule.share_pct.unwrap_or(Decimal::ONE_HUNDRED / n))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn equal_split_shares() {
        let method =
            PaymentMethod::equal_split(TenantId::new(), "rb3060", "RiBa 30/60", &[30, 60]).unwrap();
        assert_eq!(method.code, "RB3060");
        assert_eq!(method.shares(), vec![dec!(50), dec!(50)]);
    }

    #[test]
    fn explicit_shares_must_add_up() {
        let tenant = TenantId::new();
        let rules = vec![
            InstallmentRule { days: 0, share_pct: Some(dec!(30)) },
            InstallmentRule { days: 30, share_pct: Some(dec!(60)) },
        ];
        assert!(PaymentMethod::new(tenant, "ANT", "Anticipo", rules).unwrap_err().is_validation());

        let mixed = vec![
            InstallmentRule { days: 0, share_pct: Some(dec!(30)) },
            InstallmentRule { days: 30, share_pct: None },
        ];
        assert!(PaymentMethod::new(tenant, "ANT", "Anticipo", mixed).is_err());
    }

    #[test]
    fn offsets_are_ordered() {
        let err = PaymentMethod::equal_split(TenantId::new(), "X", "x", &[60, 30]).unwrap_err();
        assert!(err.to_string().contains("offsets"));
        assert!(PaymentMethod::equal_split(TenantId::new(), "X", "x", &[]).is_err());
    }
}
