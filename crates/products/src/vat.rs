use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use gestio_core::{DomainError, DomainResult, TenantId};

/// VAT code (aliquota IVA), resolved by code within a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VatCode {
    pub tenant_id: TenantId,
    pub code: String,
    pub description: String,
    /// Percentage, e.g. `22` for 22%.
    pub rate: Decimal,
    /// Exemption nature code for zero-rated operations (e.g. "N2.1").
    pub exemption_nature: Option<String>,
}

impl VatCode {
    pub fn new(
        tenant_id: TenantId,
        code: impl Into<String>,
        description: impl Into<String>,
        rate: Decimal,
    ) -> DomainResult<Self> {
        let vat = Self {
            tenant_id,
            code: code.into().trim().to_uppercase(),
            description: description.into(),
            rate,
            exemption_nature: None,
        };
        vat.validate()?;
        Ok(vat)
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.code.is_empty() {
            return Err(DomainError::field("code", "must not be empty"));
        }
        if self.rate < Decimal::ZERO || self.rate > Decimal::ONE_HUNDRED {
            return Err(DomainError::field("rate", "must be between 0 and 100"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rate_must_be_a_percentage() {
        let tenant = TenantId::new();
        assert_eq!(VatCode::new(tenant, " 22 ", "Ordinaria", dec!(22)).unwrap().code, "22");
        assert!(VatCode::new(tenant, "X", "Bad", dec!(101)).is_err());
        assert!(VatCode::new(tenant, "X", "Bad", dec!(-1)).is_err());
    }
}
