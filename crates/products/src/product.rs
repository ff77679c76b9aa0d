use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use gestio_core::{domain_id, DomainError, DomainResult, TenantId};

domain_id!(
    /// Product identifier (tenant-scoped).
    ProductId
);

/// Catalog entry. On-hand quantity and average cost are not stored here:
/// they belong to the stock snapshot the ledger maintains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub tenant_id: TenantId,
    /// Tenant-scoped article code.
    pub code: String,
    pub name: String,
    pub unit_of_measure: String,
    pub list_price: Decimal,
    /// VAT code used when neither the line nor the subject sets one.
    pub vat_code: Option<String>,
    pub active: bool,
}

impl Product {
    pub fn new(
        tenant_id: TenantId,
        code: impl Into<String>,
        name: impl Into<String>,
        list_price: Decimal,
    ) -> DomainResult<Self> {
        let product = Self {
            id: ProductId::new(),
            tenant_id,
            code: code.into().trim().to_string(),
            name: name.into(),
            unit_of_measure: "PZ".to_string(),
            list_price,
            vat_code: None,
            active: true,
        };
        product.validate()?;
        Ok(product)
    }

    pub fn with_vat_code(mut self, code: impl Into<String>) -> Self {
        self.vat_code = Some(code.into());
        self
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.code.is_empty() {
            return Err(DomainError::field("code", "must not be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(DomainError::field("name", "must not be empty"));
        }
        if self.list_price < Decimal::ZERO {
            return Err(DomainError::field("list_price", "must not be negative"));
        }
        Ok(())
    }

    pub fn ensure_active(&self) -> DomainResult<()> {
        if self.active {
            Ok(())
        } else {
            Err(DomainError::field("product", format!("product '{}' is inactive", self.code)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn code_is_trimmed_and_price_checked() {
        let tenant = TenantId::new();
        let product = Product::new(tenant, "  ART-001 ", "Bullone M8", dec!(0.35)).unwrap();
        assert_eq!(product.code, "ART-001");

        assert!(Product::new(tenant, "ART-002", "Dado", dec!(-1)).is_err());
        assert!(Product::new(tenant, "", "Dado", dec!(1)).is_err());
    }

    #[test]
    fn inactive_products_refuse_new_documents() {
        let mut product = Product::new(TenantId::new(), "ART-001", "Bullone", dec!(1)).unwrap();
        assert!(product.ensure_active().is_ok());
        product.active = false;
        assert!(product.ensure_active().is_err());
    }
}
