//! VAT code resolution for document lines.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use gestio_core::{DomainError, DomainResult};
use gestio_products::{ProductId, VatCode};

/// VAT code and rate a line was priced with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedVat {
    pub code: String,
    pub rate: Decimal,
}

/// Current VAT configuration relevant to one document: the counterparty's
/// default code, each product's code and the tenant's rates.
///
/// A line's code is its own override, else the subject default, else the
/// product's code.
#[derive(Debug, Clone, Default)]
pub struct VatContext {
    subject_default: Option<String>,
    product_codes: HashMap<ProductId, String>,
    rates: HashMap<String, Decimal>,
}

impl VatContext {
    pub fn new(subject_default: Option<String>) -> Self {
        Self {
            subject_default,
            ..Self::default()
        }
    }

    pub fn with_product(mut self, product_id: ProductId, code: Option<String>) -> Self {
        if let Some(code) = code {
            self.product_codes.insert(product_id, code);
        }
        self
    }

    pub fn with_rates<'a>(mut self, codes: impl IntoIterator<Item = &'a VatCode>) -> Self {
        for vat in codes {
            self.rates.insert(vat.code.clone(), vat.rate);
        }
        self
    }

    pub fn resolve(&self, product_id: ProductId, line_override: Option<&str>) -> DomainResult<AppliedVat> {
        let code = line_override
            .or(self.subject_default.as_deref())
            .or_else(|| self.product_codes.get(&product_id).map(String::as_str))
            .ok_or_else(|| {
                DomainError::field("vat_code", format!("no VAT code applies to product {product_id}"))
            })?;
        let code = code.trim().to_uppercase();
        let rate = self
            .rates
            .get(&code)
            .copied()
            .ok_or_else(|| DomainError::field("vat_code", format!("unknown VAT code '{code}'")))?;
        Ok(AppliedVat { code, rate })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gestio_core::TenantId;
    use rust_decimal_macros::dec;

    fn rates(tenant: TenantId) -> Vec<VatCode> {
        vec![
            VatCode::new(tenant, "22", "Ordinaria", dec!(22)).unwrap(),
            VatCode::new(tenant, "10", "Ridotta", dec!(10)).unwrap(),
            VatCode::new(tenant, "4", "Minima", dec!(4)).unwrap(),
        ]
    }

    #[test]
    fn override_then_subject_then_product() {
        let tenant = TenantId::new();
        let codes = rates(tenant);
        let product = ProductId::new();

        let ctx = VatContext::new(None)
            .with_product(product, Some("4".into()))
            .with_rates(&codes);
        assert_eq!(ctx.resolve(product, None).unwrap().rate, dec!(4));

        let ctx = VatContext::new(Some("10".into()))
            .with_product(product, Some("4".into()))
            .with_rates(&codes);
        assert_eq!(ctx.resolve(product, None).unwrap().code, "10");
        assert_eq!(ctx.resolve(product, Some("22")).unwrap().rate, dec!(22));
    }

    #[test]
    fn missing_or_unknown_codes_are_field_errors() {
        let tenant = TenantId::new();
        let codes = rates(tenant);
        let ctx = VatContext::new(None).with_rates(&codes);
        assert!(ctx.resolve(ProductId::new(), None).unwrap_err().is_validation());
        assert!(ctx.resolve(ProductId::new(), Some("99")).unwrap_err().is_validation());
    }
}
