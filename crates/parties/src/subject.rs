use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use gestio_core::{domain_id, DomainError, DomainResult, OperationType, TenantId};

use crate::category::SubjectCategoryId;
use crate::roles::SubjectRoles;

domain_id!(
    /// Subject identifier (tenant-scoped).
    SubjectId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectStatus {
    Active,
    Suspended,
}

/// Italian fiscal identifiers: VAT number (partita IVA) and tax code
/// (codice fiscale). At least one is required for companies; private
/// clients may have only the tax code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalIdentifiers {
    pub vat_number: Option<String>,
    pub tax_code: Option<String>,
}

impl FiscalIdentifiers {
    fn validate(&self) -> DomainResult<()> {
        if let Some(vat) = &self.vat_number {
            let digits = vat.trim_start_matches("IT");
            if digits.len() != 11 || !digits.chars().all(|c| c.is_ascii_digit()) {
                return Err(DomainError::field("vat_number", "must be 11 digits"));
            }
        }
        if let Some(code) = &self.tax_code {
            let len = code.len();
            if !(len == 11 || len == 16) || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(DomainError::field("tax_code", "must be 11 or 16 alphanumeric characters"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

/// Purchasing terms of a supplier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierTerms {
    pub lead_time_days: u32,
    /// Standing discount percentage granted by the supplier.
    pub discount_pct: Decimal,
}

/// A counterparty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    pub tenant_id: TenantId,
    pub name: String,
    pub roles: SubjectRoles,
    #[serde(default)]
    pub fiscal: FiscalIdentifiers,
    #[serde(default)]
    pub contact: ContactInfo,
    pub category_id: Option<SubjectCategoryId>,
    /// VAT code applied to this subject's lines unless a line overrides it.
    pub default_vat_code: Option<String>,
    /// Payment method code used for invoices when none is given explicitly.
    pub payment_method: Option<String>,
    pub supplier_terms: Option<SupplierTerms>,
    pub status: SubjectStatus,
}

impl Subject {
    pub fn new(tenant_id: TenantId, name: impl Into<String>, roles: SubjectRoles) -> DomainResult<Self> {
        let subject = Self {
            id: SubjectId::new(),
            tenant_id,
            name: name.into(),
            roles,
            fiscal: FiscalIdentifiers::default(),
            contact: ContactInfo::default(),
            category_id: None,
            default_vat_code: None,
            payment_method: None,
            supplier_terms: None,
            status: SubjectStatus::Active,
        };
        subject.validate()?;
        Ok(subject)
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::field("name", "must not be empty"));
        }
        if self.roles.is_empty() {
            return Err(DomainError::field("roles", "a subject needs at least one role"));
        }
        self.fiscal.validate()?;
        if let Some(terms) = &self.supplier_terms {
            if !self.roles.can_buy_from() {
                return Err(DomainError::field("supplier_terms", "only suppliers carry purchasing terms"));
            }
            if terms.discount_pct < Decimal::ZERO || terms.discount_pct > Decimal::ONE_HUNDRED {
                return Err(DomainError::field("supplier_terms.discount_pct", "must be between 0 and 100"));
            }
        }
        Ok(())
    }

    pub fn can_transact(&self) -> bool {
        self.status == SubjectStatus::Active
    }

    /// Typed predicate behind order confirmation.
    pub fn ensure_counterparty_for(&self, operation: OperationType) -> DomainResult<()> {
        if !self.can_transact() {
            return Err(DomainError::field("subject", format!("subject '{}' is suspended", self.name)));
        }
        self.roles.ensure_counterparty_for(operation)
    }
}
