//! Request bodies that do not map one-to-one onto an engine input.
//!
//! Tenant ids never appear here: every record is written into the caller's
//! tenant.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use gestio_core::{DomainResult, TenantId};
use gestio_infra::engine::{DeliveryNoteRequest, InvoiceRequest};
use gestio_orders::OrderId;
use gestio_parties::{
    ContactInfo, FiscalIdentifiers, Subject, SubjectCategoryId, SubjectId, SubjectRole, SubjectRoles, SubjectStatus,
    SupplierTerms,
};
use gestio_products::{Product, ProductId};

#[derive(Debug, Deserialize)]
pub struct UpsertSubjectRequest {
    /// Present when updating an existing subject.
    #[serde(default)]
    pub id: Option<SubjectId>,
    pub name: String,
    pub roles: Vec<SubjectRole>,
    #[serde(default)]
    pub fiscal: FiscalIdentifiers,
    #[serde(default)]
    pub contact: ContactInfo,
    #[serde(default)]
    pub category_id: Option<SubjectCategoryId>,
    #[serde(default)]
    pub default_vat_code: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub supplier_terms: Option<SupplierTerms>,
    #[serde(default)]
    pub suspended: bool,
}

impl UpsertSubjectRequest {
    pub fn into_subject(self, tenant_id: TenantId) -> DomainResult<Subject> {
        let mut subject = Subject::new(tenant_id, self.name, SubjectRoles::of(self.roles))?;
        if let Some(id) = self.id {
            subject.id = id;
        }
        subject.fiscal = self.fiscal;
        subject.contact = self.contact;
        subject.category_id = self.category_id;
        subject.default_vat_code = self.default_vat_code;
        subject.payment_method = self.payment_method;
        subject.supplier_terms = self.supplier_terms;
        if self.suspended {
            subject.status = SubjectStatus::Suspended;
        }
        Ok(subject)
    }
}

#[derive(Debug, Deserialize)]
pub struct UpsertProductRequest {
    #[serde(default)]
    pub id: Option<ProductId>,
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub unit_of_measure: Option<String>,
    pub list_price: Decimal,
    #[serde(default)]
    pub vat_code: Option<String>,
    #[serde(default = "active_by_default")]
    pub active: bool,
}

fn active_by_default() -> bool {
    true
}

impl UpsertProductRequest {
    pub fn into_product(self, tenant_id: TenantId) -> DomainResult<Product> {
        let mut product = Product::new(tenant_id, self.code, self.name, self.list_price)?;
        if let Some(id) = self.id {
            product.id = id;
        }
        if let Some(unit) = self.unit_of_measure {
            product.unit_of_measure = unit;
        }
        product.vat_code = self.vat_code;
        product.active = self.active;
        Ok(product)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelOrderRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InvoiceOrderRequest {
    pub causale_code: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub payment_method: Option<String>,
}

impl InvoiceOrderRequest {
    pub fn for_order(self, order_id: OrderId) -> InvoiceRequest {
        InvoiceRequest {
            order_id,
            causale_code: self.causale_code,
            date: self.date,
            payment_method: self.payment_method,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DeliveryNoteOrderRequest {
    pub causale_code: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub carrier_id: Option<SubjectId>,
}

impl DeliveryNoteOrderRequest {
    pub fn for_order(self, order_id: OrderId) -> DeliveryNoteRequest {
        DeliveryNoteRequest {
            order_id,
            causale_code: self.causale_code,
            date: self.date,
            carrier_id: self.carrier_id,
        }
    }
}

/// Answer of `GET /ledger/products/:id/verify`.
#[derive(Debug, Serialize)]
pub struct StockVerification<T> {
    pub consistent: bool,
    pub discrepancy: Option<T>,
}
