//! Reference data: subjects, products, warehouses, VAT codes, payment
//! methods and causali.
//!
//! Whatever the caller sends, records are always stored under the tenant of
//! the principal.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, instrument, warn};

use gestio_auth::{Action, Principal, Resource};
use gestio_causali::{
    default_catalog, ensure_unused, normalize_code, Direction, DocumentCausale, DocumentType, MovementCausale,
};
use gestio_core::{DomainError, OperationType, TenantId};
use gestio_events::{EventBus, EventEnvelope};
use gestio_invoicing::{InstallmentRule, PaymentMethod};
use gestio_parties::{Subject, SubjectCategory, SubjectCategoryId, SubjectId};
use gestio_products::{Product, ProductId, VatCode, Warehouse, WarehouseId};

use super::{Engine, EngineResult};
use crate::store::{Deletion, EngineStore, StoreError, StoreResult};

/// Small reference record created from a picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuickCreate {
    VatCode {
        code: String,
        description: String,
        rate: Decimal,
    },
    PaymentMethod {
        code: String,
        description: String,
        installments: Vec<InstallmentRule>,
        #[serde(default)]
        end_of_month: bool,
    },
    SubjectCategory {
        name: String,
    },
    Warehouse {
        code: String,
        name: String,
        #[serde(default)]
        primary: bool,
    },
    MovementCausale {
        code: String,
        description: String,
        direction: Direction,
        #[serde(default)]
        updates_average_cost: bool,
        #[serde(default)]
        requires_document: bool,
        #[serde(default)]
        inverse_code: Option<String>,
    },
    DocumentCausale {
        code: String,
        description: String,
        document_type: DocumentType,
        operation: OperationType,
        #[serde(default)]
        movement_causale: Option<String>,
        #[serde(default)]
        separate_numbering: bool,
    },
}

impl QuickCreate {
    fn kind(&self) -> &'static str {
        match self {
            QuickCreate::VatCode { .. } => "vat_code",
            QuickCreate::PaymentMethod { .. } => "payment_method",
            QuickCreate::SubjectCategory { .. } => "subject_category",
            QuickCreate::Warehouse { .. } => "warehouse",
            QuickCreate::MovementCausale { .. } => "movement_causale",
            QuickCreate::DocumentCausale { .. } => "document_causale",
        }
    }

    fn resource(&self) -> Resource {
        match self {
            QuickCreate::VatCode { .. } | QuickCreate::PaymentMethod { .. } => Resource::ReferenceData,
            QuickCreate::SubjectCategory { .. } => Resource::Subjects,
            QuickCreate::Warehouse { .. } => Resource::Warehouses,
            QuickCreate::MovementCausale { .. } | QuickCreate::DocumentCausale { .. } => Resource::Causali,
        }
    }
}

/// Handle of a quick-created record: code-keyed records return their
/// (normalized) code, the others their id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuickCreated {
    Code(String),
    SubjectCategory(SubjectCategoryId),
    Warehouse(WarehouseId),
}

/// Records added by [`Engine::seed_default_catalog`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedReport {
    pub movements: usize,
    pub documents: usize,
}

impl<S, B> Engine<S, B>
where
    S: EngineStore + ?Sized,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    #[instrument(skip(self, principal, request), fields(tenant_id = %principal.tenant_id(), kind = request.kind()), err)]
    pub async fn quick_create(&self, principal: &Principal, request: QuickCreate) -> EngineResult<QuickCreated> {
        let tenant_id = self.gate(principal, request.resource(), Action::Write)?;
        let created = match request {
            QuickCreate::VatCode { code, description, rate } => {
                let vat = VatCode::new(tenant_id, code, description, rate)?;
                self.store.insert_vat_code(&vat).await?;
                QuickCreated::Code(vat.code)
            }
            QuickCreate::PaymentMethod {
                code,
                description,
                installments,
                end_of_month,
            } => {
                let mut method = PaymentMethod::new(tenant_id, code, description, installments)?;
                method.end_of_month = end_of_month;
                self.store.insert_payment_method(&method).await?;
                QuickCreated::Code(method.code)
            }
            QuickCreate::SubjectCategory { name } => {
                let category = SubjectCategory::new(tenant_id, name)?;
                self.store.insert_subject_category(&category).await?;
                QuickCreated::SubjectCategory(category.id)
            }
            QuickCreate::Warehouse { code, name, primary } => {
                let warehouse = Warehouse::new(tenant_id, code, name)?;
                let warehouse = if primary { warehouse.as_primary() } else { warehouse };
                self.store.insert_warehouse(&warehouse).await?;
                QuickCreated::Warehouse(warehouse.id)
            }
            QuickCreate::MovementCausale {
                code,
                description,
                direction,
                updates_average_cost,
                requires_document,
                inverse_code,
            } => {
                let mut causale = MovementCausale::new(tenant_id, &code, description, direction)?;
                causale.updates_average_cost = updates_average_cost;
                causale.requires_document = requires_document;
                if let Some(inverse) = inverse_code {
                    causale = causale.with_inverse(&inverse)?;
                }
                causale.validate()?;
                if let Some(inverse) = causale.inverse_code.as_deref() {
                    if self.registry(tenant_id).await?.movement(inverse).is_none() {
                        return Err(DomainError::field(
                            "inverse_code",
                            format!("unknown movement causale '{inverse}'"),
                        )
                        .into());
                    }
                }
                self.store.insert_movement_causale(&causale).await?;
                QuickCreated::Code(causale.code)
            }
            QuickCreate::DocumentCausale {
                code,
                description,
                document_type,
                operation,
                movement_causale,
                separate_numbering,
            } => {
                let mut causale = DocumentCausale::new(tenant_id, &code, description, document_type, operation)?;
                if let Some(movement) = movement_causale {
                    causale = causale.moving_stock_with(&movement)?;
                }
                if separate_numbering {
                    causale = causale.with_separate_numbering();
                }
                causale.validate()?;
                if let Some(movement) = causale.movement_causale.as_deref() {
                    if self.registry(tenant_id).await?.movement(movement).is_none() {
                        return Err(DomainError::field(
                            "movement_causale",
                            format!("unknown movement causale '{movement}'"),
                        )
                        .into());
                    }
                }
                self.store.insert_document_causale(&causale).await?;
                QuickCreated::Code(causale.code)
            }
        };
        info!(created = ?created, "reference record created");
        Ok(created)
    }

    /// Create or replace a subject. Its VAT code, payment method and
    /// category must exist in the tenant.
    #[instrument(skip(self, principal, subject), fields(tenant_id = %principal.tenant_id(), subject_id = %subject.id), err)]
    pub async fn upsert_subject(&self, principal: &Principal, mut subject: Subject) -> EngineResult<Subject> {
        let tenant_id = self.gate(principal, Resource::Subjects, Action::Write)?;
        subject.tenant_id = tenant_id;
        subject.validate()?;

        if let Some(category_id) = subject.category_id {
            let categories = self.store.subject_categories(tenant_id).await?;
            if !categories.iter().any(|c| c.id == category_id) {
                return Err(DomainError::field("category_id", format!("unknown subject category {category_id}")).into());
            }
        }
        if let Some(code) = subject.default_vat_code.as_deref() {
            self.ensure_vat_code(tenant_id, "default_vat_code", code).await?;
        }
        if let Some(code) = subject.payment_method.clone() {
            subject.payment_method = Some(self.payment_method_or_fail(tenant_id, &code).await?.code);
        }

        self.store.upsert_subject(&subject).await?;
        Ok(subject)
    }

    #[instrument(skip(self, principal), fields(tenant_id = %principal.tenant_id(), subject_id = %subject_id), err)]
    pub async fn subject(&self, principal: &Principal, subject_id: SubjectId) -> EngineResult<Subject> {
        let tenant_id = self.gate(principal, Resource::Subjects, Action::Read)?;
        self.store
            .subject(tenant_id, subject_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("subject {subject_id}")).into())
    }

    #[instrument(skip(self, principal), fields(tenant_id = %principal.tenant_id()), err)]
    pub async fn subject_categories(&self, principal: &Principal) -> EngineResult<Vec<SubjectCategory>> {
        let tenant_id = self.gate(principal, Resource::Subjects, Action::Read)?;
        Ok(self.store.subject_categories(tenant_id).await?)
    }

    /// Refused while subjects are still assigned to the category.
    #[instrument(skip(self, principal), fields(tenant_id = %principal.tenant_id(), category_id = %category_id), err)]
    pub async fn delete_subject_category(&self, principal: &Principal, category_id: SubjectCategoryId) -> EngineResult<()> {
        let tenant_id = self.gate(principal, Resource::Subjects, Action::Delete)?;
        match self.store.delete_subject_category(tenant_id, category_id).await? {
            Deletion::Deleted => Ok(()),
            Deletion::InUse(count) => {
                warn!(count, "subject category still assigned");
                Err(DomainError::referential(format!("subject category {category_id}"), "subjects", count).into())
            }
        }
    }

    #[instrument(skip(self, principal, product), fields(tenant_id = %principal.tenant_id(), code = %product.code), err)]
    pub async fn upsert_product(&self, principal: &Principal, mut product: Product) -> EngineResult<Product> {
        let tenant_id = self.gate(principal, Resource::Products, Action::Write)?;
        product.tenant_id = tenant_id;
        product.validate()?;
        if let Some(code) = product.vat_code.as_deref() {
            self.ensure_vat_code(tenant_id, "vat_code", code).await?;
        }
        self.store.upsert_product(&product).await?;
        Ok(product)
    }

    #[instrument(skip(self, principal), fields(tenant_id = %principal.tenant_id(), product_id = %product_id), err)]
    pub async fn product(&self, principal: &Principal, product_id: ProductId) -> EngineResult<Product> {
        let tenant_id = self.gate(principal, Resource::Products, Action::Read)?;
        self.store
            .product(tenant_id, product_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("product {product_id}")).into())
    }

    #[instrument(skip(self, principal), fields(tenant_id = %principal.tenant_id()), err)]
    pub async fn warehouses(&self, principal: &Principal) -> EngineResult<Vec<Warehouse>> {
        let tenant_id = self.gate(principal, Resource::Warehouses, Action::Read)?;
        Ok(self.store.warehouses(tenant_id).await?)
    }

    /// Make `warehouse_id` the tenant's primary warehouse; the previous one
    /// is demoted in the same write.
    #[instrument(skip(self, principal), fields(tenant_id = %principal.tenant_id(), warehouse_id = %warehouse_id), err)]
    pub async fn set_primary_warehouse(&self, principal: &Principal, warehouse_id: WarehouseId) -> EngineResult<Warehouse> {
        let tenant_id = self.gate(principal, Resource::Warehouses, Action::Write)?;
        let warehouse = self
            .store
            .warehouses(tenant_id)
            .await?
            .into_iter()
            .find(|w| w.id == warehouse_id)
            .ok_or_else(|| DomainError::not_found(format!("warehouse {warehouse_id}")))?;
        warehouse.ensure_postable()?;
        let warehouse = warehouse.as_primary();
        self.store.upsert_warehouse(&warehouse).await?;
        info!(code = %warehouse.code, "primary warehouse switched");
        Ok(warehouse)
    }

    /// Refused while ledger entries or orders reference the warehouse.
    #[instrument(skip(self, principal), fields(tenant_id = %principal.tenant_id(), warehouse_id = %warehouse_id), err)]
    pub async fn delete_warehouse(&self, principal: &Principal, warehouse_id: WarehouseId) -> EngineResult<()> {
        let tenant_id = self.gate(principal, Resource::Warehouses, Action::Delete)?;
        match self.store.delete_warehouse(tenant_id, warehouse_id).await? {
            Deletion::Deleted => Ok(()),
            Deletion::InUse(count) => {
                warn!(count, "warehouse still referenced");
                Err(DomainError::referential(
                    format!("warehouse {warehouse_id}"),
                    "ledger entries or orders",
                    count,
                )
                .into())
            }
        }
    }

    #[instrument(skip(self, principal), fields(tenant_id = %principal.tenant_id()), err)]
    pub async fn vat_codes(&self, principal: &Principal) -> EngineResult<Vec<VatCode>> {
        let tenant_id = self.gate(principal, Resource::ReferenceData, Action::Read)?;
        Ok(self.store.vat_codes(tenant_id).await?)
    }

    #[instrument(skip(self, principal), fields(tenant_id = %principal.tenant_id()), err)]
    pub async fn payment_method(&self, principal: &Principal, code: &str) -> EngineResult<PaymentMethod> {
        let tenant_id = self.gate(principal, Resource::ReferenceData, Action::Read)?;
        self.store
            .payment_method(tenant_id, &code.trim().to_uppercase())
            .await?
            .ok_or_else(|| DomainError::not_found(format!("payment method '{code}'")).into())
    }

    #[instrument(skip(self, principal), fields(tenant_id = %principal.tenant_id()), err)]
    pub async fn movement_causali(&self, principal: &Principal) -> EngineResult<Vec<MovementCausale>> {
        let tenant_id = self.gate(principal, Resource::Causali, Action::Read)?;
        let registry = self.registry(tenant_id).await?;
        let mut causali: Vec<_> = registry.movements().cloned().collect();
        causali.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(causali)
    }

    #[instrument(skip(self, principal), fields(tenant_id = %principal.tenant_id()), err)]
    pub async fn document_causali(&self, principal: &Principal) -> EngineResult<Vec<DocumentCausale>> {
        let tenant_id = self.gate(principal, Resource::Causali, Action::Read)?;
        let registry = self.registry(tenant_id).await?;
        let mut causali: Vec<_> = registry.documents().cloned().collect();
        causali.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(causali)
    }

    /// Soft deactivation: history keeps resolving the causale, new postings
    /// are refused.
    #[instrument(skip(self, principal), fields(tenant_id = %principal.tenant_id()), err)]
    pub async fn deactivate_movement_causale(&self, principal: &Principal, code: &str) -> EngineResult<MovementCausale> {
        let tenant_id = self.gate(principal, Resource::Causali, Action::Write)?;
        let code = normalize_code(code)?;
        let mut causale = self
            .registry(tenant_id)
            .await?
            .movement(&code)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("movement causale '{code}'")))?;
        causale.active = false;
        self.store.upsert_movement_causale(&causale).await?;
        info!(code = %causale.code, "movement causale deactivated");
        Ok(causale)
    }

    #[instrument(skip(self, principal), fields(tenant_id = %principal.tenant_id()), err)]
    pub async fn deactivate_document_causale(&self, principal: &Principal, code: &str) -> EngineResult<DocumentCausale> {
        let tenant_id = self.gate(principal, Resource::Causali, Action::Write)?;
        let code = normalize_code(code)?;
        let mut causale = self
            .registry(tenant_id)
            .await?
            .document_any(&code)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("document causale '{code}'")))?;
        causale.active = false;
        self.store.upsert_document_causale(&causale).await?;
        info!(code = %causale.code, "document causale deactivated");
        Ok(causale)
    }

    /// Refused while ledger entries, document causali or inverse pairings
    /// reference the code.
    #[instrument(skip(self, principal), fields(tenant_id = %principal.tenant_id()), err)]
    pub async fn delete_movement_causale(&self, principal: &Principal, code: &str) -> EngineResult<()> {
        let tenant_id = self.gate(principal, Resource::Causali, Action::Delete)?;
        let code = normalize_code(code)?;
        match self.store.delete_movement_causale(tenant_id, &code).await? {
            Deletion::Deleted => Ok(()),
            Deletion::InUse(count) => {
                warn!(count, code = %code, "movement causale still referenced");
                Ok(ensure_unused("movement causale", &code, count)?)
            }
        }
    }

    #[instrument(skip(self, principal), fields(tenant_id = %principal.tenant_id()), err)]
    pub async fn delete_document_causale(&self, principal: &Principal, code: &str) -> EngineResult<()> {
        let tenant_id = self.gate(principal, Resource::Causali, Action::Delete)?;
        let code = normalize_code(code)?;
        match self.store.delete_document_causale(tenant_id, &code).await? {
            Deletion::Deleted => Ok(()),
            Deletion::InUse(count) => {
                warn!(count, code = %code, "document causale still referenced");
                Ok(ensure_unused("document causale", &code, count)?)
            }
        }
    }

    /// Add the standard causali the tenant does not have yet. Existing codes
    /// are left untouched, so seeding twice is harmless.
    #[instrument(skip(self, principal), fields(tenant_id = %principal.tenant_id()), err)]
    pub async fn seed_default_catalog(&self, principal: &Principal) -> EngineResult<SeedReport> {
        let tenant_id = self.gate(principal, Resource::Causali, Action::Write)?;
        let (movements, documents) = default_catalog(tenant_id);

        let mut report = SeedReport::default();
        for causale in &movements {
            if seeded(self.store.insert_movement_causale(causale).await)? {
                report.movements += 1;
            }
        }
        for causale in &documents {
            if seeded(self.store.insert_document_causale(causale).await)? {
                report.documents += 1;
            }
        }
        info!(movements = report.movements, documents = report.documents, "default causali seeded");
        Ok(report)
    }

    async fn ensure_vat_code(&self, tenant_id: TenantId, field: &str, code: &str) -> EngineResult<()> {
        let code = code.trim().to_uppercase();
        if self.store.vat_codes(tenant_id).await?.iter().any(|v| v.code == code) {
            Ok(())
        } else {
            Err(DomainError::field(field, format!("unknown VAT code '{code}'")).into())
        }
    }
}

/// Whether a seed insert wrote the record; an existing code is kept as is.
fn seeded(result: StoreResult<()>) -> EngineResult<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(StoreError::Duplicate(_)) => Ok(false),
        Err(err) => Err(err.into()),
    }
}
