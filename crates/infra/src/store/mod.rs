//! Persistence contracts for the engine.
//!
//! Every mutating method is one atomic unit: it either commits everything it
//! was given or nothing. The engine decides *what* to write (running the
//! domain aggregates); stores decide *how* to make it atomic and race-safe.

pub mod in_memory;
pub mod postgres;
pub mod schema;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use gestio_causali::{CausaleFamily, CausaleRegistry, DocumentCausale, MovementCausale};
use gestio_core::{DocumentNumber, DomainError, SequenceKey, TenantId};
use gestio_inventory::{LedgerEntry, LedgerEntryId, PostingRequest, ProductStock, StockPolicy, WarehouseStock};
use gestio_invoicing::{DeliveryNote, DeliveryNoteId, Invoice, InvoiceId, PaymentMethod, ScheduleEntry};
use gestio_orders::{Order, OrderId};
use gestio_parties::{Subject, SubjectCategory, SubjectCategoryId, SubjectId};
use gestio_products::{Product, ProductId, VatCode, Warehouse, WarehouseId};

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Lost race: stale version or taken guard.
    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    /// The document number is already used; retry with a fresh one.
    #[error("document number taken: {0}")]
    NumberTaken(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    /// A unique business key already exists (product or reference code,
    /// reversal of an entry).
    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("{0} not found")]
    NotFound(String),

    /// The domain refused the write while it was being applied (e.g. insufficient stock).
    #[error(transparent)]
    Rejected(#[from] DomainError),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        StoreError::Serialization(value.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of a guarded delete.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Deletion {
    Deleted,
    /// Nothing was deleted; this many records still reference the target.
    InUse(u64),
}

/// At most one document of a family per order (fulfilment, invoice, DDT).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentGuard {
    pub order_id: OrderId,
    pub family: CausaleFamily,
}

/// Order transition that moves stock: guard, postings and the new order
/// state commit together.
#[derive(Debug, Clone)]
pub struct StockTransition {
    pub order: Order,
    pub expected_version: u64,
    pub guard: DocumentGuard,
    pub postings: Vec<PostingRequest>,
    pub policy: StockPolicy,
    pub posted_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct InvoiceIssue {
    pub invoice: Invoice,
    pub schedule: Vec<ScheduleEntry>,
    pub order: Order,
    pub expected_order_version: u64,
    pub guard: DocumentGuard,
}

#[derive(Debug, Clone)]
pub struct DeliveryIssue {
    pub note: DeliveryNote,
    pub guard: DocumentGuard,
}

/// Reference data: subjects, products, warehouses, VAT codes, payment
/// methods and causali.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn upsert_subject(&self, subject: &Subject) -> StoreResult<()>;
    async fn subject(&self, tenant_id: TenantId, id: SubjectId) -> StoreResult<Option<Subject>>;

    async fn insert_subject_category(&self, category: &SubjectCategory) -> StoreResult<()>;
    async fn subject_categories(&self, tenant_id: TenantId) -> StoreResult<Vec<SubjectCategory>>;
    async fn delete_subject_category(&self, tenant_id: TenantId, id: SubjectCategoryId) -> StoreResult<Deletion>;

    async fn upsert_product(&self, product: &Product) -> StoreResult<()>;
    async fn product(&self, tenant_id: TenantId, id: ProductId) -> StoreResult<Option<Product>>;

    /// Saving a primary warehouse demotes the tenant's previous primary in
    /// the same unit.
    async fn upsert_warehouse(&self, warehouse: &Warehouse) -> StoreResult<()>;
    /// Like [`CatalogStore::upsert_warehouse`], but a taken code is a
    /// [`StoreError::Duplicate`].
    async fn insert_warehouse(&self, warehouse: &Warehouse) -> StoreResult<()>;
    async fn warehouses(&self, tenant_id: TenantId) -> StoreResult<Vec<Warehouse>>;
    async fn delete_warehouse(&self, tenant_id: TenantId, id: WarehouseId) -> StoreResult<Deletion>;

    async fn upsert_vat_code(&self, vat: &VatCode) -> StoreResult<()>;
    async fn insert_vat_code(&self, vat: &VatCode) -> StoreResult<()>;
    async fn vat_codes(&self, tenant_id: TenantId) -> StoreResult<Vec<VatCode>>;

    async fn upsert_payment_method(&self, method: &PaymentMethod) -> StoreResult<()>;
    async fn insert_payment_method(&self, method: &PaymentMethod) -> StoreResult<()>;
    async fn payment_method(&self, tenant_id: TenantId, code: &str) -> StoreResult<Option<PaymentMethod>>;

    async fn upsert_movement_causale(&self, causale: &MovementCausale) -> StoreResult<()>;
    async fn upsert_document_causale(&self, causale: &DocumentCausale) -> StoreResult<()>;
    /// Insert-only: an existing code is a [`StoreError::Duplicate`].
    async fn insert_movement_causale(&self, causale: &MovementCausale) -> StoreResult<()>;
    async fn insert_document_causale(&self, causale: &DocumentCausale) -> StoreResult<()>;
    async fn causale_registry(&self, tenant_id: TenantId) -> StoreResult<CausaleRegistry>;
    async fn delete_movement_causale(&self, tenant_id: TenantId, code: &str) -> StoreResult<Deletion>;
    async fn delete_document_causale(&self, tenant_id: TenantId, code: &str) -> StoreResult<Deletion>;
}

/// The inventory ledger and its cached stock snapshots.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Post `postings` in order, all or nothing. Snapshots of the touched
    /// products are read and written under the same lock as the entries.
    async fn post(
        &self,
        tenant_id: TenantId,
        postings: Vec<PostingRequest>,
        policy: StockPolicy,
        posted_at: DateTime<Utc>,
    ) -> StoreResult<Vec<LedgerEntry>>;

    async fn entry(&self, tenant_id: TenantId, id: LedgerEntryId) -> StoreResult<Option<LedgerEntry>>;

    /// All entries of a product, in sequence order.
    async fn entries(&self, tenant_id: TenantId, product_id: ProductId) -> StoreResult<Vec<LedgerEntry>>;

    async fn product_stock(&self, tenant_id: TenantId, product_id: ProductId) -> StoreResult<Option<ProductStock>>;

    async fn warehouse_stock(&self, tenant_id: TenantId, product_id: ProductId) -> StoreResult<Vec<WarehouseStock>>;
}

/// Orders, invoices, schedules, delivery notes and numbering.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Next number of `sequence` for `year`; never hands out the same number twice.
    async fn next_number(&self, tenant_id: TenantId, sequence: &SequenceKey, year: i32) -> StoreResult<DocumentNumber>;

    async fn insert_order(&self, order: &Order) -> StoreResult<()>;
    async fn order(&self, tenant_id: TenantId, id: OrderId) -> StoreResult<Option<Order>>;
    /// Replace the order if its stored version is still `expected_version`.
    async fn save_order(&self, order: &Order, expected_version: u64) -> StoreResult<()>;

    async fn commit_stock_transition(&self, transition: StockTransition) -> StoreResult<Vec<LedgerEntry>>;

    async fn insert_invoice(&self, issue: InvoiceIssue) -> StoreResult<()>;
    async fn invoice(&self, tenant_id: TenantId, id: InvoiceId) -> StoreResult<Option<Invoice>>;
    /// Replace the invoice and its schedule if the stored version is still `expected_version`.
    async fn save_invoice(&self, invoice: &Invoice, expected_version: u64, schedule: &[ScheduleEntry]) -> StoreResult<()>;
    async fn schedule(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> StoreResult<Vec<ScheduleEntry>>;

    async fn insert_delivery_note(&self, issue: DeliveryIssue) -> StoreResult<()>;
    async fn delivery_note(&self, tenant_id: TenantId, id: DeliveryNoteId) -> StoreResult<Option<DeliveryNote>>;
    async fn delivery_note_for_order(&self, tenant_id: TenantId, order_id: OrderId) -> StoreResult<Option<DeliveryNote>>;
}

/// Apply `postings` in order to the given snapshots, creating empty ones on
/// first use. Callers hold whatever lock makes the snapshots current and
/// persist the returned entries together with the mutated snapshots.
pub(crate) fn apply_postings(
    tenant_id: TenantId,
    stocks: &mut HashMap<ProductId, ProductStock>,
    positions: &mut HashMap<(ProductId, WarehouseId), WarehouseStock>,
    postings: &[PostingRequest],
    policy: StockPolicy,
    posted_at: DateTime<Utc>,
) -> Result<Vec<LedgerEntry>, DomainError> {
    let mut entries = Vec::with_capacity(postings.len());
    for request in postings {
        let stock = stocks
            .entry(request.product_id)
            .or_insert_with(|| ProductStock::empty(tenant_id, request.product_id));
        let position = positions
            .entry((request.product_id, request.warehouse_id))
            .or_insert_with(|| WarehouseStock::empty(tenant_id, request.product_id, request.warehouse_id));
        entries.push(stock.post(position, request, policy, LedgerEntryId::new(), posted_at)?);
    }
    Ok(entries)
}

/// Everything the engine needs from persistence.
pub trait EngineStore: CatalogStore + LedgerStore + DocumentStore {}

impl<T> EngineStore for T where T: CatalogStore + LedgerStore + DocumentStore + ?Sized {}
