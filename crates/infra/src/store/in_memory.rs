use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use gestio_causali::{CausaleRegistry, DocumentCausale, MovementCausale};
use gestio_core::{AggregateRoot, DocumentNumber, SequenceKey, TenantId};
use gestio_inventory::{LedgerEntry, LedgerEntryId, PostingRequest, ProductStock, StockPolicy, WarehouseStock};
use gestio_invoicing::{DeliveryNote, DeliveryNoteId, Invoice, InvoiceId, PaymentMethod, ScheduleEntry};
use gestio_orders::{Order, OrderId};
use gestio_parties::{Subject, SubjectCategory, SubjectCategoryId, SubjectId};
use gestio_products::{Product, ProductId, VatCode, Warehouse, WarehouseId};

use super::{
    apply_postings, CatalogStore, Deletion, DeliveryIssue, DocumentGuard, DocumentStore, InvoiceIssue, LedgerStore,
    StockTransition, StoreError, StoreResult,
};

#[derive(Debug, Default)]
struct State {
    subjects: HashMap<(TenantId, SubjectId), Subject>,
    categories: HashMap<(TenantId, SubjectCategoryId), SubjectCategory>,
    products: HashMap<(TenantId, ProductId), Product>,
    warehouses: HashMap<(TenantId, WarehouseId), Warehouse>,
    vat_codes: HashMap<(TenantId, String), VatCode>,
    payment_methods: HashMap<(TenantId, String), PaymentMethod>,
    movement_causali: HashMap<(TenantId, String), MovementCausale>,
    document_causali: HashMap<(TenantId, String), DocumentCausale>,

    counters: HashMap<(TenantId, SequenceKey, i32), u64>,
    numbers: HashSet<(TenantId, DocumentNumber)>,
    guards: HashSet<(TenantId, DocumentGuard)>,
    orders: HashMap<(TenantId, OrderId), Order>,
    invoices: HashMap<(TenantId, InvoiceId), Invoice>,
    schedules: HashMap<(TenantId, InvoiceId), Vec<ScheduleEntry>>,
    delivery_notes: HashMap<(TenantId, DeliveryNoteId), DeliveryNote>,

    entries: Vec<LedgerEntry>,
    stock: HashMap<(TenantId, ProductId), ProductStock>,
    positions: HashMap<(TenantId, ProductId, WarehouseId), WarehouseStock>,
}

impl State {
    fn ensure_postable(&self, tenant_id: TenantId, postings: &[PostingRequest]) -> StoreResult<()> {
        let mut reversing = HashSet::new();
        for request in postings {
            if !self.products.contains_key(&(tenant_id, request.product_id)) {
                return Err(StoreError::NotFound(format!("product {}", request.product_id)));
            }
            if !self.warehouses.contains_key(&(tenant_id, request.warehouse_id)) {
                return Err(StoreError::NotFound(format!("warehouse {}", request.warehouse_id)));
            }
            if let Some(reversed) = request.reverses {
                let taken = self.entries.iter().any(|e| e.reverses == Some(reversed));
                if taken || !reversing.insert(reversed) {
                    return Err(StoreError::Duplicate(format!("ledger entry {reversed} is already reversed")));
                }
            }
        }
        Ok(())
    }

    /// Stage postings against copies of the touched snapshots, then write
    /// everything back only if every posting succeeded.
    fn post(
        &mut self,
        tenant_id: TenantId,
        postings: &[PostingRequest],
        policy: StockPolicy,
        posted_at: DateTime<Utc>,
    ) -> StoreResult<Vec<LedgerEntry>> {
        self.ensure_postable(tenant_id, postings)?;

        let mut stocks = HashMap::new();
        let mut positions = HashMap::new();
        for request in postings {
            if let Some(stock) = self.stock.get(&(tenant_id, request.product_id)) {
                stocks.insert(request.product_id, stock.clone());
            }
            if let Some(position) = self.positions.get(&(tenant_id, request.product_id, request.warehouse_id)) {
                positions.insert((request.product_id, request.warehouse_id), position.clone());
            }
        }

        let entries = apply_postings(tenant_id, &mut stocks, &mut positions, postings, policy, posted_at)?;

        for (product_id, stock) in stocks {
            self.stock.insert((tenant_id, product_id), stock);
        }
        for ((product_id, warehouse_id), position) in positions {
            self.positions.insert((tenant_id, product_id, warehouse_id), position);
        }
        self.entries.extend(entries.iter().cloned());
        Ok(entries)
    }

    fn save_warehouse(&mut self, warehouse: &Warehouse) {
        if warehouse.primary {
            for other in self.warehouses.values_mut() {
                if other.tenant_id == warehouse.tenant_id && other.id != warehouse.id {
                    other.primary = false;
                }
            }
        }
        self.warehouses.insert((warehouse.tenant_id, warehouse.id), warehouse.clone());
    }

    fn ensure_order_version(&self, order: &Order, expected_version: u64) -> StoreResult<()> {
        let tenant_id = tenant_of(order.tenant_id())?;
        let stored = self
            .orders
            .get(&(tenant_id, order.id_typed()))
            .ok_or_else(|| StoreError::NotFound(format!("order {}", order.id_typed())))?;
        if stored.version() != expected_version {
            return Err(StoreError::Concurrency(format!(
                "order {} is at version {}, expected {}",
                order.id_typed(),
                stored.version(),
                expected_version
            )));
        }
        Ok(())
    }

    fn ensure_guard_free(&self, tenant_id: TenantId, guard: &DocumentGuard) -> StoreResult<()> {
        if self.guards.contains(&(tenant_id, guard.clone())) {
            return Err(StoreError::Concurrency(format!(
                "order {} already has a '{}' document",
                guard.order_id, guard.family
            )));
        }
        Ok(())
    }

    fn ensure_number_free(&self, tenant_id: TenantId, number: Option<&DocumentNumber>) -> StoreResult<()> {
        let number = number.ok_or_else(|| StoreError::Serialization("document has no number".into()))?;
        if self.numbers.contains(&(tenant_id, number.clone())) {
            return Err(StoreError::NumberTaken(format!(
                "number {number} of sequence '{}' is taken",
                number.sequence
            )));
        }
        Ok(())
    }
}

fn tenant_of(tenant_id: Option<TenantId>) -> StoreResult<TenantId> {
    tenant_id.ok_or_else(|| StoreError::TenantIsolation("document carries no tenant".into()))
}

fn insert_new<T: Clone>(
    table: &mut HashMap<(TenantId, String), T>,
    key: (TenantId, String),
    record: &T,
    what: &str,
) -> StoreResult<()> {
    if table.contains_key(&key) {
        return Err(StoreError::Duplicate(format!("{what} '{}' already exists", key.1)));
    }
    table.insert(key, record.clone());
    Ok(())
}

/// In-memory store for tests and local runs.
///
/// A single lock guards every table; each method holds it for its whole
/// duration, which makes every method trivially atomic and serialisable.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| StoreError::Database("lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| StoreError::Database("lock poisoned".to_string()))
    }
}

#[async_trait]
impl CatalogStore for InMemoryStore {
    async fn upsert_subject(&self, subject: &Subject) -> StoreResult<()> {
        let mut state = self.write()?;
        state.subjects.insert((subject.tenant_id, subject.id), subject.clone());
        Ok(())
    }

    async fn subject(&self, tenant_id: TenantId, id: SubjectId) -> StoreResult<Option<Subject>> {
        Ok(self.read()?.subjects.get(&(tenant_id, id)).cloned())
    }

    async fn insert_subject_category(&self, category: &SubjectCategory) -> StoreResult<()> {
        let mut state = self.write()?;
        let clash = state
            .categories
            .values()
            .any(|c| c.tenant_id == category.tenant_id && c.name.eq_ignore_ascii_case(&category.name));
        if clash {
            return Err(StoreError::Duplicate(format!("subject category '{}'", category.name)));
        }
        state.categories.insert((category.tenant_id, category.id), category.clone());
        Ok(())
    }

    async fn subject_categories(&self, tenant_id: TenantId) -> StoreResult<Vec<SubjectCategory>> {
        let state = self.read()?;
        let mut categories: Vec<_> = state
            .categories
            .values()
            .filter(|c| c.tenant_id == tenant_id)
            .cloned()
            .collect();
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(categories)
    }

    async fn delete_subject_category(&self, tenant_id: TenantId, id: SubjectCategoryId) -> StoreResult<Deletion> {
        let mut state = self.write()?;
        if !state.categories.contains_key(&(tenant_id, id)) {
            return Err(StoreError::NotFound(format!("subject category {id}")));
        }
        let assigned = state
            .subjects
            .values()
            .filter(|s| s.tenant_id == tenant_id && s.category_id == Some(id))
            .count() as u64;
        if assigned > 0 {
            return Ok(Deletion::InUse(assigned));
        }
        state.categories.remove(&(tenant_id, id));
        Ok(Deletion::Deleted)
    }

    async fn upsert_product(&self, product: &Product) -> StoreResult<()> {
        let mut state = self.write()?;
        let clash = state
            .products
            .values()
            .any(|p| p.tenant_id == product.tenant_id && p.id != product.id && p.code == product.code);
        if clash {
            return Err(StoreError::Duplicate(format!("product code '{}'", product.code)));
        }
        state.products.insert((product.tenant_id, product.id), product.clone());
        Ok(())
    }

    async fn product(&self, tenant_id: TenantId, id: ProductId) -> StoreResult<Option<Product>> {
        Ok(self.read()?.products.get(&(tenant_id, id)).cloned())
    }

    async fn upsert_warehouse(&self, warehouse: &Warehouse) -> StoreResult<()> {
        self.write()?.save_warehouse(warehouse);
        Ok(())
    }

    async fn insert_warehouse(&self, warehouse: &Warehouse) -> StoreResult<()> {
        let mut state = self.write()?;
        let clash = state.warehouses.values().any(|w| {
            w.tenant_id == warehouse.tenant_id && (w.id == warehouse.id || w.code.eq_ignore_ascii_case(&warehouse.code))
        });
        if clash {
            return Err(StoreError::Duplicate(format!("warehouse '{}' already exists", warehouse.code)));
        }
        state.save_warehouse(warehouse);
        Ok(())
    }

    async fn warehouses(&self, tenant_id: TenantId) -> StoreResult<Vec<Warehouse>> {
        let state = self.read()?;
        let mut warehouses: Vec<_> = state
            .warehouses
            .values()
            .filter(|w| w.tenant_id == tenant_id)
            .cloned()
            .collect();
        warehouses.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(warehouses)
    }

    async fn delete_warehouse(&self, tenant_id: TenantId, id: WarehouseId) -> StoreResult<Deletion> {
        let mut state = self.write()?;
        if !state.warehouses.contains_key(&(tenant_id, id)) {
            return Err(StoreError::NotFound(format!("warehouse {id}")));
        }
        let entries = state
            .entries
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.warehouse_id == id)
            .count();
        let orders = state
            .orders
            .values()
            .filter(|o| o.tenant_id() == Some(tenant_id))
            .filter(|o| o.warehouse_id() == Some(id) || o.lines().iter().any(|l| l.warehouse_id == Some(id)))
            .count();
        let references = (entries + orders) as u64;
        if references > 0 {
            return Ok(Deletion::InUse(references));
        }
        state.warehouses.remove(&(tenant_id, id));
        Ok(Deletion::Deleted)
    }

    async fn upsert_vat_code(&self, vat: &VatCode) -> StoreResult<()> {
        let mut state = self.write()?;
        state.vat_codes.insert((vat.tenant_id, vat.code.clone()), vat.clone());
        Ok(())
    }

    async fn insert_vat_code(&self, vat: &VatCode) -> StoreResult<()> {
        let mut state = self.write()?;
        insert_new(&mut state.vat_codes, (vat.tenant_id, vat.code.clone()), vat, "VAT code")
    }

    async fn vat_codes(&self, tenant_id: TenantId) -> StoreResult<Vec<VatCode>> {
        let state = self.read()?;
        Ok(state
            .vat_codes
            .values()
            .filter(|v| v.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn upsert_payment_method(&self, method: &PaymentMethod) -> StoreResult<()> {
        let mut state = self.write()?;
        state
            .payment_methods
            .insert((method.tenant_id, method.code.clone()), method.clone());
        Ok(())
    }

    async fn insert_payment_method(&self, method: &PaymentMethod) -> StoreResult<()> {
        let mut state = self.write()?;
        let key = (method.tenant_id, method.code.clone());
        insert_new(&mut state.payment_methods, key, method, "payment method")
    }

    async fn payment_method(&self, tenant_id: TenantId, code: &str) -> StoreResult<Option<PaymentMethod>> {
        Ok(self
            .read()?
            .payment_methods
            .get(&(tenant_id, code.trim().to_uppercase()))
            .cloned())
    }

    async fn upsert_movement_causale(&self, causale: &MovementCausale) -> StoreResult<()> {
        let mut state = self.write()?;
        state
            .movement_causali
            .insert((causale.tenant_id, causale.code.clone()), causale.clone());
        Ok(())
    }

    async fn upsert_document_causale(&self, causale: &DocumentCausale) -> StoreResult<()> {
        let mut state = self.write()?;
        state
            .document_causali
            .insert((causale.tenant_id, causale.code.clone()), causale.clone());
        Ok(())
    }

    async fn insert_movement_causale(&self, causale: &MovementCausale) -> StoreResult<()> {
        let mut state = self.write()?;
        let key = (causale.tenant_id, causale.code.clone());
        insert_new(&mut state.movement_causali, key, causale, "movement causale")
    }

    async fn insert_document_causale(&self, causale: &DocumentCausale) -> StoreResult<()> {
        let mut state = self.write()?;
        let key = (causale.tenant_id, causale.code.clone());
        insert_new(&mut state.document_causali, key, causale, "document causale")
    }

    async fn causale_registry(&self, tenant_id: TenantId) -> StoreResult<CausaleRegistry> {
        let state = self.read()?;
        let movements = state
            .movement_causali
            .values()
            .filter(|c| c.tenant_id == tenant_id)
            .cloned()
            .collect::<Vec<_>>();
        let documents = state
            .document_causali
            .values()
            .filter(|c| c.tenant_id == tenant_id)
            .cloned()
            .collect::<Vec<_>>();
        Ok(CausaleRegistry::from_parts(tenant_id, movements, documents))
    }

    async fn delete_movement_causale(&self, tenant_id: TenantId, code: &str) -> StoreResult<Deletion> {
        let mut state = self.write()?;
        let key = (tenant_id, code.to_uppercase());
        if !state.movement_causali.contains_key(&key) {
            return Err(StoreError::NotFound(format!("movement causale '{code}'")));
        }
        let code = key.1.as_str();
        let entries = state
            .entries
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.causale_code == code)
            .count();
        let documents = state
            .document_causali
            .values()
            .filter(|d| d.tenant_id == tenant_id && d.movement_causale.as_deref() == Some(code))
            .count();
        let inverses = state
            .movement_causali
            .values()
            .filter(|m| m.tenant_id == tenant_id && m.inverse_code.as_deref() == Some(code))
            .count();
        let references = (entries + documents + inverses) as u64;
        if references > 0 {
            return Ok(Deletion::InUse(references));
        }
        state.movement_causali.remove(&key);
        Ok(Deletion::Deleted)
    }

    async fn delete_document_causale(&self, tenant_id: TenantId, code: &str) -> StoreResult<Deletion> {
        let mut state = self.write()?;
        let key = (tenant_id, code.to_uppercase());
        if !state.document_causali.contains_key(&key) {
            return Err(StoreError::NotFound(format!("document causale '{code}'")));
        }
        let code = key.1.as_str();
        let orders = state
            .orders
            .values()
            .filter(|o| o.tenant_id() == Some(tenant_id) && o.causale_code() == code)
            .count();
        let invoices = state
            .invoices
            .values()
            .filter(|i| i.tenant_id() == Some(tenant_id) && i.causale_code() == code)
            .count();
        let notes = state
            .delivery_notes
            .values()
            .filter(|n| n.tenant_id == tenant_id && n.causale_code == code)
            .count();
        let references = (orders + invoices + notes) as u64;
        if references > 0 {
            return Ok(Deletion::InUse(references));
        }
        state.document_causali.remove(&key);
        Ok(Deletion::Deleted)
    }
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn post(
        &self,
        tenant_id: TenantId,
        postings: Vec<PostingRequest>,
        policy: StockPolicy,
        posted_at: DateTime<Utc>,
    ) -> StoreResult<Vec<LedgerEntry>> {
        let mut state = self.write()?;
        state.post(tenant_id, &postings, policy, posted_at)
    }

    async fn entry(&self, tenant_id: TenantId, id: LedgerEntryId) -> StoreResult<Option<LedgerEntry>> {
        let state = self.read()?;
        Ok(state
            .entries
            .iter()
            .find(|e| e.tenant_id == tenant_id && e.id == id)
            .cloned())
    }

    async fn entries(&self, tenant_id: TenantId, product_id: ProductId) -> StoreResult<Vec<LedgerEntry>> {
        let state = self.read()?;
        let mut entries: Vec<_> = state
            .entries
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.product_id == product_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.sequence);
        Ok(entries)
    }

    async fn product_stock(&self, tenant_id: TenantId, product_id: ProductId) -> StoreResult<Option<ProductStock>> {
        Ok(self.read()?.stock.get(&(tenant_id, product_id)).cloned())
    }

    async fn warehouse_stock(&self, tenant_id: TenantId, product_id: ProductId) -> StoreResult<Vec<WarehouseStock>> {
        let state = self.read()?;
        Ok(state
            .positions
            .values()
            .filter(|p| p.tenant_id == tenant_id && p.product_id == product_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn next_number(&self, tenant_id: TenantId, sequence: &SequenceKey, year: i32) -> StoreResult<DocumentNumber> {
        let mut state = self.write()?;
        let counter = state.counters.entry((tenant_id, sequence.clone(), year)).or_insert(0);
        *counter += 1;
        DocumentNumber::new(sequence.clone(), year, *counter).map_err(StoreError::from)
    }

    async fn insert_order(&self, order: &Order) -> StoreResult<()> {
        let tenant_id = tenant_of(order.tenant_id())?;
        let mut state = self.write()?;
        if state.orders.contains_key(&(tenant_id, order.id_typed())) {
            return Err(StoreError::Duplicate(format!("order {}", order.id_typed())));
        }
        state.ensure_number_free(tenant_id, order.number())?;
        if let Some(number) = order.number() {
            state.numbers.insert((tenant_id, number.clone()));
        }
        state.orders.insert((tenant_id, order.id_typed()), order.clone());
        Ok(())
    }

    async fn order(&self, tenant_id: TenantId, id: OrderId) -> StoreResult<Option<Order>> {
        Ok(self.read()?.orders.get(&(tenant_id, id)).cloned())
    }

    async fn save_order(&self, order: &Order, expected_version: u64) -> StoreResult<()> {
        let tenant_id = tenant_of(order.tenant_id())?;
        let mut state = self.write()?;
        state.ensure_order_version(order, expected_version)?;
        state.orders.insert((tenant_id, order.id_typed()), order.clone());
        Ok(())
    }

    async fn commit_stock_transition(&self, transition: StockTransition) -> StoreResult<Vec<LedgerEntry>> {
        let tenant_id = tenant_of(transition.order.tenant_id())?;
        let mut state = self.write()?;
        state.ensure_order_version(&transition.order, transition.expected_version)?;
        state.ensure_guard_free(tenant_id, &transition.guard)?;

        let entries = state.post(tenant_id, &transition.postings, transition.policy, transition.posted_at)?;

        state.guards.insert((tenant_id, transition.guard));
        state
            .orders
            .insert((tenant_id, transition.order.id_typed()), transition.order);
        Ok(entries)
    }

    async fn insert_invoice(&self, issue: InvoiceIssue) -> StoreResult<()> {
        let tenant_id = tenant_of(issue.invoice.tenant_id())?;
        if issue.order.tenant_id() != Some(tenant_id) {
            return Err(StoreError::TenantIsolation("invoice and order belong to different tenants".into()));
        }
        let mut state = self.write()?;
        state.ensure_order_version(&issue.order, issue.expected_order_version)?;
        state.ensure_guard_free(tenant_id, &issue.guard)?;
        state.ensure_number_free(tenant_id, issue.invoice.number())?;

        let invoice_id = issue.invoice.id_typed();
        if let Some(number) = issue.invoice.number() {
            state.numbers.insert((tenant_id, number.clone()));
        }
        state.guards.insert((tenant_id, issue.guard));
        state.schedules.insert((tenant_id, invoice_id), issue.schedule);
        state.invoices.insert((tenant_id, invoice_id), issue.invoice);
        state.orders.insert((tenant_id, issue.order.id_typed()), issue.order);
        Ok(())
    }

    async fn invoice(&self, tenant_id: TenantId, id: InvoiceId) -> StoreResult<Option<Invoice>> {
        Ok(self.read()?.invoices.get(&(tenant_id, id)).cloned())
    }

    async fn save_invoice(&self, invoice: &Invoice, expected_version: u64, schedule: &[ScheduleEntry]) -> StoreResult<()> {
        let tenant_id = tenant_of(invoice.tenant_id())?;
        let mut state = self.write()?;
        let stored = state
            .invoices
            .get(&(tenant_id, invoice.id_typed()))
            .ok_or_else(|| StoreError::NotFound(format!("invoice {}", invoice.id_typed())))?;
        if stored.version() != expected_version {
            return Err(StoreError::Concurrency(format!(
                "invoice {} is at version {}, expected {expected_version}",
                invoice.id_typed(),
                stored.version()
            )));
        }
        state.invoices.insert((tenant_id, invoice.id_typed()), invoice.clone());
        state.schedules.insert((tenant_id, invoice.id_typed()), schedule.to_vec());
        Ok(())
    }

    async fn schedule(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> StoreResult<Vec<ScheduleEntry>> {
        Ok(self
            .read()?
            .schedules
            .get(&(tenant_id, invoice_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_delivery_note(&self, issue: DeliveryIssue) -> StoreResult<()> {
        let tenant_id = issue.note.tenant_id;
        let mut state = self.write()?;
        state.ensure_guard_free(tenant_id, &issue.guard)?;
        state.ensure_number_free(tenant_id, Some(&issue.note.number))?;

        state.numbers.insert((tenant_id, issue.note.number.clone()));
        state.guards.insert((tenant_id, issue.guard));
        state.delivery_notes.insert((tenant_id, issue.note.id), issue.note);
        Ok(())
    }

    async fn delivery_note(&self, tenant_id: TenantId, id: DeliveryNoteId) -> StoreResult<Option<DeliveryNote>> {
        Ok(self.read()?.delivery_notes.get(&(tenant_id, id)).cloned())
    }

    async fn delivery_note_for_order(&self, tenant_id: TenantId, order_id: OrderId) -> StoreResult<Option<DeliveryNote>> {
        let state = self.read()?;
        Ok(state
            .delivery_notes
            .values()
            .find(|n| n.tenant_id == tenant_id && n.source_order == order_id)
            .cloned())
    }
}
