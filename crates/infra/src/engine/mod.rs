//! Engine services: the operations callers invoke.
//!
//! Every operation follows the same pipeline:
//!
//! ```text
//! principal
//!   ↓
//! 1. authorize(principal, resource, action); the tenant comes from the principal
//!   ↓
//! 2. load the records the operation needs (tenant-scoped)
//!   ↓
//! 3. run the domain aggregate on a copy (pure decision logic, produces events)
//!   ↓
//! 4. hand the resulting state to the store as one atomic unit
//!   ↓
//! 5. publish the events of the committed write on the bus
//! ```
//!
//! Nothing is published for a write that did not commit. A publication
//! failure after the commit is logged and does not undo the write: the store
//! is the source of truth, the bus only feeds read-only consumers.
//!
//! ## Numbering
//!
//! Document numbers come from the store's atomic counter. When a write is
//! refused because its number is already used (documents imported with
//! explicit numbers, for instance) it is retried with a fresh number up to
//! [`EngineConfig::numbering_retries`] times. A number taken by a write that
//! then failed is not handed out again; sequences may have gaps.

mod error;
mod invoicing;
mod ledger;
mod orders;
mod reference;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::warn;

use gestio_auth::{authorize, Action, Principal, Resource};
use gestio_causali::CausaleRegistry;
use gestio_core::{AggregateId, DocumentNumber, DomainError, SequenceKey, TenantId};
use gestio_events::{Event, EventBus, EventEnvelope, InMemoryEventBus};
use gestio_inventory::{LedgerEntry, LedgerEvent};
use gestio_invoicing::{Invoice, InvoiceId};
use gestio_orders::{Order, OrderId, VatContext};
use gestio_products::{ProductId, Warehouse};

use crate::config::EngineConfig;
use crate::store::{EngineStore, StoreError};

pub use error::{EngineError, EngineResult};
pub use invoicing::{DeliveryNoteRequest, InvoiceRequest, IssuedInvoice};
pub use ledger::MovementInput;
pub use orders::{NewOrder, OrderTransition};
pub use reference::{QuickCreate, QuickCreated, SeedReport};

pub(crate) const ORDER_AGGREGATE: &str = "orders.order";
pub(crate) const INVOICE_AGGREGATE: &str = "invoicing.invoice";
pub(crate) const DELIVERY_NOTE_AGGREGATE: &str = "invoicing.delivery_note";
pub(crate) const LEDGER_AGGREGATE: &str = "inventory.product";

/// The inventory ledger and order fulfilment engine.
///
/// Generic over the store so the same services run against
/// [`crate::store::InMemoryStore`] in tests and [`crate::store::PostgresStore`]
/// in production, and over the bus events are published on.
pub struct Engine<S: ?Sized, B = InMemoryEventBus<EventEnvelope<JsonValue>>> {
    store: Arc<S>,
    bus: B,
    config: EngineConfig,
}

impl<S, B> Engine<S, B>
where
    S: EngineStore + ?Sized,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(store: Arc<S>, bus: B, config: EngineConfig) -> Self {
        Self { store, bus, config }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Authorize and return the tenant the operation runs in.
    fn gate(&self, principal: &Principal, resource: Resource, action: Action) -> EngineResult<TenantId> {
        authorize(principal, resource, action)?;
        Ok(principal.tenant_id())
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn registry(&self, tenant_id: TenantId) -> EngineResult<CausaleRegistry> {
        Ok(self.store.causale_registry(tenant_id).await?)
    }

    async fn load_order(&self, tenant_id: TenantId, order_id: OrderId) -> EngineResult<Order> {
        self.store
            .order(tenant_id, order_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("order {order_id}")).into())
    }

    async fn load_invoice(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> EngineResult<Invoice> {
        self.store
            .invoice(tenant_id, invoice_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("invoice {invoice_id}")).into())
    }

    async fn primary_warehouse(&self, tenant_id: TenantId) -> EngineResult<Warehouse> {
        self.store
            .warehouses(tenant_id)
            .await?
            .into_iter()
            .find(|w| w.primary)
            .ok_or_else(|| DomainError::field("warehouse", "no warehouse given and the tenant has no primary warehouse").into())
    }

    /// VAT configuration for a document of `subject_default` over `products`.
    async fn vat_context(
        &self,
        tenant_id: TenantId,
        subject_default: Option<String>,
        products: impl IntoIterator<Item = ProductId>,
    ) -> EngineResult<VatContext> {
        let rates = self.store.vat_codes(tenant_id).await?;
        let mut context = VatContext::new(subject_default).with_rates(&rates);
        for product_id in products {
            let product = self
                .store
                .product(tenant_id, product_id)
                .await?
                .ok_or_else(|| DomainError::not_found(format!("product {product_id}")))?;
            context = context.with_product(product_id, product.vat_code);
        }
        Ok(context)
    }

    async fn next_number(&self, tenant_id: TenantId, sequence: &SequenceKey, year: i32) -> EngineResult<DocumentNumber> {
        Ok(self.store.next_number(tenant_id, sequence, year).await?)
    }

    /// Decide whether a failed numbered write is retried with a fresh number.
    fn retry_numbering(&self, attempt: &mut u32, err: StoreError) -> EngineResult<()> {
        match err {
            StoreError::NumberTaken(msg) if *attempt < self.config.numbering_retries => {
                *attempt += 1;
                warn!(attempt = *attempt, reason = %msg, "document number taken, retrying with a fresh one");
                Ok(())
            }
            other => Err(other.into()),
        }
    }

    /// Publish `events` of one aggregate; the first gets `first_sequence`.
    fn publish<E>(&self, tenant_id: TenantId, aggregate_id: AggregateId, aggregate_type: &str, first_sequence: u64, events: &[E])
    where
        E: Event + Serialize,
    {
        for (offset, event) in events.iter().enumerate() {
            let sequence = first_sequence + offset as u64;
            let envelope = match EventEnvelope::from_event(tenant_id, aggregate_id, aggregate_type, sequence, event) {
                Ok(envelope) => envelope,
                Err(err) => {
                    warn!(event_type = event.event_type(), error = %err, "failed to encode event");
                    continue;
                }
            };
            if let Err(err) = self.bus.publish(envelope) {
                warn!(event_type = event.event_type(), error = %err, "failed to publish committed event");
            }
        }
    }

    /// Publish the events of an aggregate that now stands at `version`.
    fn publish_applied<E>(&self, tenant_id: TenantId, aggregate_id: AggregateId, aggregate_type: &str, version: u64, events: &[E])
    where
        E: Event + Serialize,
    {
        let first = (version + 1).saturating_sub(events.len() as u64);
        self.publish(tenant_id, aggregate_id, aggregate_type, first, events);
    }

    fn publish_entries(&self, tenant_id: TenantId, entries: &[LedgerEntry]) {
        for entry in entries {
            self.publish(
                tenant_id,
                entry.product_id.0,
                LEDGER_AGGREGATE,
                entry.sequence,
                &[LedgerEvent::EntryPosted(entry.clone())],
            );
        }
    }
}
