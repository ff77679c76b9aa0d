//! Ledger operations: manual postings, corrections and stock queries.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, instrument};

use gestio_auth::{Action, Principal, Resource};
use gestio_core::{DomainError, TenantId};
use gestio_events::{EventBus, EventEnvelope};
use gestio_inventory::{
    verify, LedgerEntry, LedgerEntryId, PostingRequest, PriceStatistics, ProductStock, SourceDocument,
    StockDiscrepancy, WarehouseStock,
};
use gestio_parties::SubjectId;
use gestio_products::{ProductId, WarehouseId};

use super::{Engine, EngineResult};
use crate::store::EngineStore;

/// A standalone movement (adjustment, manual load or unload).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementInput {
    pub product_id: ProductId,
    /// Defaults to the tenant's primary warehouse.
    #[serde(default)]
    pub warehouse_id: Option<WarehouseId>,
    pub causale_code: String,
    pub quantity: Decimal,
    #[serde(default)]
    pub unit_cost: Option<Decimal>,
    #[serde(default)]
    pub source: Option<SourceDocument>,
    #[serde(default)]
    pub counterparty: Option<SubjectId>,
}

impl<S, B> Engine<S, B>
where
    S: EngineStore + ?Sized,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Post one movement. Sign and cost effect come from the causale.
    #[instrument(
        skip(self, principal, input),
        fields(
            tenant_id = %principal.tenant_id(),
            product_id = %input.product_id,
            causale = %input.causale_code
        ),
        err
    )]
    pub async fn post_movement(&self, principal: &Principal, input: MovementInput) -> EngineResult<LedgerEntry> {
        let tenant_id = self.gate(principal, Resource::Ledger, Action::Write)?;
        let effect = self.registry(tenant_id).await?.resolve(&input.causale_code, tenant_id)?;

        let product = self
            .store
            .product(tenant_id, input.product_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("product {}", input.product_id)))?;
        product.ensure_active()?;
        let warehouse_id = self.postable_warehouse(tenant_id, input.warehouse_id).await?;
        if let Some(subject_id) = input.counterparty {
            self.store
                .subject(tenant_id, subject_id)
                .await?
                .ok_or_else(|| DomainError::field("counterparty", format!("unknown subject {subject_id}")))?;
        }

        let mut request = PostingRequest::new(input.product_id, warehouse_id, effect, input.quantity);
        request.unit_cost = input.unit_cost;
        request.source = input.source;
        request.counterparty = input.counterparty;
        request.validate()?;

        let entries = self
            .store
            .post(tenant_id, vec![request], self.config.stock_policy(), self.now())
            .await?;
        self.publish_entries(tenant_id, &entries);

        let entry = entries
            .into_iter()
            .next()
            .ok_or_else(|| DomainError::invariant("posting produced no ledger entry"))?;
        info!(entry_id = %entry.id, quantity = %entry.quantity, on_hand = %entry.on_hand_after, "movement posted");
        Ok(entry)
    }

    /// Correct an entry by posting its opposite with the inverse causale.
    /// History is never edited and an entry can be corrected only once.
    #[instrument(skip(self, principal), fields(tenant_id = %principal.tenant_id(), entry_id = %entry_id), err)]
    pub async fn reverse_entry(&self, principal: &Principal, entry_id: LedgerEntryId) -> EngineResult<LedgerEntry> {
        let tenant_id = self.gate(principal, Resource::Ledger, Action::Write)?;
        let original = self
            .store
            .entry(tenant_id, entry_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("ledger entry {entry_id}")))?;
        if original.reverses.is_some() {
            return Err(DomainError::conflict(format!("entry {entry_id} is itself a correction")).into());
        }
        let inverse = self
            .registry(tenant_id)
            .await?
            .resolve_inverse(&original.causale_code, tenant_id)?;

        let mut request = PostingRequest::new(original.product_id, original.warehouse_id, inverse, original.quantity.abs())
            .at_cost(original.unit_cost);
        request.source = original.source.clone();
        request.counterparty = original.counterparty;
        request.reverses = Some(original.id);

        let entries = self
            .store
            .post(tenant_id, vec![request], self.config.stock_policy(), self.now())
            .await?;
        self.publish_entries(tenant_id, &entries);

        let entry = entries
            .into_iter()
            .next()
            .ok_or_else(|| DomainError::invariant("correction produced no ledger entry"))?;
        info!(correction_id = %entry.id, causale = %entry.causale_code, "ledger entry reversed");
        Ok(entry)
    }

    /// Cached snapshot of a product (empty if nothing was ever posted).
    #[instrument(skip(self, principal), fields(tenant_id = %principal.tenant_id(), product_id = %product_id), err)]
    pub async fn product_stock(&self, principal: &Principal, product_id: ProductId) -> EngineResult<ProductStock> {
        let tenant_id = self.gate(principal, Resource::Ledger, Action::Read)?;
        self.stock_snapshot(tenant_id, product_id).await
    }

    #[instrument(skip(self, principal), fields(tenant_id = %principal.tenant_id(), product_id = %product_id), err)]
    pub async fn warehouse_stock(&self, principal: &Principal, product_id: ProductId) -> EngineResult<Vec<WarehouseStock>> {
        let tenant_id = self.gate(principal, Resource::Ledger, Action::Read)?;
        self.ensure_product(tenant_id, product_id).await?;
        Ok(self.store.warehouse_stock(tenant_id, product_id).await?)
    }

    #[instrument(skip(self, principal), fields(tenant_id = %principal.tenant_id(), product_id = %product_id), err)]
    pub async fn ledger_entries(&self, principal: &Principal, product_id: ProductId) -> EngineResult<Vec<LedgerEntry>> {
        let tenant_id = self.gate(principal, Resource::Ledger, Action::Read)?;
        self.ensure_product(tenant_id, product_id).await?;
        Ok(self.store.entries(tenant_id, product_id).await?)
    }

    /// Replay the product's ledger and compare it with the cached snapshot.
    /// `None` means the snapshot is reproducible from the entries.
    #[instrument(skip(self, principal), fields(tenant_id = %principal.tenant_id(), product_id = %product_id), err)]
    pub async fn verify_stock(&self, principal: &Principal, product_id: ProductId) -> EngineResult<Option<StockDiscrepancy>> {
        let tenant_id = self.gate(principal, Resource::Ledger, Action::Read)?;
        let snapshot = self.stock_snapshot(tenant_id, product_id).await?;
        let entries = self.store.entries(tenant_id, product_id).await?;
        let discrepancy = verify(&snapshot, &entries)?;
        if let Some(d) = &discrepancy {
            tracing::warn!(
                cached_on_hand = %d.cached_on_hand,
                ledger_on_hand = %d.ledger_on_hand,
                "stock snapshot diverges from its ledger"
            );
        }
        Ok(discrepancy)
    }

    #[instrument(skip(self, principal), fields(tenant_id = %principal.tenant_id(), product_id = %product_id), err)]
    pub async fn price_statistics(&self, principal: &Principal, product_id: ProductId) -> EngineResult<PriceStatistics> {
        let tenant_id = self.gate(principal, Resource::Ledger, Action::Read)?;
        self.ensure_product(tenant_id, product_id).await?;
        let entries = self.store.entries(tenant_id, product_id).await?;
        Ok(PriceStatistics::from_entries(&entries))
    }

    async fn ensure_product(&self, tenant_id: TenantId, product_id: ProductId) -> EngineResult<()> {
        self.store
            .product(tenant_id, product_id)
            .await?
            .map(|_| ())
            .ok_or_else(|| DomainError::not_found(format!("product {product_id}")).into())
    }

    async fn stock_snapshot(&self, tenant_id: TenantId, product_id: ProductId) -> EngineResult<ProductStock> {
        self.ensure_product(tenant_id, product_id).await?;
        Ok(self
            .store
            .product_stock(tenant_id, product_id)
            .await?
            .unwrap_or_else(|| ProductStock::empty(tenant_id, product_id)))
    }

    /// The given warehouse, or the tenant's primary one; must accept postings.
    pub(super) async fn postable_warehouse(&self, tenant_id: TenantId, requested: Option<WarehouseId>) -> EngineResult<WarehouseId> {
        let warehouse = match requested {
            Some(id) => self
                .store
                .warehouses(tenant_id)
                .await?
                .into_iter()
                .find(|w| w.id == id)
                .ok_or_else(|| DomainError::not_found(format!("warehouse {id}")))?,
            None => self.primary_warehouse(tenant_id).await?,
        };
        warehouse.ensure_postable()?;
        Ok(warehouse.id)
    }
}
