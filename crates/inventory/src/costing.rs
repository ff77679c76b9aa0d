//! Weighted-average costing and the cached stock snapshot.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use gestio_causali::Direction;
use gestio_core::{round_cost, DomainError, DomainResult, TenantId};
use gestio_products::{ProductId, WarehouseId};

use crate::ledger::{LedgerEntry, LedgerEntryId, PostingRequest};

/// Running average after an inbound of `q` units at `c`.
///
/// A zero resulting quantity keeps the previous cost. An oversold position
/// blends like any other, except that a blend below zero takes the incoming
/// cost instead.
pub fn weighted_average(old_qty: Decimal, old_cost: Decimal, q: Decimal, c: Decimal) -> Decimal {
    let new_qty = old_qty + q;
    if new_qty.is_zero() {
        return old_cost;
    }
    if old_qty.is_zero() {
        return round_cost(c);
    }
    let blended = (old_qty * old_cost + q * c) / new_qty;
    if blended < Decimal::ZERO {
        return round_cost(c);
    }
    round_cost(blended)
}

/// Whether outbound postings may drive on-hand below zero.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockPolicy {
    pub allow_negative: bool,
}

impl Default for StockPolicy {
    fn default() -> Self {
        Self { allow_negative: true }
    }
}

/// Quantity of one product in one warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseStock {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantity: Decimal,
}

impl WarehouseStock {
    pub fn empty(tenant_id: TenantId, product_id: ProductId, warehouse_id: WarehouseId) -> Self {
        Self {
            tenant_id,
            product_id,
            warehouse_id,
            quantity: Decimal::ZERO,
        }
    }
}

/// Cached per-product position, advanced by every posting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductStock {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub on_hand: Decimal,
    pub average_cost: Decimal,
    pub last_purchase_cost: Option<Decimal>,
    /// Sequence of the newest entry applied.
    pub last_sequence: u64,
}

impl ProductStock {
    pub fn empty(tenant_id: TenantId, product_id: ProductId) -> Self {
        Self {
            tenant_id,
            product_id,
            on_hand: Decimal::ZERO,
            average_cost: Decimal::ZERO,
            last_purchase_cost: None,
            last_sequence: 0,
        }
    }

    /// Validate `request`, advance this snapshot and `warehouse`, and build
    /// the resulting entry. Nothing is mutated when an error is returned.
    pub fn post(
        &mut self,
        warehouse: &mut WarehouseStock,
        request: &PostingRequest,
        policy: StockPolicy,
        entry_id: LedgerEntryId,
        posted_at: DateTime<Utc>,
    ) -> DomainResult<LedgerEntry> {
        request.validate()?;
        if warehouse.product_id != self.product_id
            || warehouse.warehouse_id != request.warehouse_id
            || request.product_id != self.product_id
        {
            return Err(DomainError::invariant("posting applied to the wrong stock position"));
        }
        if warehouse.tenant_id != self.tenant_id {
            return Err(DomainError::invariant("stock positions of different tenants"));
        }

        let effect = &request.causale;
        let quantity = effect.signed_quantity(request.quantity);
        let new_on_hand = self.on_hand + quantity;
        let new_warehouse_qty = warehouse.quantity + quantity;

        if effect.direction == Direction::Outbound && !policy.allow_negative && new_warehouse_qty < Decimal::ZERO {
            return Err(DomainError::conflict(format!(
                "insufficient stock: {} available, {} requested",
                warehouse.quantity, request.quantity
            )));
        }

        let (unit_cost, new_average) = match effect.direction {
            Direction::Outbound => (self.average_cost, self.average_cost),
            Direction::Inbound if effect.updates_average_cost => {
                let cost = request.unit_cost.unwrap_or(self.average_cost);
                (cost, weighted_average(self.on_hand, self.average_cost, request.quantity, cost))
            }
            Direction::Inbound => (request.unit_cost.unwrap_or(self.average_cost), self.average_cost),
        };

        let entry = LedgerEntry {
            id: entry_id,
            tenant_id: self.tenant_id,
            product_id: self.product_id,
            warehouse_id: request.warehouse_id,
            causale_code: effect.code.clone(),
            direction: effect.direction,
            updates_average_cost: effect.updates_average_cost,
            sequence: self.last_sequence + 1,
            quantity,
            unit_cost,
            average_cost_after: new_average,
            on_hand_after: new_on_hand,
            source: request.source.clone(),
            counterparty: request.counterparty,
            reverses: request.reverses,
            posted_at,
        };

        self.on_hand = new_on_hand;
        self.average_cost = new_average;
        if effect.updates_average_cost {
            self.last_purchase_cost = Some(unit_cost);
        }
        self.last_sequence = entry.sequence;
        warehouse.quantity = new_warehouse_qty;

        Ok(entry)
    }
}
