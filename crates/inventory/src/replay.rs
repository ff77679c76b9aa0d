//! Rebuilding a stock snapshot from its ledger.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use gestio_causali::Direction;
use gestio_core::{DomainError, DomainResult, TenantId};
use gestio_products::ProductId;

use crate::costing::{weighted_average, ProductStock};
use crate::ledger::LedgerEntry;

/// Recompute a product's snapshot by applying its entries in sequence order.
///
/// Fails if the sequence has gaps or entries of another product/tenant.
pub fn replay(tenant_id: TenantId, product_id: ProductId, entries: &[LedgerEntry]) -> DomainResult<ProductStock> {
    let mut ordered: Vec<&LedgerEntry> = entries.iter().collect();
    ordered.sort_by_key(|entry| entry.sequence);

    let mut stock = ProductStock::empty(tenant_id, product_id);
    for entry in ordered {
        if entry.tenant_id != tenant_id || entry.product_id != product_id {
            return Err(DomainError::invariant(format!(
                "entry {} does not belong to product {product_id}",
                entry.id
            )));
        }
        if entry.sequence != stock.last_sequence + 1 {
            return Err(DomainError::invariant(format!(
                "ledger sequence gap: expected {}, found {}",
                stock.last_sequence + 1,
                entry.sequence
            )));
        }

        if entry.direction == Direction::Inbound && entry.updates_average_cost {
            stock.average_cost =
                weighted_average(stock.on_hand, stock.average_cost, entry.quantity.abs(), entry.unit_cost);
            stock.last_purchase_cost = Some(entry.unit_cost);
        }
        stock.on_hand += entry.quantity;
        stock.last_sequence = entry.sequence;
    }
    Ok(stock)
}

/// Difference between a cached snapshot and its replayed ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDiscrepancy {
    pub product_id: ProductId,
    pub cached_on_hand: Decimal,
    pub ledger_on_hand: Decimal,
    pub cached_average_cost: Decimal,
    pub ledger_average_cost: Decimal,
}

/// `None` when the snapshot is exactly what the ledger produces.
pub fn verify(snapshot: &ProductStock, entries: &[LedgerEntry]) -> DomainResult<Option<StockDiscrepancy>> {
    let rebuilt = replay(snapshot.tenant_id, snapshot.product_id, entries)?;
    if rebuilt.on_hand == snapshot.on_hand && rebuilt.average_cost == snapshot.average_cost {
        return Ok(None);
    }
    Ok(Some(StockDiscrepancy {
        product_id: snapshot.product_id,
        cached_on_hand: snapshot.on_hand,
        ledger_on_hand: rebuilt.on_hand,
        cached_average_cost: snapshot.average_cost,
        ledger_average_cost: rebuilt.average_cost,
    }))
}
