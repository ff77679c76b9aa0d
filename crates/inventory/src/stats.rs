use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use gestio_causali::Direction;
use gestio_core::round_cost;

use crate::ledger::LedgerEntry;

/// Purchase price figures derived from cost-updating inbound entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceStatistics {
    pub last_purchase_cost: Option<Decimal>,
    pub min_purchase_cost: Option<Decimal>,
    pub max_purchase_cost: Option<Decimal>,
    /// Quantity-weighted mean purchase cost.
    pub average_purchase_cost: Option<Decimal>,
    pub purchase_count: u64,
    pub purchased_quantity: Decimal,
}

impl PriceStatistics {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Self {
        let mut purchases: Vec<&LedgerEntry> = entries
            .into_iter()
            .filter(|e| e.direction == Direction::Inbound && e.updates_average_cost && e.reverses.is_none())
            .collect();
        purchases.sort_by_key(|e| e.sequence);

        let mut stats = Self::default();
        let mut value = Decimal::ZERO;
        for entry in &purchases {
            let qty = entry.quantity.abs();
            stats.purchase_count += 1;
            stats.purchased_quantity += qty;
            value += qty * entry.unit_cost;
            stats.min_purchase_cost = Some(stats.min_purchase_cost.map_or(entry.unit_cost, |m| m.min(entry.unit_cost)));
            stats.max_purchase_cost = Some(stats.max_purchase_cost.map_or(entry.unit_cost, |m| m.max(entry.unit_cost)));
        }
        stats.last_purchase_cost = purchases.last().map(|e| e.unit_cost);
        if !stats.purchased_quantity.is_zero() {
            stats.average_purchase_cost = Some(round_cost(value / stats.purchased_quantity));
        }
        stats
    }
}
