use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use gestio_causali::{CausaleEffect, Direction};
use gestio_core::{domain_id, AggregateId, DomainError, DomainResult, TenantId};
use gestio_events::Event;
use gestio_parties::SubjectId;
use gestio_products::{ProductId, WarehouseId};

domain_id!(LedgerEntryId);

/// Kind of document a ledger entry was posted for.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Order,
    DeliveryNote,
    Invoice,
    /// Stand-alone movement document (inventory count, transfer sheet...).
    Movement,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Order => "order",
            SourceKind::DeliveryNote => "delivery_note",
            SourceKind::Invoice => "invoice",
            SourceKind::Movement => "movement",
        }
    }

    pub fn parse(value: &str) -> DomainResult<Self> {
        match value {
            "order" => Ok(SourceKind::Order),
            "delivery_note" => Ok(SourceKind::DeliveryNote),
            "invoice" => Ok(SourceKind::Invoice),
            "movement" => Ok(SourceKind::Movement),
            other => Err(DomainError::field("source.kind", format!("unknown source kind '{other}'"))),
        }
    }
}

/// Link from an entry back to the document line that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub kind: SourceKind,
    pub document_id: AggregateId,
    pub line_no: Option<u32>,
}

impl SourceDocument {
    pub fn line(kind: SourceKind, document_id: AggregateId, line_no: u32) -> Self {
        Self {
            kind,
            document_id,
            line_no: Some(line_no),
        }
    }
}

/// A request to append one movement to the ledger.
///
/// `quantity` is unsigned: direction and sign come from the causale only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingRequest {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub causale: CausaleEffect,
    pub quantity: Decimal,
    pub unit_cost: Option<Decimal>,
    pub source: Option<SourceDocument>,
    pub counterparty: Option<SubjectId>,
    /// Entry this request corrects, for "rettifica" postings.
    pub reverses: Option<LedgerEntryId>,
}

impl PostingRequest {
    pub fn new(product_id: ProductId, warehouse_id: WarehouseId, causale: CausaleEffect, quantity: Decimal) -> Self {
        Self {
            product_id,
            warehouse_id,
            causale,
            quantity,
            unit_cost: None,
            source: None,
            counterparty: None,
            reverses: None,
        }
    }

    pub fn at_cost(mut self, unit_cost: Decimal) -> Self {
        self.unit_cost = Some(unit_cost);
        self
    }

    pub fn for_document(mut self, source: SourceDocument) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_counterparty(mut self, subject: SubjectId) -> Self {
        self.counterparty = Some(subject);
        self
    }

    /// Checks that need nothing but the request itself.
    pub fn validate(&self) -> DomainResult<()> {
        if self.quantity <= Decimal::ZERO {
            return Err(DomainError::field("quantity", "must be greater than zero"));
        }
        if self.causale.requires_document && self.source.is_none() {
            return Err(DomainError::field(
                "source_document",
                format!("causale '{}' requires a supporting document", self.causale.code),
            ));
        }
        if let Some(cost) = self.unit_cost {
            if cost < Decimal::ZERO {
                return Err(DomainError::field("unit_cost", "must not be negative"));
            }
        }
        if self.causale.updates_average_cost && self.unit_cost.is_none() {
            return Err(DomainError::field(
                "unit_cost",
                format!("causale '{}' updates the average cost and needs a unit cost", self.causale.code),
            ));
        }
        Ok(())
    }
}

/// An immutable ledger line (movimento di magazzino).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub causale_code: String,
    pub direction: Direction,
    pub updates_average_cost: bool,
    /// Position in the product's ledger, starting at 1.
    pub sequence: u64,
    /// `abs(requested) * causale sign`.
    pub quantity: Decimal,
    /// Cost at posting time; for outbound entries, the cost of goods moved.
    pub unit_cost: Decimal,
    pub average_cost_after: Decimal,
    pub on_hand_after: Decimal,
    pub source: Option<SourceDocument>,
    pub counterparty: Option<SubjectId>,
    pub reverses: Option<LedgerEntryId>,
    pub posted_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// `quantity * unit_cost` at cent precision, signed like the quantity.
    pub fn value(&self) -> Decimal {
        gestio_core::round_money(self.quantity * self.unit_cost)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    EntryPosted(LedgerEntry),
}

impl Event for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::EntryPosted(entry) if entry.reverses.is_some() => "inventory.ledger.entry_reversed",
            LedgerEvent::EntryPosted(_) => "inventory.ledger.entry_posted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LedgerEvent::EntryPosted(entry) => entry.posted_at,
        }
    }
}
