//! Delivery notes (DDT): transport documents derived from fulfilled sale orders.
//! They carry quantities only and never move stock themselves.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use gestio_core::{domain_id, DocumentNumber, DomainError, DomainResult, OperationType, TenantId};
use gestio_events::Event;
use gestio_orders::{Order, OrderId, OrderStatus};
use gestio_parties::SubjectId;
use gestio_products::{ProductId, WarehouseId};

domain_id!(DeliveryNoteId);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryLine {
    pub line_no: u32,
    pub product_id: ProductId,
    pub warehouse_id: Option<WarehouseId>,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryNote {
    pub id: DeliveryNoteId,
    pub tenant_id: TenantId,
    pub causale_code: String,
    pub number: DocumentNumber,
    pub date: NaiveDate,
    pub subject_id: SubjectId,
    pub carrier_id: Option<SubjectId>,
    pub source_order: OrderId,
    pub lines: Vec<DeliveryLine>,
}

/// Input for [`DeliveryNote::from_order`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueDeliveryNote {
    pub tenant_id: TenantId,
    pub note_id: DeliveryNoteId,
    pub causale_code: String,
    pub number: DocumentNumber,
    pub date: NaiveDate,
    pub carrier_id: Option<SubjectId>,
}

impl DeliveryNote {
    /// Check that `order` can be shipped in `tenant_id`; returns its counterparty.
    pub fn ensure_deliverable(tenant_id: TenantId, order: &Order) -> DomainResult<SubjectId> {
        if order.tenant_id() != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if order.operation() != OperationType::Sale {
            return Err(DomainError::invariant("delivery notes are issued for sale orders only"));
        }
        if !matches!(order.status(), OrderStatus::Fulfilled | OrderStatus::Invoiced) {
            return Err(DomainError::invariant(format!(
                "only fulfilled orders can be shipped (order is {})",
                order.status()
            )));
        }
        order
            .subject_id()
            .ok_or_else(|| DomainError::invariant("order has no counterparty"))
    }

    pub fn from_order(cmd: IssueDeliveryNote, order: &Order) -> DomainResult<Self> {
        let subject_id = Self::ensure_deliverable(cmd.tenant_id, order)?;

        let lines = order
            .lines()
            .iter()
            .map(|line| DeliveryLine {
                line_no: line.line_no,
                product_id: line.product_id,
                warehouse_id: order.line_warehouse(line),
                quantity: line.quantity,
            })
            .collect();

        Ok(Self {
            id: cmd.note_id,
            tenant_id: cmd.tenant_id,
            causale_code: cmd.causale_code,
            number: cmd.number,
            date: cmd.date,
            subject_id,
            carrier_id: cmd.carrier_id,
            source_order: order.id_typed(),
            lines,
        })
    }

    pub fn issued_event(&self, occurred_at: DateTime<Utc>) -> DeliveryNoteEvent {
        DeliveryNoteEvent::Issued {
            note: self.clone(),
            occurred_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryNoteEvent {
    Issued { note: DeliveryNote, occurred_at: DateTime<Utc> },
}

impl Event for DeliveryNoteEvent {
    fn event_type(&self) -> &'static str {
        "invoicing.delivery_note.issued"
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DeliveryNoteEvent::Issued { occurred_at, .. } => *occurred_at,
        }
    }
}
