use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use gestio_causali::CausaleFamily;
use gestio_core::{
    domain_id, Aggregate, AggregateId, AggregateRoot, DocumentNumber, DomainError, OperationType, TenantId,
};
use gestio_events::Event;
use gestio_parties::{SubjectId, SubjectRoles};
use gestio_products::{ProductId, WarehouseId};

use crate::pricing::{line_amounts, DocumentTotals, LineAmounts, LineDiscount};
use crate::vat::AppliedVat;

domain_id!(
    /// Order identifier (tenant-scoped via `tenant_id` fields in commands/events).
    OrderId
);

/// Order status lifecycle.
///
/// `Draft → Confirmed → Fulfilled (sale) | Received (purchase) → Invoiced`,
/// with `Cancelled` reachable from every state but `Invoiced`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Draft,
    Confirmed,
    Fulfilled,
    Received,
    Invoiced,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Draft => "draft",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Fulfilled => "fulfilled",
            OrderStatus::Received => "received",
            OrderStatus::Invoiced => "invoiced",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Stock has been moved for this order.
    pub fn has_moved_stock(self) -> bool {
        matches!(self, OrderStatus::Fulfilled | OrderStatus::Received | OrderStatus::Invoiced)
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller supplies for a line; amounts are derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineInput {
    pub product_id: ProductId,
    pub warehouse_id: Option<WarehouseId>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    #[serde(default)]
    pub discount: LineDiscount,
    /// Explicit VAT code for this line, overriding subject and product.
    pub vat_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub line_no: u32,
    pub product_id: ProductId,
    pub warehouse_id: Option<WarehouseId>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub discount: LineDiscount,
    pub vat_code_override: Option<String>,
    pub vat: AppliedVat,
    pub amounts: LineAmounts,
}

impl OrderLine {
    fn build(line_no: u32, input: &LineInput, vat: &AppliedVat) -> Result<Self, DomainError> {
        let amounts = line_amounts(input.quantity, input.unit_price, input.discount, vat.rate)?;
        Ok(Self {
            line_no,
            product_id: input.product_id,
            warehouse_id: input.warehouse_id,
            quantity: input.quantity,
            unit_price: input.unit_price,
            discount: input.discount,
            vat_code_override: input.vat_code.clone(),
            vat: vat.clone(),
            amounts,
        })
    }
}

/// An invoice (or other derived document) issued from this order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLink {
    pub family: CausaleFamily,
    pub document_id: AggregateId,
}

/// Aggregate root: Order (sale or purchase).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    tenant_id: Option<TenantId>,
    operation: OperationType,
    causale_code: String,
    number: Option<DocumentNumber>,
    date: Option<NaiveDate>,
    subject_id: Option<SubjectId>,
    warehouse_id: Option<WarehouseId>,
    payment_method: Option<String>,
    status: OrderStatus,
    lines: Vec<OrderLine>,
    totals: DocumentTotals,
    invoices: Vec<InvoiceLink>,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            tenant_id: None,
            operation: OperationType::Sale,
            causale_code: String::new(),
            number: None,
            date: None,
            subject_id: None,
            warehouse_id: None,
            payment_method: None,
            status: OrderStatus::Draft,
            lines: Vec::new(),
            totals: DocumentTotals::default(),
            invoices: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn operation(&self) -> OperationType {
        self.operation
    }

    pub fn causale_code(&self) -> &str {
        &self.causale_code
    }

    pub fn number(&self) -> Option<&DocumentNumber> {
        self.number.as_ref()
    }

    pub fn date(&self) -> Option<NaiveDate> {
        self.date
    }

    pub fn subject_id(&self) -> Option<SubjectId> {
        self.subject_id
    }

    pub fn warehouse_id(&self) -> Option<WarehouseId> {
        self.warehouse_id
    }

    pub fn payment_method(&self) -> Option<&str> {
        self.payment_method.as_deref()
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn line(&self, line_no: u32) -> Option<&OrderLine> {
        self.lines.iter().find(|l| l.line_no == line_no)
    }

    pub fn totals(&self) -> &DocumentTotals {
        &self.totals
    }

    pub fn invoices(&self) -> &[InvoiceLink] {
        &self.invoices
    }

    pub fn is_modifiable(&self) -> bool {
        matches!(self.status, OrderStatus::Draft)
    }

    pub fn has_document_in(&self, family: &CausaleFamily) -> bool {
        self.invoices.iter().any(|link| &link.family == family)
    }

    /// Target warehouse of a line: its own, else the order default.
    pub fn line_warehouse(&self, line: &OrderLine) -> Option<WarehouseId> {
        line.warehouse_id.or(self.warehouse_id)
    }

    /// Status an order reaches once its stock has moved.
    pub fn moved_status(&self) -> OrderStatus {
        match self.operation {
            OperationType::Sale => OrderStatus::Fulfilled,
            OperationType::Purchase => OrderStatus::Received,
        }
    }

    fn recompute_totals(&mut self) {
        self.totals = DocumentTotals::from_lines(self.lines.iter().map(|l| &l.amounts));
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateOrder. The number is allocated by the caller from the
/// causale's sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrder {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub operation: OperationType,
    pub causale_code: String,
    pub number: DocumentNumber,
    pub date: NaiveDate,
    pub subject_id: SubjectId,
    pub warehouse_id: Option<WarehouseId>,
    pub payment_method: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddLine, with the VAT already resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLine {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub line: LineInput,
    pub vat: AppliedVat,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateLine {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub line_no: u32,
    pub line: LineInput,
    pub vat: AppliedVat,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveLine {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub line_no: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmOrder. Carries the counterparty's current roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmOrder {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub counterparty_roles: SubjectRoles,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkFulfilled {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkReceived {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkInvoiced {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub family: CausaleFamily,
    pub document_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrder {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    CreateOrder(CreateOrder),
    AddLine(AddLine),
    UpdateLine(UpdateLine),
    RemoveLine(RemoveLine),
    ConfirmOrder(ConfirmOrder),
    MarkFulfilled(MarkFulfilled),
    MarkReceived(MarkReceived),
    MarkInvoiced(MarkInvoiced),
    CancelOrder(CancelOrder),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreated {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub operation: OperationType,
    pub causale_code: String,
    pub number: DocumentNumber,
    pub date: NaiveDate,
    pub subject_id: SubjectId,
    pub warehouse_id: Option<WarehouseId>,
    pub payment_method: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAdded {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub line: OrderLine,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineUpdated {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub line: OrderLine,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRemoved {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub line_no: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConfirmed {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFulfilled {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderReceived {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderInvoiced {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub family: CausaleFamily,
    pub document_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub previous_status: OrderStatus,
    /// Stock had moved, so compensating entries accompany the cancellation.
    pub compensated: bool,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderCreated(OrderCreated),
    LineAdded(LineAdded),
    LineUpdated(LineUpdated),
    LineRemoved(LineRemoved),
    OrderConfirmed(OrderConfirmed),
    OrderFulfilled(OrderFulfilled),
    OrderReceived(OrderReceived),
    OrderInvoiced(OrderInvoiced),
    OrderCancelled(OrderCancelled),
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderCreated(_) => "orders.order.created",
            OrderEvent::LineAdded(_) => "orders.order.line_added",
            OrderEvent::LineUpdated(_) => "orders.order.line_updated",
            OrderEvent::LineRemoved(_) => "orders.order.line_removed",
            OrderEvent::OrderConfirmed(_) => "orders.order.confirmed",
            OrderEvent::OrderFulfilled(_) => "orders.order.fulfilled",
            OrderEvent::OrderReceived(_) => "orders.order.received",
            OrderEvent::OrderInvoiced(_) => "orders.order.invoiced",
            OrderEvent::OrderCancelled(_) => "orders.order.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderCreated(e) => e.occurred_at,
            OrderEvent::LineAdded(e) => e.occurred_at,
            OrderEvent::LineUpdated(e) => e.occurred_at,
            OrderEvent::LineRemoved(e) => e.occurred_at,
            OrderEvent::OrderConfirmed(e) => e.occurred_at,
            OrderEvent::OrderFulfilled(e) => e.occurred_at,
            OrderEvent::OrderReceived(e) => e.occurred_at,
            OrderEvent::OrderInvoiced(e) => e.occurred_at,
            OrderEvent::OrderCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderCreated(e) => {
                self.id = e.order_id;
                self.tenant_id = Some(e.tenant_id);
                self.operation = e.operation;
                self.causale_code = e.causale_code.clone();
                self.number = Some(e.number.clone());
                self.date = Some(e.date);
                self.subject_id = Some(e.subject_id);
                self.warehouse_id = e.warehouse_id;
                self.payment_method = e.payment_method.clone();
                self.status = OrderStatus::Draft;
                self.lines.clear();
                self.invoices.clear();
                self.created = true;
            }
            OrderEvent::LineAdded(e) => {
                self.lines.push(e.line.clone());
            }
            OrderEvent::LineUpdated(e) => {
                if let Some(line) = self.lines.iter_mut().find(|l| l.line_no == e.line.line_no) {
                    *line = e.line.clone();
                }
            }
            OrderEvent::LineRemoved(e) => {
                self.lines.retain(|l| l.line_no != e.line_no);
            }
            OrderEvent::OrderConfirmed(_) => {
                self.status = OrderStatus::Confirmed;
            }
            OrderEvent::OrderFulfilled(_) => {
                self.status = OrderStatus::Fulfilled;
            }
            OrderEvent::OrderReceived(_) => {
                self.status = OrderStatus::Received;
            }
            OrderEvent::OrderInvoiced(e) => {
                self.invoices.push(InvoiceLink {
                    family: e.family.clone(),
                    document_id: e.document_id,
                });
                self.status = OrderStatus::Invoiced;
            }
            OrderEvent::OrderCancelled(_) => {
                self.status = OrderStatus::Cancelled;
            }
        }

        // Header totals follow the lines after every event.
        self.recompute_totals();
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::CreateOrder(cmd) => self.handle_create(cmd),
            OrderCommand::AddLine(cmd) => self.handle_add_line(cmd),
            OrderCommand::UpdateLine(cmd) => self.handle_update_line(cmd),
            OrderCommand::RemoveLine(cmd) => self.handle_remove_line(cmd),
            OrderCommand::ConfirmOrder(cmd) => self.handle_confirm(cmd),
            OrderCommand::MarkFulfilled(cmd) => self.handle_fulfilled(cmd),
            OrderCommand::MarkReceived(cmd) => self.handle_received(cmd),
            OrderCommand::MarkInvoiced(cmd) => self.handle_invoiced(cmd),
            OrderCommand::CancelOrder(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl Order {
    fn ensure_target(&self, tenant_id: TenantId, order_id: OrderId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("order {order_id}")));
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn ensure_draft(&self) -> Result<(), DomainError> {
        if self.is_modifiable() {
            Ok(())
        } else {
            Err(DomainError::invariant(format!(
                "lines are frozen once the order is {}",
                self.status
            )))
        }
    }

    fn handle_create(&self, cmd: &CreateOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("order already exists"));
        }
        if cmd.causale_code.trim().is_empty() {
            return Err(DomainError::field("causale", "must not be empty"));
        }

        Ok(vec![OrderEvent::OrderCreated(OrderCreated {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            operation: cmd.operation,
            causale_code: cmd.causale_code.clone(),
            number: cmd.number.clone(),
            date: cmd.date,
            subject_id: cmd.subject_id,
            warehouse_id: cmd.warehouse_id,
            payment_method: cmd.payment_method.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddLine) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.order_id)?;
        self.ensure_draft()?;

        let next_line_no = self.lines.iter().map(|l| l.line_no).max().unwrap_or(0) + 1;
        let line = OrderLine::build(next_line_no, &cmd.line, &cmd.vat)?;

        Ok(vec![OrderEvent::LineAdded(LineAdded {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            line,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_line(&self, cmd: &UpdateLine) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.order_id)?;
        self.ensure_draft()?;
        if self.line(cmd.line_no).is_none() {
            return Err(DomainError::not_found(format!("order line {}", cmd.line_no)));
        }

        let line = OrderLine::build(cmd.line_no, &cmd.line, &cmd.vat)?;
        Ok(vec![OrderEvent::LineUpdated(LineUpdated {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            line,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_line(&self, cmd: &RemoveLine) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.order_id)?;
        self.ensure_draft()?;
        if self.line(cmd.line_no).is_none() {
            return Err(DomainError::not_found(format!("order line {}", cmd.line_no)));
        }

        Ok(vec![OrderEvent::LineRemoved(LineRemoved {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            line_no: cmd.line_no,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm(&self, cmd: &ConfirmOrder) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.order_id)?;

        if self.status != OrderStatus::Draft {
            return Err(DomainError::invariant(format!(
                "only draft orders can be confirmed (order is {})",
                self.status
            )));
        }
        if self.lines.is_empty() {
            return Err(DomainError::field("lines", "cannot confirm an order without lines"));
        }
        cmd.counterparty_roles.ensure_counterparty_for(self.operation)?;

        Ok(vec![OrderEvent::OrderConfirmed(OrderConfirmed {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    /// Shared guard of fulfil/receive: a repeat is a conflict, not a no-op.
    fn ensure_can_move_stock(&self, expected: OperationType) -> Result<(), DomainError> {
        if self.operation != expected {
            return Err(DomainError::invariant(match self.operation {
                OperationType::Sale => "sale orders are fulfilled, not received",
                OperationType::Purchase => "purchase orders are received, not fulfilled",
            }));
        }
        match self.status {
            OrderStatus::Confirmed => Ok(()),
            status if status.has_moved_stock() => Err(DomainError::conflict(format!(
                "order already {}; stock movements were posted once",
                self.moved_status()
            ))),
            status => Err(DomainError::invariant(format!(
                "order must be confirmed before its stock moves (order is {status})"
            ))),
        }
    }

    fn handle_fulfilled(&self, cmd: &MarkFulfilled) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.order_id)?;
        self.ensure_can_move_stock(OperationType::Sale)?;

        Ok(vec![OrderEvent::OrderFulfilled(OrderFulfilled {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_received(&self, cmd: &MarkReceived) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.order_id)?;
        self.ensure_can_move_stock(OperationType::Purchase)?;

        Ok(vec![OrderEvent::OrderReceived(OrderReceived {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_invoiced(&self, cmd: &MarkInvoiced) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.order_id)?;

        if self.has_document_in(&cmd.family) {
            return Err(DomainError::conflict(format!(
                "order already has a document of family '{}'",
                cmd.family
            )));
        }
        if !self.status.has_moved_stock() {
            return Err(DomainError::invariant(format!(
                "only {} orders can be invoiced (order is {})",
                self.moved_status(),
                self.status
            )));
        }

        Ok(vec![OrderEvent::OrderInvoiced(OrderInvoiced {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            family: cmd.family.clone(),
            document_id: cmd.document_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelOrder) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.order_id)?;

        let compensated = match self.status {
            OrderStatus::Draft | OrderStatus::Confirmed => false,
            OrderStatus::Fulfilled | OrderStatus::Received => true,
            OrderStatus::Invoiced => {
                return Err(DomainError::invariant(
                    "invoiced orders cannot be cancelled; issue a credit note instead",
                ));
            }
            OrderStatus::Cancelled => return Err(DomainError::conflict("order already cancelled")),
        };

        Ok(vec![OrderEvent::OrderCancelled(OrderCancelled {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            previous_status: self.status,
            compensated,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gestio_core::{execute, SequenceKey};
    use gestio_parties::SubjectRole;
    use rust_decimal_macros::dec;

    struct Fixture {
        tenant_id: TenantId,
        order: Order,
    }

    fn vat22() -> AppliedVat {
        AppliedVat {
            code: "22".into(),
            rate: dec!(22),
        }
    }

    fn input(quantity: Decimal, unit_price: Decimal, discount_pct: Decimal) -> LineInput {
        LineInput {
            product_id: ProductId::new(),
            warehouse_id: None,
            quantity,
            unit_price,
            discount: LineDiscount::percent(discount_pct),
            vat_code: None,
        }
    }

    fn created(operation: OperationType) -> Fixture {
        let tenant_id = TenantId::new();
        let order_id = OrderId::new();
        let mut order = Order::empty(order_id);
        execute(
            &mut order,
            &OrderCommand::CreateOrder(CreateOrder {
                tenant_id,
                order_id,
                operation,
                causale_code: "OC".into(),
                number: DocumentNumber::new(SequenceKey::new("order.sale").unwrap(), 2026, 1)
                    .unwrap(),
                date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
                subject_id: SubjectId::new(),
                warehouse_id: Some(WarehouseId::new()),
                payment_method: None,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        Fixture { tenant_id, order }
    }

    impl Fixture {
        fn add(&mut self, line: LineInput) -> Result<Vec<OrderEvent>, DomainError> {
            let order_id = self.order.id_typed();
            execute(
                &mut self.order,
                &OrderCommand::AddLine(AddLine {
                    tenant_id: self.tenant_id,
                    order_id,
                    line,
                    vat: vat22(),
                    occurred_at: Utc::now(),
                }),
            )
        }

        fn confirm(&mut self, roles: SubjectRoles) -> Result<Vec<OrderEvent>, DomainError> {
            let order_id = self.order.id_typed();
            execute(
                &mut self.order,
                &OrderCommand::ConfirmOrder(ConfirmOrder {
                    tenant_id: self.tenant_id,
                    order_id,
                    counterparty_roles: roles,
                    occurred_at: Utc::now(),
                }),
            )
        }

        fn fulfil(&mut self) -> Result<Vec<OrderEvent>, DomainError> {
            let order_id = self.order.id_typed();
            execute(
                &mut self.order,
                &OrderCommand::MarkFulfilled(MarkFulfilled {
                    tenant_id: self.tenant_id,
                    order_id,
                    occurred_at: Utc::now(),
                }),
            )
        }

        fn cancel(&mut self) -> Result<Vec<OrderEvent>, DomainError> {
            let order_id = self.order.id_typed();
            execute(
                &mut self.order,
                &OrderCommand::CancelOrder(CancelOrder {
                    tenant_id: self.tenant_id,
                    order_id,
                    reason: None,
                    occurred_at: Utc::now(),
                }),
            )
        }

        fn invoice(&mut self, family: &str) -> Result<Vec<OrderEvent>, DomainError> {
            let order_id = self.order.id_typed();
            execute(
                &mut self.order,
                &OrderCommand::MarkInvoiced(MarkInvoiced {
                    tenant_id: self.tenant_id,
                    order_id,
                    family: CausaleFamily::from_raw(family),
                    document_id: AggregateId::new(),
                    occurred_at: Utc::now(),
                }),
            )
        }
    }

    fn client() -> SubjectRoles {
        SubjectRoles::of([SubjectRole::Client])
    }

    #[test]
    fn totals_are_derived_from_lines() {
        let mut fx = created(OperationType::Sale);
        fx.add(input(dec!(5), dec!(10), dec!(10))).unwrap();
        fx.add(input(dec!(3), dec!(20), dec!(0))).unwrap();

        assert_eq!(fx.order.totals().taxable, dec!(105));
        assert_eq!(fx.order.totals().total, dec!(128.10));
        assert_eq!(fx.order.version(), 3);
    }

    #[test]
    fn update_and_remove_recompute_totals() {
        let mut fx = created(OperationType::Sale);
        fx.add(input(dec!(5), dec!(10), dec!(10))).unwrap();
        fx.add(input(dec!(3), dec!(20), dec!(0))).unwrap();

        let order_id = fx.order.id_typed();
        execute(
            &mut fx.order,
            &OrderCommand::UpdateLine(UpdateLine {
                tenant_id: fx.tenant_id,
                order_id,
                line_no: 2,
                line: input(dec!(1), dec!(20), dec!(0)),
                vat: vat22(),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        assert_eq!(fx.order.totals().taxable, dec!(65));

        execute(
            &mut fx.order,
            &OrderCommand::RemoveLine(RemoveLine {
                tenant_id: fx.tenant_id,
                order_id,
                line_no: 1,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        assert_eq!(fx.order.totals().taxable, dec!(20));
        assert_eq!(fx.order.totals().total, dec!(24.40));

        // line numbers are never reused
        fx.add(input(dec!(1), dec!(1), dec!(0))).unwrap();
        assert_eq!(fx.order.lines().last().unwrap().line_no, 3);
    }

    #[test]
    fn confirm_requires_lines_and_matching_counterparty() {
        let mut fx = created(OperationType::Sale);
        assert!(fx.confirm(client()).unwrap_err().is_validation());

        fx.add(input(dec!(1), dec!(10), dec!(0))).unwrap();
        let err = fx.confirm(SubjectRoles::of([SubjectRole::Supplier])).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(fx.order.status(), OrderStatus::Draft);

        fx.confirm(client()).unwrap();
        assert_eq!(fx.order.status(), OrderStatus::Confirmed);
    }

    #[test]
    fn confirmed_orders_freeze_lines() {
        let mut fx = created(OperationType::Sale);
        fx.add(input(dec!(1), dec!(10), dec!(0))).unwrap();
        fx.confirm(client()).unwrap();

        match fx.add(input(dec!(1), dec!(10), dec!(0))).unwrap_err() {
            DomainError::InvariantViolation(msg) if msg.contains("frozen") => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn second_fulfilment_is_a_conflict() {
        let mut fx = created(OperationType::Sale);
        fx.add(input(dec!(20), dec!(10), dec!(0))).unwrap();
        fx.confirm(client()).unwrap();
        fx.fulfil().unwrap();

        let err = fx.fulfil().unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        assert_eq!(fx.order.status(), OrderStatus::Fulfilled);
    }

    #[test]
    fn purchase_orders_are_received_not_fulfilled() {
        let mut fx = created(OperationType::Purchase);
        fx.add(input(dec!(1), dec!(10), dec!(0))).unwrap();
        fx.confirm(SubjectRoles::of([SubjectRole::Supplier])).unwrap();
        assert!(matches!(fx.fulfil().unwrap_err(), DomainError::InvariantViolation(_)));

        let order_id = fx.order.id_typed();
        execute(
            &mut fx.order,
            &OrderCommand::MarkReceived(MarkReceived {
                tenant_id: fx.tenant_id,
                order_id,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        assert_eq!(fx.order.status(), OrderStatus::Received);
    }

    #[test]
    fn invoicing_once_per_family() {
        let mut fx = created(OperationType::Sale);
        fx.add(input(dec!(1), dec!(10), dec!(0))).unwrap();
        fx.confirm(client()).unwrap();
        assert!(matches!(
            fx.invoice("invoice.sale").unwrap_err(),
            DomainError::InvariantViolation(_)
        ));

        fx.fulfil().unwrap();
        fx.invoice("invoice.sale").unwrap();
        assert_eq!(fx.order.status(), OrderStatus::Invoiced);
        assert!(matches!(fx.invoice("invoice.sale").unwrap_err(), DomainError::Conflict(_)));

        fx.invoice("delivery_note.sale").unwrap();
        assert_eq!(fx.order.invoices().len(), 2);
    }

    #[test]
    fn cancellation_rules() {
        let mut draft = created(OperationType::Sale);
        match &draft.cancel().unwrap()[0] {
            OrderEvent::OrderCancelled(e) => assert!(!e.compensated),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(draft.cancel().unwrap_err(), DomainError::Conflict(_)));

        let mut fulfilled = created(OperationType::Sale);
        fulfilled.add(input(dec!(1), dec!(10), dec!(0))).unwrap();
        fulfilled.confirm(client()).unwrap();
        fulfilled.fulfil().unwrap();
        match &fulfilled.cancel().unwrap()[0] {
            OrderEvent::OrderCancelled(e) => {
                assert!(e.compensated);
                assert_eq!(e.previous_status, OrderStatus::Fulfilled);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let mut invoiced = created(OperationType::Sale);
        invoiced.add(input(dec!(1), dec!(10), dec!(0))).unwrap();
        invoiced.confirm(client()).unwrap();
        invoiced.fulfil().unwrap();
        invoiced.invoice("invoice.sale").unwrap();
        assert!(invoiced.cancel().is_err());
    }

    #[test]
    fn commands_for_other_tenants_are_rejected() {
        let mut fx = created(OperationType::Sale);
        fx.tenant_id = TenantId::new();
        assert!(fx.add(input(dec!(1), dec!(1), dec!(0))).is_err());
        assert!(fx.order.lines().is_empty());
    }

    #[test]
    fn line_warehouse_falls_back_to_order_default() {
        let mut fx = created(OperationType::Sale);
        let own = WarehouseId::new();
        let mut with_own = input(dec!(1), dec!(1), dec!(0));
        with_own.warehouse_id = Some(own);
        fx.add(with_own).unwrap();
        fx.add(input(dec!(1), dec!(1), dec!(0))).unwrap();

        let lines = fx.order.lines();
        assert_eq!(fx.order.line_warehouse(&lines[0]), Some(own));
        assert_eq!(fx.order.line_warehouse(&lines[1]), fx.order.warehouse_id());
    }
}
