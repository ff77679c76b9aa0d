use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use gestio_causali::CausaleFamily;
use gestio_core::{domain_id, Aggregate, AggregateRoot, DocumentNumber, DomainError, OperationType, TenantId};
use gestio_events::Event;
use gestio_orders::{line_amounts, AppliedVat, DocumentTotals, LineAmounts, LineDiscount, LineInput, Order, OrderId, VatContext};
use gestio_parties::SubjectId;
use gestio_products::ProductId;

domain_id!(
    /// Invoice identifier (tenant-scoped via `tenant_id` fields in events/commands).
    InvoiceId
);

/// Invoice line. Amounts are always derived from quantity, price, discount
/// and the VAT rate in force when the line was (re)priced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub line_no: u32,
    /// Order line this one was cloned from.
    pub source_line: Option<u32>,
    pub product_id: ProductId,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub discount: LineDiscount,
    pub vat_code_override: Option<String>,
    pub vat: AppliedVat,
    pub amounts: LineAmounts,
}

impl InvoiceLine {
    pub fn price(line_no: u32, input: &LineInput, vat: &AppliedVat) -> Result<Self, DomainError> {
        let amounts = line_amounts(input.quantity, input.unit_price, input.discount, vat.rate)?;
        Ok(Self {
            line_no,
            source_line: None,
            product_id: input.product_id,
            quantity: input.quantity,
            unit_price: input.unit_price,
            discount: input.discount,
            vat_code_override: input.vat_code.clone(),
            vat: vat.clone(),
            amounts,
        })
    }
}

/// Clone the order's lines into invoice lines, re-resolving each line's VAT
/// against the current configuration.
pub fn lines_from_order(order: &Order, vat: &VatContext) -> Result<Vec<InvoiceLine>, DomainError> {
    order
        .lines()
        .iter()
        .enumerate()
        .map(|(idx, line)| {
            let applied = vat.resolve(line.product_id, line.vat_code_override.as_deref())?;
            let input = LineInput {
                product_id: line.product_id,
                warehouse_id: line.warehouse_id,
                quantity: line.quantity,
                unit_price: line.unit_price,
                discount: line.discount,
                vat_code: line.vat_code_override.clone(),
            };
            let mut priced = InvoiceLine::price(idx as u32 + 1, &input, &applied)?;
            priced.source_line = Some(line.line_no);
            Ok(priced)
        })
        .collect()
}

/// Aggregate root: Invoice (fiscal document).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    id: InvoiceId,
    tenant_id: Option<TenantId>,
    causale_code: String,
    family: Option<CausaleFamily>,
    operation: OperationType,
    number: Option<DocumentNumber>,
    date: Option<NaiveDate>,
    subject_id: Option<SubjectId>,
    source_order: Option<OrderId>,
    payment_method: Option<String>,
    lines: Vec<InvoiceLine>,
    totals: DocumentTotals,
    version: u64,
    created: bool,
}

impl Invoice {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: InvoiceId) -> Self {
        Self {
            id,
            tenant_id: None,
            causale_code: String::new(),
            family: None,
            operation: OperationType::Sale,
            number: None,
            date: None,
            subject_id: None,
            source_order: None,
            payment_method: None,
            lines: Vec::new(),
            totals: DocumentTotals::default(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> InvoiceId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn causale_code(&self) -> &str {
        &self.causale_code
    }

    pub fn family(&self) -> Option<&CausaleFamily> {
        self.family.as_ref()
    }

    pub fn operation(&self) -> OperationType {
        self.operation
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

    /// The order this invoice was generated from.
    pub fn source_order(&self) -> Option<OrderId> {
        self.source_order
    }

    pub fn payment_method(&self) -> Option<&str> {
        self.payment_method.as_deref()
    }

    pub fn lines(&self) -> &[InvoiceLine] {
        &self.lines
    }

    pub fn line(&self, line_no: u32) -> Option<&InvoiceLine> {
        self.lines.iter().find(|l| l.line_no == line_no)
    }

    pub fn totals(&self) -> &DocumentTotals {
        &self.totals
    }

    pub fn total(&self) -> Decimal {
        self.totals.total
    }
}

impl AggregateRoot for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: IssueInvoice. Lines are already priced (see [`lines_from_order`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueInvoice {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub causale_code: String,
    pub family: CausaleFamily,
    pub operation: OperationType,
    pub number: DocumentNumber,
    pub date: NaiveDate,
    pub subject_id: SubjectId,
    pub source_order: Option<OrderId>,
    pub payment_method: Option<String>,
    pub lines: Vec<InvoiceLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddInvoiceLine {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub line: LineInput,
    pub vat: AppliedVat,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateInvoiceLine {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub line_no: u32,
    pub line: LineInput,
    pub vat: AppliedVat,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveInvoiceLine {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub line_no: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceCommand {
    IssueInvoice(IssueInvoice),
    AddLine(AddInvoiceLine),
    UpdateLine(UpdateInvoiceLine),
    RemoveLine(RemoveInvoiceLine),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceIssued {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub causale_code: String,
    pub family: CausaleFamily,
    pub operation: OperationType,
    pub number: DocumentNumber,
    pub date: NaiveDate,
    pub subject_id: SubjectId,
    pub source_order: Option<OrderId>,
    pub payment_method: Option<String>,
    pub lines: Vec<InvoiceLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", content = "line", rename_all = "snake_case")]
pub enum AmendedLine {
    Added(InvoiceLine),
    Updated(InvoiceLine),
    Removed(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAmended {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub amendment: AmendedLine,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    InvoiceIssued(InvoiceIssued),
    LineAmended(LineAmended),
}

impl Event for InvoiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::InvoiceIssued(_) => "invoicing.invoice.issued",
            InvoiceEvent::LineAmended(e) => match e.amendment {
                AmendedLine::Added(_) => "invoicing.invoice.line_added",
                AmendedLine::Updated(_) => "invoicing.invoice.line_updated",
                AmendedLine::Removed(_) => "invoicing.invoice.line_removed",
            },
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvoiceEvent::InvoiceIssued(e) => e.occurred_at,
            InvoiceEvent::LineAmended(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Invoice {
    type Command = InvoiceCommand;
    type Event = InvoiceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InvoiceEvent::InvoiceIssued(e) => {
                self.id = e.invoice_id;
                self.tenant_id = Some(e.tenant_id);
                self.causale_code = e.causale_code.clone();
                self.family = Some(e.family.clone());
                self.operation = e.operation;
                self.number = Some(e.number.clone());
                self.date = Some(e.date);
                self.subject_id = Some(e.subject_id);
                self.source_order = e.source_order;
                self.payment_method = e.payment_method.clone();
                self.lines = e.lines.clone();
                self.created = true;
            }
            InvoiceEvent::LineAmended(e) => match &e.amendment {
                AmendedLine::Added(line) => self.lines.push(line.clone()),
                AmendedLine::Updated(line) => {
                    if let Some(existing) = self.lines.iter_mut().find(|l| l.line_no == line.line_no) {
                        *existing = line.clone();
                    }
                }
                AmendedLine::Removed(line_no) => self.lines.retain(|l| l.line_no != *line_no),
            },
        }

        self.totals = DocumentTotals::from_lines(self.lines.iter().map(|l| &l.amounts));
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InvoiceCommand::IssueInvoice(cmd) => {
                if self.created {
                    return Err(DomainError::conflict("invoice already exists"));
                }
                if cmd.lines.is_empty() {
                    return Err(DomainError::field("lines", "an invoice needs at least one line"));
                }
                Ok(vec![InvoiceEvent::InvoiceIssued(InvoiceIssued {
                    tenant_id: cmd.tenant_id,
                    invoice_id: cmd.invoice_id,
                    causale_code: cmd.causale_code.clone(),
                    family: cmd.family.clone(),
                    operation: cmd.operation,
                    number: cmd.number.clone(),
                    date: cmd.date,
                    subject_id: cmd.subject_id,
                    source_order: cmd.source_order,
                    payment_method: cmd.payment_method.clone(),
                    lines: cmd.lines.clone(),
                    occurred_at: cmd.occurred_at,
                })])
            }
            InvoiceCommand::AddLine(cmd) => {
                self.ensure_target(cmd.tenant_id, cmd.invoice_id)?;
                let next = self.lines.iter().map(|l| l.line_no).max().unwrap_or(0) + 1;
                let line = InvoiceLine::price(next, &cmd.line, &cmd.vat)?;
                Ok(vec![self.amended(cmd.tenant_id, AmendedLine::Added(line), cmd.occurred_at)])
            }
            InvoiceCommand::UpdateLine(cmd) => {
                self.ensure_target(cmd.tenant_id, cmd.invoice_id)?;
                let existing = self
                    .line(cmd.line_no)
                    .ok_or_else(|| DomainError::not_found(format!("invoice line {}", cmd.line_no)))?;
                let mut line = InvoiceLine::price(cmd.line_no, &cmd.line, &cmd.vat)?;
                line.source_line = existing.source_line;
                Ok(vec![self.amended(cmd.tenant_id, AmendedLine::Updated(line), cmd.occurred_at)])
            }
            InvoiceCommand::RemoveLine(cmd) => {
                self.ensure_target(cmd.tenant_id, cmd.invoice_id)?;
                if self.line(cmd.line_no).is_none() {
                    return Err(DomainError::not_found(format!("invoice line {}", cmd.line_no)));
                }
                if self.lines.len() == 1 {
                    return Err(DomainError::invariant("cannot remove the last line of an invoice"));
                }
                Ok(vec![self.amended(cmd.tenant_id, AmendedLine::Removed(cmd.line_no), cmd.occurred_at)])
            }
        }
    }
}

impl Invoice {
    fn ensure_target(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("invoice {invoice_id}")));
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != invoice_id {
            return Err(DomainError::invariant("invoice_id mismatch"));
        }
        Ok(())
    }

    fn amended(&self, tenant_id: TenantId, amendment: AmendedLine, occurred_at: DateTime<Utc>) -> InvoiceEvent {
        InvoiceEvent::LineAmended(LineAmended {
            tenant_id,
            invoice_id: self.id,
            amendment,
            occurred_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gestio_core::{execute, SequenceKey};
    use gestio_orders::{AddLine, CreateOrder, OrderCommand};
    use gestio_products::VatCode;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn vat(code: &str, rate: Decimal) -> AppliedVat {
        AppliedVat { code: code.into(), rate }
    }

    fn input(
        product_id: ProductId,
        quantity: Decimal,
        unit_price: Decimal,
        discount_pct: Decimal,
    ) -> LineInput {
        LineInput {
            product_id,
            warehouse_id: None,
            quantity,
            unit_price,
            discount: LineDiscount::percent(discount_pct),
            vat_code: None,
        }
    }

    fn issue(tenant_id: TenantId, lines: Vec<InvoiceLine>) -> Invoice {
        let invoice_id = InvoiceId::new();
        let mut invoice = Invoice::empty(invoice_id);
        execute(
            &mut invoice,
            &InvoiceCommand::IssueInvoice(IssueInvoice {
                tenant_id,
                invoice_id,
                causale_code: "FV".into(),
                family: CausaleFamily::from_raw("invoice.sale"),
                operation: OperationType::Sale,
                number: DocumentNumber::new(SequenceKey::new("invoice.sale").unwrap(), 2026, 7)
                    .unwrap(),
                date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
                subject_id: SubjectId::new(),
                source_order: None,
                payment_method: None,
                lines,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        invoice
    }

    fn order_with_lines(tenant_id: TenantId, product_id: ProductId) -> Order {
        let order_id = OrderId::new();
        let mut order = Order::empty(order_id);
        execute(
            &mut order,
            &OrderCommand::CreateOrder(CreateOrder {
                tenant_id,
                order_id,
                operation: OperationType::Sale,
                causale_code: "OC".into(),
                number: DocumentNumber::new(SequenceKey::new("order.sale").unwrap(), 2026, 1)
                    .unwrap(),
                date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
                subject_id: SubjectId::new(),
                warehouse_id: None,
                payment_method: None,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        for line in [
            input(product_id, dec!(5), dec!(10), dec!(10)),
            input(product_id, dec!(3), dec!(20), dec!(0)),
        ] {
            execute(
                &mut order,
                &OrderCommand::AddLine(AddLine {
                    tenant_id,
                    order_id,
                    line,
                    // rate at order time; invoicing re-resolves it
                    vat: vat("10", dec!(10)),
                    occurred_at: Utc::now(),
                }),
            )
            .unwrap();
        }
        order
    }

    #[test]
    fn invoice_from_order_re_resolves_vat() {
        let tenant = TenantId::new();
        let product = ProductId::new();
        let order = order_with_lines(tenant, product);
        let codes = [VatCode::new(tenant, "22", "Ordinaria", dec!(22)).unwrap()];
        let ctx = VatContext::new(Some("22".into())).with_rates(codes.iter());

        let lines = lines_from_order(&order, &ctx).unwrap();
        assert_eq!(lines[0].source_line, Some(1));
        assert_eq!(lines[1].vat.rate, dec!(22));

        let invoice = issue(tenant, lines);
        assert_eq!(invoice.totals().taxable, dec!(105));
        assert_eq!(invoice.totals().vat, dec!(23.10));
        assert_eq!(invoice.total(), dec!(128.10));
    }

    #[test]
    fn unknown_vat_code_blocks_invoicing() {
        let tenant = TenantId::new();
        let order = order_with_lines(tenant, ProductId::new());
        let ctx = VatContext::new(Some("99".into()));

        let err = lines_from_order(&order, &ctx).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn amendments_recompute_totals() {
        let tenant = TenantId::new();
        let product = ProductId::new();
        let line_input = input(product, dec!(1), dec!(100), dec!(0));
        let first = InvoiceLine::price(1, &line_input, &vat("22", dec!(22))).unwrap();
        let mut invoice = issue(tenant, vec![first]);
        let invoice_id = invoice.id_typed();

        execute(
            &mut invoice,
            &InvoiceCommand::AddLine(AddInvoiceLine {
                tenant_id: tenant,
                invoice_id,
                line: input(product, dec!(2), dec!(50), dec!(0)),
                vat: vat("22", dec!(22)),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        assert_eq!(invoice.total(), dec!(244));

        execute(
            &mut invoice,
            &InvoiceCommand::UpdateLine(UpdateInvoiceLine {
                tenant_id: tenant,
                invoice_id,
                line_no: 2,
                line: input(product, dec!(1), dec!(50), dec!(0)),
                vat: vat("4", dec!(4)),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        assert_eq!(invoice.total(), dec!(174));

        execute(
            &mut invoice,
            &InvoiceCommand::RemoveLine(RemoveInvoiceLine {
                tenant_id: tenant,
                invoice_id,
                line_no: 1,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        assert_eq!(invoice.total(), dec!(52));

        let err = execute(
            &mut invoice,
            &InvoiceCommand::RemoveLine(RemoveInvoiceLine {
                tenant_id: tenant,
                invoice_id,
                line_no: 2,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap_err();
        match err {
            DomainError::InvariantViolation(msg) if msg.contains("last line") => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn foreign_tenant_cannot_amend() {
        let tenant = TenantId::new();
        let line_input = input(ProductId::new(), dec!(1), dec!(1), dec!(0));
        let line = InvoiceLine::price(1, &line_input, &vat("22", dec!(22))).unwrap();
        let invoice = issue(tenant, vec![line]);

        let cmd = InvoiceCommand::RemoveLine(RemoveInvoiceLine {
            tenant_id: TenantId::new(),
            invoice_id: invoice.id_typed(),
            line_no: 1,
            occurred_at: Utc::now(),
        });
        assert!(invoice.handle(&cmd).is_err());
    }

    proptest! {
        #[test]
        fn header_matches_sum_of_lines_after_any_amendment(
            prices in proptest::collection::vec((1u32..50, 1u32..100_000, 0u32..50), 1..8),
            remove in proptest::collection::vec(any::<bool>(), 8),
        ) {
            let tenant = TenantId::new();
            let product = ProductId::new();
            let lines: Vec<InvoiceLine> = prices
                .iter()
                .enumerate()
                .map(|(i, (q, p, d))| {
                    InvoiceLine::price(
                        i as u32 + 1,
                        &input(
                            product,
                            Decimal::from(*q),
                            Decimal::new(i64::from(*p), 2),
                            Decimal::from(*d),
                        ),
                        &vat("22", dec!(22)),
                    )
                    .unwrap()
                })
                .collect();
            let mut invoice = issue(tenant, lines);
            let invoice_id = invoice.id_typed();

            for (line_no, drop) in (1..=prices.len() as u32).zip(remove) {
                if drop {
                    let _ = execute(
                        &mut invoice,
                        &InvoiceCommand::RemoveLine(RemoveInvoiceLine {
                            tenant_id: tenant,
                            invoice_id,
                            line_no,
                            occurred_at: Utc::now(),
                        }),
                    );
                }
                let sum: Decimal = invoice.lines().iter().map(|l| l.amounts.total).sum();
                prop_assert_eq!(sum, invoice.total());
            }
        }
    }
}
