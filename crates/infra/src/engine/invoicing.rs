//! Invoice generation, invoice amendments, payment schedules and delivery notes.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, instrument};

use gestio_auth::{Action, Principal, Resource};
use gestio_causali::{CausaleFamily, DocumentType};
use gestio_core::{execute, AggregateRoot, DomainError, OperationType, TenantId};
use gestio_events::{EventBus, EventEnvelope};
use gestio_invoicing::{
    generate_schedule, lines_from_order, AddInvoiceLine, DeliveryNote, DeliveryNoteId, Invoice, InvoiceCommand,
    InvoiceId, IssueDeliveryNote, IssueInvoice, PaymentMethod, RemoveInvoiceLine, ScheduleEntry, UpdateInvoiceLine,
};
use gestio_orders::{AppliedVat, LineInput, MarkInvoiced, OrderCommand, OrderId};
use gestio_parties::{SubjectId, SubjectRole};

use super::{Engine, EngineResult, DELIVERY_NOTE_AGGREGATE, INVOICE_AGGREGATE, ORDER_AGGREGATE};
use crate::store::{DeliveryIssue, DocumentGuard, EngineStore, InvoiceIssue};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRequest {
    pub order_id: OrderId,
    pub causale_code: String,
    pub date: NaiveDate,
    /// Overrides the order's and the subject's payment method.
    #[serde(default)]
    pub payment_method: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedInvoice {
    pub invoice: Invoice,
    pub schedule: Vec<ScheduleEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryNoteRequest {
    pub order_id: OrderId,
    pub causale_code: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub carrier_id: Option<SubjectId>,
}

impl<S, B> Engine<S, B>
where
    S: EngineStore + ?Sized,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Invoice a fulfilled or received order.
    ///
    /// Lines are copied from the order with VAT re-resolved from the current
    /// configuration; the invoice, its payment schedule and the order's
    /// `invoiced` transition commit together, once per causale family.
    #[instrument(
        skip(self, principal, request),
        fields(
            tenant_id = %principal.tenant_id(),
            order_id = %request.order_id,
            causale = %request.causale_code,
            invoice_id
        ),
        err
    )]
    pub async fn generate_invoice(&self, principal: &Principal, request: InvoiceRequest) -> EngineResult<IssuedInvoice> {
        let tenant_id = self.gate(principal, Resource::Invoices, Action::Write)?;
        let original = self.load_order(tenant_id, request.order_id).await?;

        let registry = self.registry(tenant_id).await?;
        let causale = registry.document(&request.causale_code)?;
        causale.ensure_kind(DocumentType::Invoice)?;
        if causale.operation != original.operation() {
            return Err(DomainError::field(
                "causale",
                format!(
                    "causale '{}' is for {} documents, the order is a {}",
                    causale.code,
                    causale.operation.as_str(),
                    original.operation().as_str()
                ),
            )
            .into());
        }
        let family = causale.family();
        if original.has_document_in(&family) {
            return Err(DomainError::conflict(format!("order is already invoiced under '{family}'")).into());
        }
        let sequence = causale.sequence_key()?;
        let causale_code = causale.code.clone();

        let subject_id = original
            .subject_id()
            .ok_or_else(|| DomainError::invariant("order has no counterparty"))?;
        let subject = self
            .store
            .subject(tenant_id, subject_id)
            .await?
            .ok_or_else(|| DomainError::field("subject", format!("unknown subject {subject_id}")))?;
        let vat = self
            .vat_context(
                tenant_id,
                subject.default_vat_code.clone(),
                original.lines().iter().map(|l| l.product_id).collect::<Vec<_>>(),
            )
            .await?;
        let lines = lines_from_order(&original, &vat)?;

        let method_code = request
            .payment_method
            .clone()
            .or_else(|| original.payment_method().map(str::to_string))
            .or_else(|| subject.payment_method.clone());
        let method = match method_code.as_deref() {
            Some(code) => Some(self.payment_method_or_fail(tenant_id, code).await?),
            None => None,
        };

        // The order transition is decided before a number is taken.
        let invoice_id = InvoiceId::new();
        let at = self.now();
        let mut order = original.clone();
        let order_events = execute(
            &mut order,
            &OrderCommand::MarkInvoiced(MarkInvoiced {
                tenant_id,
                order_id: request.order_id,
                family: family.clone(),
                document_id: invoice_id.0,
                occurred_at: at,
            }),
        )?;

        let mut attempt = 0;
        loop {
            let number = self.next_number(tenant_id, &sequence, request.date.year()).await?;
            let mut invoice = Invoice::empty(invoice_id);
            let invoice_events = execute(
                &mut invoice,
                &InvoiceCommand::IssueInvoice(IssueInvoice {
                    tenant_id,
                    invoice_id,
                    causale_code: causale_code.clone(),
                    family: family.clone(),
                    operation: original.operation(),
                    number,
                    date: request.date,
                    subject_id,
                    source_order: Some(request.order_id),
                    payment_method: method.as_ref().map(|m| m.code.clone()),
                    lines: lines.clone(),
                    occurred_at: at,
                }),
            )?;
            let schedule = generate_schedule(invoice_id, invoice.total(), request.date, method.as_ref())?;

            let issue = InvoiceIssue {
                invoice: invoice.clone(),
                schedule: schedule.clone(),
                order: order.clone(),
                expected_order_version: original.version(),
                guard: DocumentGuard {
                    order_id: request.order_id,
                    family: family.clone(),
                },
            };
            match self.store.insert_invoice(issue).await {
                Ok(()) => {
                    tracing::Span::current().record("invoice_id", tracing::field::display(invoice_id));
                    self.publish_applied(tenant_id, invoice_id.0, INVOICE_AGGREGATE, invoice.version(), &invoice_events);
                    self.publish_applied(tenant_id, request.order_id.0, ORDER_AGGREGATE, order.version(), &order_events);
                    info!(total = %invoice.total(), installments = schedule.len(), "invoice generated");
                    return Ok(IssuedInvoice { invoice, schedule });
                }
                Err(err) => self.retry_numbering(&mut attempt, err)?,
            }
        }
    }

    #[instrument(skip(self, principal), fields(tenant_id = %principal.tenant_id(), invoice_id = %invoice_id), err)]
    pub async fn invoice(&self, principal: &Principal, invoice_id: InvoiceId) -> EngineResult<Invoice> {
        let tenant_id = self.gate(principal, Resource::Invoices, Action::Read)?;
        self.load_invoice(tenant_id, invoice_id).await
    }

    #[instrument(skip(self, principal), fields(tenant_id = %principal.tenant_id(), invoice_id = %invoice_id), err)]
    pub async fn payment_schedule(&self, principal: &Principal, invoice_id: InvoiceId) -> EngineResult<Vec<ScheduleEntry>> {
        let tenant_id = self.gate(principal, Resource::Schedules, Action::Read)?;
        self.load_invoice(tenant_id, invoice_id).await?;
        Ok(self.store.schedule(tenant_id, invoice_id).await?)
    }

    #[instrument(skip(self, principal, line), fields(tenant_id = %principal.tenant_id(), invoice_id = %invoice_id), err)]
    pub async fn add_invoice_line(&self, principal: &Principal, invoice_id: InvoiceId, line: LineInput) -> EngineResult<IssuedInvoice> {
        let tenant_id = self.gate(principal, Resource::Invoices, Action::Write)?;
        let invoice = self.load_invoice(tenant_id, invoice_id).await?;
        let vat = self.invoice_line_vat(tenant_id, &invoice, &line).await?;
        let command = InvoiceCommand::AddLine(AddInvoiceLine {
            tenant_id,
            invoice_id,
            line,
            vat,
            occurred_at: self.now(),
        });
        self.amend_invoice(tenant_id, invoice, command).await
    }

    #[instrument(skip(self, principal, line), fields(tenant_id = %principal.tenant_id(), invoice_id = %invoice_id), err)]
    pub async fn update_invoice_line(
        &self,
        principal: &Principal,
        invoice_id: InvoiceId,
        line_no: u32,
        line: LineInput,
    ) -> EngineResult<IssuedInvoice> {
        let tenant_id = self.gate(principal, Resource::Invoices, Action::Write)?;
        let invoice = self.load_invoice(tenant_id, invoice_id).await?;
        let vat = self.invoice_line_vat(tenant_id, &invoice, &line).await?;
        let command = InvoiceCommand::UpdateLine(UpdateInvoiceLine {
            tenant_id,
            invoice_id,
            line_no,
            line,
            vat,
            occurred_at: self.now(),
        });
        self.amend_invoice(tenant_id, invoice, command).await
    }

    #[instrument(skip(self, principal), fields(tenant_id = %principal.tenant_id(), invoice_id = %invoice_id), err)]
    pub async fn remove_invoice_line(&self, principal: &Principal, invoice_id: InvoiceId, line_no: u32) -> EngineResult<IssuedInvoice> {
        let tenant_id = self.gate(principal, Resource::Invoices, Action::Write)?;
        let invoice = self.load_invoice(tenant_id, invoice_id).await?;
        let command = InvoiceCommand::RemoveLine(RemoveInvoiceLine {
            tenant_id,
            invoice_id,
            line_no,
            occurred_at: self.now(),
        });
        self.amend_invoice(tenant_id, invoice, command).await
    }

    /// Issue the delivery note (DDT) of a fulfilled sale order; quantities
    /// only, at most one per order.
    #[instrument(
        skip(self, principal, request),
        fields(tenant_id = %principal.tenant_id(), order_id = %request.order_id, note_id),
        err
    )]
    pub async fn issue_delivery_note(&self, principal: &Principal, request: DeliveryNoteRequest) -> EngineResult<DeliveryNote> {
        let tenant_id = self.gate(principal, Resource::Orders, Action::Write)?;
        let order = self.load_order(tenant_id, request.order_id).await?;

        let registry = self.registry(tenant_id).await?;
        let causale = registry.document(&request.causale_code)?;
        causale.ensure_kind(DocumentType::DeliveryNote)?;
        let sequence = causale.sequence_key()?;
        let causale_code = causale.code.clone();

        DeliveryNote::ensure_deliverable(tenant_id, &order)?;
        if self.store.delivery_note_for_order(tenant_id, request.order_id).await?.is_some() {
            return Err(DomainError::conflict(format!("order {} already has a delivery note", request.order_id)).into());
        }
        if let Some(carrier_id) = request.carrier_id {
            let carrier = self
                .store
                .subject(tenant_id, carrier_id)
                .await?
                .ok_or_else(|| DomainError::field("carrier", format!("unknown subject {carrier_id}")))?;
            if !carrier.roles.contains(SubjectRole::Carrier) {
                return Err(DomainError::field("carrier", format!("subject '{}' is not a carrier", carrier.name)).into());
            }
        }

        let mut attempt = 0;
        loop {
            let number = self.next_number(tenant_id, &sequence, request.date.year()).await?;
            let note = DeliveryNote::from_order(
                IssueDeliveryNote {
                    tenant_id,
                    note_id: DeliveryNoteId::new(),
                    causale_code: causale_code.clone(),
                    number,
                    date: request.date,
                    carrier_id: request.carrier_id,
                },
                &order,
            )?;
            let issue = DeliveryIssue {
                note: note.clone(),
                guard: DocumentGuard {
                    order_id: request.order_id,
                    family: CausaleFamily::of(DocumentType::DeliveryNote, OperationType::Sale),
                },
            };
            match self.store.insert_delivery_note(issue).await {
                Ok(()) => {
                    tracing::Span::current().record("note_id", tracing::field::display(note.id));
                    self.publish(tenant_id, note.id.0, DELIVERY_NOTE_AGGREGATE, 1, &[note.issued_event(self.now())]);
                    info!(number = %note.number, lines = note.lines.len(), "delivery note issued");
                    return Ok(note);
                }
                Err(err) => self.retry_numbering(&mut attempt, err)?,
            }
        }
    }

    #[instrument(skip(self, principal), fields(tenant_id = %principal.tenant_id(), note_id = %note_id), err)]
    pub async fn delivery_note(&self, principal: &Principal, note_id: DeliveryNoteId) -> EngineResult<DeliveryNote> {
        let tenant_id = self.gate(principal, Resource::Orders, Action::Read)?;
        self.store
            .delivery_note(tenant_id, note_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("delivery note {note_id}")).into())
    }

    /// Apply a line amendment and regenerate the schedule in the same unit.
    async fn amend_invoice(&self, tenant_id: TenantId, original: Invoice, command: InvoiceCommand) -> EngineResult<IssuedInvoice> {
        let mut invoice = original.clone();
        let events = execute(&mut invoice, &command)?;

        let method = match invoice.payment_method() {
            Some(code) => self.store.payment_method(tenant_id, code).await?,
            None => None,
        };
        let date = invoice
            .date()
            .ok_or_else(|| DomainError::invariant("invoice has no date"))?;
        let schedule = generate_schedule(invoice.id_typed(), invoice.total(), date, method.as_ref())?;

        self.store
            .save_invoice(&invoice, original.version(), &schedule)
            .await?;
        self.publish_applied(tenant_id, invoice.id_typed().0, INVOICE_AGGREGATE, invoice.version(), &events);
        info!(total = %invoice.total(), installments = schedule.len(), "invoice amended");
        Ok(IssuedInvoice { invoice, schedule })
    }

    async fn invoice_line_vat(
        &self,
        tenant_id: TenantId,
        invoice: &Invoice,
        line: &LineInput,
    ) -> EngineResult<AppliedVat> {
        self.store
            .product(tenant_id, line.product_id)
            .await?
            .ok_or_else(|| DomainError::field("product", format!("unknown product {}", line.product_id)))?;
        let subject_default = match invoice.subject_id() {
            Some(subject_id) => self
                .store
                .subject(tenant_id, subject_id)
                .await?
                .and_then(|s| s.default_vat_code),
            None => None,
        };
        let vat = self.vat_context(tenant_id, subject_default, [line.product_id]).await?;
        Ok(vat.resolve(line.product_id, line.vat_code.as_deref())?)
    }

    pub(super) async fn payment_method_or_fail(&self, tenant_id: TenantId, code: &str) -> EngineResult<PaymentMethod> {
        self.store
            .payment_method(tenant_id, code)
            .await?
            .ok_or_else(|| DomainError::field("payment_method", format!("unknown payment method '{code}'")).into())
    }
}
