//! Order lifecycle: creation, line edits, confirmation, fulfilment/receipt
//! and cancellation.

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, instrument, warn};

use gestio_auth::{Action, Principal, Resource};
use gestio_causali::{CausaleFamily, CausaleRegistry, DocumentType};
use gestio_core::{execute, round_cost, AggregateRoot, DomainError, OperationType, TenantId};
use gestio_events::{EventBus, EventEnvelope};
use gestio_inventory::{LedgerEntry, PostingRequest, SourceDocument, SourceKind};
use gestio_orders::{
    AddLine, AppliedVat, CancelOrder, ConfirmOrder, CreateOrder, LineInput, MarkFulfilled, MarkReceived, Order, OrderCommand,
    OrderId, RemoveLine, UpdateLine,
};
use gestio_parties::SubjectId;
use gestio_products::WarehouseId;

use super::{Engine, EngineResult, ORDER_AGGREGATE};
use crate::store::{DocumentGuard, EngineStore, StockTransition};

/// Family guarding the compensation of a cancelled order.
const CANCELLATION_FAMILY: &str = "cancellation";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub causale_code: String,
    pub date: NaiveDate,
    pub subject_id: SubjectId,
    #[serde(default)]
    pub warehouse_id: Option<WarehouseId>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub lines: Vec<LineInput>,
}

/// An order after a transition that moved stock, with the entries posted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTransition {
    pub order: Order,
    pub entries: Vec<LedgerEntry>,
}

impl<S, B> Engine<S, B>
where
    S: EngineStore + ?Sized,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Create a draft order numbered in its causale's sequence, optionally
    /// with its first lines.
    #[instrument(
        skip(self, principal, input),
        fields(tenant_id = %principal.tenant_id(), causale = %input.causale_code, order_id),
        err
    )]
    pub async fn create_order(&self, principal: &Principal, input: NewOrder) -> EngineResult<Order> {
        let tenant_id = self.gate(principal, Resource::Orders, Action::Write)?;
        let registry = self.registry(tenant_id).await?;
        let causale = registry.document(&input.causale_code)?;
        causale.ensure_kind(DocumentType::Order)?;
        let sequence = causale.sequence_key()?;
        let causale_code = causale.code.clone();
        let operation = causale.operation;

        let subject = self
            .store
            .subject(tenant_id, input.subject_id)
            .await?
            .ok_or_else(|| DomainError::field("subject", format!("unknown subject {}", input.subject_id)))?;
        if let Some(warehouse_id) = input.warehouse_id {
            self.postable_warehouse(tenant_id, Some(warehouse_id)).await?;
        }
        let payment_method = match input.payment_method.as_deref() {
            Some(code) => Some(self.payment_method_or_fail(tenant_id, code).await?.code),
            None => None,
        };
        let vat = self
            .vat_context(
                tenant_id,
                subject.default_vat_code.clone(),
                input.lines.iter().map(|l| l.product_id).collect::<Vec<_>>(),
            )
            .await?;
        let applied = input
            .lines
            .iter()
            .map(|line| vat.resolve(line.product_id, line.vat_code.as_deref()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut attempt = 0;
        loop {
            let number = self.next_number(tenant_id, &sequence, input.date.year()).await?;
            let order_id = OrderId::new();
            let at = self.now();
            let mut order = Order::empty(order_id);

            let mut events = execute(
                &mut order,
                &OrderCommand::CreateOrder(CreateOrder {
                    tenant_id,
                    order_id,
                    operation,
                    causale_code: causale_code.clone(),
                    number,
                    date: input.date,
                    subject_id: subject.id,
                    warehouse_id: input.warehouse_id,
                    payment_method: payment_method.clone(),
                    occurred_at: at,
                }),
            )?;
            for (line, vat) in input.lines.iter().zip(&applied) {
                events.extend(execute(
                    &mut order,
                    &OrderCommand::AddLine(AddLine {
                        tenant_id,
                        order_id,
                        line: line.clone(),
                        vat: vat.clone(),
                        occurred_at: at,
                    }),
                )?);
            }

            match self.store.insert_order(&order).await {
                Ok(()) => {
                    tracing::Span::current().record("order_id", tracing::field::display(order_id));
                    self.publish_applied(tenant_id, order_id.0, ORDER_AGGREGATE, order.version(), &events);
                    info!(number = ?order.number().map(|n| n.to_string()), "order created");
                    return Ok(order);
                }
                Err(err) => self.retry_numbering(&mut attempt, err)?,
            }
        }
    }

    #[instrument(skip(self, principal), fields(tenant_id = %principal.tenant_id(), order_id = %order_id), err)]
    pub async fn order(&self, principal: &Principal, order_id: OrderId) -> EngineResult<Order> {
        let tenant_id = self.gate(principal, Resource::Orders, Action::Read)?;
        self.load_order(tenant_id, order_id).await
    }

    #[instrument(skip(self, principal, line), fields(tenant_id = %principal.tenant_id(), order_id = %order_id), err)]
    pub async fn add_order_line(&self, principal: &Principal, order_id: OrderId, line: LineInput) -> EngineResult<Order> {
        let tenant_id = self.gate(principal, Resource::Orders, Action::Write)?;
        let order = self.load_order(tenant_id, order_id).await?;
        let vat = self.line_vat(tenant_id, &order, &line).await?;
        let command = OrderCommand::AddLine(AddLine {
            tenant_id,
            order_id,
            line,
            vat,
            occurred_at: self.now(),
        });
        self.save_order_change(tenant_id, order, command).await
    }

    #[instrument(
        skip(self, principal, line),
        fields(tenant_id = %principal.tenant_id(), order_id = %order_id),
        err
    )]
    pub async fn update_order_line(
        &self,
        principal: &Principal,
        order_id: OrderId,
        line_no: u32,
        line: LineInput,
    ) -> EngineResult<Order> {
        let tenant_id = self.gate(principal, Resource::Orders, Action::Write)?;
        let order = self.load_order(tenant_id, order_id).await?;
        let vat = self.line_vat(tenant_id, &order, &line).await?;
        let command = OrderCommand::UpdateLine(UpdateLine {
            tenant_id,
            order_id,
            line_no,
            line,
            vat,
            occurred_at: self.now(),
        });
        self.save_order_change(tenant_id, order, command).await
    }

    #[instrument(skip(self, principal), fields(tenant_id = %principal.tenant_id(), order_id = %order_id), err)]
    pub async fn remove_order_line(&self, principal: &Principal, order_id: OrderId, line_no: u32) -> EngineResult<Order> {
        let tenant_id = self.gate(principal, Resource::Orders, Action::Write)?;
        let order = self.load_order(tenant_id, order_id).await?;
        let command = OrderCommand::RemoveLine(RemoveLine {
            tenant_id,
            order_id,
            line_no,
            occurred_at: self.now(),
        });
        self.save_order_change(tenant_id, order, command).await
    }

    /// Confirm a draft: it needs lines and a counterparty whose current roles
    /// fit the order's operation.
    #[instrument(skip(self, principal), fields(tenant_id = %principal.tenant_id(), order_id = %order_id), err)]
    pub async fn confirm_order(&self, principal: &Principal, order_id: OrderId) -> EngineResult<Order> {
        let tenant_id = self.gate(principal, Resource::Orders, Action::Write)?;
        let order = self.load_order(tenant_id, order_id).await?;
        let subject_id = order
            .subject_id()
            .ok_or_else(|| DomainError::invariant("order has no counterparty"))?;
        let subject = self
            .store
            .subject(tenant_id, subject_id)
            .await?
            .ok_or_else(|| DomainError::field("subject", format!("unknown subject {subject_id}")))?;
        if !subject.can_transact() {
            return Err(DomainError::field("subject", format!("subject '{}' is not active", subject.name)).into());
        }

        let command = OrderCommand::ConfirmOrder(ConfirmOrder {
            tenant_id,
            order_id,
            counterparty_roles: subject.roles,
            occurred_at: self.now(),
        });
        let order = self.save_order_change(tenant_id, order, command).await?;
        info!("order confirmed");
        Ok(order)
    }

    /// Ship a confirmed sale order: one outbound entry per line, all or
    /// nothing, at most once per order.
    #[instrument(skip(self, principal), fields(tenant_id = %principal.tenant_id(), order_id = %order_id), err)]
    pub async fn fulfill_order(&self, principal: &Principal, order_id: OrderId) -> EngineResult<OrderTransition> {
        let tenant_id = self.gate(principal, Resource::Orders, Action::Write)?;
        let order = self.load_order(tenant_id, order_id).await?;
        let command = OrderCommand::MarkFulfilled(MarkFulfilled {
            tenant_id,
            order_id,
            occurred_at: self.now(),
        });
        self.move_order_stock(tenant_id, order, command).await
    }

    /// Receive the goods of a confirmed purchase order into stock.
    #[instrument(skip(self, principal), fields(tenant_id = %principal.tenant_id(), order_id = %order_id), err)]
    pub async fn receive_order(&self, principal: &Principal, order_id: OrderId) -> EngineResult<OrderTransition> {
        let tenant_id = self.gate(principal, Resource::Orders, Action::Write)?;
        let order = self.load_order(tenant_id, order_id).await?;
        let command = OrderCommand::MarkReceived(MarkReceived {
            tenant_id,
            order_id,
            occurred_at: self.now(),
        });
        self.move_order_stock(tenant_id, order, command).await
    }

    /// Cancel an order. Stock already moved is given back with compensating
    /// entries under each original entry's inverse causale.
    #[instrument(skip(self, principal, reason), fields(tenant_id = %principal.tenant_id(), order_id = %order_id), err)]
    pub async fn cancel_order(
        &self,
        principal: &Principal,
        order_id: OrderId,
        reason: Option<String>,
    ) -> EngineResult<OrderTransition> {
        let tenant_id = self.gate(principal, Resource::Orders, Action::Write)?;
        let original = self.load_order(tenant_id, order_id).await?;
        let compensate = original.status().has_moved_stock();

        let mut order = original.clone();
        let events = execute(
            &mut order,
            &OrderCommand::CancelOrder(CancelOrder {
                tenant_id,
                order_id,
                reason,
                occurred_at: self.now(),
            }),
        )?;

        if !compensate {
            self.store.save_order(&order, original.version()).await?;
            self.publish_applied(tenant_id, order_id.0, ORDER_AGGREGATE, order.version(), &events);
            info!("order cancelled");
            return Ok(OrderTransition {
                order,
                entries: Vec::new(),
            });
        }

        let registry = self.registry(tenant_id).await?;
        let postings = self.compensating_postings(tenant_id, &original, &registry).await?;
        let entries = self
            .store
            .commit_stock_transition(StockTransition {
                order: order.clone(),
                expected_version: original.version(),
                guard: DocumentGuard {
                    order_id,
                    family: CausaleFamily::from_raw(CANCELLATION_FAMILY),
                },
                postings,
                policy: self.config.stock_policy(),
                posted_at: self.now(),
            })
            .await?;

        self.publish_applied(tenant_id, order_id.0, ORDER_AGGREGATE, order.version(), &events);
        self.publish_entries(tenant_id, &entries);
        info!(entries = entries.len(), "order cancelled with compensating entries");
        Ok(OrderTransition { order, entries })
    }

    /// Run a line-level or confirmation command and save under the version check.
    async fn save_order_change(&self, tenant_id: TenantId, original: Order, command: OrderCommand) -> EngineResult<Order> {
        let mut order = original.clone();
        let events = execute(&mut order, &command)?;
        self.store.save_order(&order, original.version()).await?;
        self.publish_applied(tenant_id, order.id_typed().0, ORDER_AGGREGATE, order.version(), &events);
        Ok(order)
    }

    async fn move_order_stock(&self, tenant_id: TenantId, original: Order, command: OrderCommand) -> EngineResult<OrderTransition> {
        let order_id = original.id_typed();
        let mut order = original.clone();
        let events = execute(&mut order, &command).inspect_err(|err| {
            warn!(status = %original.status(), error = %err, "stock transition refused");
        })?;

        let registry = self.registry(tenant_id).await?;
        let effect = registry.movement_for_document(original.causale_code())?;
        let subject_id = original.subject_id();
        let mut postings = Vec::with_capacity(original.lines().len());
        for line in original.lines() {
            self.store
                .product(tenant_id, line.product_id)
                .await?
                .ok_or_else(|| DomainError::not_found(format!("product {}", line.product_id)))?
                .ensure_active()?;
            let warehouse_id = self.postable_warehouse(tenant_id, original.line_warehouse(line)).await?;
            let mut request = PostingRequest::new(line.product_id, warehouse_id, effect.clone(), line.quantity)
                .for_document(SourceDocument::line(SourceKind::Order, order_id.0, line.line_no));
            if original.operation() == OperationType::Purchase {
                request = request.at_cost(round_cost(line.amounts.taxable / line.quantity));
            }
            if let Some(subject_id) = subject_id {
                request = request.with_counterparty(subject_id);
            }
            postings.push(request);
        }

        let entries = self
            .store
            .commit_stock_transition(StockTransition {
                order: order.clone(),
                expected_version: original.version(),
                guard: DocumentGuard {
                    order_id,
                    family: CausaleFamily::fulfillment(original.operation()),
                },
                postings,
                policy: self.config.stock_policy(),
                posted_at: self.now(),
            })
            .await
            .inspect_err(|err| warn!(error = %err, "stock transition not committed"))?;

        self.publish_applied(tenant_id, order_id.0, ORDER_AGGREGATE, order.version(), &events);
        self.publish_entries(tenant_id, &entries);
        info!(status = %order.status(), entries = entries.len(), "order stock moved");
        Ok(OrderTransition { order, entries })
    }

    /// One correction per entry the order posted and nobody reversed yet.
    async fn compensating_postings(
        &self,
        tenant_id: TenantId,
        order: &Order,
        registry: &CausaleRegistry,
    ) -> EngineResult<Vec<PostingRequest>> {
        let order_ref = order.id_typed().0;
        let products: BTreeSet<_> = order.lines().iter().map(|l| l.product_id).collect();

        let mut postings = Vec::new();
        for product_id in products {
            let entries = self.store.entries(tenant_id, product_id).await?;
            let reversed: BTreeSet<_> = entries.iter().filter_map(|e| e.reverses).collect();
            for entry in entries.iter().filter(|e| {
                e.reverses.is_none()
                    && !reversed.contains(&e.id)
                    && e.source.as_ref().is_some_and(|s| s.kind == SourceKind::Order && s.document_id == order_ref)
            }) {
                let inverse = registry.resolve_inverse(&entry.causale_code, tenant_id)?;
                let mut request = PostingRequest::new(entry.product_id, entry.warehouse_id, inverse, entry.quantity.abs())
                    .at_cost(entry.unit_cost);
                request.source = entry.source.clone();
                request.counterparty = entry.counterparty;
                request.reverses = Some(entry.id);
                postings.push(request);
            }
        }
        Ok(postings)
    }

    async fn line_vat(&self, tenant_id: TenantId, order: &Order, line: &LineInput) -> EngineResult<AppliedVat> {
        let product = self
            .store
            .product(tenant_id, line.product_id)
            .await?
            .ok_or_else(|| DomainError::field("product", format!("unknown product {}", line.product_id)))?;
        product.ensure_active()?;
        if let Some(warehouse_id) = line.warehouse_id {
            self.postable_warehouse(tenant_id, Some(warehouse_id)).await?;
        }
        let subject_default = match order.subject_id() {
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
}
