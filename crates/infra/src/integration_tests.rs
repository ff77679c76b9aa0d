//! Integration tests for the full engine pipeline against the in-memory store.
//!
//! Tests: principal → Engine → domain aggregates → InMemoryStore → EventBus
//!
//! Verifies:
//! - weighted-average costing and stock snapshots stay reproducible
//! - orders move stock at most once, including under concurrent requests
//! - invoices, schedules and delivery notes derive correctly from orders
//! - tenant isolation and authorization are enforced on every operation

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use gestio_auth::{
    Capabilities, CapabilityMap, Principal, PrincipalId, Resource, Role, TenantMembership,
};
use gestio_core::{DomainError, TenantId};
use gestio_events::{EventBus, InMemoryEventBus};
use gestio_inventory::LedgerEntry;
use gestio_invoicing::InstallmentRule;
use gestio_orders::{LineDiscount, LineInput, Order, OrderStatus};
use gestio_parties::{Subject, SubjectRole, SubjectRoles};
use gestio_products::{Product, ProductId, WarehouseId};

use crate::config::EngineConfig;
use crate::engine::{
    DeliveryNoteRequest, Engine, EngineError, InvoiceRequest, MovementInput, NewOrder, QuickCreate,
    QuickCreated,
};
use crate::store::InMemoryStore;

type TestEngine = Engine<InMemoryStore>;

struct Fixture {
    engine: Arc<TestEngine>,
    tenant: TenantId,
    owner: Principal,
    warehouse: WarehouseId,
    client: gestio_parties::SubjectId,
    supplier: gestio_parties::SubjectId,
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn owner_of(tenant: TenantId) -> Principal {
    Principal::new(PrincipalId::new(), TenantMembership::owner(tenant))
}

fn line(product_id: ProductId, quantity: Decimal, unit_price: Decimal) -> LineInput {
    LineInput {
        product_id,
        warehouse_id: None,
        quantity,
        unit_price,
        discount: LineDiscount::default(),
        vat_code: None,
    }
}

fn domain(err: &EngineError) -> &DomainError {
    err.domain().unwrap_or_else(|| panic!("expected a domain error, got {err:?}"))
}

async fn setup() -> Fixture {
    setup_with(EngineConfig::default()).await
}

async fn setup_with(config: EngineConfig) -> Fixture {
    let store = Arc::new(InMemoryStore::new());
    let engine = Arc::new(Engine::new(store, InMemoryEventBus::new(), config));
    let tenant = TenantId::new();
    let owner = owner_of(tenant);

    engine.seed_default_catalog(&owner).await.unwrap();
    engine
        .quick_create(
            &owner,
            QuickCreate::VatCode {
                code: "22".into(),
                description: "IVA 22%".into(),
                rate: dec!(22),
            },
        )
        .await
        .unwrap();
    let warehouse = match engine
        .quick_create(
            &owner,
            QuickCreate::Warehouse {
                code: "SEDE".into(),
                name: "Magazzino sede".into(),
                primary: true,
            },
        )
        .await
        .unwrap()
    {
        QuickCreated::Warehouse(id) => id,
        other => panic!("expected a warehouse id, got {other:?}"),
    };

    let client =
        Subject::new(tenant, "Rossi S.r.l.", SubjectRoles::of([SubjectRole::Client])).unwrap();
    let client = engine.upsert_subject(&owner, client).await.unwrap().id;
    let supplier =
        Subject::new(tenant, "Bianchi S.p.A.", SubjectRoles::of([SubjectRole::Supplier])).unwrap();
    let supplier = engine.upsert_subject(&owner, supplier).await.unwrap().id;

    Fixture {
        engine,
        tenant,
        owner,
        warehouse,
        client,
        supplier,
    }
}

impl Fixture {
    async fn product(&self, code: &str) -> ProductId {
        let product = Product::new(self.tenant, code, format!("Articolo {code}"), dec!(10))
            .unwrap()
            .with_vat_code("22");
        self.engine.upsert_product(&self.owner, product).await.unwrap().id
    }

    async fn load(
        &self,
        product_id: ProductId,
        quantity: Decimal,
        unit_cost: Decimal,
    ) -> LedgerEntry {
        self.engine
            .post_movement(
                &self.owner,
                MovementInput {
                    product_id,
                    warehouse_id: None,
                    causale_code: "CAR".into(),
                    quantity,
                    unit_cost: Some(unit_cost),
                    source: None,
                    counterparty: None,
                },
            )
            .await
            .unwrap()
    }

    async fn order(
        &self,
        causale: &str,
        subject: gestio_parties::SubjectId,
        lines: Vec<LineInput>,
    ) -> Order {
        self.engine
            .create_order(
                &self.owner,
                NewOrder {
                    causale_code: causale.into(),
                    date: date(2024, 3, 15),
                    subject_id: subject,
                    warehouse_id: None,
                    payment_method: None,
                    lines,
                },
            )
            .await
            .unwrap()
    }

    async fn confirmed_sale(&self, lines: Vec<LineInput>) -> Order {
        let order = self.order("OC", self.client, lines).await;
        self.engine.confirm_order(&self.owner, order.id_typed()).await.unwrap()
    }

    async fn payment_method(&self, code: &str, days: &[u32]) {
        let installments = days
            .iter()
            .map(|&days| InstallmentRule { days, share_pct: None })
            .collect();
        self.engine
            .quick_create(
                &self.owner,
                QuickCreate::PaymentMethod {
                    code: code.into(),
                    description: format!("Rimessa {code}"),
                    installments,
                    end_of_month: false,
                },
            )
            .await
            .unwrap();
    }

    async fn zero_rated_vat(&self) {
        self.engine
            .quick_create(
                &self.owner,
                QuickCreate::VatCode {
                    code: "ES".into(),
                    description: "Esente".into(),
                    rate: Decimal::ZERO,
                },
            )
            .await
            .unwrap();
    }

    fn invoice_request(&self, order: &Order, causale: &str) -> InvoiceRequest {
        InvoiceRequest {
            order_id: order.id_typed(),
            causale_code: causale.into(),
            date: date(2024, 3, 15),
            payment_method: None,
        }
    }
}

#[tokio::test]
async fn two_receipts_average_their_costs() {
    let fx = setup().await;
    let product = fx.product("A100").await;

    fx.load(product, dec!(10), dec!(4.00)).await;
    let second = fx.load(product, dec!(10), dec!(6.00)).await;
    assert_eq!(second.on_hand_after, dec!(20));
    assert_eq!(second.average_cost_after, dec!(5));

    let stock = fx.engine.product_stock(&fx.owner, product).await.unwrap();
    assert_eq!(stock.on_hand, dec!(20));
    assert_eq!(stock.average_cost, dec!(5));
    assert_eq!(fx.engine.verify_stock(&fx.owner, product).await.unwrap(), None);

    let per_warehouse = fx.engine.warehouse_stock(&fx.owner, product).await.unwrap();
    assert_eq!(per_warehouse.len(), 1);
    assert_eq!(per_warehouse[0].warehouse_id, fx.warehouse);
    assert_eq!(per_warehouse[0].quantity, dec!(20));
}

#[tokio::test]
async fn sale_order_totals_carry_into_the_invoice() {
    let fx = setup().await;
    let a = fx.product("A100").await;
    let b = fx.product("B200").await;

    let mut discounted = line(a, dec!(5), dec!(10));
    discounted.discount = LineDiscount::percent(dec!(10));
    let order = fx.confirmed_sale(vec![discounted, line(b, dec!(3), dec!(20))]).await;
    assert_eq!(order.totals().taxable, dec!(105));
    assert_eq!(order.totals().vat, dec!(23.10));
    assert_eq!(order.totals().total, dec!(128.10));

    fx.engine.fulfill_order(&fx.owner, order.id_typed()).await.unwrap();
    let issued = fx
        .engine
        .generate_invoice(&fx.owner, fx.invoice_request(&order, "FV"))
        .await
        .unwrap();
    assert_eq!(issued.invoice.total(), dec!(128.10));
    assert_eq!(issued.invoice.lines().len(), 2);
    assert!(issued.schedule.is_empty());

    let order = fx.engine.order(&fx.owner, order.id_typed()).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Invoiced);

    let err = fx
        .engine
        .generate_invoice(&fx.owner, fx.invoice_request(&order, "FV"))
        .await
        .unwrap_err();
    assert!(matches!(domain(&err), DomainError::Conflict(_)));
}

#[tokio::test]
async fn an_order_is_fulfilled_only_once() {
    let fx = setup().await;
    let product = fx.product("A100").await;
    fx.load(product, dec!(20), dec!(3)).await;

    let order = fx.confirmed_sale(vec![line(product, dec!(20), dec!(9))]).await;
    let transition = fx.engine.fulfill_order(&fx.owner, order.id_typed()).await.unwrap();
    assert_eq!(transition.order.status(), OrderStatus::Fulfilled);
    assert_eq!(transition.entries.len(), 1);
    assert_eq!(transition.entries[0].causale_code, "VEN");
    assert_eq!(transition.entries[0].quantity, dec!(-20));
    assert_eq!(transition.entries[0].counterparty, Some(fx.client));

    let stock = fx.engine.product_stock(&fx.owner, product).await.unwrap();
    assert_eq!(stock.on_hand, Decimal::ZERO);

    let err = fx.engine.fulfill_order(&fx.owner, order.id_typed()).await.unwrap_err();
    assert!(matches!(domain(&err), DomainError::Conflict(_)));
    assert_eq!(fx.engine.ledger_entries(&fx.owner, product).await.unwrap().len(), 2);
}

#[tokio::test]
async fn split_payment_method_schedules_two_installments() {
    let fx = setup().await;
    fx.zero_rated_vat().await;
    fx.payment_method("30/60", &[30, 60]).await;
    let product = fx.product("A100").await;

    let mut order_line = line(product, dec!(10), dec!(100));
    order_line.vat_code = Some("ES".into());
    let order = fx.confirmed_sale(vec![order_line]).await;
    fx.engine.fulfill_order(&fx.owner, order.id_typed()).await.unwrap();

    let mut request = fx.invoice_request(&order, "FV");
    request.payment_method = Some("30/60".into());
    let issued = fx.engine.generate_invoice(&fx.owner, request).await.unwrap();
    assert_eq!(issued.invoice.total(), dec!(1000.00));

    let schedule = &issued.schedule;
    assert_eq!(schedule.len(), 2);
    assert_eq!(schedule[0].amount, dec!(500.00));
    assert_eq!(schedule[1].amount, dec!(500.00));
    assert_eq!(schedule[0].due_date, date(2024, 4, 14));
    assert_eq!(schedule[1].due_date, date(2024, 5, 14));

    let stored = fx
        .engine
        .payment_schedule(&fx.owner, issued.invoice.id_typed())
        .await
        .unwrap();
    assert_eq!(&stored, schedule);
}

#[tokio::test]
async fn category_with_assigned_subjects_cannot_be_deleted() {
    let fx = setup().await;
    let category = match fx
        .engine
        .quick_create(&fx.owner, QuickCreate::SubjectCategory { name: "Dettaglio".into() })
        .await
        .unwrap()
    {
        QuickCreated::SubjectCategory(id) => id,
        other => panic!("expected a category id, got {other:?}"),
    };

    for name in ["Alfa", "Beta", "Gamma"] {
        let mut subject =
            Subject::new(fx.tenant, name, SubjectRoles::of([SubjectRole::Client])).unwrap();
        subject.category_id = Some(category);
        fx.engine.upsert_subject(&fx.owner, subject).await.unwrap();
    }

    let err = fx.engine.delete_subject_category(&fx.owner, category).await.unwrap_err();
    match domain(&err) {
        DomainError::Referential { count, .. } => assert_eq!(*count, 3),
        other => panic!("expected a referential error, got {other:?}"),
    }
    assert_eq!(fx.engine.subject_categories(&fx.owner).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_fulfilments_post_once() {
    let fx = setup().await;
    let product = fx.product("A100").await;
    fx.load(product, dec!(10), dec!(2)).await;
    let order = fx.confirmed_sale(vec![line(product, dec!(4), dec!(5))]).await;
    let order_id = order.id_typed();

    let spawn = |engine: Arc<TestEngine>, principal: Principal| {
        tokio::spawn(async move { engine.fulfill_order(&principal, order_id).await })
    };
    let first = spawn(fx.engine.clone(), fx.owner.clone());
    let second = spawn(fx.engine.clone(), fx.owner.clone());
    let (first, second) = tokio::join!(first, second);
    let outcomes = [first.unwrap(), second.unwrap()];

    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    let err = outcomes.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(matches!(
        domain(err),
        DomainError::Conflict(_) | DomainError::Concurrency(_)
    ));

    let entries = fx.engine.ledger_entries(&fx.owner, product).await.unwrap();
    assert_eq!(entries.iter().filter(|e| e.causale_code == "VEN").count(), 1);
    let stock = fx.engine.product_stock(&fx.owner, product).await.unwrap();
    assert_eq!(stock.on_hand, dec!(6));
}

#[tokio::test]
async fn purchase_receipt_is_costed_at_the_net_line_price() {
    let fx = setup().await;
    let product = fx.product("A100").await;

    let mut purchase_line = line(product, dec!(10), dec!(7.50));
    purchase_line.discount = LineDiscount::percent(dec!(10));
    let order = fx.order("OF", fx.supplier, vec![purchase_line]).await;
    fx.engine.confirm_order(&fx.owner, order.id_typed()).await.unwrap();

    let transition = fx.engine.receive_order(&fx.owner, order.id_typed()).await.unwrap();
    assert_eq!(transition.order.status(), OrderStatus::Received);
    assert_eq!(transition.entries[0].causale_code, "ACQ");
    assert_eq!(transition.entries[0].unit_cost, dec!(6.75));

    let stats = fx.engine.price_statistics(&fx.owner, product).await.unwrap();
    assert_eq!(stats.last_purchase_cost, Some(dec!(6.75)));
    assert_eq!(stats.purchase_count, 1);

    let err = fx
        .engine
        .generate_invoice(&fx.owner, fx.invoice_request(&order, "FV"))
        .await
        .unwrap_err();
    assert!(matches!(domain(&err), DomainError::InvalidField { .. }));
    fx.engine
        .generate_invoice(&fx.owner, fx.invoice_request(&order, "FA"))
        .await
        .unwrap();
}

#[tokio::test]
async fn confirming_needs_a_counterparty_with_the_right_role() {
    let fx = setup().await;
    let product = fx.product("A100").await;
    let order = fx.order("OC", fx.supplier, vec![line(product, dec!(1), dec!(5))]).await;

    let err = fx.engine.confirm_order(&fx.owner, order.id_typed()).await.unwrap_err();
    assert!(matches!(err, EngineError::Domain(_)));
    let order = fx.engine.order(&fx.owner, order.id_typed()).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Draft);
}

#[tokio::test]
async fn line_edits_recompute_draft_totals() {
    let fx = setup().await;
    let product = fx.product("A100").await;
    let order = fx.order("OC", fx.client, vec![line(product, dec!(2), dec!(10))]).await;
    assert_eq!(order.totals().taxable, dec!(20));

    let order = fx
        .engine
        .add_order_line(&fx.owner, order.id_typed(), line(product, dec!(1), dec!(5)))
        .await
        .unwrap();
    assert_eq!(order.totals().taxable, dec!(25));

    let order = fx
        .engine
        .update_order_line(&fx.owner, order.id_typed(), 1, line(product, dec!(3), dec!(10)))
        .await
        .unwrap();
    assert_eq!(order.totals().taxable, dec!(35));

    let order = fx.engine.remove_order_line(&fx.owner, order.id_typed(), 2).await.unwrap();
    assert_eq!(order.lines().len(), 1);
    assert_eq!(order.totals().taxable, dec!(30));
    assert_eq!(order.totals().total, dec!(36.60));
}

#[tokio::test]
async fn cancelling_a_fulfilled_order_posts_compensating_entries() {
    let fx = setup().await;
    let product = fx.product("A100").await;
    fx.load(product, dec!(10), dec!(2)).await;
    let order = fx.confirmed_sale(vec![line(product, dec!(4), dec!(5))]).await;
    fx.engine.fulfill_order(&fx.owner, order.id_typed()).await.unwrap();

    let transition = fx
        .engine
        .cancel_order(&fx.owner, order.id_typed(), Some("customer withdrew".into()))
        .await
        .unwrap();
    assert_eq!(transition.order.status(), OrderStatus::Cancelled);
    assert_eq!(transition.entries.len(), 1);
    assert_eq!(transition.entries[0].causale_code, "RCL");
    assert_eq!(transition.entries[0].quantity, dec!(4));

    let entries = fx.engine.ledger_entries(&fx.owner, product).await.unwrap();
    assert_eq!(entries.len(), 3);
    let stock = fx.engine.product_stock(&fx.owner, product).await.unwrap();
    assert_eq!(stock.on_hand, dec!(10));
    assert_eq!(fx.engine.verify_stock(&fx.owner, product).await.unwrap(), None);

    let err = fx
        .engine
        .cancel_order(&fx.owner, order.id_typed(), None)
        .await
        .unwrap_err();
    assert!(matches!(domain(&err), DomainError::Conflict(_)));
}

#[tokio::test]
async fn a_ledger_entry_is_reversed_at_most_once() {
    let fx = setup().await;
    let product = fx.product("A100").await;
    let entry = fx.load(product, dec!(10), dec!(4)).await;

    let correction = fx.engine.reverse_entry(&fx.owner, entry.id).await.unwrap();
    assert_eq!(correction.causale_code, "SCA");
    assert_eq!(correction.quantity, dec!(-10));
    assert_eq!(correction.reverses, Some(entry.id));
    assert_eq!(correction.on_hand_after, Decimal::ZERO);

    let again = fx.engine.reverse_entry(&fx.owner, entry.id).await.unwrap_err();
    assert!(matches!(domain(&again), DomainError::Conflict(_)));
    let nested = fx.engine.reverse_entry(&fx.owner, correction.id).await.unwrap_err();
    assert!(matches!(domain(&nested), DomainError::Conflict(_)));
}

#[tokio::test]
async fn negative_stock_is_refused_when_disabled() {
    let config = EngineConfig {
        allow_negative_stock: false,
        ..EngineConfig::default()
    };
    let fx = setup_with(config).await;
    let product = fx.product("A100").await;
    fx.load(product, dec!(2), dec!(3)).await;
    let order = fx.confirmed_sale(vec![line(product, dec!(5), dec!(9))]).await;

    let err = fx.engine.fulfill_order(&fx.owner, order.id_typed()).await.unwrap_err();
    assert!(matches!(domain(&err), DomainError::Conflict(_)));

    let order = fx.engine.order(&fx.owner, order.id_typed()).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Confirmed);
    assert_eq!(fx.engine.ledger_entries(&fx.owner, product).await.unwrap().len(), 1);
    assert_eq!(fx.engine.product_stock(&fx.owner, product).await.unwrap().on_hand, dec!(2));
}

#[tokio::test]
async fn oversold_stock_is_allowed_by_default() {
    let fx = setup().await;
    let product = fx.product("A100").await;
    let order = fx.confirmed_sale(vec![line(product, dec!(3), dec!(9))]).await;

    fx.engine.fulfill_order(&fx.owner, order.id_typed()).await.unwrap();
    assert_eq!(fx.engine.product_stock(&fx.owner, product).await.unwrap().on_hand, dec!(-3));
}

#[tokio::test]
async fn amending_an_invoice_regenerates_its_schedule() {
    let fx = setup().await;
    fx.zero_rated_vat().await;
    fx.payment_method("30/60", &[30, 60]).await;
    let product = fx.product("A100").await;

    let mut order_line = line(product, dec!(10), dec!(100));
    order_line.vat_code = Some("ES".into());
    let order = fx.confirmed_sale(vec![order_line.clone()]).await;
    fx.engine.fulfill_order(&fx.owner, order.id_typed()).await.unwrap();
    let mut request = fx.invoice_request(&order, "FV");
    request.payment_method = Some("30/60".into());
    let issued = fx.engine.generate_invoice(&fx.owner, request).await.unwrap();
    let invoice_id = issued.invoice.id_typed();

    let mut extra = line(product, dec!(1), dec!(200));
    extra.vat_code = Some("ES".into());
    let amended = fx.engine.add_invoice_line(&fx.owner, invoice_id, extra).await.unwrap();
    assert_eq!(amended.invoice.total(), dec!(1200.00));
    assert_eq!(
        amended.schedule.iter().map(|e| e.amount).collect::<Vec<_>>(),
        vec![dec!(600.00), dec!(600.00)]
    );

    let amended = fx.engine.remove_invoice_line(&fx.owner, invoice_id, 1).await.unwrap();
    assert_eq!(amended.invoice.total(), dec!(200.00));
    let stored = fx.engine.payment_schedule(&fx.owner, invoice_id).await.unwrap();
    assert_eq!(stored.iter().map(|e| e.amount).sum::<Decimal>(), dec!(200.00));
}

#[tokio::test]
async fn one_delivery_note_per_fulfilled_sale() {
    let fx = setup().await;
    let product = fx.product("A100").await;
    let order = fx.confirmed_sale(vec![line(product, dec!(2), dec!(9))]).await;
    let request = DeliveryNoteRequest {
        order_id: order.id_typed(),
        causale_code: "DDT".into(),
        date: date(2024, 3, 16),
        carrier_id: None,
    };

    let err = fx.engine.issue_delivery_note(&fx.owner, request.clone()).await.unwrap_err();
    assert!(matches!(err, EngineError::Domain(_)));

    fx.engine.fulfill_order(&fx.owner, order.id_typed()).await.unwrap();
    let note = fx.engine.issue_delivery_note(&fx.owner, request.clone()).await.unwrap();
    assert_eq!(note.number.to_string(), "1/2024");
    assert_eq!(note.lines.len(), 1);
    assert_eq!(note.subject_id, fx.client);

    let err = fx.engine.issue_delivery_note(&fx.owner, request).await.unwrap_err();
    assert!(matches!(domain(&err), DomainError::Conflict(_)));
    assert_eq!(fx.engine.delivery_note(&fx.owner, note.id).await.unwrap(), note);

    let order = fx.engine.order(&fx.owner, order.id_typed()).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Fulfilled);
}

#[tokio::test]
async fn orders_are_numbered_per_sequence_and_year() {
    let fx = setup().await;
    let product = fx.product("A100").await;

    let first = fx.order("OC", fx.client, vec![line(product, dec!(1), dec!(1))]).await;
    let second = fx.order("OC", fx.client, vec![line(product, dec!(1), dec!(1))]).await;
    let purchase = fx.order("OF", fx.supplier, vec![line(product, dec!(1), dec!(1))]).await;

    assert_eq!(first.number().unwrap().number, 1);
    assert_eq!(second.number().unwrap().number, 2);
    assert_eq!(purchase.number().unwrap().number, 1);
    assert_eq!(second.number().unwrap().to_string(), "2/2024");
}

#[tokio::test]
async fn tenants_never_see_each_other() {
    let fx = setup().await;
    let product = fx.product("A100").await;
    let order = fx.order("OC", fx.client, vec![line(product, dec!(1), dec!(1))]).await;

    let outsider = owner_of(TenantId::new());
    fx.engine.seed_default_catalog(&outsider).await.unwrap();

    let err = fx.engine.order(&outsider, order.id_typed()).await.unwrap_err();
    assert!(matches!(domain(&err), DomainError::NotFound(_)));
    let err = fx.engine.product(&outsider, product).await.unwrap_err();
    assert!(matches!(domain(&err), DomainError::NotFound(_)));

    let err = fx
        .engine
        .post_movement(
            &outsider,
            MovementInput {
                product_id: product,
                warehouse_id: Some(fx.warehouse),
                causale_code: "CAR".into(),
                quantity: dec!(5),
                unit_cost: Some(dec!(1)),
                source: None,
                counterparty: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(domain(&err), DomainError::NotFound(_)));

    let foreign = Product::new(fx.tenant, "Z900", "Smuggled", dec!(1)).unwrap();
    let stored = fx.engine.upsert_product(&outsider, foreign).await.unwrap();
    assert_eq!(stored.tenant_id, outsider.tenant_id());
}

#[tokio::test]
async fn capabilities_gate_every_operation() {
    let fx = setup().await;
    let product = fx.product("A100").await;
    let order = fx.order("OC", fx.client, vec![line(product, dec!(1), dec!(1))]).await;

    let clerk = Principal::new(
        PrincipalId::new(),
        TenantMembership::with_role(
            fx.tenant,
            Role::new("clerk"),
            CapabilityMap::new().grant(Resource::Orders, Capabilities::READ_ONLY),
        ),
    );

    assert!(fx.engine.order(&clerk, order.id_typed()).await.is_ok());
    let err = fx.engine.confirm_order(&clerk, order.id_typed()).await.unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));
    let err = fx.engine.product_stock(&clerk, product).await.unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));

    let order = fx.engine.order(&fx.owner, order.id_typed()).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Draft);
}

#[tokio::test]
async fn committed_writes_are_published() {
    let fx = setup().await;
    let product = fx.product("A100").await;
    let subscription = fx.engine.bus().subscribe();

    fx.load(product, dec!(5), dec!(2)).await;
    let order = fx.confirmed_sale(vec![line(product, dec!(2), dec!(9))]).await;
    fx.engine.fulfill_order(&fx.owner, order.id_typed()).await.unwrap();

    let envelopes = subscription.drain();
    assert!(envelopes.iter().all(|e| e.tenant_id() == fx.tenant));
    let ledger = envelopes
        .iter()
        .filter(|e| e.aggregate_type() == "inventory.product")
        .count();
    assert_eq!(ledger, 2);
    let order_events: Vec<_> = envelopes
        .iter()
        .filter(|e| e.aggregate_type() == "orders.order")
        .map(|e| e.sequence_number())
        .collect();
    assert!(order_events.len() >= 3);
    assert!(order_events.windows(2).all(|w| w[0] < w[1]));

    let rejected = fx.engine.fulfill_order(&fx.owner, order.id_typed()).await;
    assert!(rejected.is_err());
    assert!(subscription.drain().is_empty());
}

#[tokio::test]
async fn causali_in_use_are_deactivated_not_deleted() {
    let fx = setup().await;
    let product = fx.product("A100").await;
    fx.load(product, dec!(1), dec!(1)).await;

    assert_eq!(
        fx.engine.seed_default_catalog(&fx.owner).await.unwrap(),
        Default::default()
    );

    let err = fx.engine.delete_movement_causale(&fx.owner, "car").await.unwrap_err();
    assert!(matches!(domain(&err), DomainError::Referential { .. }));

    let causale = fx.engine.deactivate_movement_causale(&fx.owner, "car").await.unwrap();
    assert!(!causale.active);
    let err = fx
        .engine
        .post_movement(
            &fx.owner,
            MovementInput {
                product_id: product,
                warehouse_id: None,
                causale_code: "CAR".into(),
                quantity: dec!(1),
                unit_cost: Some(dec!(1)),
                source: None,
                counterparty: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(domain(&err), DomainError::InvalidField { .. }));
    assert_eq!(fx.engine.ledger_entries(&fx.owner, product).await.unwrap().len(), 1);

    fx.engine
        .quick_create(
            &fx.owner,
            QuickCreate::MovementCausale {
                code: "omg".into(),
                description: "Omaggio".into(),
                direction: gestio_causali::Direction::Outbound,
                updates_average_cost: false,
                requires_document: false,
                inverse_code: None,
            },
        )
        .await
        .unwrap();
    fx.engine.delete_movement_causale(&fx.owner, "OMG").await.unwrap();
}

#[tokio::test]
async fn switching_the_primary_warehouse_demotes_the_previous_one() {
    let fx = setup().await;
    let second = match fx
        .engine
        .quick_create(
            &fx.owner,
            QuickCreate::Warehouse {
                code: "NORD".into(),
                name: "Deposito nord".into(),
                primary: false,
            },
        )
        .await
        .unwrap()
    {
        QuickCreated::Warehouse(id) => id,
        other => panic!("expected a warehouse id, got {other:?}"),
    };

    fx.engine.set_primary_warehouse(&fx.owner, second).await.unwrap();
    let warehouses = fx.engine.warehouses(&fx.owner).await.unwrap();
    let primaries: Vec<_> = warehouses.iter().filter(|w| w.primary).map(|w| w.id).collect();
    assert_eq!(primaries, vec![second]);

    let product = fx.product("A100").await;
    let entry = fx.load(product, dec!(1), dec!(1)).await;
    assert_eq!(entry.warehouse_id, second);

    let err = fx.engine.delete_warehouse(&fx.owner, second).await.unwrap_err();
    match domain(&err) {
        DomainError::Referential { count, .. } => assert_eq!(*count, 1),
        other => panic!("expected a referential error, got {other:?}"),
    }
    fx.engine.delete_warehouse(&fx.owner, fx.warehouse).await.unwrap();
}

#[tokio::test]
async fn quick_create_never_overwrites_an_existing_code() {
    let fx = setup().await;

    let err = fx
        .engine
        .quick_create(
            &fx.owner,
            QuickCreate::VatCode {
                code: "22".into(),
                description: "Aliquota ridotta".into(),
                rate: dec!(10),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(domain(&err), DomainError::Conflict(_)));
    let vat_codes = fx.engine.vat_codes(&fx.owner).await.unwrap();
    let rate = vat_codes.iter().find(|v| v.code == "22").map(|v| v.rate);
    assert_eq!(rate, Some(dec!(22)));

    let err = fx
        .engine
        .quick_create(
            &fx.owner,
            QuickCreate::Warehouse {
                code: "sede".into(),
                name: "Altra sede".into(),
                primary: true,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(domain(&err), DomainError::Conflict(_)));
    let warehouses = fx.engine.warehouses(&fx.owner).await.unwrap();
    assert_eq!(warehouses.len(), 1);
    assert!(warehouses[0].primary);

    let err = fx
        .engine
        .quick_create(
            &fx.owner,
            QuickCreate::MovementCausale {
                code: "car".into(),
                description: "Carico bis".into(),
                direction: gestio_causali::Direction::Inbound,
                updates_average_cost: false,
                requires_document: false,
                inverse_code: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(domain(&err), DomainError::Conflict(_)));
    let causali = fx.engine.movement_causali(&fx.owner).await.unwrap();
    let car = causali.iter().find(|c| c.code == "CAR").unwrap();
    assert!(car.updates_average_cost);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn racing_quick_creates_keep_one_record() {
    let fx = setup().await;

    let spawn = |engine: Arc<TestEngine>, principal: Principal, days: u32| {
        tokio::spawn(async move {
            let request = QuickCreate::PaymentMethod {
                code: "RB".into(),
                description: format!("Ri.Ba. {days} gg"),
                installments: vec![InstallmentRule { days, share_pct: None }],
                end_of_month: false,
            };
            engine.quick_create(&principal, request).await.map(|_| days)
        })
    };
    let first = spawn(fx.engine.clone(), fx.owner.clone(), 30);
    let second = spawn(fx.engine.clone(), fx.owner.clone(), 60);
    let (first, second) = tokio::join!(first, second);
    let outcomes = [first.unwrap(), second.unwrap()];

    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    let err = outcomes.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(matches!(domain(err), DomainError::Conflict(_)));

    let winner = outcomes.iter().find_map(|r| r.as_ref().ok()).copied().unwrap();
    let stored = fx.engine.payment_method(&fx.owner, "rb").await.unwrap();
    assert_eq!(stored.installments[0].days, winner);
}

#[tokio::test]
async fn movement_causale_inverse_must_exist() {
    let fx = setup().await;
    let causale = |code: &str, direction, inverse: Option<&str>| QuickCreate::MovementCausale {
        code: code.into(),
        description: format!("Causale {code}"),
        direction,
        updates_average_cost: false,
        requires_document: false,
        inverse_code: inverse.map(Into::into),
    };

    let err = fx
        .engine
        .quick_create(&fx.owner, causale("RES", gestio_causali::Direction::Inbound, Some("XYZ")))
        .await
        .unwrap_err();
    match domain(&err) {
        DomainError::InvalidField { field, .. } => assert_eq!(field, "inverse_code"),
        other => panic!("expected an invalid field, got {other:?}"),
    }
    let codes: Vec<_> = fx
        .engine
        .movement_causali(&fx.owner)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.code)
        .collect();
    assert!(!codes.contains(&"RES".to_string()));

    fx.engine
        .quick_create(&fx.owner, causale("OMG", gestio_causali::Direction::Outbound, None))
        .await
        .unwrap();
    fx.engine
        .quick_create(&fx.owner, causale("RES", gestio_causali::Direction::Inbound, Some("omg")))
        .await
        .unwrap();
}

#[tokio::test]
async fn fulfilment_refuses_a_product_deactivated_after_confirmation() {
    let fx = setup().await;
    let product_id = fx.product("A100").await;
    fx.load(product_id, dec!(10), dec!(2)).await;
    let order = fx.confirmed_sale(vec![line(product_id, dec!(4), dec!(5))]).await;

    let mut product = fx.engine.product(&fx.owner, product_id).await.unwrap();
    product.active = false;
    fx.engine.upsert_product(&fx.owner, product).await.unwrap();

    let err = fx.engine.fulfill_order(&fx.owner, order.id_typed()).await.unwrap_err();
    assert!(matches!(domain(&err), DomainError::InvalidField { .. }));

    let order = fx.engine.order(&fx.owner, order.id_typed()).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Confirmed);
    assert_eq!(fx.engine.ledger_entries(&fx.owner, product_id).await.unwrap().len(), 1);
    let stock = fx.engine.product_stock(&fx.owner, product_id).await.unwrap();
    assert_eq!(stock.on_hand, dec!(10));
}
