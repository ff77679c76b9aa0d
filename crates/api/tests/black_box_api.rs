use std::sync::Arc;

use reqwest::StatusCode;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};

use gestio_api::app::services::{self, AppServices};
use gestio_api::middleware::PRINCIPAL_HEADER;
use gestio_auth::{InMemoryMembershipDirectory, PrincipalId};
use gestio_core::TenantId;
use gestio_infra::EngineConfig;

struct TestServer {
    base_url: String,
    directory: Arc<InMemoryMembershipDirectory>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, in-memory store, ephemeral port.
        let directory = Arc::new(InMemoryMembershipDirectory::new());
        let services = Arc::new(AppServices::in_memory(EngineConfig::default(), directory.clone()));
        let app = gestio_api::app::build_app(services);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            directory,
            handle,
        }
    }

    /// Register an owner of a fresh tenant and return a client acting as them.
    fn owner(&self) -> (Caller, TenantId) {
        let principal_id = PrincipalId::new();
        let tenant_id = TenantId::new();
        services::grant_owner(&self.directory, principal_id, tenant_id);
        (
            Caller {
                client: reqwest::Client::new(),
                base_url: self.base_url.clone(),
                principal_id,
            },
            tenant_id,
        )
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct Caller {
    client: reqwest::Client,
    base_url: String,
    principal_id: PrincipalId,
}

impl Caller {
    async fn send(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .header(PRINCIPAL_HEADER, self.principal_id.to_string());
        if let Some(body) = body {
            req = req.json(&body);
        }
        let res = req.send().await.unwrap();
        let status = res.status();
        let body = res.json().await.unwrap_or(Value::Null);
        (status, body)
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        self.send(reqwest::Method::GET, path, None).await
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        self.send(reqwest::Method::POST, path, Some(body)).await
    }

    async fn put(&self, path: &str, body: Value) -> (StatusCode, Value) {
        self.send(reqwest::Method::PUT, path, Some(body)).await
    }
}

fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().unwrap(),
        Value::Number(n) => n.to_string().parse().unwrap(),
        other => panic!("expected a decimal, got {other}"),
    }
}

fn id(value: &Value) -> String {
    value["id"].as_str().expect("record has an id").to_string()
}

/// Seeded causali, VAT 22, a primary warehouse, one client and one product.
async fn prepare_tenant(caller: &Caller) -> (String, String) {
    let (status, _) = caller.post("/reference/seed", json!({})).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = caller
        .post(
            "/reference/quick-create",
            json!({ "kind": "vat_code", "code": "22", "description": "IVA 22%", "rate": "22" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = caller
        .post(
            "/reference/quick-create",
            json!({
                "kind": "warehouse",
                "code": "SEDE",
                "name": "Magazzino sede",
                "primary": true,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, client) = caller
        .put("/subjects", json!({ "name": "Rossi S.r.l.", "roles": ["client"] }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, product) = caller
        .put(
            "/products",
            json!({
                "code": "A100",
                "name": "Articolo A100",
                "list_price": "10",
                "vat_code": "22",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    (id(&client), id(&product))
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn().await;

    let client = reqwest::Client::new();
    let res = client.get(format!("{}/whoami", srv.base_url)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(format!("{}/whoami", srv.base_url))
        .header(PRINCIPAL_HEADER, PrincipalId::new().to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client.get(format!("{}/health", srv.base_url)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn tenant_context_is_derived_from_membership() {
    let srv = TestServer::spawn().await;
    let (caller, tenant_id) = srv.owner();

    let (status, body) = caller.get("/whoami").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tenant_id"].as_str().unwrap(), tenant_id.to_string());
    assert_eq!(body["role"], "owner");
}

#[tokio::test]
async fn sale_lifecycle_load_confirm_fulfil_invoice() {
    let srv = TestServer::spawn().await;
    let (caller, _) = srv.owner();
    let (client_id, product_id) = prepare_tenant(&caller).await;

    let (status, entry) = caller
        .post(
            "/ledger/movements",
            json!({
                "product_id": product_id,
                "causale_code": "CAR",
                "quantity": "10",
                "unit_cost": "4",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{entry}");

    let (status, order) = caller
        .post(
            "/orders",
            json!({
                "causale_code": "OC",
                "date": "2024-03-15",
                "subject_id": client_id,
                "lines": [{ "product_id": product_id, "quantity": "4", "unit_price": "10" }],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{order}");
    assert_eq!(order["status"], "draft");
    assert_eq!(decimal(&order["totals"]["total"]), dec!(48.80));
    let order_id = id(&order);

    let (status, order) = caller.post(&format!("/orders/{order_id}/confirm"), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "confirmed");

    let (status, transition) = caller.post(&format!("/orders/{order_id}/fulfill"), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(transition["order"]["status"], "fulfilled");
    assert_eq!(transition["entries"].as_array().unwrap().len(), 1);

    // Fulfilling again is a state conflict, not a lost race.
    let (status, body) = caller.post(&format!("/orders/{order_id}/fulfill"), json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["retryable"], false);

    let (status, stock) = caller.get(&format!("/ledger/products/{product_id}/stock")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal(&stock["on_hand"]), dec!(6));

    let (status, verification) = caller.get(&format!("/ledger/products/{product_id}/verify")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verification["consistent"], true);

    let (status, issued) = caller
        .post(
            &format!("/orders/{order_id}/invoice"),
            json!({ "causale_code": "FV", "date": "2024-03-31" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{issued}");
    assert_eq!(decimal(&issued["invoice"]["totals"]["total"]), dec!(48.80));

    let (_, order) = caller.get(&format!("/orders/{order_id}")).await;
    assert_eq!(order["status"], "invoiced");
}

#[tokio::test]
async fn malformed_ids_and_unknown_records() {
    let srv = TestServer::spawn().await;
    let (caller, _) = srv.owner();

    let (status, body) = caller.get("/orders/not-an-id").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_id");

    let (status, body) = caller.get(&format!("/orders/{}", uuid::Uuid::now_v7())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn tenants_cannot_read_each_others_records() {
    let srv = TestServer::spawn().await;
    let (alice, _) = srv.owner();
    let (bob, _) = srv.owner();
    let (_, product_id) = prepare_tenant(&alice).await;

    let (status, _) = alice.get(&format!("/products/{product_id}")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = bob.get(&format!("/products/{product_id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn causale_in_use_reports_its_usage() {
    let srv = TestServer::spawn().await;
    let (caller, _) = srv.owner();
    let (_, product_id) = prepare_tenant(&caller).await;

    caller
        .post(
            "/ledger/movements",
            json!({
                "product_id": product_id,
                "causale_code": "CAR",
                "quantity": "2",
                "unit_cost": "1",
            }),
        )
        .await;

    let (status, body) = caller.send(reqwest::Method::DELETE, "/causali/movements/CAR", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "referential_integrity");
    assert!(body["count"].as_u64().unwrap() >= 1);

    let (status, causale) = caller.post("/causali/movements/CAR/deactivate", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(causale["active"], false);
}
