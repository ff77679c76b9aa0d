//! Stock movements, corrections and per-product stock queries.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use gestio_auth::Principal;
use gestio_infra::engine::MovementInput;
use gestio_inventory::LedgerEntryId;
use gestio_products::ProductId;

use crate::app::errors::{parse_id, respond};
use crate::app::{dto, services::AppServices};

pub fn router() -> Router {
    Router::new()
        .route("/movements", post(post_movement))
        .route("/entries/:id/reverse", post(reverse_entry))
        .route("/products/:id/entries", get(list_entries))
        .route("/products/:id/stock", get(product_stock))
        .route("/products/:id/stock/warehouses", get(warehouse_stock))
        .route("/products/:id/verify", get(verify_stock))
        .route("/products/:id/price-statistics", get(price_statistics))
}

pub async fn post_movement(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<MovementInput>,
) -> axum::response::Response {
    respond(StatusCode::CREATED, services.engine.post_movement(&principal, body).await)
}

/// Post the compensating entry for a previous one (at most once).
pub async fn reverse_entry(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let entry_id: LedgerEntryId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    respond(StatusCode::CREATED, services.engine.reverse_entry(&principal, entry_id).await)
}

pub async fn list_entries(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let product_id: ProductId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    respond(StatusCode::OK, services.engine.ledger_entries(&principal, product_id).await)
}

pub async fn product_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let product_id: ProductId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    respond(StatusCode::OK, services.engine.product_stock(&principal, product_id).await)
}

pub async fn warehouse_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let product_id: ProductId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    respond(StatusCode::OK, services.engine.warehouse_stock(&principal, product_id).await)
}

/// Rebuild the position from the entries and compare it with the stored one.
pub async fn verify_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let product_id: ProductId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let result = services
        .engine
        .verify_stock(&principal, product_id)
        .await
        .map(|discrepancy| dto::StockVerification {
            consistent: discrepancy.is_none(),
            discrepancy,
        });
    respond(StatusCode::OK, result)
}

pub async fn price_statistics(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let product_id: ProductId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    respond(StatusCode::OK, services.engine.price_statistics(&principal, product_id).await)
}
