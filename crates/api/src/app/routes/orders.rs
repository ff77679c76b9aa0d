use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};

use gestio_auth::Principal;
use gestio_infra::engine::NewOrder;
use gestio_orders::{LineInput, OrderId};

use crate::app::errors::{parse_id, respond};
use crate::app::{dto, services::AppServices};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_order))
        .route("/:id", get(get_order))
        .route("/:id/lines", post(add_line))
        .route("/:id/lines/:line_no", put(update_line).delete(remove_line))
        .route("/:id/confirm", post(confirm_order))
        .route("/:id/fulfill", post(fulfill_order))
        .route("/:id/receive", post(receive_order))
        .route("/:id/cancel", post(cancel_order))
        .route("/:id/invoice", post(invoice_order))
        .route("/:id/delivery-note", post(issue_delivery_note))
}

pub async fn create_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<NewOrder>,
) -> axum::response::Response {
    respond(StatusCode::CREATED, services.engine.create_order(&principal, body).await)
}

pub async fn get_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id: OrderId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    respond(StatusCode::OK, services.engine.order(&principal, order_id).await)
}

pub async fn add_line(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    Json(body): Json<LineInput>,
) -> axum::response::Response {
    let order_id: OrderId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    respond(StatusCode::OK, services.engine.add_order_line(&principal, order_id, body).await)
}

pub async fn update_line(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Path((id, line_no)): Path<(String, u32)>,
    Json(body): Json<LineInput>,
) -> axum::response::Response {
    let order_id: OrderId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    respond(
        StatusCode::OK,
        services.engine.update_order_line(&principal, order_id, line_no, body).await,
    )
}

pub async fn remove_line(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Path((id, line_no)): Path<(String, u32)>,
) -> axum::response::Response {
    let order_id: OrderId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    respond(StatusCode::OK, services.engine.remove_order_line(&principal, order_id, line_no).await)
}

pub async fn confirm_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id: OrderId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    respond(StatusCode::OK, services.engine.confirm_order(&principal, order_id).await)
}

/// Ship a confirmed sale: one outgoing ledger entry per line.
pub async fn fulfill_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id: OrderId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    respond(StatusCode::OK, services.engine.fulfill_order(&principal, order_id).await)
}

pub async fn receive_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id: OrderId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    respond(StatusCode::OK, services.engine.receive_order(&principal, order_id).await)
}

pub async fn cancel_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    body: Option<Json<dto::CancelOrderRequest>>,
) -> axum::response::Response {
    let order_id: OrderId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let reason = body.and_then(|Json(body)| body.reason);
    respond(StatusCode::OK, services.engine.cancel_order(&principal, order_id, reason).await)
}

pub async fn invoice_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    Json(body): Json<dto::InvoiceOrderRequest>,
) -> axum::response::Response {
    let order_id: OrderId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    respond(
        StatusCode::CREATED,
        services.engine.generate_invoice(&principal, body.for_order(order_id)).await,
    )
}

pub async fn issue_delivery_note(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    Json(body): Json<dto::DeliveryNoteOrderRequest>,
) -> axum::response::Response {
    let order_id: OrderId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    respond(
        StatusCode::CREATED,
        services.engine.issue_delivery_note(&principal, body.for_order(order_id)).await,
    )
}
