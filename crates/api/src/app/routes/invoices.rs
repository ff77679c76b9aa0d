use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};

use gestio_auth::Principal;
use gestio_invoicing::{DeliveryNoteId, InvoiceId};
use gestio_orders::LineInput;

use crate::app::errors::{parse_id, respond};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/:id", get(get_invoice))
        .route("/:id/schedule", get(get_schedule))
        .route("/:id/lines", post(add_line))
        .route("/:id/lines/:line_no", put(update_line).delete(remove_line))
}

pub fn delivery_notes_router() -> Router {
    Router::new().route("/:id", get(get_delivery_note))
}

pub async fn get_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let invoice_id: InvoiceId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    respond(StatusCode::OK, services.engine.invoice(&principal, invoice_id).await)
}

pub async fn get_schedule(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let invoice_id: InvoiceId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    respond(StatusCode::OK, services.engine.payment_schedule(&principal, invoice_id).await)
}

/// Line edits recompute the totals and regenerate the payment schedule.
pub async fn add_line(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    Json(body): Json<LineInput>,
) -> axum::response::Response {
    let invoice_id: InvoiceId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    respond(StatusCode::OK, services.engine.add_invoice_line(&principal, invoice_id, body).await)
}

pub async fn update_line(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Path((id, line_no)): Path<(String, u32)>,
    Json(body): Json<LineInput>,
) -> axum::response::Response {
    let invoice_id: InvoiceId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    respond(
        StatusCode::OK,
        services.engine.update_invoice_line(&principal, invoice_id, line_no, body).await,
    )
}

pub async fn remove_line(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Path((id, line_no)): Path<(String, u32)>,
) -> axum::response::Response {
    let invoice_id: InvoiceId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    respond(StatusCode::OK, services.engine.remove_invoice_line(&principal, invoice_id, line_no).await)
}

pub async fn get_delivery_note(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let note_id: DeliveryNoteId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    respond(StatusCode::OK, services.engine.delivery_note(&principal, note_id).await)
}
