use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use gestio_auth::Principal;
use gestio_infra::engine::QuickCreate;

use crate::app::errors::respond;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/quick-create", post(quick_create))
        .route("/seed", post(seed_default_catalog))
        .route("/vat-codes", get(list_vat_codes))
        .route("/payment-methods/:code", get(get_payment_method))
}

/// Create a VAT code, payment method, subject category, warehouse or causale
/// from a minimal payload.
pub async fn quick_create(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<QuickCreate>,
) -> axum::response::Response {
    respond(StatusCode::CREATED, services.engine.quick_create(&principal, body).await)
}

pub async fn seed_default_catalog(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
) -> axum::response::Response {
    respond(StatusCode::OK, services.engine.seed_default_catalog(&principal).await)
}

pub async fn list_vat_codes(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
) -> axum::response::Response {
    respond(StatusCode::OK, services.engine.vat_codes(&principal).await)
}

pub async fn get_payment_method(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Path(code): Path<String>,
) -> axum::response::Response {
    respond(StatusCode::OK, services.engine.payment_method(&principal, &code).await)
}
