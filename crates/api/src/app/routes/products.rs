use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};

use gestio_auth::Principal;
use gestio_products::ProductId;

use crate::app::errors::{engine_error_to_response, parse_id, respond};
use crate::app::{dto, services::AppServices};

pub fn router() -> Router {
    Router::new()
        .route("/", put(upsert_product))
        .route("/:id", get(get_product))
}

pub async fn upsert_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<dto::UpsertProductRequest>,
) -> axum::response::Response {
    let product = match body.into_product(principal.tenant_id()) {
        Ok(product) => product,
        Err(e) => return engine_error_to_response(e.into()),
    };
    respond(StatusCode::OK, services.engine.upsert_product(&principal, product).await)
}

pub async fn get_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let product_id: ProductId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    respond(StatusCode::OK, services.engine.product(&principal, product_id).await)
}
