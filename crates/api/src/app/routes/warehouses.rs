use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    routing::{delete, get, post},
    Router,
};

use gestio_auth::Principal;
use gestio_products::WarehouseId;

use crate::app::errors::{parse_id, respond};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_warehouses))
        .route("/:id", delete(delete_warehouse))
        .route("/:id/primary", post(set_primary))
}

pub async fn list_warehouses(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
) -> axum::response::Response {
    respond(StatusCode::OK, services.engine.warehouses(&principal).await)
}

/// Make this the tenant's primary warehouse; the previous one is demoted.
pub async fn set_primary(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let warehouse_id: WarehouseId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    respond(StatusCode::OK, services.engine.set_primary_warehouse(&principal, warehouse_id).await)
}

pub async fn delete_warehouse(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let warehouse_id: WarehouseId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    respond(StatusCode::OK, services.engine.delete_warehouse(&principal, warehouse_id).await)
}
