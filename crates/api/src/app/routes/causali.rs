use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    routing::{delete, get, post},
    Router,
};

use gestio_auth::Principal;

use crate::app::errors::respond;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/movements", get(list_movement_causali))
        .route("/movements/:code", delete(delete_movement_causale))
        .route("/movements/:code/deactivate", post(deactivate_movement_causale))
        .route("/documents", get(list_document_causali))
        .route("/documents/:code", delete(delete_document_causale))
        .route("/documents/:code/deactivate", post(deactivate_document_causale))
}

pub async fn list_movement_causali(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
) -> axum::response::Response {
    respond(StatusCode::OK, services.engine.movement_causali(&principal).await)
}

pub async fn list_document_causali(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
) -> axum::response::Response {
    respond(StatusCode::OK, services.engine.document_causali(&principal).await)
}

pub async fn deactivate_movement_causale(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Path(code): Path<String>,
) -> axum::response::Response {
    respond(StatusCode::OK, services.engine.deactivate_movement_causale(&principal, &code).await)
}

pub async fn deactivate_document_causale(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Path(code): Path<String>,
) -> axum::response::Response {
    respond(StatusCode::OK, services.engine.deactivate_document_causale(&principal, &code).await)
}

/// Only unused causali can be deleted; the 409 carries the usage count.
pub async fn delete_movement_causale(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Path(code): Path<String>,
) -> axum::response::Response {
    respond(StatusCode::OK, services.engine.delete_movement_causale(&principal, &code).await)
}

pub async fn delete_document_causale(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Path(code): Path<String>,
) -> axum::response::Response {
    respond(StatusCode::OK, services.engine.delete_document_causale(&principal, &code).await)
}
