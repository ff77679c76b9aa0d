use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    routing::{delete, get, put},
    Json, Router,
};

use gestio_auth::Principal;
use gestio_parties::{SubjectCategoryId, SubjectId};

use crate::app::errors::{engine_error_to_response, parse_id, respond};
use crate::app::{dto, services::AppServices};

pub fn router() -> Router {
    Router::new()
        .route("/", put(upsert_subject))
        .route("/categories", get(list_categories))
        .route("/categories/:id", delete(delete_category))
        .route("/:id", get(get_subject))
}

pub async fn upsert_subject(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<dto::UpsertSubjectRequest>,
) -> axum::response::Response {
    let subject = match body.into_subject(principal.tenant_id()) {
        Ok(subject) => subject,
        Err(e) => return engine_error_to_response(e.into()),
    };
    respond(StatusCode::OK, services.engine.upsert_subject(&principal, subject).await)
}

pub async fn get_subject(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let subject_id: SubjectId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    respond(StatusCode::OK, services.engine.subject(&principal, subject_id).await)
}

pub async fn list_categories(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
) -> axum::response::Response {
    respond(StatusCode::OK, services.engine.subject_categories(&principal).await)
}

pub async fn delete_category(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let category_id: SubjectCategoryId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    respond(StatusCode::OK, services.engine.delete_subject_category(&principal, category_id).await)
}
