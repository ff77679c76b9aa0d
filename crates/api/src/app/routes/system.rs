use axum::{extract::Extension, response::IntoResponse, Json};
use serde_json::json;

use gestio_auth::Principal;

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn whoami(Extension(principal): Extension<Principal>) -> impl IntoResponse {
    Json(json!({
        "principal_id": principal.principal_id.to_string(),
        "tenant_id": principal.tenant_id().to_string(),
        "role": principal.membership.role,
    }))
}
