use std::str::FromStr;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;
use tracing::error;

use gestio_core::DomainError;
use gestio_infra::{EngineError, EngineResult};

/// Serialize a successful engine result with `status`, or map the error.
pub fn respond<T: Serialize>(status: StatusCode, result: EngineResult<T>) -> Response {
    match result {
        Ok(value) => (status, axum::Json(value)).into_response(),
        Err(err) => engine_error_to_response(err),
    }
}

pub fn engine_error_to_response(err: EngineError) -> Response {
    match err {
        EngineError::Domain(err) => domain_error_to_response(err),
        EngineError::Forbidden(err) => json_error(StatusCode::FORBIDDEN, "forbidden", err.to_string()),
        EngineError::Store(err) => {
            error!(error = %err, "store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", err.to_string())
        }
    }
}

fn domain_error_to_response(err: DomainError) -> Response {
    let message = err.to_string();
    match err {
        DomainError::Validation(_) => json_error(StatusCode::BAD_REQUEST, "validation_error", message),
        DomainError::InvalidField { field, .. } => (
            StatusCode::BAD_REQUEST,
            axum::Json(json!({
                "error": "invalid_field",
                "field": field,
                "message": message,
            })),
        )
            .into_response(),
        DomainError::InvalidId(_) => json_error(StatusCode::BAD_REQUEST, "invalid_id", message),
        DomainError::InvariantViolation(_) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", message)
        }
        DomainError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", message),
        DomainError::Conflict(_) => conflict("conflict", message, false),
        DomainError::Concurrency(_) => conflict("concurrency_conflict", message, true),
        DomainError::Referential { dependents, count, .. } => (
            StatusCode::CONFLICT,
            axum::Json(json!({
                "error": "referential_integrity",
                "message": message,
                "dependents": dependents,
                "count": count,
            })),
        )
            .into_response(),
        DomainError::Unauthorized => json_error(StatusCode::FORBIDDEN, "unauthorized", message),
    }
}

fn conflict(code: &'static str, message: String, retryable: bool) -> Response {
    (
        StatusCode::CONFLICT,
        axum::Json(json!({
            "error": code,
            "message": message,
            "retryable": retryable,
        })),
    )
        .into_response()
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Parse a path identifier, answering 400 when it is not one.
pub fn parse_id<T: FromStr>(raw: &str) -> Result<T, Response> {
    raw.parse::<T>()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("'{raw}' is not a valid id")))
}
