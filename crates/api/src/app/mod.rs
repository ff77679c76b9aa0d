//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store selection, engine and membership directory
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request bodies that need mapping onto engine inputs
//! - `errors.rs`: engine errors as consistent JSON responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<services::AppServices>) -> Router {
    let auth_state = middleware::AuthState {
        directory: services.directory.clone(),
    };

    // Tenant routes: every handler receives the resolved principal.
    let protected = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new())
}
