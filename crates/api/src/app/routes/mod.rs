use axum::{routing::get, Router};

pub mod causali;
pub mod invoices;
pub mod ledger;
pub mod orders;
pub mod products;
pub mod reference;
pub mod subjects;
pub mod system;
pub mod warehouses;

/// Router for all tenant-scoped endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/reference", reference::router())
        .nest("/causali", causali::router())
        .nest("/subjects", subjects::router())
        .nest("/products", products::router())
        .nest("/warehouses", warehouses::router())
        .nest("/ledger", ledger::router())
        .nest("/orders", orders::router())
        .nest("/invoices", invoices::router())
        .nest("/delivery-notes", invoices::delivery_notes_router())
}
