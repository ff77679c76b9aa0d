//! Starter set of causali seeded for a new tenant.

use gestio_core::{OperationType, TenantId};

use crate::document::{DocumentCausale, DocumentType};
use crate::movement::{Direction, MovementCausale};

/// Standard movement and document causali, each paired with its inverse.
pub fn default_catalog(tenant_id: TenantId) -> (Vec<MovementCausale>, Vec<DocumentCausale>) {
    use Direction::{Inbound, Outbound};

    let movements = [
        ("ACQ", "Carico da acquisto", Inbound, true, true, "RFA"),
        ("RFA", "Reso a fornitore", Outbound, false, true, "ACQ"),
        ("VEN", "Scarico per vendita", Outbound, false, true, "RCL"),
        ("RCL", "Reso da cliente", Inbound, false, true, "VEN"),
        ("CAR", "Carico manuale", Inbound, true, false, "SCA"),
        ("SCA", "Scarico manuale", Outbound, false, false, "CAR"),
        ("RET+", "Rettifica inventariale positiva", Inbound, false, false, "RET-"),
        ("RET-", "Rettifica inventariale negativa", Outbound, false, false, "RET+"),
    ]
    .into_iter()
    .filter_map(|(code, description, direction, cost, document, inverse)| {
        let mut causale = MovementCausale::new(tenant_id, code, description, direction).ok()?;
        causale.updates_average_cost = cost;
        causale.requires_document = document;
        causale.with_inverse(inverse).ok()
    })
    .collect();

    let documents = [
        ("OC", "Ordine cliente", DocumentType::Order, OperationType::Sale, Some("VEN"), false),
        ("OF", "Ordine fornitore", DocumentType::Order, OperationType::Purchase, Some("ACQ"), false),
        ("DDT", "Documento di trasporto", DocumentType::DeliveryNote, OperationType::Sale, None, true),
        ("FV", "Fattura di vendita", DocumentType::Invoice, OperationType::Sale, None, false),
        ("FA", "Fattura di acquisto", DocumentType::Invoice, OperationType::Purchase, None, false),
        ("NC", "Nota di credito", DocumentType::CreditNote, OperationType::Sale, None, true),
    ]
    .into_iter()
    .filter_map(|(code, description, document_type, operation, movement, separate)| {
        let causale = DocumentCausale::new(tenant_id, code, description, document_type, operation).ok()?;
        let causale = match movement {
            Some(movement) => causale.moving_stock_with(movement).ok()?,
            None => causale,
        };
        Some(if separate { causale.with_separate_numbering() } else { causale })
    })
    .collect();

    (movements, documents)
}
