//! Causale registry: the reason codes that fix what a posting or a document means.
//!
//! Two families evolve independently. Movement causali drive the stock ledger
//! (direction, sign, cost effect); document causali drive orders, invoices and
//! delivery notes (document type, operation, numbering, linked movement).
//! Every downstream component asks the [`CausaleRegistry`] instead of
//! hard-coding signs.

pub mod catalog;
pub mod document;
pub mod movement;
pub mod registry;

pub use catalog::default_catalog;
pub use document::{CausaleFamily, DocumentCausale, DocumentType};
pub use movement::{CausaleEffect, Direction, MovementCausale, Sign};
pub use registry::CausaleRegistry;

use gestio_core::{DomainError, DomainResult};

/// Causale codes are short, upper-case mnemonics (`VEN`, `RET+`).
pub fn normalize_code(code: &str) -> DomainResult<String> {
    let code = code.trim();
    if code.is_empty() {
        return Err(DomainError::field("code", "must not be empty"));
    }
    if code.len() > 16 {
        return Err(DomainError::field("code", "must be at most 16 characters"));
    }
    if code.chars().any(char::is_whitespace) {
        return Err(DomainError::field("code", "must not contain whitespace"));
    }
    Ok(code.to_uppercase())
}

/// Deleting a causale that ledger entries or documents still reference is refused.
pub fn ensure_unused(entity: &str, code: &str, references: u64) -> DomainResult<()> {
    if references == 0 {
        Ok(())
    } else {
        Err(DomainError::referential(
            format!("{entity} '{code}'"),
            "documents or ledger entries (deactivate it instead)",
            references,
        ))
    }
}
