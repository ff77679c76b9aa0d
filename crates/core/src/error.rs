//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Variants follow the engine's failure taxonomy: validation problems are
/// rejected before any write, state problems carry a conflict reason,
/// referential problems carry the dependent count and concurrency problems
/// are the only retryable class.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A specific input field failed validation.
    #[error("invalid {field}: {message}")]
    InvalidField { field: String, message: String },

    /// A domain invariant was violated (illegal state transition, frozen document...).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("{0} not found")]
    NotFound(String),

    /// The request conflicts with the current state (already fulfilled, already invoiced,
    /// causale in use...). Retrying will not help.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A concurrent writer won the race (stale version, duplicate guard, number clash).
    /// The caller may retry once after refreshing state.
    #[error("concurrent modification: {0}")]
    Concurrency(String),

    /// A reference row still has dependents.
    #[error("{entity} is referenced by {count} {dependents}")]
    Referential {
        entity: String,
        dependents: String,
        count: u64,
    },

    /// Authorization failure at the domain boundary.
    #[error("unauthorized")]
    Unauthorized,
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn concurrency(msg: impl Into<String>) -> Self {
        Self::Concurrency(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn referential(entity: impl Into<String>, dependents: impl Into<String>, count: u64) -> Self {
        Self::Referential {
            entity: entity.into(),
            dependents: dependents.into(),
            count,
        }
    }

    /// Only lost races are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Concurrency(_))
    }

    /// True for the "rejected before any write" class.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::InvalidField { .. } | Self::InvalidId(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn referential_message_carries_count() {
        let err = DomainError::referential("subject category 'retail'", "subjects", 3);
        assert_eq!(err.to_string(), "subject category 'retail' is referenced by 3 subjects");
        assert!(!err.is_retryable());
    }

    #[test]
    fn only_concurrency_is_retryable() {
        assert!(DomainError::concurrency("order version moved").is_retryable());
        assert!(!DomainError::conflict("order already fulfilled").is_retryable());
        assert!(!DomainError::validation("quantity must be positive").is_retryable());
    }

    #[test]
    fn field_errors_are_validation_class() {
        let err = DomainError::field("quantity", "must be greater than zero");
        assert!(err.is_validation());
        assert_eq!(err.to_string(), "invalid quantity: must be greater than zero");
    }
}
