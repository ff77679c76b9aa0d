use thiserror::Error;

use gestio_auth::AuthzError;
use gestio_core::DomainError;

use crate::store::StoreError;

/// Failure of an engine operation.
///
/// Store failures that carry business meaning (lost races, duplicates,
/// missing rows, domain rejections raised while posting) are folded into
/// [`EngineError::Domain`] so callers classify every rejection the same way.
/// `Store` is left for infrastructure faults.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Forbidden(#[from] AuthzError),

    #[error("store failure: {0}")]
    Store(StoreError),
}

impl From<StoreError> for EngineError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Rejected(err) => EngineError::Domain(err),
            StoreError::Concurrency(msg) | StoreError::NumberTaken(msg) => {
                EngineError::Domain(DomainError::concurrency(msg))
            }
            StoreError::Duplicate(msg) => EngineError::Domain(DomainError::conflict(msg)),
            StoreError::NotFound(what) => EngineError::Domain(DomainError::not_found(what)),
            other => EngineError::Store(other),
        }
    }
}

impl EngineError {
    /// Only lost races are worth retrying (after refreshing state).
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Domain(err) if err.is_retryable())
    }

    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            EngineError::Domain(err) => Some(err),
            _ => None,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_races_become_retryable_domain_errors() {
        let err = EngineError::from(StoreError::Concurrency("guard taken".into()));
        assert!(err.is_retryable());
        assert!(matches!(err.domain(), Some(DomainError::Concurrency(_))));
    }

    #[test]
    fn duplicates_are_conflicts_and_faults_stay_in_the_store() {
        let err = EngineError::from(StoreError::Duplicate("entry already reversed".into()));
        assert!(matches!(err, EngineError::Domain(DomainError::Conflict(_))));
        assert!(!err.is_retryable());

        let err = EngineError::from(StoreError::Database("connection reset".into()));
        assert!(matches!(err, EngineError::Store(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn domain_rejections_pass_through() {
        let err =
            EngineError::from(StoreError::Rejected(DomainError::conflict("insufficient stock")));
        assert_eq!(err.domain(), Some(&DomainError::conflict("insufficient stock")));
    }
}
