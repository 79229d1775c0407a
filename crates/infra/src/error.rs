//! Errors surfaced by the public engine operations.

use thiserror::Error;

use stockledger_core::DomainError;
use stockledger_inventory::{AllocationError, Amount};

use crate::store::StoreError;

/// Result type of [`crate::StockEngine`] operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Typed failure of an engine operation.
///
/// Every error means nothing was written: there is no partial success.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("insufficient stock: requested {requested} {unit}, available {available} {unit}")]
    InsufficientStock {
        requested: Amount,
        available: Amount,
        unit: String,
    },

    /// `at_commit` is set when the unique index rejected the insert after
    /// the pre-check passed, i.e. another registration won a race. Resubmitting
    /// then fails definitively at the pre-check.
    #[error("label already registered: {unique_code}")]
    DuplicateLabel { unique_code: String, at_commit: bool },

    #[error("material not found: {0}")]
    MaterialNotFound(String),

    /// The commit kept failing with transient errors; safe to retry later.
    #[error("transaction aborted after {attempts} attempt(s): {last}")]
    TransactionAborted {
        attempts: u32,
        #[source]
        last: StoreError,
    },

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error(transparent)]
    Store(StoreError),
}

impl EngineError {
    /// A label rejected before anything was written.
    pub fn duplicate_label(unique_code: impl Into<String>) -> Self {
        EngineError::DuplicateLabel {
            unique_code: unique_code.into(),
            at_commit: false,
        }
    }

    /// Whether the caller may retry the same request later.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::TransactionAborted { .. } => true,
            EngineError::DuplicateLabel { at_commit, .. } => *at_commit,
            EngineError::Store(err) => err.is_transient(),
            _ => false,
        }
    }
}

impl From<AllocationError> for EngineError {
    fn from(err: AllocationError) -> Self {
        match err {
            AllocationError::InvalidRequest(msg) => EngineError::InvalidRequest(msg),
            AllocationError::NotFound(what) => EngineError::NotFound(what),
            AllocationError::InsufficientStock {
                requested,
                available,
                unit,
            } => EngineError::InsufficientStock {
                requested,
                available,
                unit,
            },
        }
    }
}

impl From<DomainError> for EngineError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                EngineError::InvalidRequest(msg)
            }
            DomainError::InvariantViolation(msg) => EngineError::InvariantViolation(msg),
            stale @ DomainError::StaleVersion { .. } => {
                EngineError::Store(StoreError::Conflict(stale.to_string()))
            }
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateLabel(unique_code) => EngineError::DuplicateLabel {
                unique_code,
                at_commit: true,
            },
            other => EngineError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_core::ExpectedVersion;

    #[test]
    fn duplicate_label_from_store_is_typed() {
        let err: EngineError = StoreError::DuplicateLabel("T1".into()).into();
        assert_eq!(
            err,
            EngineError::DuplicateLabel {
                unique_code: "T1".into(),
                at_commit: true,
            }
        );
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "label already registered: T1");
    }

    #[test]
    fn duplicate_label_from_pre_check_is_final() {
        let err = EngineError::duplicate_label("T1");
        assert!(!err.is_transient());
    }

    #[test]
    fn stale_version_becomes_transient_store_error() {
        let err: EngineError =
            DomainError::stale_version(ExpectedVersion::Exact(1), Some(2)).into();
        assert!(err.is_transient());
    }

    #[test]
    fn shortfall_keeps_available_amount() {
        let err: EngineError = AllocationError::InsufficientStock {
            requested: Amount::from_units(80),
            available: Amount::from_units(70),
            unit: "kg".into(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "insufficient stock: requested 80.000 kg, available 70.000 kg"
        );
        assert!(!err.is_transient());
    }
}
