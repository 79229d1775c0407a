//! Errors raised by the pure stock rules.
//!
//! Every variant is deterministic: replaying the same input against the same
//! state fails the same way. Store and transport failures live in the infra
//! crate, which maps these onto its own error type.

use thiserror::Error;

use crate::version::ExpectedVersion;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Caller input that cannot be accepted as given: blank labels,
    /// non-positive quantities, amounts past the representable limit.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A transition that would break a lot's bookkeeping, such as stock
    /// going negative or a deduction from a lot that is no longer in stock.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// The record moved between read and write.
    #[error("stale version: expected {expected:?}, found {actual:?}")]
    StaleVersion {
        expected: ExpectedVersion,
        actual: Option<u64>,
    },
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn stale_version(expected: ExpectedVersion, actual: Option<u64>) -> Self {
        Self::StaleVersion { expected, actual }
    }

    /// Only a stale read can succeed on a second attempt with fresh state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StaleVersion { .. })
    }
}
