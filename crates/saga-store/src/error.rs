//! Saga store error types.

use common::SagaId;
use thiserror::Error;

/// Errors that can occur when persisting or loading saga state.
#[derive(Debug, Error)]
pub enum SagaStoreError {
    /// The version being written does not descend from the version
    /// currently persisted. Recoverable: reload and re-check the
    /// idempotency ledger before retrying.
    #[error("Concurrency conflict for saga {saga_id}: expected base version {expected}, found {actual}")]
    ConcurrencyConflict {
        saga_id: SagaId,
        expected: u64,
        actual: u64,
    },

    /// The state claims a persisted base version but nothing is stored
    /// under its ID.
    #[error("Saga not found: {0}")]
    NotFound(SagaId),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for saga store operations.
pub type Result<T> = std::result::Result<T, SagaStoreError>;
