//! Orchestration error types.

use common::SagaId;
use saga::SagaError;
use saga_store::SagaStoreError;
use thiserror::Error;

use crate::mediator::MediatorError;

/// Errors surfaced by the manager and the recovery worker.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// A saga lifecycle or handler error.
    #[error("Saga error: {0}")]
    Saga(#[from] SagaError),

    /// A persistence error, including optimistic-concurrency conflicts.
    #[error("Store error: {0}")]
    Store(#[from] SagaStoreError),

    /// The command mediator rejected a hand-off.
    #[error("Mediator error: {0}")]
    Mediator(#[from] MediatorError),

    /// No behavior is registered under this saga type name.
    #[error("Unknown saga type: {0}")]
    UnknownSagaType(String),

    /// No persisted instance exists under this ID.
    #[error("Saga not found: {0}")]
    SagaNotFound(SagaId),
}

/// Result type for orchestration operations.
pub type Result<T> = std::result::Result<T, OrchestrationError>;
