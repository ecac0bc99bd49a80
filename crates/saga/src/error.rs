//! Saga error types.

use common::{CommandId, SagaId};
use thiserror::Error;

use crate::status::SagaStatus;

/// Errors that can occur while operating on a saga.
#[derive(Debug, Error)]
pub enum SagaError {
    /// An attempted status change outside the transition table.
    /// Always a programming or data error; the saga is left untouched.
    #[error("Invalid saga status transition: {from} -> {to}")]
    InvalidTransition { from: SagaStatus, to: SagaStatus },

    /// The saga is completed and can no longer be modified
    /// (metadata annotations excepted).
    #[error("Saga {id} is completed and immutable")]
    Completed { id: SagaId },

    /// A saga type's event handler failed.
    #[error("Saga handler for '{saga_type}' failed: {reason}")]
    Handler { saga_type: String, reason: String },

    /// A command ID was not found in the saga's pending queue.
    #[error("Command {id} is not in the pending queue")]
    UnknownCommand { id: CommandId },

    /// A payload could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
