//! Saga / process-manager orchestration core.
//!
//! This crate provides the pure coordination logic for long-running,
//! multi-step workflows driven by events and commands:
//!
//! - [`SagaStatus`] — the guarded lifecycle state machine
//! - [`SagaState`] — the persisted record of one saga instance
//! - [`Saga`] — the behavior wrapper mutating a [`SagaState`]
//! - [`SagaBehavior`] — the per-workflow event handling contract
//! - [`SagaRegistry`] — event type to saga type routing
//!
//! All of it is synchronous, in-memory logic. Persistence and command
//! hand-off live behind ports in the `saga-store` and `orchestrator`
//! crates.

pub mod behavior;
pub mod envelope;
pub mod error;
pub mod registry;
pub mod state;
pub mod status;

pub use behavior::{HandleOutcome, Saga, SagaBehavior, TimeoutPolicy};
pub use envelope::{CommandEnvelope, CompensationAction, EventEnvelope};
pub use error::{Result, SagaError};
pub use registry::SagaRegistry;
pub use state::{SagaState, StepRecord};
pub use status::SagaStatus;
