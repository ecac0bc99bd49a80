//! Saga orchestration: event routing, persistence cycles, command
//! hand-off, and background recovery.
//!
//! [`SagaManager`] drives the live path: an inbound event is routed via
//! the registry to every saga type listening, each instance is loaded by
//! correlation key, mutated through its behavior, persisted with an
//! optimistic version check, and its queued commands handed to the
//! [`CommandMediator`]. [`SagaRecoveryWorker`] sweeps the store for
//! whatever the live path left stuck.

pub mod error;
pub mod manager;
pub mod mediator;
pub mod order_fulfillment;
pub mod recovery;

mod dispatch;

pub use error::{OrchestrationError, Result};
pub use manager::{SagaManager, SagaOutcome};
pub use mediator::{CommandMediator, MediatorError, RecordingMediator};
pub use order_fulfillment::OrderFulfillmentSaga;
pub use recovery::{RecoveryConfig, SagaRecoveryWorker, SweepReport};
