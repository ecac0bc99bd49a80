//! Event, command, and compensation envelopes.
//!
//! These are the plain-data shapes exchanged at the saga core's boundary.
//! Events arrive from the outside; commands and compensation actions hold
//! no back-references to the saga that queued them.

use chrono::{DateTime, Utc};
use common::CommandId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An inbound domain event.
///
/// `event_type` is the dispatch discriminator and `id` the idempotency key;
/// the payload shape is saga-type-specific.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event identifier, used for idempotent redelivery.
    pub id: String,
    /// Event type name, used for registry routing and handler dispatch.
    pub event_type: String,
    /// Distributed-tracing thread, propagated to dispatched commands.
    pub correlation_id: Option<String>,
    /// Saga-type-specific payload.
    pub payload: Value,
    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,
}

impl EventEnvelope {
    /// Creates an event with a null payload and no correlation.
    pub fn new(id: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            event_type: event_type.into(),
            correlation_id: None,
            payload: Value::Null,
            occurred_at: Utc::now(),
        }
    }

    /// Sets the correlation ID.
    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Sets the payload.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

/// A command queued by a saga, persisted until its hand-off to the
/// mediator is confirmed.
///
/// `dispatched` is the per-command redispatch guard: recovery only resends
/// commands that were never confirmed handed off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Unique command identifier.
    pub id: CommandId,
    /// Command type name, routed by the mediator.
    pub command_type: String,
    /// Saga-type-specific payload.
    pub payload: Value,
    /// Correlation ID copied from the originating saga.
    pub correlation_id: Option<String>,
    /// True once the mediator accepted the command.
    pub dispatched: bool,
    /// When the command was queued.
    pub queued_at: DateTime<Utc>,
}

impl CommandEnvelope {
    pub(crate) fn new(
        command_type: impl Into<String>,
        payload: Value,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            id: CommandId::new(),
            command_type: command_type.into(),
            payload,
            correlation_id,
            dispatched: false,
            queued_at: Utc::now(),
        }
    }
}

/// One compensating action on the saga's undo stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationAction {
    /// The step this action undoes.
    pub step: String,
    /// Command type dispatched when the action runs.
    pub command_type: String,
    /// Payload for the compensating command.
    pub payload: Value,
    /// When true, `execute_compensations` stops after dispatching this
    /// action and waits for external confirmation; the remaining stack is
    /// the resumption point.
    pub awaits_confirmation: bool,
}

impl CompensationAction {
    /// Creates a fire-and-forget compensating action.
    pub fn new(step: impl Into<String>, command_type: impl Into<String>, payload: Value) -> Self {
        Self {
            step: step.into(),
            command_type: command_type.into(),
            payload,
            awaits_confirmation: false,
        }
    }

    /// Marks the action as requiring external confirmation before the
    /// rest of the stack may run.
    pub fn with_confirmation(mut self) -> Self {
        self.awaits_confirmation = true;
        self
    }
}
