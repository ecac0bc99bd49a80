//! Persisted state of one saga instance.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use common::SagaId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::{CommandEnvelope, CompensationAction};
use crate::error::{Result, SagaError};
use crate::status::SagaStatus;

/// Default failure-retry budget for new instances.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// One entry in the append-only step transition log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// Step name at the time of the transition.
    pub step: String,
    /// When the transition was recorded.
    pub timestamp: DateTime<Utc>,
    /// ID of the event that caused it, if any.
    pub event_ref: Option<String>,
}

/// The full persisted record of one saga instance.
///
/// Owned exclusively by one [`Saga`](crate::behavior::Saga); all mutation
/// goes through that wrapper's methods. Every mutating call advances
/// `updated_at` and increments `version` by exactly one, which is the
/// optimistic-concurrency token repositories check on save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaState {
    pub(crate) id: SagaId,
    pub(crate) saga_type: String,
    pub(crate) status: SagaStatus,
    pub(crate) current_step: String,
    pub(crate) step_history: Vec<StepRecord>,
    /// Idempotency ledger; only ever grows.
    pub(crate) processed_event_ids: HashSet<String>,
    /// Commands queued but not yet confirmed handed to the mediator.
    pub(crate) pending_commands: Vec<CommandEnvelope>,
    /// Undo actions, top of stack last; popped strictly LIFO.
    pub(crate) compensation_stack: Vec<CompensationAction>,
    pub(crate) suspended_at: Option<DateTime<Utc>>,
    pub(crate) suspension_reason: Option<String>,
    pub(crate) timeout_at: Option<DateTime<Utc>>,
    /// TCC step windows: step name to deadline.
    pub(crate) step_deadlines: HashMap<String, DateTime<Utc>>,
    pub(crate) retry_count: u32,
    pub(crate) max_retries: u32,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
    pub(crate) metadata: HashMap<String, Value>,
    pub(crate) correlation_id: Option<String>,
    pub(crate) version: u64,
    /// Version observed at load time; repository bookkeeping for the
    /// optimistic save check, never persisted.
    #[serde(skip)]
    pub(crate) base_version: u64,
}

impl SagaState {
    /// Creates a fresh `Pending` instance.
    pub fn new(id: SagaId, saga_type: impl Into<String>, correlation_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            saga_type: saga_type.into(),
            status: SagaStatus::Pending,
            current_step: "pending".to_string(),
            step_history: Vec::new(),
            processed_event_ids: HashSet::new(),
            pending_commands: Vec::new(),
            compensation_stack: Vec::new(),
            suspended_at: None,
            suspension_reason: None,
            timeout_at: None,
            step_deadlines: HashMap::new(),
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
            correlation_id,
            version: 0,
            base_version: 0,
        }
    }

    /// Records that this exact version is now persisted.
    ///
    /// Called by repositories after a successful save so a later save from
    /// the same in-memory copy passes the optimistic check.
    pub fn mark_persisted(&mut self) {
        self.base_version = self.version;
    }

    /// Applies a guarded status change. Rejected transitions leave the
    /// state untouched. Does not bump the version; the calling operation
    /// owns that.
    pub(crate) fn set_status(&mut self, to: SagaStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(SagaError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        tracing::debug!(saga_id = %self.id, from = %self.status, to = %to, "saga status transition");
        self.status = to;
        Ok(())
    }

    /// Advances the concurrency token and audit timestamp. The single
    /// place `version` is incremented; every mutating operation calls it
    /// exactly once.
    pub(crate) fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }
}

// Query methods
impl SagaState {
    /// Returns the saga instance ID.
    pub fn id(&self) -> SagaId {
        self.id
    }

    /// Returns the saga type discriminator.
    pub fn saga_type(&self) -> &str {
        &self.saga_type
    }

    /// Returns the lifecycle status.
    pub fn status(&self) -> SagaStatus {
        self.status
    }

    /// Returns the human-readable current step.
    pub fn current_step(&self) -> &str {
        &self.current_step
    }

    /// Returns the step transition log.
    pub fn step_history(&self) -> &[StepRecord] {
        &self.step_history
    }

    /// Returns true if the event ID is in the idempotency ledger.
    pub fn has_processed(&self, event_id: &str) -> bool {
        self.processed_event_ids.contains(event_id)
    }

    /// Returns the number of processed events.
    pub fn processed_event_count(&self) -> usize {
        self.processed_event_ids.len()
    }

    /// Returns the queued commands, dispatched or not.
    pub fn pending_commands(&self) -> &[CommandEnvelope] {
        &self.pending_commands
    }

    /// Returns true if any queued command was never confirmed dispatched.
    pub fn has_undispatched_commands(&self) -> bool {
        self.pending_commands.iter().any(|c| !c.dispatched)
    }

    /// Returns the compensation stack, top of stack last.
    pub fn compensation_stack(&self) -> &[CompensationAction] {
        &self.compensation_stack
    }

    /// Returns when the saga was suspended, if it is.
    pub fn suspended_at(&self) -> Option<DateTime<Utc>> {
        self.suspended_at
    }

    /// Returns the suspension reason, if any.
    pub fn suspension_reason(&self) -> Option<&str> {
        self.suspension_reason.as_deref()
    }

    /// Returns the suspension deadline, if one was set.
    pub fn timeout_at(&self) -> Option<DateTime<Utc>> {
        self.timeout_at
    }

    /// Returns the TCC step deadlines.
    pub fn step_deadlines(&self) -> &HashMap<String, DateTime<Utc>> {
        &self.step_deadlines
    }

    /// Returns the consumed retry count.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Returns the retry budget.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns when the instance was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the instance was last mutated.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns the free-form metadata map.
    pub fn metadata(&self) -> &HashMap<String, Value> {
        &self.metadata
    }

    /// Returns the correlation ID, if any.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Returns the optimistic-concurrency token.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns the version observed at load time.
    pub fn base_version(&self) -> u64 {
        self.base_version
    }
}
