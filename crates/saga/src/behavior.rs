//! Saga behavior wrapper and the per-workflow event handling contract.

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{CommandId, SagaId};
use serde_json::Value;

use crate::envelope::{CommandEnvelope, CompensationAction, EventEnvelope};
use crate::error::{Result, SagaError};
use crate::state::{SagaState, StepRecord};
use crate::status::SagaStatus;

/// What a suspended saga should do when its timeout expires.
///
/// Every saga type must pick a policy; the recovery worker never guesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// Resume processing from where the saga left off.
    Resume,
    /// Roll back via the compensation stack.
    Compensate,
}

/// Result of handing an event to a saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The event was applied and the state mutated.
    Applied,
    /// The event ID was already in the idempotency ledger; nothing changed.
    AlreadyProcessed,
}

/// The per-workflow contract a concrete saga type implements.
///
/// `on_event` should be an explicit match over `event.event_type`; routing
/// stays auditable and the compiler sees every arm. Behaviors are pure
/// logic over the [`Saga`] they are handed, never I/O.
pub trait SagaBehavior: Send + Sync {
    /// Discriminator used for registry lookup and state rehydration.
    fn saga_type(&self) -> &'static str;

    /// Event types this saga reacts to, for declarative registration.
    fn event_types(&self) -> &'static [&'static str];

    /// Applies one event to the saga. Called only after the idempotency
    /// check; any error rolls the saga back to its pre-event state.
    fn on_event(&self, saga: &mut Saga, event: &EventEnvelope) -> Result<()>;

    /// Policy applied by the recovery worker when a suspension times out.
    fn on_suspension_timeout(&self) -> TimeoutPolicy;
}

/// Wraps one [`SagaState`] and drives all mutation of it.
///
/// Holds no state of its own beyond the in-memory queue of commands
/// pending hand-off to the mediator. Every mutating method bumps the
/// state's version by exactly one.
pub struct Saga {
    state: SagaState,
    behavior: Arc<dyn SagaBehavior>,
    outbox: Vec<CommandEnvelope>,
}

impl Saga {
    /// Wraps a state with its behavior.
    pub fn new(state: SagaState, behavior: Arc<dyn SagaBehavior>) -> Self {
        Self {
            state,
            behavior,
            outbox: Vec::new(),
        }
    }

    /// Returns the saga instance ID.
    pub fn id(&self) -> SagaId {
        self.state.id
    }

    /// Returns a read-only view of the state.
    pub fn state(&self) -> &SagaState {
        &self.state
    }

    /// Returns the state for persistence hand-off.
    ///
    /// Mutable access exists so repositories can call
    /// [`SagaState::mark_persisted`] after a save; all domain mutation
    /// still goes through this wrapper.
    pub fn state_mut(&mut self) -> &mut SagaState {
        &mut self.state
    }

    /// Consumes the wrapper and returns the state.
    pub fn into_state(self) -> SagaState {
        self.state
    }

    /// Applies one inbound event as an atomic unit.
    ///
    /// The idempotency ledger is checked before anything else; a known
    /// event ID is a no-op. Otherwise the behavior's `on_event` runs, and
    /// the ledger, step history, and version are updated together. If the
    /// behavior fails, state and queued commands are rolled back to the
    /// pre-event snapshot.
    pub fn handle(&mut self, event: &EventEnvelope) -> Result<HandleOutcome> {
        if self.state.processed_event_ids.contains(&event.id) {
            tracing::debug!(saga_id = %self.state.id, event_id = %event.id, "event already processed");
            return Ok(HandleOutcome::AlreadyProcessed);
        }

        let snapshot = self.state.clone();
        let outbox_len = self.outbox.len();

        if let Err(e) = self.apply(event) {
            self.state = snapshot;
            self.outbox.truncate(outbox_len);
            return Err(e);
        }

        Ok(HandleOutcome::Applied)
    }

    fn apply(&mut self, event: &EventEnvelope) -> Result<()> {
        if self.state.status == SagaStatus::Pending {
            self.state.set_status(SagaStatus::Running)?;
        }

        let behavior = Arc::clone(&self.behavior);
        behavior.on_event(self, event)?;

        self.state.processed_event_ids.insert(event.id.clone());
        self.state.step_history.push(StepRecord {
            step: self.state.current_step.clone(),
            timestamp: Utc::now(),
            event_ref: Some(event.id.clone()),
        });
        self.state.touch();
        Ok(())
    }

    /// Queues a command carrying the saga's correlation ID.
    ///
    /// The command lands both in the in-memory hand-off queue and in the
    /// persisted `pending_commands`, so a save before the hand-off keeps
    /// it recoverable. Nothing is sent here.
    pub fn dispatch(&mut self, command_type: impl Into<String>, payload: Value) -> Result<CommandId> {
        self.ensure_mutable()?;
        let id = self.queue_command(command_type, payload);
        self.state.touch();
        Ok(id)
    }

    /// Returns and clears the in-memory hand-off queue.
    ///
    /// The orchestrator must call this exactly once per `handle`; a
    /// dropped call silently loses the cycle's commands.
    pub fn collect_commands(&mut self) -> Vec<CommandEnvelope> {
        std::mem::take(&mut self.outbox)
    }

    /// Flags a queued command as accepted by the mediator.
    ///
    /// Delivery bookkeeping is exempt from post-completion immutability:
    /// a saga may complete in the same cycle its commands go out.
    pub fn mark_command_dispatched(&mut self, id: CommandId) -> Result<()> {
        let command = self
            .state
            .pending_commands
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(SagaError::UnknownCommand { id })?;
        command.dispatched = true;
        self.state.touch();
        Ok(())
    }

    /// Suspends the saga, optionally with a timeout after which the
    /// recovery worker applies the type's [`TimeoutPolicy`].
    pub fn suspend(&mut self, reason: impl Into<String>, timeout: Option<Duration>) -> Result<()> {
        self.state.set_status(SagaStatus::Suspended)?;
        let now = Utc::now();
        self.state.suspended_at = Some(now);
        self.state.suspension_reason = Some(reason.into());
        self.state.timeout_at = timeout.map(|t| now + t);
        self.state.touch();
        Ok(())
    }

    /// Resumes a suspended saga and clears the suspension bookkeeping.
    pub fn resume(&mut self) -> Result<()> {
        self.state.set_status(SagaStatus::Running)?;
        self.state.suspended_at = None;
        self.state.suspension_reason = None;
        self.state.timeout_at = None;
        self.state.touch();
        Ok(())
    }

    /// Completes the saga. Only reachable from Running or Compensating.
    pub fn complete(&mut self) -> Result<()> {
        self.state.set_status(SagaStatus::Completed)?;
        self.state.touch();
        Ok(())
    }

    /// Fails the saga, recording the reason in `metadata.failure_reason`.
    ///
    /// A saga whose very first event fails goes through the Running gate
    /// on its way to Failed.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        if self.state.status == SagaStatus::Pending {
            self.state.set_status(SagaStatus::Running)?;
        }
        self.state.set_status(SagaStatus::Failed)?;
        self.state
            .metadata
            .insert("failure_reason".to_string(), Value::String(reason.into()));
        self.state.touch();
        Ok(())
    }

    /// Pushes an undo action onto the compensation stack.
    pub fn add_compensation(&mut self, action: CompensationAction) -> Result<()> {
        self.ensure_mutable()?;
        self.state.compensation_stack.push(action);
        self.state.touch();
        Ok(())
    }

    /// Runs the compensation stack, strictly last-in-first-out.
    ///
    /// Enters (or continues) Compensating, pops one action at a time and
    /// queues its command. An action awaiting confirmation stops the run
    /// with the rest of the stack intact; calling again resumes from the
    /// current stack top. Once the stack drains the saga completes.
    pub fn execute_compensations(&mut self) -> Result<()> {
        if self.state.status != SagaStatus::Compensating {
            self.state.set_status(SagaStatus::Compensating)?;
        }

        while let Some(action) = self.state.compensation_stack.pop() {
            tracing::debug!(saga_id = %self.state.id, step = %action.step, "compensating step");
            self.queue_command(action.command_type, action.payload);
            self.state.step_history.push(StepRecord {
                step: format!("compensate:{}", action.step),
                timestamp: Utc::now(),
                event_ref: None,
            });
            if action.awaits_confirmation {
                self.state.touch();
                return Ok(());
            }
        }

        self.state.set_status(SagaStatus::Completed)?;
        self.state.touch();
        Ok(())
    }

    /// Compensates a single time-boxed step without rolling back the
    /// whole saga.
    ///
    /// Removes and queues only the stack entries for `step`, most recent
    /// first, and clears the step's deadline. The overall status is left
    /// untouched. Returns the number of actions queued.
    pub fn compensate_step(&mut self, step: &str) -> Result<usize> {
        self.ensure_mutable()?;

        let mut kept = Vec::with_capacity(self.state.compensation_stack.len());
        let mut queued = 0;
        while let Some(action) = self.state.compensation_stack.pop() {
            if action.step == step {
                self.queue_command(action.command_type, action.payload);
                self.state.step_history.push(StepRecord {
                    step: format!("compensate:{step}"),
                    timestamp: Utc::now(),
                    event_ref: None,
                });
                queued += 1;
            } else {
                kept.push(action);
            }
        }
        kept.reverse();
        self.state.compensation_stack = kept;

        let had_deadline = self.state.step_deadlines.remove(step).is_some();
        if queued > 0 || had_deadline {
            self.state.touch();
        }
        Ok(queued)
    }

    /// Sets the human-readable current step.
    pub fn advance_to(&mut self, step: impl Into<String>) -> Result<()> {
        self.ensure_mutable()?;
        self.state.current_step = step.into();
        self.state.touch();
        Ok(())
    }

    /// Opens a TCC window: the step must confirm within `window` or the
    /// recovery worker compensates it.
    pub fn set_step_deadline(&mut self, step: impl Into<String>, window: Duration) -> Result<()> {
        self.ensure_mutable()?;
        self.state
            .step_deadlines
            .insert(step.into(), Utc::now() + window);
        self.state.touch();
        Ok(())
    }

    /// Confirms a TCC step, closing its window.
    pub fn confirm_step(&mut self, step: &str) -> Result<()> {
        self.ensure_mutable()?;
        self.state.step_deadlines.remove(step);
        self.state.touch();
        Ok(())
    }

    /// Returns the behavior's policy for an expired suspension.
    pub fn suspension_timeout_policy(&self) -> TimeoutPolicy {
        self.behavior.on_suspension_timeout()
    }

    /// Returns true if the retry budget is not exhausted.
    pub fn can_retry(&self) -> bool {
        self.state.retry_count < self.state.max_retries
    }

    /// Consumes one retry from the budget, noting the error.
    pub fn record_retry(&mut self, reason: impl Into<String>) -> Result<()> {
        self.ensure_mutable()?;
        self.state.retry_count += 1;
        self.state
            .metadata
            .insert("last_error".to_string(), Value::String(reason.into()));
        self.state.touch();
        Ok(())
    }

    /// Adds a metadata entry. Permitted even on a completed saga; audit
    /// annotations are the one exception to post-completion immutability.
    pub fn annotate(&mut self, key: impl Into<String>, value: Value) {
        self.state.metadata.insert(key.into(), value);
        self.state.touch();
    }

    fn queue_command(&mut self, command_type: impl Into<String>, payload: Value) -> CommandId {
        let command =
            CommandEnvelope::new(command_type, payload, self.state.correlation_id.clone());
        let id = command.id;
        self.outbox.push(command.clone());
        self.state.pending_commands.push(command);
        id
    }

    fn ensure_mutable(&self) -> Result<()> {
        if self.state.status.is_terminal() {
            return Err(SagaError::Completed { id: self.state.id });
        }
        Ok(())
    }
}
