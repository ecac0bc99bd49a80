//! The saga manager: routes events, drives handling, persists, dispatches.

use std::sync::Arc;

use common::SagaId;
use saga::{EventEnvelope, HandleOutcome, Saga, SagaBehavior, SagaRegistry};
use saga_store::SagaRepository;

use crate::dispatch::forward_commands;
use crate::error::{OrchestrationError, Result};
use crate::mediator::CommandMediator;

/// What happened to one saga type during [`SagaManager::handle_event`].
#[derive(Debug)]
pub struct SagaOutcome {
    /// The saga type that was triggered.
    pub saga_type: String,
    /// The instance ID on success, or what went wrong.
    pub result: Result<SagaId>,
}

/// Drives the live event-processing cycle.
///
/// For each registered saga type the cycle is: load by correlation key,
/// hand the event to the behavior, persist, then forward queued commands
/// to the mediator. Saga types are isolated from each other; one failing
/// never blocks the rest.
pub struct SagaManager<R, M> {
    registry: Arc<SagaRegistry>,
    repository: R,
    mediator: M,
}

impl<R, M> SagaManager<R, M>
where
    R: SagaRepository,
    M: CommandMediator,
{
    /// Creates a manager over a registry, repository, and mediator.
    pub fn new(registry: Arc<SagaRegistry>, repository: R, mediator: M) -> Self {
        Self {
            registry,
            repository,
            mediator,
        }
    }

    /// Routes one inbound event to every saga type registered for it.
    ///
    /// Returns one outcome per triggered saga type, in registration order.
    /// An event type nothing listens to yields an empty vec.
    #[tracing::instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn handle_event(&self, event: &EventEnvelope) -> Vec<SagaOutcome> {
        let behaviors = self.registry.behaviors_for(&event.event_type);
        if behaviors.is_empty() {
            tracing::debug!("no saga types registered for event type");
            return Vec::new();
        }

        let mut outcomes = Vec::with_capacity(behaviors.len());
        for behavior in behaviors {
            let saga_type = behavior.saga_type().to_string();
            let result = self.run_cycle(behavior, event).await;
            if let Err(e) = &result {
                tracing::error!(saga_type = %saga_type, error = %e, "saga event cycle failed");
                metrics::counter!("saga_event_failures_total").increment(1);
            }
            outcomes.push(SagaOutcome { saga_type, result });
        }
        outcomes
    }

    /// Starts (or continues) a single named saga type from an event,
    /// bypassing registry routing.
    pub async fn start_saga(&self, saga_type: &str, event: &EventEnvelope) -> Result<SagaId> {
        let behavior = self
            .registry
            .behavior(saga_type)
            .ok_or_else(|| OrchestrationError::UnknownSagaType(saga_type.to_string()))?;
        self.run_cycle(behavior, event).await
    }

    /// Runs the compensation stack of a failed saga and forwards the
    /// resulting commands.
    #[tracing::instrument(skip(self), fields(saga_id = %saga_id))]
    pub async fn compensate(&self, saga_id: SagaId) -> Result<()> {
        let state = self
            .repository
            .find_by_id(saga_id)
            .await?
            .ok_or(OrchestrationError::SagaNotFound(saga_id))?;
        let behavior = self
            .registry
            .behavior(state.saga_type())
            .ok_or_else(|| OrchestrationError::UnknownSagaType(state.saga_type().to_string()))?;

        let mut saga = Saga::new(state, behavior);
        if let Err(e) = saga.execute_compensations() {
            // A failed compensation parks the saga in Failed for manual
            // intervention; persist that before surfacing the error.
            if saga.fail(format!("compensation failed: {e}")).is_ok() {
                self.repository.save(saga.state_mut()).await?;
                metrics::counter!("saga_failures_total").increment(1);
            }
            return Err(e.into());
        }
        self.repository.save(saga.state_mut()).await?;
        forward_commands(&self.repository, &self.mediator, &mut saga).await?;

        metrics::counter!("saga_compensations_total").increment(1);
        Ok(())
    }

    async fn run_cycle(
        &self,
        behavior: Arc<dyn SagaBehavior>,
        event: &EventEnvelope,
    ) -> Result<SagaId> {
        let state = self.repository.load(behavior.saga_type(), event).await?;
        let mut saga = Saga::new(state, behavior);
        let id = saga.id();

        match saga.handle(event) {
            Ok(HandleOutcome::AlreadyProcessed) => {
                metrics::counter!("saga_events_duplicate_total").increment(1);
                return Ok(id);
            }
            Ok(HandleOutcome::Applied) => {}
            Err(e) => {
                // The failed handler rolled the saga back; burn a retry so
                // redelivery can try again, or fail it once the budget is
                // spent. Either way the error reaches the caller.
                if saga.can_retry() {
                    saga.record_retry(e.to_string())?;
                } else {
                    saga.fail(format!("retry budget exhausted: {e}"))?;
                    metrics::counter!("saga_failures_total").increment(1);
                }
                self.repository.save(saga.state_mut()).await?;
                return Err(e.into());
            }
        }

        self.repository.save(saga.state_mut()).await?;
        forward_commands(&self.repository, &self.mediator, &mut saga).await?;

        metrics::counter!("saga_events_total").increment(1);
        Ok(id)
    }
}
