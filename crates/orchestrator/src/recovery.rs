//! Background recovery sweeps for stuck sagas.
//!
//! Three failure shapes are repaired: suspensions whose timeout passed,
//! commands persisted but never confirmed handed to the mediator, and TCC
//! step windows that expired without confirmation. Every repair goes
//! through the same `Saga` methods as live processing, so the version
//! token and idempotency ledger stay honest.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use saga::{Saga, SagaRegistry, SagaState, TimeoutPolicy};
use saga_store::SagaRepository;
use tokio::sync::watch;

use crate::dispatch::forward_commands;
use crate::error::Result;
use crate::mediator::CommandMediator;

/// Tuning for the recovery worker.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Maximum sagas repaired per category per sweep.
    pub batch_size: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            batch_size: 50,
        }
    }
}

/// Counts from one recovery sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Suspended sagas resumed after their timeout.
    pub resumed: usize,
    /// Suspended sagas sent into compensation after their timeout.
    pub compensated: usize,
    /// Commands re-sent to the mediator.
    pub redispatched: usize,
    /// TCC steps compensated after their deadline.
    pub step_compensations: usize,
    /// Sagas skipped because a repair attempt errored.
    pub errors: usize,
}

/// Periodic repair loop over the saga store.
pub struct SagaRecoveryWorker<R, M> {
    registry: Arc<SagaRegistry>,
    repository: R,
    mediator: M,
    config: RecoveryConfig,
}

impl<R, M> SagaRecoveryWorker<R, M>
where
    R: SagaRepository,
    M: CommandMediator,
{
    /// Creates a worker over the same registry, repository, and mediator
    /// the manager uses.
    pub fn new(
        registry: Arc<SagaRegistry>,
        repository: R,
        mediator: M,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            registry,
            repository,
            mediator,
            config,
        }
    }

    /// Runs sweeps on the configured interval until shutdown is signalled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.sweep().await;
                    if report != SweepReport::default() {
                        tracing::info!(
                            resumed = report.resumed,
                            compensated = report.compensated,
                            redispatched = report.redispatched,
                            step_compensations = report.step_compensations,
                            errors = report.errors,
                            "recovery sweep repaired sagas"
                        );
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("recovery worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Runs one sweep over all three repair categories.
    ///
    /// Per-saga failures are logged and counted; the sweep always finishes
    /// the batch.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self) -> SweepReport {
        metrics::counter!("saga_recovery_sweeps_total").increment(1);
        let mut report = SweepReport::default();
        self.sweep_expired_suspensions(&mut report).await;
        self.sweep_stalled_commands(&mut report).await;
        self.sweep_tcc_timeouts(&mut report).await;
        report
    }

    async fn sweep_expired_suspensions(&self, report: &mut SweepReport) {
        let batch = match self
            .repository
            .find_expired_suspended(Utc::now(), self.config.batch_size)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(error = %e, "expired-suspension scan failed");
                report.errors += 1;
                return;
            }
        };

        for state in batch {
            let saga_id = state.id();
            let Some(mut saga) = self.rehydrate(state, report) else {
                continue;
            };
            let policy = saga.suspension_timeout_policy();

            let repaired: Result<()> = async {
                match policy {
                    TimeoutPolicy::Resume => {
                        saga.resume()?;
                        report.resumed += 1;
                    }
                    TimeoutPolicy::Compensate => {
                        // Compensating is only reachable through Running.
                        saga.resume()?;
                        if let Err(e) = saga.execute_compensations() {
                            // Parked in Failed for manual intervention.
                            saga.fail(format!("compensation failed: {e}"))?;
                            self.repository.save(saga.state_mut()).await?;
                            return Err(e.into());
                        }
                        report.compensated += 1;
                    }
                }
                self.repository.save(saga.state_mut()).await?;
                forward_commands(&self.repository, &self.mediator, &mut saga).await?;
                Ok(())
            }
            .await;

            if let Err(e) = repaired {
                tracing::warn!(saga_id = %saga_id, error = %e, "suspension repair failed");
                report.errors += 1;
            } else {
                metrics::counter!("saga_suspensions_recovered_total").increment(1);
            }
        }
    }

    async fn sweep_stalled_commands(&self, report: &mut SweepReport) {
        let batch = match self
            .repository
            .find_stalled_with_pending_commands(self.config.batch_size)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(error = %e, "stalled-command scan failed");
                report.errors += 1;
                return;
            }
        };

        for state in batch {
            let saga_id = state.id();
            let Some(mut saga) = self.rehydrate(state, report) else {
                continue;
            };

            let stalled: Vec<_> = saga
                .state()
                .pending_commands()
                .iter()
                .filter(|c| !c.dispatched)
                .cloned()
                .collect();

            let mut accepted = 0;
            let repaired: Result<()> = async {
                for command in &stalled {
                    match self.mediator.send(command).await {
                        Ok(()) => {
                            saga.mark_command_dispatched(command.id)?;
                            accepted += 1;
                        }
                        Err(e) => {
                            tracing::warn!(
                                saga_id = %saga_id,
                                command_id = %command.id,
                                error = %e,
                                "redispatch rejected, keeping for next sweep"
                            );
                        }
                    }
                }
                if accepted > 0 {
                    self.repository.save(saga.state_mut()).await?;
                }
                Ok(())
            }
            .await;

            match repaired {
                Ok(()) => report.redispatched += accepted,
                Err(e) => {
                    tracing::warn!(saga_id = %saga_id, error = %e, "redispatch bookkeeping failed");
                    report.errors += 1;
                }
            }
        }
    }

    async fn sweep_tcc_timeouts(&self, report: &mut SweepReport) {
        let now = Utc::now();
        let batch = match self
            .repository
            .find_tcc_timeouts(now, self.config.batch_size)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(error = %e, "step-deadline scan failed");
                report.errors += 1;
                return;
            }
        };

        for state in batch {
            let saga_id = state.id();
            let Some(mut saga) = self.rehydrate(state, report) else {
                continue;
            };

            let expired: Vec<String> = saga
                .state()
                .step_deadlines()
                .iter()
                .filter(|(_, deadline)| **deadline <= now)
                .map(|(step, _)| step.clone())
                .collect();

            let repaired: Result<usize> = async {
                let mut steps = 0;
                for step in &expired {
                    tracing::warn!(saga_id = %saga_id, step = %step, "step deadline expired, compensating");
                    saga.compensate_step(step)?;
                    steps += 1;
                }
                self.repository.save(saga.state_mut()).await?;
                forward_commands(&self.repository, &self.mediator, &mut saga).await?;
                Ok(steps)
            }
            .await;

            match repaired {
                Ok(steps) => {
                    report.step_compensations += steps;
                    metrics::counter!("saga_step_timeouts_total").increment(steps as u64);
                }
                Err(e) => {
                    tracing::warn!(saga_id = %saga_id, error = %e, "step compensation failed");
                    report.errors += 1;
                }
            }
        }
    }

    fn rehydrate(&self, state: SagaState, report: &mut SweepReport) -> Option<Saga> {
        match self.registry.behavior(state.saga_type()) {
            Some(behavior) => Some(Saga::new(state, behavior)),
            None => {
                tracing::error!(
                    saga_id = %state.id(),
                    saga_type = %state.saga_type(),
                    "no behavior registered, cannot repair"
                );
                report.errors += 1;
                None
            }
        }
    }
}
