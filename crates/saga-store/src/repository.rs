//! The saga repository port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::SagaId;
use saga::{EventEnvelope, SagaState};

use crate::Result;

/// Derives the deterministic business correlation key for an event.
///
/// The explicit correlation ID wins; without one the event ID itself keys
/// the instance, which pins uncorrelated events to single-event sagas.
pub fn correlation_key(event: &EventEnvelope) -> String {
    event
        .correlation_id
        .clone()
        .unwrap_or_else(|| event.id.clone())
}

/// Persists and loads saga state with optimistic concurrency.
///
/// Consumed by the manager for the live event-processing cycle and by the
/// recovery worker for its repair sweeps.
///
/// Every state an adapter hands out (from `load`, `find_by_id`, or the
/// recovery finders) must carry a base version equal to the version just
/// read, so a mutate-and-save on it passes the optimistic check. The base
/// version is not part of the serialized representation; a deserializing
/// driver gets it back as zero and must call
/// [`SagaState::mark_persisted`] on the freshly decoded state before
/// returning it.
#[async_trait]
pub trait SagaRepository: Send + Sync {
    /// Returns the in-flight instance for `(saga_type, correlation key)`,
    /// or a newly initialized `Pending` state. Deterministic: the same
    /// key always resolves to the same instance ID.
    async fn load(&self, saga_type: &str, event: &EventEnvelope) -> Result<SagaState>;

    /// Persists the state atomically.
    ///
    /// Fails with [`SagaStoreError::ConcurrencyConflict`] unless the
    /// currently persisted version equals the state's base version; the
    /// check and the write are one atomic step, never two round trips.
    /// On success the state's base version is refreshed via
    /// [`SagaState::mark_persisted`].
    ///
    /// [`SagaStoreError::ConcurrencyConflict`]: crate::SagaStoreError::ConcurrencyConflict
    async fn save(&self, state: &mut SagaState) -> Result<()>;

    /// Looks up one instance by ID. The returned state is save-ready:
    /// its base version reflects what is persisted.
    async fn find_by_id(&self, id: SagaId) -> Result<Option<SagaState>>;

    /// Returns up to `limit` suspended sagas whose timeout is in the past.
    async fn find_expired_suspended(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SagaState>>;

    /// Returns up to `limit` sagas holding commands that were persisted
    /// but never confirmed handed to the mediator.
    async fn find_stalled_with_pending_commands(&self, limit: usize) -> Result<Vec<SagaState>>;

    /// Returns up to `limit` non-completed sagas with at least one TCC
    /// step deadline in the past.
    async fn find_tcc_timeouts(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<SagaState>>;
}
