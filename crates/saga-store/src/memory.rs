//! In-memory saga repository.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::SagaId;
use saga::{EventEnvelope, SagaState};
use tokio::sync::RwLock;

use crate::error::SagaStoreError;
use crate::repository::{SagaRepository, correlation_key};
use crate::Result;

#[derive(Default)]
struct Inner {
    states: HashMap<SagaId, SagaState>,
    /// (saga_type, correlation key) -> instance ID. Entries are created
    /// at load time so concurrent loads of the same key resolve to the
    /// same instance.
    index: HashMap<(String, String), SagaId>,
}

/// In-memory saga repository for testing.
///
/// Provides the same contract as a database-backed adapter: deterministic
/// correlation-keyed loads and an atomic check-and-store on save, done
/// under a single write guard.
#[derive(Clone, Default)]
pub struct InMemorySagaRepository {
    inner: Arc<RwLock<Inner>>,
}

impl InMemorySagaRepository {
    /// Creates a new empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of persisted saga instances.
    pub async fn saga_count(&self) -> usize {
        self.inner.read().await.states.len()
    }

    /// Clears all persisted state.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.states.clear();
        inner.index.clear();
    }
}

#[async_trait]
impl SagaRepository for InMemorySagaRepository {
    async fn load(&self, saga_type: &str, event: &EventEnvelope) -> Result<SagaState> {
        let key = correlation_key(event);
        let mut inner = self.inner.write().await;

        let index_key = (saga_type.to_string(), key.clone());
        let id = match inner.index.get(&index_key) {
            Some(id) => *id,
            None => {
                let id = SagaId::new();
                inner.index.insert(index_key, id);
                id
            }
        };

        if let Some(state) = inner.states.get(&id) {
            return Ok(state.clone());
        }
        Ok(SagaState::new(id, saga_type, Some(key)))
    }

    async fn save(&self, state: &mut SagaState) -> Result<()> {
        let mut inner = self.inner.write().await;

        match inner.states.get(&state.id()).map(SagaState::version) {
            Some(actual) if actual != state.base_version() => {
                return Err(SagaStoreError::ConcurrencyConflict {
                    saga_id: state.id(),
                    expected: state.base_version(),
                    actual,
                });
            }
            None if state.base_version() != 0 => {
                return Err(SagaStoreError::NotFound(state.id()));
            }
            _ => {}
        }

        state.mark_persisted();
        if let Some(correlation) = state.correlation_id() {
            let index_key = (state.saga_type().to_string(), correlation.to_string());
            inner.index.entry(index_key).or_insert(state.id());
        }
        inner.states.insert(state.id(), state.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: SagaId) -> Result<Option<SagaState>> {
        Ok(self.inner.read().await.states.get(&id).cloned())
    }

    async fn find_expired_suspended(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SagaState>> {
        let inner = self.inner.read().await;
        Ok(inner
            .states
            .values()
            .filter(|s| {
                s.status() == saga::SagaStatus::Suspended
                    && s.timeout_at().is_some_and(|t| t <= now)
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn find_stalled_with_pending_commands(&self, limit: usize) -> Result<Vec<SagaState>> {
        let inner = self.inner.read().await;
        Ok(inner
            .states
            .values()
            .filter(|s| s.has_undispatched_commands())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn find_tcc_timeouts(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<SagaState>> {
        let inner = self.inner.read().await;
        Ok(inner
            .states
            .values()
            .filter(|s| {
                !s.status().is_terminal() && s.step_deadlines().values().any(|d| *d <= now)
            })
            .take(limit)
            .cloned()
            .collect())
    }
}
