//! Persistence port for saga state.
//!
//! Defines the [`SagaRepository`] contract consumed by the manager and the
//! recovery worker, and ships [`InMemorySagaRepository`] as the reference
//! adapter. Storage-engine drivers live outside this workspace; they only
//! need to satisfy the same contract, in particular the atomic
//! optimistic-concurrency check on save.

pub mod error;
pub mod memory;
pub mod repository;

pub use error::{Result, SagaStoreError};
pub use memory::InMemorySagaRepository;
pub use repository::{SagaRepository, correlation_key};
