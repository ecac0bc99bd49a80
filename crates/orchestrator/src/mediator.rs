//! The command mediation port.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use saga::CommandEnvelope;
use thiserror::Error;

/// A hand-off to the command mediator failed.
///
/// The orchestrator treats this as transient: the command stays persisted
/// with `dispatched == false` and the recovery worker retries it.
#[derive(Debug, Error)]
#[error("Command mediation failed: {0}")]
pub struct MediatorError(pub String);

/// Hands saga commands to the outside world.
///
/// Implementations route by `command_type` onto whatever transport the
/// deployment uses. Acceptance, not completion: a returned `Ok` means the
/// mediator took responsibility for the command, nothing more.
#[async_trait]
pub trait CommandMediator: Send + Sync {
    async fn send(&self, command: &CommandEnvelope) -> Result<(), MediatorError>;
}

#[derive(Default)]
struct RecordingState {
    sent: Vec<CommandEnvelope>,
    fail_on_send: bool,
}

/// Test mediator that records every accepted command.
///
/// Clones share state, so a test can keep a handle while the manager owns
/// another.
#[derive(Clone, Default)]
pub struct RecordingMediator {
    state: Arc<RwLock<RecordingState>>,
}

impl RecordingMediator {
    /// Creates a new recording mediator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `send` fail until unset.
    pub fn set_fail_on_send(&self, fail: bool) {
        self.state.write().unwrap().fail_on_send = fail;
    }

    /// Returns the accepted commands in send order.
    pub fn sent(&self) -> Vec<CommandEnvelope> {
        self.state.read().unwrap().sent.clone()
    }

    /// Returns the number of accepted commands.
    pub fn sent_count(&self) -> usize {
        self.state.read().unwrap().sent.len()
    }
}

#[async_trait]
impl CommandMediator for RecordingMediator {
    async fn send(&self, command: &CommandEnvelope) -> Result<(), MediatorError> {
        let mut state = self.state.write().unwrap();
        if state.fail_on_send {
            return Err(MediatorError(format!(
                "simulated send failure for {}",
                command.command_type
            )));
        }
        state.sent.push(command.clone());
        Ok(())
    }
}
