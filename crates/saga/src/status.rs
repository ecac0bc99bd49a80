//! Saga lifecycle status machine.

use serde::{Deserialize, Serialize};

/// The status of a saga instance in its lifecycle.
///
/// Valid transitions:
/// ```text
/// Pending      ──► Running
/// Running      ──► Completed | Failed | Suspended | Compensating
/// Suspended    ──► Running
/// Failed       ──► Compensating
/// Compensating ──► Failed | Completed
/// ```
///
/// `Pending` is initial-only and `Completed` is terminal. Any transition
/// not listed is rejected without mutating the saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaStatus {
    /// Instance created, no event processed yet.
    #[default]
    Pending,

    /// Actively processing events.
    Running,

    /// Waiting on an external signal or timeout.
    Suspended,

    /// Finished, either by success or by a fully compensated rollback
    /// (terminal state).
    Completed,

    /// Stopped on an unrecoverable error; may still enter compensation.
    Failed,

    /// Compensating actions are being executed in reverse order.
    Compensating,
}

impl SagaStatus {
    /// Returns true if a transition from `self` to `to` is allowed.
    pub fn can_transition_to(self, to: SagaStatus) -> bool {
        use SagaStatus::{Compensating, Completed, Failed, Pending, Running, Suspended};
        matches!(
            (self, to),
            (Pending, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Suspended)
                | (Running, Compensating)
                | (Suspended, Running)
                | (Failed, Compensating)
                | (Compensating, Failed)
                | (Compensating, Completed)
        )
    }

    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaStatus::Completed)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Pending => "Pending",
            SagaStatus::Running => "Running",
            SagaStatus::Suspended => "Suspended",
            SagaStatus::Completed => "Completed",
            SagaStatus::Failed => "Failed",
            SagaStatus::Compensating => "Compensating",
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SagaStatus::*;

    const ALL: [SagaStatus; 6] = [Pending, Running, Suspended, Completed, Failed, Compensating];

    #[test]
    fn test_default_status_is_pending() {
        assert_eq!(SagaStatus::default(), Pending);
    }

    #[test]
    fn test_allowed_transitions() {
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(Running.can_transition_to(Suspended));
        assert!(Running.can_transition_to(Compensating));
        assert!(Suspended.can_transition_to(Running));
        assert!(Failed.can_transition_to(Compensating));
        assert!(Compensating.can_transition_to(Failed));
        assert!(Compensating.can_transition_to(Completed));
    }

    #[test]
    fn test_completed_is_a_dead_end() {
        for to in ALL {
            assert!(!Completed.can_transition_to(to), "Completed -> {to}");
        }
    }

    #[test]
    fn test_nothing_transitions_back_into_pending() {
        for from in ALL {
            assert!(!from.can_transition_to(Pending), "{from} -> Pending");
        }
    }

    #[test]
    fn test_self_transitions_rejected() {
        for status in ALL {
            assert!(!status.can_transition_to(status), "{status} -> {status}");
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(Completed.is_terminal());
        assert!(!Pending.is_terminal());
        assert!(!Running.is_terminal());
        assert!(!Suspended.is_terminal());
        assert!(!Failed.is_terminal());
        assert!(!Compensating.is_terminal());
    }

    #[test]
    fn test_display() {
        assert_eq!(Pending.to_string(), "Pending");
        assert_eq!(Running.to_string(), "Running");
        assert_eq!(Suspended.to_string(), "Suspended");
        assert_eq!(Completed.to_string(), "Completed");
        assert_eq!(Failed.to_string(), "Failed");
        assert_eq!(Compensating.to_string(), "Compensating");
    }

    #[test]
    fn test_serialization() {
        let status = SagaStatus::Compensating;
        let json = serde_json::to_string(&status).unwrap();
        let deserialized: SagaStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(status, deserialized);
    }
}
