//! Event-type to saga-type routing.

use std::collections::HashMap;
use std::sync::Arc;

use crate::behavior::SagaBehavior;

/// Maps event type names to the saga types that react to them.
///
/// The mapping is many-to-many: one event may trigger several saga types,
/// and one saga type may listen to many event types. Registering the same
/// pair twice is harmless, and several saga types on one event type is
/// expected — that is how independent workflows choreograph.
///
/// A registry is an explicit, constructed object handed to the manager
/// and recovery worker; there is no process-global instance.
#[derive(Default)]
pub struct SagaRegistry {
    behaviors: HashMap<String, Arc<dyn SagaBehavior>>,
    by_event: HashMap<String, Vec<String>>,
}

impl SagaRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a behavior declaratively, mapping every event type it
    /// lists via [`SagaBehavior::event_types`].
    pub fn register(&mut self, behavior: Arc<dyn SagaBehavior>) {
        let saga_type = behavior.saga_type();
        for event_type in behavior.event_types() {
            self.map_event(event_type, saga_type);
        }
        self.behaviors.insert(saga_type.to_string(), behavior);
    }

    /// Adds an extra event-type mapping imperatively, on top of whatever
    /// the behavior declared.
    pub fn register_event_type(&mut self, event_type: &str, saga_type: &str) {
        self.map_event(event_type, saga_type);
    }

    /// Returns the behaviors that react to an event type, in registration
    /// order. Empty when nothing is mapped.
    pub fn behaviors_for(&self, event_type: &str) -> Vec<Arc<dyn SagaBehavior>> {
        self.by_event
            .get(event_type)
            .map(|types| {
                types
                    .iter()
                    .filter_map(|t| self.behaviors.get(t).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Looks up a behavior by saga type name.
    pub fn behavior(&self, saga_type: &str) -> Option<Arc<dyn SagaBehavior>> {
        self.behaviors.get(saga_type).cloned()
    }

    /// Returns the number of registered saga types.
    pub fn saga_type_count(&self) -> usize {
        self.behaviors.len()
    }

    fn map_event(&mut self, event_type: &str, saga_type: &str) {
        let types = self.by_event.entry(event_type.to_string()).or_default();
        if !types.iter().any(|t| t == saga_type) {
            types.push(saga_type.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::{Saga, TimeoutPolicy};
    use crate::envelope::EventEnvelope;
    use crate::error::Result;

    struct PaymentSaga;

    impl SagaBehavior for PaymentSaga {
        fn saga_type(&self) -> &'static str {
            "Payment"
        }

        fn event_types(&self) -> &'static [&'static str] {
            &["OrderPlaced", "PaymentCaptured"]
        }

        fn on_event(&self, _saga: &mut Saga, _event: &EventEnvelope) -> Result<()> {
            Ok(())
        }

        fn on_suspension_timeout(&self) -> TimeoutPolicy {
            TimeoutPolicy::Resume
        }
    }

    struct LoyaltySaga;

    impl SagaBehavior for LoyaltySaga {
        fn saga_type(&self) -> &'static str {
            "Loyalty"
        }

        fn event_types(&self) -> &'static [&'static str] {
            &["OrderPlaced"]
        }

        fn on_event(&self, _saga: &mut Saga, _event: &EventEnvelope) -> Result<()> {
            Ok(())
        }

        fn on_suspension_timeout(&self) -> TimeoutPolicy {
            TimeoutPolicy::Compensate
        }
    }

    #[test]
    fn test_declarative_registration_maps_all_event_types() {
        let mut registry = SagaRegistry::new();
        registry.register(Arc::new(PaymentSaga));

        assert_eq!(registry.saga_type_count(), 1);
        assert_eq!(registry.behaviors_for("OrderPlaced").len(), 1);
        assert_eq!(registry.behaviors_for("PaymentCaptured").len(), 1);
    }

    #[test]
    fn test_one_event_many_saga_types() {
        let mut registry = SagaRegistry::new();
        registry.register(Arc::new(PaymentSaga));
        registry.register(Arc::new(LoyaltySaga));

        let behaviors = registry.behaviors_for("OrderPlaced");
        assert_eq!(behaviors.len(), 2);
        let names: Vec<&str> = behaviors.iter().map(|b| b.saga_type()).collect();
        assert_eq!(names, ["Payment", "Loyalty"]);
    }

    #[test]
    fn test_imperative_registration_adds_mapping() {
        let mut registry = SagaRegistry::new();
        registry.register(Arc::new(PaymentSaga));
        registry.register_event_type("RefundRequested", "Payment");

        assert_eq!(registry.behaviors_for("RefundRequested").len(), 1);
    }

    #[test]
    fn test_duplicate_registration_is_deduped() {
        let mut registry = SagaRegistry::new();
        registry.register(Arc::new(PaymentSaga));
        registry.register_event_type("OrderPlaced", "Payment");
        registry.register(Arc::new(PaymentSaga));

        assert_eq!(registry.behaviors_for("OrderPlaced").len(), 1);
    }

    #[test]
    fn test_unknown_event_type_is_empty() {
        let registry = SagaRegistry::new();
        assert!(registry.behaviors_for("Nope").is_empty());
        assert!(registry.behavior("Nope").is_none());
    }

    #[test]
    fn test_behavior_lookup_by_name() {
        let mut registry = SagaRegistry::new();
        registry.register(Arc::new(PaymentSaga));

        let behavior = registry.behavior("Payment").unwrap();
        assert_eq!(behavior.saga_type(), "Payment");
    }
}
