//! End-to-end orchestration tests over the in-memory repository and the
//! recording mediator.

use std::sync::Arc;
use std::time::Duration;

use orchestrator::{
    OrderFulfillmentSaga, RecordingMediator, RecoveryConfig, SagaManager, SagaRecoveryWorker,
};
use saga::{
    CompensationAction, EventEnvelope, Result as SagaResult, Saga, SagaBehavior, SagaRegistry,
    SagaStatus, TimeoutPolicy,
};
use saga_store::{InMemorySagaRepository, SagaRepository};
use serde_json::json;
use tokio::sync::watch;

struct TestHarness {
    manager: SagaManager<InMemorySagaRepository, RecordingMediator>,
    worker: SagaRecoveryWorker<InMemorySagaRepository, RecordingMediator>,
    repository: InMemorySagaRepository,
    mediator: RecordingMediator,
}

impl TestHarness {
    fn new(registry: SagaRegistry) -> Self {
        let registry = Arc::new(registry);
        let repository = InMemorySagaRepository::new();
        let mediator = RecordingMediator::new();
        let manager = SagaManager::new(
            Arc::clone(&registry),
            repository.clone(),
            mediator.clone(),
        );
        let worker = SagaRecoveryWorker::new(
            registry,
            repository.clone(),
            mediator.clone(),
            RecoveryConfig {
                interval: Duration::from_millis(10),
                batch_size: 10,
            },
        );
        Self {
            manager,
            worker,
            repository,
            mediator,
        }
    }

    fn with_order_fulfillment() -> Self {
        let mut registry = SagaRegistry::new();
        registry.register(Arc::new(OrderFulfillmentSaga::new()));
        Self::new(registry)
    }

    fn sent_types(&self) -> Vec<String> {
        self.mediator
            .sent()
            .iter()
            .map(|c| c.command_type.clone())
            .collect()
    }
}

fn order_placed(id: &str) -> EventEnvelope {
    EventEnvelope::new(id, "OrderPlaced")
        .with_correlation("order-42")
        .with_payload(json!({ "order_id": "order-42", "amount_cents": 2599 }))
}

fn event(id: &str, event_type: &str) -> EventEnvelope {
    EventEnvelope::new(id, event_type).with_correlation("order-42")
}

#[tokio::test]
async fn test_happy_path_completes_and_dispatches_in_order() {
    let harness = TestHarness::with_order_fulfillment();

    let outcomes = harness.manager.handle_event(&order_placed("e1")).await;
    assert_eq!(outcomes.len(), 1);
    let saga_id = *outcomes[0].result.as_ref().unwrap();

    harness
        .manager
        .handle_event(&event("e2", "InventoryReserved"))
        .await;
    harness
        .manager
        .handle_event(&event("e3", "PaymentCaptured"))
        .await;
    harness
        .manager
        .handle_event(&event("e4", "ShipmentCreated"))
        .await;

    let state = harness.repository.find_by_id(saga_id).await.unwrap().unwrap();
    assert_eq!(state.status(), SagaStatus::Completed);
    assert_eq!(state.processed_event_count(), 4);
    assert!(!state.has_undispatched_commands());

    assert_eq!(
        harness.sent_types(),
        ["ReserveInventory", "CapturePayment", "CreateShipment"]
    );
}

#[tokio::test]
async fn test_payment_failure_then_explicit_compensation() {
    let harness = TestHarness::with_order_fulfillment();

    let outcomes = harness.manager.handle_event(&order_placed("e1")).await;
    let saga_id = *outcomes[0].result.as_ref().unwrap();

    let state = harness.repository.find_by_id(saga_id).await.unwrap().unwrap();
    assert_eq!(state.status(), SagaStatus::Running);

    harness
        .manager
        .handle_event(&event("e2", "PaymentFailed"))
        .await;
    let state = harness.repository.find_by_id(saga_id).await.unwrap().unwrap();
    assert_eq!(state.status(), SagaStatus::Failed);
    assert_eq!(
        state.metadata().get("failure_reason"),
        Some(&json!("payment_declined"))
    );

    harness.manager.compensate(saga_id).await.unwrap();

    let state = harness.repository.find_by_id(saga_id).await.unwrap().unwrap();
    assert_eq!(state.status(), SagaStatus::Completed);
    assert!(state.compensation_stack().is_empty());
    assert_eq!(harness.sent_types(), ["ReserveInventory", "ReleaseInventory"]);
}

#[tokio::test]
async fn test_redelivered_event_is_a_no_op() {
    let harness = TestHarness::with_order_fulfillment();

    let first = harness.manager.handle_event(&order_placed("e1")).await;
    let saga_id = *first[0].result.as_ref().unwrap();
    let version = harness
        .repository
        .find_by_id(saga_id)
        .await
        .unwrap()
        .unwrap()
        .version();

    let second = harness.manager.handle_event(&order_placed("e1")).await;
    assert_eq!(*second[0].result.as_ref().unwrap(), saga_id);

    let state = harness.repository.find_by_id(saga_id).await.unwrap().unwrap();
    assert_eq!(state.version(), version);
    assert_eq!(harness.mediator.sent_count(), 1);
}

#[tokio::test]
async fn test_unrouted_event_type_triggers_nothing() {
    let harness = TestHarness::with_order_fulfillment();
    let outcomes = harness
        .manager
        .handle_event(&event("e1", "SomethingUnrelated"))
        .await;
    assert!(outcomes.is_empty());
    assert_eq!(harness.repository.saga_count().await, 0);
}

#[tokio::test]
async fn test_handler_error_burns_a_retry() {
    let mut registry = SagaRegistry::new();
    registry.register(Arc::new(OrderFulfillmentSaga::new()));
    // route an event type the behavior does not expect
    registry.register_event_type("OddEvent", "OrderFulfillment");
    let harness = TestHarness::new(registry);

    let outcomes = harness.manager.handle_event(&order_placed("e1")).await;
    let saga_id = *outcomes[0].result.as_ref().unwrap();

    let outcomes = harness.manager.handle_event(&event("e2", "OddEvent")).await;
    assert!(outcomes[0].result.is_err());

    let state = harness.repository.find_by_id(saga_id).await.unwrap().unwrap();
    assert_eq!(state.retry_count(), 1);
    assert_eq!(state.status(), SagaStatus::Running);
    assert!(!state.has_processed("e2"));
}

#[tokio::test]
async fn test_recovery_redispatches_stalled_commands() {
    let harness = TestHarness::with_order_fulfillment();

    harness.mediator.set_fail_on_send(true);
    let outcomes = harness.manager.handle_event(&order_placed("e1")).await;
    let saga_id = *outcomes[0].result.as_ref().unwrap();

    let state = harness.repository.find_by_id(saga_id).await.unwrap().unwrap();
    assert!(state.has_undispatched_commands());
    assert_eq!(harness.mediator.sent_count(), 0);

    harness.mediator.set_fail_on_send(false);
    let report = harness.worker.sweep().await;
    assert_eq!(report.redispatched, 1);
    assert_eq!(report.errors, 0);

    let state = harness.repository.find_by_id(saga_id).await.unwrap().unwrap();
    assert!(!state.has_undispatched_commands());
    assert_eq!(harness.sent_types(), ["ReserveInventory"]);

    // a second sweep finds nothing to repair
    let report = harness.worker.sweep().await;
    assert_eq!(report.redispatched, 0);
}

#[tokio::test]
async fn test_recovery_compensates_expired_reserve_window() {
    let mut registry = SagaRegistry::new();
    registry.register(Arc::new(OrderFulfillmentSaga::with_reserve_window(
        chrono::Duration::minutes(-1),
    )));
    let harness = TestHarness::new(registry);

    let outcomes = harness.manager.handle_event(&order_placed("e1")).await;
    let saga_id = *outcomes[0].result.as_ref().unwrap();

    let report = harness.worker.sweep().await;
    assert_eq!(report.step_compensations, 1);

    let state = harness.repository.find_by_id(saga_id).await.unwrap().unwrap();
    assert!(state.step_deadlines().is_empty());
    assert!(state.compensation_stack().is_empty());
    // targeted step compensation leaves the saga itself running
    assert_eq!(state.status(), SagaStatus::Running);
    assert_eq!(harness.sent_types(), ["ReserveInventory", "ReleaseInventory"]);
}

/// Dispatches two commands from one event, for redispatch tests.
struct ProvisioningSaga;

impl SagaBehavior for ProvisioningSaga {
    fn saga_type(&self) -> &'static str {
        "Provisioning"
    }

    fn event_types(&self) -> &'static [&'static str] {
        &["ProvisionRequested"]
    }

    fn on_event(&self, saga: &mut Saga, event: &EventEnvelope) -> SagaResult<()> {
        match event.event_type.as_str() {
            "ProvisionRequested" => {
                saga.dispatch("CreateVm", json!({}))?;
                saga.dispatch("AttachDisk", json!({}))?;
                Ok(())
            }
            other => Err(saga::SagaError::Handler {
                saga_type: "Provisioning".to_string(),
                reason: format!("unexpected event type: {other}"),
            }),
        }
    }

    fn on_suspension_timeout(&self) -> TimeoutPolicy {
        TimeoutPolicy::Resume
    }
}

#[tokio::test]
async fn test_recovery_skips_already_dispatched_commands() {
    let mut registry = SagaRegistry::new();
    registry.register(Arc::new(ProvisioningSaga));
    let harness = TestHarness::new(registry);

    harness.mediator.set_fail_on_send(true);
    let outcomes = harness
        .manager
        .handle_event(&event("e1", "ProvisionRequested"))
        .await;
    let saga_id = *outcomes[0].result.as_ref().unwrap();

    // flag one of the two commands as already handed off
    let state = harness.repository.find_by_id(saga_id).await.unwrap().unwrap();
    let first_id = state.pending_commands()[0].id;
    let mut saga = Saga::new(state, Arc::new(ProvisioningSaga));
    saga.mark_command_dispatched(first_id).unwrap();
    harness.repository.save(saga.state_mut()).await.unwrap();

    harness.mediator.set_fail_on_send(false);
    let report = harness.worker.sweep().await;
    assert_eq!(report.redispatched, 1);

    // only the unflagged command went out
    assert_eq!(harness.sent_types(), ["AttachDisk"]);
    let state = harness.repository.find_by_id(saga_id).await.unwrap().unwrap();
    assert!(!state.has_undispatched_commands());
}

/// Suspends immediately with an already-expired timeout; the recovery
/// worker must roll it back.
struct ReviewHoldSaga;

impl SagaBehavior for ReviewHoldSaga {
    fn saga_type(&self) -> &'static str {
        "ReviewHold"
    }

    fn event_types(&self) -> &'static [&'static str] {
        &["OrderFlagged"]
    }

    fn on_event(&self, saga: &mut Saga, event: &EventEnvelope) -> SagaResult<()> {
        match event.event_type.as_str() {
            "OrderFlagged" => {
                saga.add_compensation(CompensationAction::new(
                    "review",
                    "ReleaseHold",
                    json!({}),
                ))?;
                saga.suspend("manual review", Some(chrono::Duration::minutes(-1)))?;
                Ok(())
            }
            other => Err(saga::SagaError::Handler {
                saga_type: "ReviewHold".to_string(),
                reason: format!("unexpected event type: {other}"),
            }),
        }
    }

    fn on_suspension_timeout(&self) -> TimeoutPolicy {
        TimeoutPolicy::Compensate
    }
}

#[tokio::test]
async fn test_recovery_applies_timeout_policy_to_expired_suspension() {
    let mut registry = SagaRegistry::new();
    registry.register(Arc::new(ReviewHoldSaga));
    let harness = TestHarness::new(registry);

    let outcomes = harness
        .manager
        .handle_event(&event("e1", "OrderFlagged"))
        .await;
    let saga_id = *outcomes[0].result.as_ref().unwrap();

    let state = harness.repository.find_by_id(saga_id).await.unwrap().unwrap();
    assert_eq!(state.status(), SagaStatus::Suspended);

    let report = harness.worker.sweep().await;
    assert_eq!(report.compensated, 1);
    assert_eq!(report.resumed, 0);

    let state = harness.repository.find_by_id(saga_id).await.unwrap().unwrap();
    assert_eq!(state.status(), SagaStatus::Completed);
    assert_eq!(harness.sent_types(), ["ReleaseHold"]);
}

/// Suspends awaiting an external quote; an expired wait just resumes.
struct SupplierQuoteSaga;

impl SagaBehavior for SupplierQuoteSaga {
    fn saga_type(&self) -> &'static str {
        "SupplierQuote"
    }

    fn event_types(&self) -> &'static [&'static str] {
        &["QuoteRequested"]
    }

    fn on_event(&self, saga: &mut Saga, event: &EventEnvelope) -> SagaResult<()> {
        match event.event_type.as_str() {
            "QuoteRequested" => {
                saga.suspend("awaiting supplier quote", Some(chrono::Duration::minutes(-10)))?;
                Ok(())
            }
            other => Err(saga::SagaError::Handler {
                saga_type: "SupplierQuote".to_string(),
                reason: format!("unexpected event type: {other}"),
            }),
        }
    }

    fn on_suspension_timeout(&self) -> TimeoutPolicy {
        TimeoutPolicy::Resume
    }
}

#[tokio::test]
async fn test_recovery_resumes_expired_suspension_with_resume_policy() {
    let mut registry = SagaRegistry::new();
    registry.register(Arc::new(SupplierQuoteSaga));
    let harness = TestHarness::new(registry);

    let outcomes = harness
        .manager
        .handle_event(&event("e1", "QuoteRequested"))
        .await;
    let saga_id = *outcomes[0].result.as_ref().unwrap();

    let state = harness.repository.find_by_id(saga_id).await.unwrap().unwrap();
    assert_eq!(state.status(), SagaStatus::Suspended);

    let report = harness.worker.sweep().await;
    assert_eq!(report.resumed, 1);
    assert_eq!(report.compensated, 0);

    let state = harness.repository.find_by_id(saga_id).await.unwrap().unwrap();
    assert_eq!(state.status(), SagaStatus::Running);
    assert!(state.suspended_at().is_none());
    assert!(state.suspension_reason().is_none());
    assert!(state.timeout_at().is_none());

    // nothing left for the next sweep
    let report = harness.worker.sweep().await;
    assert_eq!(report.resumed, 0);
}

/// Escrow reversal needs confirmation; a rejection fails the saga.
struct EscrowSaga;

impl SagaBehavior for EscrowSaga {
    fn saga_type(&self) -> &'static str {
        "Escrow"
    }

    fn event_types(&self) -> &'static [&'static str] {
        &["EscrowOpened", "RevertRejected"]
    }

    fn on_event(&self, saga: &mut Saga, event: &EventEnvelope) -> SagaResult<()> {
        match event.event_type.as_str() {
            "EscrowOpened" => {
                saga.add_compensation(
                    CompensationAction::new("escrow", "RevertEscrow", json!({}))
                        .with_confirmation(),
                )?;
                saga.suspend("awaiting release", Some(chrono::Duration::minutes(-5)))?;
                Ok(())
            }
            "RevertRejected" => {
                saga.fail("compensation failed: escrow revert rejected")?;
                Ok(())
            }
            other => Err(saga::SagaError::Handler {
                saga_type: "Escrow".to_string(),
                reason: format!("unexpected event type: {other}"),
            }),
        }
    }

    fn on_suspension_timeout(&self) -> TimeoutPolicy {
        TimeoutPolicy::Compensate
    }
}

#[tokio::test]
async fn test_rejected_compensation_parks_saga_failed() {
    let mut registry = SagaRegistry::new();
    registry.register(Arc::new(EscrowSaga));
    let harness = TestHarness::new(registry);

    let outcomes = harness
        .manager
        .handle_event(&event("e1", "EscrowOpened"))
        .await;
    let saga_id = *outcomes[0].result.as_ref().unwrap();

    // the expired suspension compensates, pausing on the confirmation
    let report = harness.worker.sweep().await;
    assert_eq!(report.compensated, 1);
    let state = harness.repository.find_by_id(saga_id).await.unwrap().unwrap();
    assert_eq!(state.status(), SagaStatus::Compensating);
    assert_eq!(harness.sent_types(), ["RevertEscrow"]);

    // the compensating action itself fails
    let outcomes = harness
        .manager
        .handle_event(&event("e2", "RevertRejected"))
        .await;
    assert!(outcomes[0].result.is_ok());

    let state = harness.repository.find_by_id(saga_id).await.unwrap().unwrap();
    assert_eq!(state.status(), SagaStatus::Failed);
    assert_eq!(
        state.metadata().get("failure_reason"),
        Some(&json!("compensation failed: escrow revert rejected"))
    );
}

#[tokio::test]
async fn test_one_event_fans_out_to_independent_sagas() {
    let mut registry = SagaRegistry::new();
    registry.register(Arc::new(OrderFulfillmentSaga::new()));
    registry.register(Arc::new(ReviewHoldSaga));
    registry.register_event_type("OrderPlaced", "ReviewHold");
    let harness = TestHarness::new(registry);

    let outcomes = harness.manager.handle_event(&order_placed("e1")).await;
    assert_eq!(outcomes.len(), 2);
    // the fulfillment saga succeeds even though the hold saga rejects
    // the event type
    assert!(outcomes[0].result.is_ok());
    assert_eq!(outcomes[0].saga_type, "OrderFulfillment");
    assert!(outcomes[1].result.is_err());
    assert_eq!(outcomes[1].saga_type, "ReviewHold");
}

#[tokio::test]
async fn test_worker_loop_stops_on_shutdown() {
    let harness = TestHarness::with_order_fulfillment();
    let (tx, rx) = watch::channel(false);

    let worker = harness.worker;
    let handle = tokio::spawn(async move { worker.run(rx).await });

    tokio::time::sleep(Duration::from_millis(30)).await;
    tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("worker should stop on shutdown signal")
        .unwrap();
}

#[tokio::test]
async fn test_compensate_unknown_saga_fails() {
    let harness = TestHarness::with_order_fulfillment();
    let err = harness
        .manager
        .compensate(common::SagaId::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        orchestrator::OrchestrationError::SagaNotFound(_)
    ));
}
