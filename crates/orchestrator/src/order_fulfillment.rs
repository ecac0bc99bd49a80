//! Reference workflow: order fulfillment.
//!
//! Reserve inventory, capture payment, create the shipment. Inventory
//! reservation is a TCC step: it must confirm within the reserve window
//! or the recovery worker releases it. A declined payment fails the saga;
//! compensation then refunds and releases in reverse order.

use chrono::Duration;
use saga::{
    CompensationAction, EventEnvelope, Result, Saga, SagaBehavior, SagaError, TimeoutPolicy,
};
use serde::Deserialize;
use serde_json::json;

/// Registry discriminator for this workflow.
pub const SAGA_TYPE: &str = "OrderFulfillment";

const STEP_RESERVE: &str = "reserve_inventory";
const STEP_PAYMENT: &str = "capture_payment";
const STEP_SHIPMENT: &str = "create_shipment";

#[derive(Debug, Deserialize)]
struct OrderPlacedData {
    order_id: String,
    amount_cents: u64,
}

/// The order fulfillment saga behavior.
pub struct OrderFulfillmentSaga {
    reserve_window: Duration,
}

impl OrderFulfillmentSaga {
    /// Creates the behavior with the default 15 minute reserve window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the inventory reserve window.
    pub fn with_reserve_window(reserve_window: Duration) -> Self {
        Self { reserve_window }
    }
}

impl Default for OrderFulfillmentSaga {
    fn default() -> Self {
        Self {
            reserve_window: Duration::minutes(15),
        }
    }
}

impl SagaBehavior for OrderFulfillmentSaga {
    fn saga_type(&self) -> &'static str {
        SAGA_TYPE
    }

    fn event_types(&self) -> &'static [&'static str] {
        &[
            "OrderPlaced",
            "InventoryReserved",
            "PaymentCaptured",
            "PaymentFailed",
            "ShipmentCreated",
        ]
    }

    fn on_event(&self, saga: &mut Saga, event: &EventEnvelope) -> Result<()> {
        match event.event_type.as_str() {
            "OrderPlaced" => {
                let data: OrderPlacedData = serde_json::from_value(event.payload.clone())?;

                saga.advance_to(STEP_RESERVE)?;
                saga.set_step_deadline(STEP_RESERVE, self.reserve_window)?;
                saga.add_compensation(CompensationAction::new(
                    STEP_RESERVE,
                    "ReleaseInventory",
                    json!({ "order_id": data.order_id }),
                ))?;
                saga.dispatch(
                    "ReserveInventory",
                    json!({ "order_id": data.order_id }),
                )?;

                saga.annotate("order_id", json!(data.order_id));
                saga.annotate("amount_cents", json!(data.amount_cents));
            }
            "InventoryReserved" => {
                let order_id = saga.state().metadata().get("order_id").cloned();
                let amount = saga.state().metadata().get("amount_cents").cloned();

                saga.confirm_step(STEP_RESERVE)?;
                saga.advance_to(STEP_PAYMENT)?;
                saga.add_compensation(CompensationAction::new(
                    STEP_PAYMENT,
                    "RefundPayment",
                    json!({ "order_id": order_id, "amount_cents": amount }),
                ))?;
                saga.dispatch(
                    "CapturePayment",
                    json!({ "order_id": order_id, "amount_cents": amount }),
                )?;
            }
            "PaymentCaptured" => {
                let order_id = saga.state().metadata().get("order_id").cloned();

                saga.advance_to(STEP_SHIPMENT)?;
                saga.dispatch("CreateShipment", json!({ "order_id": order_id }))?;
            }
            "ShipmentCreated" => {
                saga.complete()?;
            }
            "PaymentFailed" => {
                saga.fail("payment_declined")?;
            }
            other => {
                return Err(SagaError::Handler {
                    saga_type: SAGA_TYPE.to_string(),
                    reason: format!("unexpected event type: {other}"),
                });
            }
        }
        Ok(())
    }

    fn on_suspension_timeout(&self) -> TimeoutPolicy {
        TimeoutPolicy::Compensate
    }
}
