//! Vendor dispatch client — the external message-sending provider seam.

use pulse_broker::{BoxFuture, MessageBroker};
use pulse_core::config::VendorConfig;
use pulse_core::types::{Customer, DeliveryStatus, VendorReceipt, VendorResponse,
    QUEUE_DELIVERY_RECEIPT};
use pulse_core::{PulseError, PulseResult};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};
use uuid::Uuid;

/// Hands one message to the provider. An `Ok` response is the vendor's
/// immediate acceptance; the delivery outcome arrives later as an
/// out-of-band receipt.
pub trait VendorClient: Send + Sync {
    fn send<'a>(
        &'a self,
        customer: &'a Customer,
        message: &'a str,
    ) -> BoxFuture<'a, PulseResult<VendorResponse>>;
}

/// Simulated provider: accepts `success_rate` of sends and schedules a
/// delivery receipt after a uniform 1–5 s delay. The receipt is re-published
/// onto the `delivery-receipt` queue through the broker seam rather than
/// fired from a bare timer. Receipts report DELIVERED unless
/// `receipt_failure_rate` draws a failure; a genuine vendor reports both.
pub struct SimulatedVendor {
    broker: Arc<dyn MessageBroker>,
    config: VendorConfig,
}

impl SimulatedVendor {
    pub fn new(broker: Arc<dyn MessageBroker>, config: VendorConfig) -> Self {
        Self { broker, config }
    }

    fn draw_receipt(&self) -> (Duration, DeliveryStatus) {
        let mut rng = rand::thread_rng();
        let min = self.config.receipt_delay_min_ms;
        let max = self.config.receipt_delay_max_ms.max(min);
        let delay = Duration::from_millis(rng.gen_range(min..=max));
        let status = if rng.gen::<f64>() < self.config.receipt_failure_rate {
            DeliveryStatus::Failed
        } else {
            DeliveryStatus::Delivered
        };
        (delay, status)
    }
}

impl VendorClient for SimulatedVendor {
    fn send<'a>(
        &'a self,
        customer: &'a Customer,
        _message: &'a str,
    ) -> BoxFuture<'a, PulseResult<VendorResponse>> {
        Box::pin(async move {
            let accepted = rand::thread_rng().gen::<f64>() < self.config.success_rate;
            if !accepted {
                metrics::counter!("vendor.rejected").increment(1);
                return Err(PulseError::Vendor(format!(
                    "provider rejected message for {}",
                    customer.email
                )));
            }

            let response = VendorResponse {
                message_id: format!("msg_{}", Uuid::new_v4().simple()),
                status: DeliveryStatus::Sent,
                timestamp: chrono::Utc::now(),
            };
            metrics::counter!("vendor.sent").increment(1);
            debug!(
                customer_id = %customer.id,
                message_id = %response.message_id,
                "Vendor accepted send"
            );

            let (delay, status) = self.draw_receipt();
            let receipt = VendorReceipt {
                message_id: response.message_id.clone(),
                status,
                timestamp: chrono::Utc::now(),
                metadata: serde_json::json!({
                    "device_info": "simulated-device",
                    "location": "simulated-location",
                }),
            };
            let payload = serde_json::to_vec(&receipt)?;
            if let Err(e) = self
                .broker
                .publish_after(QUEUE_DELIVERY_RECEIPT, payload, delay)
                .await
            {
                // The send already succeeded; a lost receipt leaves the log
                // in SENT, which the reconciler tolerates.
                error!(message_id = %response.message_id, error = %e, "Receipt scheduling failed");
            }

            Ok(response)
        })
    }
}
