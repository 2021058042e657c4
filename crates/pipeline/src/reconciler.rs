//! Receipt reconciler — applies asynchronous delivery outcomes to
//! communication logs and rolls them into campaign aggregates.
//!
//! Receipts arrive on two equivalent paths: the vendor's HTTP callback
//! (keyed by vendor message id) and the `delivery-receipt` queue (either
//! shape). Application is idempotent per log: a duplicate receipt leaves
//! the log and the campaign counters untouched.

use chrono::Utc;
use pulse_broker::{ConsumePolicy, MessageBroker};
use pulse_core::types::{
    CommunicationLog, DeliveryStatus, DirectReceipt, ReceiptMessage, StatsDelta, VendorReceipt,
    QUEUE_DELIVERY_RECEIPT,
};
use pulse_core::{PulseError, PulseResult};
use pulse_store::{CampaignStore, CommunicationLogStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

pub struct ReceiptReconciler {
    campaigns: Arc<dyn CampaignStore>,
    logs: Arc<dyn CommunicationLogStore>,
}

impl ReceiptReconciler {
    pub fn new(campaigns: Arc<dyn CampaignStore>, logs: Arc<dyn CommunicationLogStore>) -> Self {
        Self { campaigns, logs }
    }

    /// Register the queue intake path on the broker.
    pub async fn start(
        self: Arc<Self>,
        broker: &dyn MessageBroker,
        max_attempts: u32,
    ) -> PulseResult<()> {
        let reconciler = self.clone();
        broker
            .consume(
                QUEUE_DELIVERY_RECEIPT,
                ConsumePolicy::Requeue { max_attempts },
                Arc::new(move |payload| {
                    let reconciler = reconciler.clone();
                    Box::pin(async move { reconciler.handle(payload).await })
                }),
            )
            .await
    }

    async fn handle(&self, payload: Vec<u8>) -> PulseResult<()> {
        let receipt: ReceiptMessage = serde_json::from_slice(&payload)?;
        let result = match receipt {
            ReceiptMessage::Vendor(receipt) => self.apply_vendor_receipt(receipt).await,
            ReceiptMessage::Direct(receipt) => self.apply_direct_receipt(receipt).await,
        };
        match result {
            Ok(_) => Ok(()),
            // A receipt for a log that does not exist can never apply;
            // requeueing it would only dead-letter later.
            Err(e) if e.is_fatal() => {
                warn!(error = %e, "Unmatchable receipt, dropping");
                metrics::counter!("reconciler.unmatched").increment(1);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Intake path (a): vendor callback, resolved by vendor message id.
    pub async fn apply_vendor_receipt(
        &self,
        receipt: VendorReceipt,
    ) -> PulseResult<CommunicationLog> {
        let log = self
            .logs
            .find_by_vendor_message_id(&receipt.message_id)
            .await?
            .ok_or_else(|| PulseError::NotFound("communication log", receipt.message_id.clone()))?;
        let raw = serde_json::to_value(&receipt)?;
        self.apply_receipt(log, receipt.status, raw, None).await
    }

    /// Intake path (b): queue-keyed receipt, resolved by (campaign, customer).
    pub async fn apply_direct_receipt(
        &self,
        receipt: DirectReceipt,
    ) -> PulseResult<CommunicationLog> {
        let log = self
            .logs
            .find_by_pair(receipt.campaign_id, receipt.customer_id)
            .await?
            .ok_or_else(|| {
                PulseError::NotFound(
                    "communication log",
                    format!("{}/{}", receipt.campaign_id, receipt.customer_id),
                )
            })?;
        let raw = serde_json::to_value(&receipt)?;
        self.apply_receipt(log, receipt.status, raw, receipt.error.clone())
            .await
    }

    /// Apply one receipt to one log. The duplicate check and the state
    /// transition run under the log's entry lock, so concurrent duplicate
    /// receipts cannot both increment the campaign counters.
    async fn apply_receipt(
        &self,
        log: CommunicationLog,
        status: DeliveryStatus,
        raw: serde_json::Value,
        error: Option<String>,
    ) -> PulseResult<CommunicationLog> {
        if !status.is_terminal() {
            return Err(PulseError::Validation(format!(
                "receipt status must be DELIVERED or FAILED, got {status:?}"
            )));
        }

        let applied = Arc::new(AtomicBool::new(false));
        let applied_in = applied.clone();
        let updated = self
            .logs
            .update(
                log.id,
                Box::new(move |l| {
                    if l.status == status {
                        // Duplicate receipt; leave the log untouched.
                        return;
                    }
                    if l.status == DeliveryStatus::Failed {
                        // Re-attempt of a previously failed delivery.
                        l.retry_count += 1;
                    }
                    l.status = status;
                    l.delivery_receipt = Some(raw);
                    l.last_attempt = Some(Utc::now());
                    if error.is_some() {
                        l.error = error;
                    }
                    applied_in.store(true, Ordering::SeqCst);
                }),
            )
            .await?
            .ok_or_else(|| PulseError::NotFound("communication log", log.id.to_string()))?;

        if !applied.load(Ordering::SeqCst) {
            metrics::counter!("reconciler.duplicates").increment(1);
            info!(log_id = %log.id, status = ?status, "Duplicate receipt ignored");
            return Ok(updated);
        }

        let delta = match status {
            DeliveryStatus::Delivered => StatsDelta {
                sent: 1,
                delivered: 1,
                failed: 0,
            },
            DeliveryStatus::Failed => StatsDelta {
                sent: 1,
                delivered: 0,
                failed: 1,
            },
            _ => unreachable!("terminal status checked above"),
        };
        self.campaigns
            .apply_stats_delta(log.campaign_id, delta)
            .await?;

        metrics::counter!("reconciler.receipts").increment(1);
        info!(
            log_id = %log.id,
            campaign_id = %log.campaign_id,
            status = ?status,
            "Delivery receipt reconciled"
        );
        Ok(updated)
    }
}
