//! Ingestion consumer — drains `customer-ingestion` into the record store.
//!
//! This queue runs under the drop-on-failure policy: a poison record must
//! not stall a bulk import behind endless redelivery.

use pulse_broker::{ConsumePolicy, MessageBroker};
use pulse_core::types::{Customer, CustomerDraft, IngestionMessage, QUEUE_CUSTOMER_INGESTION};
use pulse_core::{PulseError, PulseResult};
use pulse_store::CustomerStore;
use std::sync::Arc;
use tracing::{info, warn};

pub struct IngestionConsumer {
    customers: Arc<dyn CustomerStore>,
}

impl IngestionConsumer {
    pub fn new(customers: Arc<dyn CustomerStore>) -> Self {
        Self { customers }
    }

    /// Register on the broker and start consuming.
    pub async fn start(self: Arc<Self>, broker: &dyn MessageBroker) -> PulseResult<()> {
        let consumer = self.clone();
        broker
            .consume(
                QUEUE_CUSTOMER_INGESTION,
                ConsumePolicy::Drop,
                Arc::new(move |payload| {
                    let consumer = consumer.clone();
                    Box::pin(async move { consumer.handle(payload).await })
                }),
            )
            .await
    }

    async fn handle(&self, payload: Vec<u8>) -> PulseResult<()> {
        let message: IngestionMessage = serde_json::from_slice(&payload)?;
        match message {
            IngestionMessage::Create(draft) => {
                self.create(draft).await?;
            }
            IngestionMessage::BulkCreate(drafts) => {
                self.bulk_create(drafts).await;
            }
            IngestionMessage::Unknown => {
                warn!("Unknown customer ingestion message type, acknowledging");
            }
        }
        Ok(())
    }

    async fn create(&self, draft: CustomerDraft) -> PulseResult<Customer> {
        validate_draft(&draft)?;
        let customer = self.customers.insert(Customer::from_draft(draft)).await?;
        info!(customer_id = %customer.id, email = %customer.email, "Customer created");
        metrics::counter!("ingestion.customers_created").increment(1);
        Ok(customer)
    }

    /// Unordered batch insert: a bad record is logged and skipped, the rest
    /// of the batch proceeds.
    async fn bulk_create(&self, drafts: Vec<CustomerDraft>) {
        let mut created = 0usize;
        let mut failed = 0usize;
        for draft in drafts {
            match self.create(draft).await {
                Ok(_) => created += 1,
                Err(e) => {
                    warn!(error = %e, "Skipping record in bulk ingest");
                    metrics::counter!("ingestion.failures").increment(1);
                    failed += 1;
                }
            }
        }
        info!(created, failed, "Bulk customer creation completed");
    }
}

/// Boundary validation shared with the HTTP intake.
pub fn validate_draft(draft: &CustomerDraft) -> PulseResult<()> {
    if draft.name.trim().is_empty() {
        return Err(PulseError::Validation("customer name is required".into()));
    }
    if draft.email.trim().is_empty() || !draft.email.contains('@') {
        return Err(PulseError::Validation(format!(
            "invalid customer email '{}'",
            draft.email
        )));
    }
    Ok(())
}
