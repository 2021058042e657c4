//! Campaign dispatcher — fans a `new-campaign` event out to every customer
//! matching the target segment.
//!
//! Side-effect ordering: all PENDING logs are created and
//! `stats.total_audience` is durably persisted before any vendor send
//! begins, because the fan-out is fire-and-forget and completes out of
//! order. The triggering message is acknowledged once the logs exist, not
//! once delivery finishes.

use crate::vendor::VendorClient;
use chrono::Utc;
use pulse_broker::{ConsumePolicy, MessageBroker};
use pulse_core::types::{
    Campaign, CampaignStatus, CommunicationLog, Customer, DeliveryMessage, DeliveryStatus,
    NewCampaign, StatsDelta, QUEUE_CAMPAIGN_DELIVERY,
};
use pulse_core::PulseResult;
use pulse_store::{CampaignStore, CommunicationLogStore, CustomerStore, SegmentStore};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub struct CampaignDispatcher {
    customers: Arc<dyn CustomerStore>,
    segments: Arc<dyn SegmentStore>,
    campaigns: Arc<dyn CampaignStore>,
    logs: Arc<dyn CommunicationLogStore>,
    vendor: Arc<dyn VendorClient>,
}

impl CampaignDispatcher {
    pub fn new(
        customers: Arc<dyn CustomerStore>,
        segments: Arc<dyn SegmentStore>,
        campaigns: Arc<dyn CampaignStore>,
        logs: Arc<dyn CommunicationLogStore>,
        vendor: Arc<dyn VendorClient>,
    ) -> Self {
        Self {
            customers,
            segments,
            campaigns,
            logs,
            vendor,
        }
    }

    /// Register on the broker. Transient failures requeue up to the bound;
    /// missing-reference failures are dropped inside the handler.
    pub async fn start(
        self: Arc<Self>,
        broker: &dyn MessageBroker,
        max_attempts: u32,
    ) -> PulseResult<()> {
        let dispatcher = self.clone();
        broker
            .consume(
                QUEUE_CAMPAIGN_DELIVERY,
                ConsumePolicy::Requeue { max_attempts },
                Arc::new(move |payload| {
                    let dispatcher = dispatcher.clone();
                    Box::pin(async move { dispatcher.handle(payload).await })
                }),
            )
            .await
    }

    async fn handle(&self, payload: Vec<u8>) -> PulseResult<()> {
        let message: DeliveryMessage = serde_json::from_slice(&payload)?;
        match message {
            DeliveryMessage::NewCampaign(event) => self.dispatch(event).await,
            DeliveryMessage::Unknown => {
                warn!("Unknown campaign delivery message type, acknowledging");
                Ok(())
            }
        }
    }

    /// Resolve the audience, create one PENDING log per customer, persist
    /// the audience size, then fan out sends as independent tasks.
    pub async fn dispatch(&self, event: NewCampaign) -> PulseResult<()> {
        // A campaign or segment that vanished between enqueue and dispatch
        // is fatal: retrying cannot succeed, so ack and drop.
        let Some(campaign) = self.campaigns.get(event.campaign_id).await? else {
            error!(campaign_id = %event.campaign_id, "Campaign missing at dispatch, dropping");
            metrics::counter!("dispatch.missing_reference").increment(1);
            return Ok(());
        };
        let Some(segment) = self.segments.get(event.segment_id).await? else {
            error!(segment_id = %event.segment_id, "Segment missing at dispatch, dropping");
            metrics::counter!("dispatch.missing_reference").increment(1);
            return Ok(());
        };

        let matching: Vec<Customer> = self
            .customers
            .all()
            .await?
            .into_iter()
            .filter(|c| pulse_segmentation::matches(&segment, c))
            .collect();

        let mut pending = Vec::with_capacity(matching.len());
        for customer in &matching {
            let log = self
                .logs
                .insert(pending_log(&campaign, &event, customer))
                .await?;
            pending.push(log);
        }

        self.campaigns
            .set_total_audience(campaign.id, matching.len() as u64)
            .await?;
        self.campaigns
            .set_status(campaign.id, CampaignStatus::Running)
            .await?;

        info!(
            campaign_id = %campaign.id,
            segment_id = %segment.id,
            audience = matching.len(),
            "Campaign dispatch starting"
        );
        metrics::counter!("dispatch.campaigns").increment(1);
        metrics::counter!("dispatch.audience").increment(matching.len() as u64);

        for (customer, log) in matching.into_iter().zip(pending) {
            let vendor = self.vendor.clone();
            let logs = self.logs.clone();
            let campaigns = self.campaigns.clone();
            tokio::spawn(async move {
                send_one(vendor, logs, campaigns, customer, log).await;
            });
        }

        Ok(())
    }
}

fn pending_log(campaign: &Campaign, event: &NewCampaign, customer: &Customer) -> CommunicationLog {
    CommunicationLog {
        id: Uuid::new_v4(),
        campaign_id: campaign.id,
        segment_id: campaign.segment_id,
        customer_id: customer.id,
        message: render_message(&event.message, customer),
        status: DeliveryStatus::Pending,
        vendor_response: None,
        delivery_receipt: None,
        error: None,
        retry_count: 0,
        last_attempt: None,
        created_by: campaign.created_by,
        created_at: Utc::now(),
    }
}

fn render_message(template: &str, customer: &Customer) -> String {
    template.replace("{name}", &customer.name)
}

/// One customer's send, isolated from its siblings: an immediate vendor
/// rejection records a FAILED log and rolls into the campaign counters
/// (rejected sends never produce a receipt), while acceptance moves the log
/// to SENT and leaves the outcome to the receipt reconciler.
async fn send_one(
    vendor: Arc<dyn VendorClient>,
    logs: Arc<dyn CommunicationLogStore>,
    campaigns: Arc<dyn CampaignStore>,
    customer: Customer,
    log: CommunicationLog,
) {
    match vendor.send(&customer, &log.message).await {
        Ok(response) => {
            let result = logs
                .update(
                    log.id,
                    Box::new(move |l| {
                        l.status = DeliveryStatus::Sent;
                        l.vendor_response = Some(response);
                        l.last_attempt = Some(Utc::now());
                    }),
                )
                .await;
            if let Err(e) = result {
                error!(log_id = %log.id, error = %e, "Failed to record vendor acceptance");
            }
        }
        Err(e) => {
            warn!(
                campaign_id = %log.campaign_id,
                customer_id = %customer.id,
                error = %e,
                "Vendor send failed"
            );
            let reason = e.to_string();
            let result = logs
                .update(
                    log.id,
                    Box::new(move |l| {
                        l.status = DeliveryStatus::Failed;
                        l.error = Some(reason);
                        l.last_attempt = Some(Utc::now());
                    }),
                )
                .await;
            if let Err(e) = result {
                error!(log_id = %log.id, error = %e, "Failed to record vendor rejection");
            }
            if let Err(e) = campaigns
                .apply_stats_delta(
                    log.campaign_id,
                    StatsDelta {
                        sent: 1,
                        delivered: 0,
                        failed: 1,
                    },
                )
                .await
            {
                error!(campaign_id = %log.campaign_id, error = %e, "Failed to roll up rejection");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_broker::BoxFuture;
    use pulse_core::types::{Group, GroupLogic, Rule, RuleOperator, Segment, VendorResponse};
    use pulse_core::PulseError;
    use pulse_store::{
        InMemoryCampaignStore, InMemoryCommunicationLogStore, InMemoryCustomerStore,
        InMemorySegmentStore,
    };
    use serde_json::json;
    use std::time::Duration;

    /// Accepts everything except customers whose email is listed.
    struct ScriptedVendor {
        reject: Vec<String>,
    }

    impl VendorClient for ScriptedVendor {
        fn send<'a>(
            &'a self,
            customer: &'a Customer,
            _message: &'a str,
        ) -> BoxFuture<'a, PulseResult<VendorResponse>> {
            Box::pin(async move {
                if self.reject.contains(&customer.email) {
                    return Err(PulseError::Vendor("scripted rejection".into()));
                }
                Ok(VendorResponse {
                    message_id: format!("msg_{}", Uuid::new_v4().simple()),
                    status: DeliveryStatus::Sent,
                    timestamp: Utc::now(),
                })
            })
        }
    }

    struct Fixture {
        customers: Arc<InMemoryCustomerStore>,
        segments: Arc<InMemorySegmentStore>,
        campaigns: Arc<InMemoryCampaignStore>,
        logs: Arc<InMemoryCommunicationLogStore>,
    }

    impl Fixture {
        fn dispatcher(&self, vendor: Arc<dyn VendorClient>) -> CampaignDispatcher {
            CampaignDispatcher::new(
                self.customers.clone(),
                self.segments.clone(),
                self.campaigns.clone(),
                self.logs.clone(),
                vendor,
            )
        }
    }

    fn fixture() -> Fixture {
        Fixture {
            customers: Arc::new(InMemoryCustomerStore::new()),
            segments: Arc::new(InMemorySegmentStore::new()),
            campaigns: Arc::new(InMemoryCampaignStore::new()),
            logs: Arc::new(InMemoryCommunicationLogStore::new()),
        }
    }

    fn customer(name: &str, total_spent: f64) -> Customer {
        let now = Utc::now();
        Customer {
            id: Uuid::new_v4(),
            name: name.into(),
            email: format!("{}@example.com", name.to_lowercase()),
            phone: None,
            total_spent,
            visit_count: 0,
            last_visit: None,
            tags: Vec::new(),
            custom_fields: Default::default(),
            created_at: now,
            updated_at: now,
        }
    }

    fn big_spenders_segment() -> Segment {
        let now = Utc::now();
        Segment {
            id: Uuid::new_v4(),
            name: "big spenders".into(),
            description: None,
            rules: vec![Rule {
                field: "totalSpent".into(),
                operator: RuleOperator::GreaterThan,
                value: json!("100"),
                group_id: "g1".into(),
            }],
            groups: vec![Group {
                id: "g1".into(),
                logic: GroupLogic::And,
            }],
            rule_logic: GroupLogic::And,
            customer_count: 0,
            created_by: Uuid::new_v4(),
            last_evaluated: None,
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn campaign(segment_id: Uuid) -> Campaign {
        let now = Utc::now();
        Campaign {
            id: Uuid::new_v4(),
            name: "spring promo".into(),
            description: None,
            segment_id,
            message: "Hi {name}, here's 10% off!".into(),
            status: CampaignStatus::Draft,
            schedule_time: None,
            stats: Default::default(),
            created_by: Uuid::new_v4(),
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    async fn seed(fx: &Fixture) -> (Campaign, Segment) {
        let segment = fx.segments.insert(big_spenders_segment()).await.unwrap();
        let campaign = fx.campaigns.insert(campaign(segment.id)).await.unwrap();
        for c in [
            customer("Ada", 150.0),
            customer("Bob", 500.0),
            customer("Cyd", 120.0),
            customer("Dee", 20.0), // below threshold, out of audience
        ] {
            fx.customers.insert(c).await.unwrap();
        }
        (campaign, segment)
    }

    fn event(campaign: &Campaign, segment: &Segment) -> NewCampaign {
        NewCampaign {
            campaign_id: campaign.id,
            segment_id: segment.id,
            message: campaign.message.clone(),
        }
    }

    #[tokio::test]
    async fn dispatch_creates_one_pending_log_per_match() {
        let fx = fixture();
        let (campaign, segment) = seed(&fx).await;
        let dispatcher = fx.dispatcher(Arc::new(ScriptedVendor { reject: vec![] }));

        dispatcher.dispatch(event(&campaign, &segment)).await.unwrap();

        let logs = fx.logs.find_by_campaign(campaign.id).await.unwrap();
        assert_eq!(logs.len(), 3);

        let stored = fx.campaigns.get(campaign.id).await.unwrap().unwrap();
        assert_eq!(stored.stats.total_audience, 3);
        assert_eq!(stored.status, CampaignStatus::Running);

        // Sends settle asynchronously; every accepted log carries the
        // rendered message and a vendor message id.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let logs = fx.logs.find_by_campaign(campaign.id).await.unwrap();
        assert!(logs.iter().all(|l| l.status == DeliveryStatus::Sent));
        assert!(logs.iter().all(|l| l.vendor_response.is_some()));
        assert!(logs.iter().any(|l| l.message == "Hi Ada, here's 10% off!"));
    }

    #[tokio::test]
    async fn one_rejection_does_not_abort_sibling_sends() {
        let fx = fixture();
        let (campaign, segment) = seed(&fx).await;
        let dispatcher = fx.dispatcher(Arc::new(ScriptedVendor {
            reject: vec!["bob@example.com".into()],
        }));

        dispatcher.dispatch(event(&campaign, &segment)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let logs = fx.logs.find_by_campaign(campaign.id).await.unwrap();
        assert_eq!(logs.len(), 3);
        let failed: Vec<_> = logs
            .iter()
            .filter(|l| l.status == DeliveryStatus::Failed)
            .collect();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].error.as_deref().unwrap().contains("scripted rejection"));
        assert_eq!(
            logs.iter().filter(|l| l.status == DeliveryStatus::Sent).count(),
            2
        );

        let stored = fx.campaigns.get(campaign.id).await.unwrap().unwrap();
        assert_eq!(stored.stats.failed, 1);
        assert_eq!(stored.stats.total_audience, 3);
    }

    #[tokio::test]
    async fn missing_campaign_is_dropped_not_retried() {
        let fx = fixture();
        let (_, segment) = seed(&fx).await;
        let dispatcher = fx.dispatcher(Arc::new(ScriptedVendor { reject: vec![] }));

        // Ok(()) means the message is acknowledged and will not requeue.
        dispatcher
            .dispatch(NewCampaign {
                campaign_id: Uuid::new_v4(),
                segment_id: segment.id,
                message: "hi".into(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn empty_audience_dispatches_nothing() {
        let fx = fixture();
        let segment = fx.segments.insert(big_spenders_segment()).await.unwrap();
        let campaign = fx.campaigns.insert(campaign(segment.id)).await.unwrap();
        let dispatcher = fx.dispatcher(Arc::new(ScriptedVendor { reject: vec![] }));

        dispatcher.dispatch(event(&campaign, &segment)).await.unwrap();

        assert!(fx.logs.find_by_campaign(campaign.id).await.unwrap().is_empty());
        let stored = fx.campaigns.get(campaign.id).await.unwrap().unwrap();
        assert_eq!(stored.stats.total_audience, 0);
    }
}
