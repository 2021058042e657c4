//! End-to-end delivery flow on the in-memory broker and stores: campaign
//! publish → dispatch fan-out → simulated vendor receipts → reconciled
//! campaign stats.

use chrono::Utc;
use pulse_broker::{publish_json, InMemoryBroker};
use pulse_core::config::VendorConfig;
use pulse_core::types::{
    Campaign, CampaignStatus, Customer, CustomerDraft, DeliveryMessage, DeliveryStatus, Group,
    GroupLogic, IngestionMessage, NewCampaign, Rule, RuleOperator, Segment,
    QUEUE_CAMPAIGN_DELIVERY, QUEUE_CUSTOMER_INGESTION,
};
use pulse_pipeline::{CampaignDispatcher, IngestionConsumer, ReceiptReconciler, SimulatedVendor};
use pulse_store::{
    CampaignStore, CommunicationLogStore, CustomerStore, InMemoryCampaignStore,
    InMemoryCommunicationLogStore, InMemoryCustomerStore, InMemorySegmentStore, SegmentStore,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

struct World {
    broker: Arc<InMemoryBroker>,
    customers: Arc<InMemoryCustomerStore>,
    segments: Arc<InMemorySegmentStore>,
    campaigns: Arc<InMemoryCampaignStore>,
    logs: Arc<InMemoryCommunicationLogStore>,
}

/// Wire every consumer the way the composition root does, with fast
/// deterministic vendor receipts.
async fn start_world() -> World {
    let broker = Arc::new(InMemoryBroker::new());
    let customers = Arc::new(InMemoryCustomerStore::new());
    let segments = Arc::new(InMemorySegmentStore::new());
    let campaigns = Arc::new(InMemoryCampaignStore::new());
    let logs = Arc::new(InMemoryCommunicationLogStore::new());

    let vendor = Arc::new(SimulatedVendor::new(
        broker.clone(),
        VendorConfig {
            success_rate: 1.0,
            receipt_delay_min_ms: 1,
            receipt_delay_max_ms: 5,
            receipt_failure_rate: 0.0,
        },
    ));

    Arc::new(IngestionConsumer::new(customers.clone()))
        .start(broker.as_ref())
        .await
        .unwrap();
    Arc::new(CampaignDispatcher::new(
        customers.clone(),
        segments.clone(),
        campaigns.clone(),
        logs.clone(),
        vendor,
    ))
    .start(broker.as_ref(), 5)
    .await
    .unwrap();
    Arc::new(ReceiptReconciler::new(campaigns.clone(), logs.clone()))
        .start(broker.as_ref(), 5)
        .await
        .unwrap();

    World {
        broker,
        customers,
        segments,
        campaigns,
        logs,
    }
}

fn draft(name: &str, total_spent: f64) -> CustomerDraft {
    CustomerDraft {
        name: name.into(),
        email: format!("{}@example.com", name.to_lowercase()),
        phone: None,
        total_spent,
        visit_count: 0,
        last_visit: None,
        tags: Vec::new(),
        custom_fields: Default::default(),
    }
}

fn spenders_segment() -> Segment {
    let now = Utc::now();
    Segment {
        id: Uuid::new_v4(),
        name: "spenders".into(),
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

fn promo_campaign(segment_id: Uuid) -> Campaign {
    let now = Utc::now();
    Campaign {
        id: Uuid::new_v4(),
        name: "promo".into(),
        description: None,
        segment_id,
        message: "Hi {name}, here's 10% off on your next order!".into(),
        status: CampaignStatus::Draft,
        schedule_time: None,
        stats: Default::default(),
        created_by: Uuid::new_v4(),
        tags: Vec::new(),
        created_at: now,
        updated_at: now,
    }
}

/// Poll until `check` passes or the deadline expires.
async fn eventually<F, Fut>(mut check: F, deadline: Duration, what: &str)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let started = std::time::Instant::now();
    while started.elapsed() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test(flavor = "multi_thread")]
async fn campaign_fans_out_and_reconciles_receipts() {
    let world = start_world().await;

    // Seed customers through the ingestion queue, as production does.
    publish_json(
        world.broker.as_ref(),
        QUEUE_CUSTOMER_INGESTION,
        &IngestionMessage::BulkCreate(vec![
            draft("Ada", 150.0),
            draft("Bob", 300.0),
            draft("Cyd", 120.0),
            draft("Dee", 10.0),
        ]),
    )
    .await
    .unwrap();

    let customers = world.customers.clone();
    eventually(
        move || {
            let customers = customers.clone();
            async move { customers.count().await.unwrap() == 4 }
        },
        Duration::from_secs(2),
        "ingestion to settle",
    )
    .await;

    let segment = world.segments.insert(spenders_segment()).await.unwrap();
    let campaign = world.campaigns.insert(promo_campaign(segment.id)).await.unwrap();

    publish_json(
        world.broker.as_ref(),
        QUEUE_CAMPAIGN_DELIVERY,
        &DeliveryMessage::NewCampaign(NewCampaign {
            campaign_id: campaign.id,
            segment_id: segment.id,
            message: campaign.message.clone(),
        }),
    )
    .await
    .unwrap();

    // Three of four customers spend over 100; every one of them must end
    // DELIVERED once the simulated receipts land.
    let campaigns = world.campaigns.clone();
    let campaign_id = campaign.id;
    eventually(
        move || {
            let campaigns = campaigns.clone();
            async move {
                let stats = campaigns.get(campaign_id).await.unwrap().unwrap().stats;
                stats.delivered == 3
            }
        },
        Duration::from_secs(5),
        "receipts to reconcile",
    )
    .await;

    let stored = world.campaigns.get(campaign.id).await.unwrap().unwrap();
    assert_eq!(stored.stats.total_audience, 3);
    assert_eq!(stored.stats.sent, 3);
    assert_eq!(stored.stats.delivered, 3);
    assert_eq!(stored.stats.failed, 0);
    assert_eq!(stored.status, CampaignStatus::Running);

    let logs = world.logs.find_by_campaign(campaign.id).await.unwrap();
    assert_eq!(logs.len(), 3);
    assert!(logs.iter().all(|l| l.status == DeliveryStatus::Delivered));
    assert!(logs.iter().all(|l| l.delivery_receipt.is_some()));
    assert!(logs
        .iter()
        .any(|l| l.message.starts_with("Hi Ada, here's 10% off")));

    // Per-customer uniqueness of the (campaign, customer) log.
    let all: Vec<Customer> = world.customers.all().await.unwrap();
    for c in all.iter().filter(|c| c.total_spent > 100.0) {
        assert!(world
            .logs
            .find_by_pair(campaign.id, c.id)
            .await
            .unwrap()
            .is_some());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_receipts_roll_into_campaign_failures() {
    let broker = Arc::new(InMemoryBroker::new());
    let customers = Arc::new(InMemoryCustomerStore::new());
    let segments = Arc::new(InMemorySegmentStore::new());
    let campaigns = Arc::new(InMemoryCampaignStore::new());
    let logs = Arc::new(InMemoryCommunicationLogStore::new());

    // Every send is accepted, every receipt reports failure.
    let vendor = Arc::new(SimulatedVendor::new(
        broker.clone(),
        VendorConfig {
            success_rate: 1.0,
            receipt_delay_min_ms: 1,
            receipt_delay_max_ms: 5,
            receipt_failure_rate: 1.0,
        },
    ));

    let dispatcher = Arc::new(CampaignDispatcher::new(
        customers.clone(),
        segments.clone(),
        campaigns.clone(),
        logs.clone(),
        vendor,
    ));
    dispatcher.clone().start(broker.as_ref(), 5).await.unwrap();
    Arc::new(ReceiptReconciler::new(campaigns.clone(), logs.clone()))
        .start(broker.as_ref(), 5)
        .await
        .unwrap();

    customers
        .insert(Customer::from_draft(draft("Ada", 150.0)))
        .await
        .unwrap();
    let segment = segments.insert(spenders_segment()).await.unwrap();
    let campaign = campaigns.insert(promo_campaign(segment.id)).await.unwrap();

    publish_json(
        broker.as_ref(),
        QUEUE_CAMPAIGN_DELIVERY,
        &DeliveryMessage::NewCampaign(NewCampaign {
            campaign_id: campaign.id,
            segment_id: segment.id,
            message: campaign.message.clone(),
        }),
    )
    .await
    .unwrap();

    let campaigns_poll = campaigns.clone();
    let campaign_id = campaign.id;
    eventually(
        move || {
            let campaigns = campaigns_poll.clone();
            async move {
                let stats = campaigns.get(campaign_id).await.unwrap().unwrap().stats;
                stats.failed == 1
            }
        },
        Duration::from_secs(5),
        "failed receipt to reconcile",
    )
    .await;

    let logs = logs.find_by_campaign(campaign.id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, DeliveryStatus::Failed);
}
