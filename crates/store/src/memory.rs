//! In-memory store implementations backed by `DashMap`. Entry locks make
//! every targeted mutation atomic per document, which is the same guarantee
//! a document store's `$inc`/`$set` operators give.

use crate::{
    BoxFuture, CampaignStore, CommunicationLogStore, CustomerStore, LogMutation, Page,
    SegmentStore,
};
use dashmap::DashMap;
use pulse_core::types::{
    Campaign, CampaignStatus, CommunicationLog, Customer, Segment, StatsDelta,
};
use pulse_core::{PulseError, PulseResult};
use uuid::Uuid;

fn paginate<T: Clone>(mut items: Vec<T>, page: usize, limit: usize) -> Page<T> {
    let page = page.max(1);
    let limit = limit.max(1);
    let total = items.len() as u64;
    let pages = total.div_ceil(limit as u64);
    let start = (page - 1).saturating_mul(limit);
    let data = if start >= items.len() {
        Vec::new()
    } else {
        items.drain(start..items.len().min(start + limit)).collect()
    };
    Page {
        data,
        page,
        limit,
        total,
        pages,
    }
}

// ─── Customers ──────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryCustomerStore {
    customers: DashMap<Uuid, Customer>,
    /// Enforces email uniqueness; maps normalized email → customer id.
    emails: DashMap<String, Uuid>,
}

impl InMemoryCustomerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted_desc(&self) -> Vec<Customer> {
        let mut all: Vec<_> = self.customers.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }
}

impl CustomerStore for InMemoryCustomerStore {
    fn insert<'a>(&'a self, customer: Customer) -> BoxFuture<'a, PulseResult<Customer>> {
        Box::pin(async move {
            let email = customer.email.clone();
            match self.emails.entry(email.clone()) {
                dashmap::mapref::entry::Entry::Occupied(_) => Err(PulseError::Validation(
                    format!("customer with email '{email}' already exists"),
                )),
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    slot.insert(customer.id);
                    self.customers.insert(customer.id, customer.clone());
                    Ok(customer)
                }
            }
        })
    }

    fn get<'a>(&'a self, id: Uuid) -> BoxFuture<'a, PulseResult<Option<Customer>>> {
        Box::pin(async move { Ok(self.customers.get(&id).map(|c| c.clone())) })
    }

    fn all<'a>(&'a self) -> BoxFuture<'a, PulseResult<Vec<Customer>>> {
        Box::pin(async move { Ok(self.customers.iter().map(|e| e.value().clone()).collect()) })
    }

    fn list<'a>(&'a self, page: usize, limit: usize) -> BoxFuture<'a, PulseResult<Page<Customer>>> {
        Box::pin(async move { Ok(paginate(self.sorted_desc(), page, limit)) })
    }

    fn count<'a>(&'a self) -> BoxFuture<'a, PulseResult<u64>> {
        Box::pin(async move { Ok(self.customers.len() as u64) })
    }
}

// ─── Segments ───────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemorySegmentStore {
    segments: DashMap<Uuid, Segment>,
}

impl InMemorySegmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SegmentStore for InMemorySegmentStore {
    fn insert<'a>(&'a self, segment: Segment) -> BoxFuture<'a, PulseResult<Segment>> {
        Box::pin(async move {
            self.segments.insert(segment.id, segment.clone());
            Ok(segment)
        })
    }

    fn get<'a>(&'a self, id: Uuid) -> BoxFuture<'a, PulseResult<Option<Segment>>> {
        Box::pin(async move { Ok(self.segments.get(&id).map(|s| s.clone())) })
    }

    fn update<'a>(&'a self, segment: Segment) -> BoxFuture<'a, PulseResult<Segment>> {
        Box::pin(async move {
            if !self.segments.contains_key(&segment.id) {
                return Err(PulseError::NotFound("segment", segment.id.to_string()));
            }
            self.segments.insert(segment.id, segment.clone());
            Ok(segment)
        })
    }

    fn list<'a>(&'a self, page: usize, limit: usize) -> BoxFuture<'a, PulseResult<Page<Segment>>> {
        Box::pin(async move {
            let mut all: Vec<_> = self.segments.iter().map(|e| e.value().clone()).collect();
            all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(paginate(all, page, limit))
        })
    }
}

// ─── Campaigns ──────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryCampaignStore {
    campaigns: DashMap<Uuid, Campaign>,
}

impl InMemoryCampaignStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CampaignStore for InMemoryCampaignStore {
    fn insert<'a>(&'a self, campaign: Campaign) -> BoxFuture<'a, PulseResult<Campaign>> {
        Box::pin(async move {
            self.campaigns.insert(campaign.id, campaign.clone());
            Ok(campaign)
        })
    }

    fn get<'a>(&'a self, id: Uuid) -> BoxFuture<'a, PulseResult<Option<Campaign>>> {
        Box::pin(async move { Ok(self.campaigns.get(&id).map(|c| c.clone())) })
    }

    fn list<'a>(&'a self, page: usize, limit: usize) -> BoxFuture<'a, PulseResult<Page<Campaign>>> {
        Box::pin(async move {
            let mut all: Vec<_> = self.campaigns.iter().map(|e| e.value().clone()).collect();
            all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(paginate(all, page, limit))
        })
    }

    fn set_status<'a>(
        &'a self,
        id: Uuid,
        status: CampaignStatus,
    ) -> BoxFuture<'a, PulseResult<()>> {
        Box::pin(async move {
            let mut campaign = self
                .campaigns
                .get_mut(&id)
                .ok_or_else(|| PulseError::NotFound("campaign", id.to_string()))?;
            campaign.status = status;
            campaign.updated_at = chrono::Utc::now();
            Ok(())
        })
    }

    fn set_total_audience<'a>(&'a self, id: Uuid, n: u64) -> BoxFuture<'a, PulseResult<()>> {
        Box::pin(async move {
            let mut campaign = self
                .campaigns
                .get_mut(&id)
                .ok_or_else(|| PulseError::NotFound("campaign", id.to_string()))?;
            campaign.stats.total_audience = n;
            campaign.updated_at = chrono::Utc::now();
            Ok(())
        })
    }

    fn apply_stats_delta<'a>(
        &'a self,
        id: Uuid,
        delta: StatsDelta,
    ) -> BoxFuture<'a, PulseResult<()>> {
        Box::pin(async move {
            // Entry lock serializes concurrent reconcilers on this campaign.
            let mut campaign = self
                .campaigns
                .get_mut(&id)
                .ok_or_else(|| PulseError::NotFound("campaign", id.to_string()))?;
            campaign.stats.sent += delta.sent;
            campaign.stats.delivered += delta.delivered;
            campaign.stats.failed += delta.failed;
            campaign.updated_at = chrono::Utc::now();
            Ok(())
        })
    }
}

// ─── Communication logs ─────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryCommunicationLogStore {
    logs: DashMap<Uuid, CommunicationLog>,
    by_pair: DashMap<(Uuid, Uuid), Uuid>,
    by_vendor_message: DashMap<String, Uuid>,
}

impl InMemoryCommunicationLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CommunicationLogStore for InMemoryCommunicationLogStore {
    fn insert<'a>(&'a self, log: CommunicationLog) -> BoxFuture<'a, PulseResult<CommunicationLog>> {
        Box::pin(async move {
            self.by_pair.insert((log.campaign_id, log.customer_id), log.id);
            if let Some(response) = &log.vendor_response {
                self.by_vendor_message.insert(response.message_id.clone(), log.id);
            }
            self.logs.insert(log.id, log.clone());
            Ok(log)
        })
    }

    fn get<'a>(&'a self, id: Uuid) -> BoxFuture<'a, PulseResult<Option<CommunicationLog>>> {
        Box::pin(async move { Ok(self.logs.get(&id).map(|l| l.clone())) })
    }

    fn find_by_campaign<'a>(
        &'a self,
        campaign_id: Uuid,
    ) -> BoxFuture<'a, PulseResult<Vec<CommunicationLog>>> {
        Box::pin(async move {
            let mut logs: Vec<_> = self
                .logs
                .iter()
                .filter(|e| e.value().campaign_id == campaign_id)
                .map(|e| e.value().clone())
                .collect();
            logs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(logs)
        })
    }

    fn find_by_pair<'a>(
        &'a self,
        campaign_id: Uuid,
        customer_id: Uuid,
    ) -> BoxFuture<'a, PulseResult<Option<CommunicationLog>>> {
        Box::pin(async move {
            let id = self.by_pair.get(&(campaign_id, customer_id)).map(|e| *e);
            Ok(id.and_then(|id| self.logs.get(&id).map(|l| l.clone())))
        })
    }

    fn find_by_vendor_message_id<'a>(
        &'a self,
        message_id: &'a str,
    ) -> BoxFuture<'a, PulseResult<Option<CommunicationLog>>> {
        Box::pin(async move {
            let id = self.by_vendor_message.get(message_id).map(|e| *e);
            Ok(id.and_then(|id| self.logs.get(&id).map(|l| l.clone())))
        })
    }

    fn update<'a>(
        &'a self,
        id: Uuid,
        mutation: LogMutation,
    ) -> BoxFuture<'a, PulseResult<Option<CommunicationLog>>> {
        Box::pin(async move {
            let updated = {
                let Some(mut log) = self.logs.get_mut(&id) else {
                    return Ok(None);
                };
                mutation(&mut log);
                log.clone()
            };
            // Keep the vendor message index current; the dispatcher sets the
            // vendor response through this path after a successful send.
            if let Some(response) = &updated.vendor_response {
                self.by_vendor_message.insert(response.message_id.clone(), id);
            }
            Ok(Some(updated))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pulse_core::types::{CustomerDraft, DeliveryStatus, VendorResponse};

    fn draft(email: &str) -> CustomerDraft {
        CustomerDraft {
            name: "Test".into(),
            email: email.into(),
            phone: None,
            total_spent: 0.0,
            visit_count: 0,
            last_visit: None,
            tags: Vec::new(),
            custom_fields: Default::default(),
        }
    }

    fn log(campaign_id: Uuid, customer_id: Uuid) -> CommunicationLog {
        CommunicationLog {
            id: Uuid::new_v4(),
            campaign_id,
            segment_id: Uuid::new_v4(),
            customer_id,
            message: "hi".into(),
            status: DeliveryStatus::Pending,
            vendor_response: None,
            delivery_receipt: None,
            error: None,
            retry_count: 0,
            last_attempt: None,
            created_by: Uuid::new_v4(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let store = InMemoryCustomerStore::new();
        store
            .insert(Customer::from_draft(draft("a@example.com")))
            .await
            .unwrap();
        let err = store
            .insert(Customer::from_draft(draft("a@example.com")))
            .await
            .unwrap_err();
        assert!(matches!(err, PulseError::Validation(_)));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn stats_delta_increments_are_not_lost_under_concurrency() {
        let store = std::sync::Arc::new(InMemoryCampaignStore::new());
        let now = Utc::now();
        let campaign = Campaign {
            id: Uuid::new_v4(),
            name: "c".into(),
            description: None,
            segment_id: Uuid::new_v4(),
            message: "m".into(),
            status: CampaignStatus::Running,
            schedule_time: None,
            stats: Default::default(),
            created_by: Uuid::new_v4(),
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        let id = campaign.id;
        store.insert(campaign).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..100 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .apply_stats_delta(
                        id,
                        StatsDelta {
                            sent: 1,
                            delivered: 1,
                            failed: 0,
                        },
                    )
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let campaign = store.get(id).await.unwrap().unwrap();
        assert_eq!(campaign.stats.sent, 100);
        assert_eq!(campaign.stats.delivered, 100);
    }

    #[tokio::test]
    async fn vendor_message_index_follows_updates() {
        let store = InMemoryCommunicationLogStore::new();
        let inserted = store.insert(log(Uuid::new_v4(), Uuid::new_v4())).await.unwrap();

        assert!(store
            .find_by_vendor_message_id("msg_1")
            .await
            .unwrap()
            .is_none());

        store
            .update(
                inserted.id,
                Box::new(|l| {
                    l.status = DeliveryStatus::Sent;
                    l.vendor_response = Some(VendorResponse {
                        message_id: "msg_1".into(),
                        status: DeliveryStatus::Sent,
                        timestamp: Utc::now(),
                    });
                }),
            )
            .await
            .unwrap();

        let found = store
            .find_by_vendor_message_id("msg_1")
            .await
            .unwrap()
            .expect("indexed after update");
        assert_eq!(found.id, inserted.id);
        assert_eq!(found.status, DeliveryStatus::Sent);
    }

    #[tokio::test]
    async fn pair_lookup_returns_the_unique_log() {
        let store = InMemoryCommunicationLogStore::new();
        let campaign = Uuid::new_v4();
        let customer = Uuid::new_v4();
        let inserted = store.insert(log(campaign, customer)).await.unwrap();
        store.insert(log(campaign, Uuid::new_v4())).await.unwrap();

        let found = store.find_by_pair(campaign, customer).await.unwrap().unwrap();
        assert_eq!(found.id, inserted.id);
        assert!(store
            .find_by_pair(Uuid::new_v4(), customer)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn pagination_clamps_and_counts() {
        let store = InMemoryCustomerStore::new();
        for i in 0..25 {
            store
                .insert(Customer::from_draft(draft(&format!("u{i}@example.com"))))
                .await
                .unwrap();
        }
        let page = store.list(1, 10).await.unwrap();
        assert_eq!(page.data.len(), 10);
        assert_eq!(page.total, 25);
        assert_eq!(page.pages, 3);

        let last = store.list(3, 10).await.unwrap();
        assert_eq!(last.data.len(), 5);

        let beyond = store.list(9, 10).await.unwrap();
        assert!(beyond.data.is_empty());
    }
}
