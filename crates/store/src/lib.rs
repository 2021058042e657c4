//! Record-store seam. The pipeline and API talk to these traits; an
//! off-the-shelf document store is the assumed system of record, and the
//! in-memory implementations in [`memory`] back tests and single-node dev.
//!
//! Contract for shared mutable state (campaign stats, delivery logs): every
//! mutation is a targeted operation keyed by document identity — a stats
//! delta or a closure applied under the entry lock — never a full-document
//! read-modify-write round trip.

pub mod memory;

use pulse_core::types::{
    Campaign, CampaignStatus, CommunicationLog, Customer, Segment, StatsDelta,
};
use pulse_core::PulseResult;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

pub use memory::{
    InMemoryCampaignStore, InMemoryCommunicationLogStore, InMemoryCustomerStore,
    InMemorySegmentStore,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One page of a listing, newest records first.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub page: usize,
    pub limit: usize,
    pub total: u64,
    pub pages: u64,
}

pub trait CustomerStore: Send + Sync {
    /// Insert a customer; fails on a duplicate email.
    fn insert<'a>(&'a self, customer: Customer) -> BoxFuture<'a, PulseResult<Customer>>;
    fn get<'a>(&'a self, id: Uuid) -> BoxFuture<'a, PulseResult<Option<Customer>>>;
    /// The entire customer base; the segment evaluator's full-scan input.
    fn all<'a>(&'a self) -> BoxFuture<'a, PulseResult<Vec<Customer>>>;
    fn list<'a>(&'a self, page: usize, limit: usize) -> BoxFuture<'a, PulseResult<Page<Customer>>>;
    fn count<'a>(&'a self) -> BoxFuture<'a, PulseResult<u64>>;
}

pub trait SegmentStore: Send + Sync {
    fn insert<'a>(&'a self, segment: Segment) -> BoxFuture<'a, PulseResult<Segment>>;
    fn get<'a>(&'a self, id: Uuid) -> BoxFuture<'a, PulseResult<Option<Segment>>>;
    fn update<'a>(&'a self, segment: Segment) -> BoxFuture<'a, PulseResult<Segment>>;
    fn list<'a>(&'a self, page: usize, limit: usize) -> BoxFuture<'a, PulseResult<Page<Segment>>>;
}

pub trait CampaignStore: Send + Sync {
    fn insert<'a>(&'a self, campaign: Campaign) -> BoxFuture<'a, PulseResult<Campaign>>;
    fn get<'a>(&'a self, id: Uuid) -> BoxFuture<'a, PulseResult<Option<Campaign>>>;
    fn list<'a>(&'a self, page: usize, limit: usize) -> BoxFuture<'a, PulseResult<Page<Campaign>>>;
    fn set_status<'a>(
        &'a self,
        id: Uuid,
        status: CampaignStatus,
    ) -> BoxFuture<'a, PulseResult<()>>;
    /// Persisted durably before dispatch fan-out begins.
    fn set_total_audience<'a>(&'a self, id: Uuid, n: u64) -> BoxFuture<'a, PulseResult<()>>;
    /// Atomic counter increment keyed by campaign id; concurrent reconcilers
    /// must never lose updates.
    fn apply_stats_delta<'a>(
        &'a self,
        id: Uuid,
        delta: StatsDelta,
    ) -> BoxFuture<'a, PulseResult<()>>;
}

/// Mutation applied to a delivery log under its entry lock.
pub type LogMutation = Box<dyn FnOnce(&mut CommunicationLog) + Send>;

pub trait CommunicationLogStore: Send + Sync {
    fn insert<'a>(&'a self, log: CommunicationLog) -> BoxFuture<'a, PulseResult<CommunicationLog>>;
    fn get<'a>(&'a self, id: Uuid) -> BoxFuture<'a, PulseResult<Option<CommunicationLog>>>;
    /// All logs for a campaign, newest first.
    fn find_by_campaign<'a>(
        &'a self,
        campaign_id: Uuid,
    ) -> BoxFuture<'a, PulseResult<Vec<CommunicationLog>>>;
    /// The unique log for one (campaign, customer) pair.
    fn find_by_pair<'a>(
        &'a self,
        campaign_id: Uuid,
        customer_id: Uuid,
    ) -> BoxFuture<'a, PulseResult<Option<CommunicationLog>>>;
    /// Lookup by the vendor's message id, set once the vendor accepts a send.
    fn find_by_vendor_message_id<'a>(
        &'a self,
        message_id: &'a str,
    ) -> BoxFuture<'a, PulseResult<Option<CommunicationLog>>>;
    /// Apply `mutation` atomically; returns the updated log, or `None` when
    /// the id is unknown.
    fn update<'a>(
        &'a self,
        id: Uuid,
        mutation: LogMutation,
    ) -> BoxFuture<'a, PulseResult<Option<CommunicationLog>>>;
}
