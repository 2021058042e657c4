use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A customer record, the unit the segmentation engine evaluates against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub total_spent: f64,
    #[serde(default)]
    pub visit_count: u32,
    #[serde(default)]
    pub last_visit: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub custom_fields: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Incoming customer payload before the store assigns identity and timestamps.
/// This is the shape carried on the `customer-ingestion` queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerDraft {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub total_spent: f64,
    #[serde(default)]
    pub visit_count: u32,
    #[serde(default)]
    pub last_visit: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub custom_fields: HashMap<String, serde_json::Value>,
}

impl Customer {
    pub fn from_draft(draft: CustomerDraft) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: draft.name,
            email: draft.email.trim().to_lowercase(),
            phone: draft.phone,
            total_spent: draft.total_spent,
            visit_count: draft.visit_count,
            last_visit: draft.last_visit,
            tags: draft.tags,
            custom_fields: draft.custom_fields,
            created_at: now,
            updated_at: now,
        }
    }
}

// ─── Segments ───────────────────────────────────────────────────────────

/// Boolean combinator for rules within a group and for groups within a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GroupLogic {
    And,
    Or,
}

impl Default for GroupLogic {
    fn default() -> Self {
        GroupLogic::And
    }
}

/// Comparison applied by a single rule. Operators this engine does not
/// recognize deserialize to `Unknown` and always evaluate false.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    GreaterThan,
    LessThan,
    Between,
    In,
    NotIn,
    Unknown,
}

impl<'de> Deserialize<'de> for RuleOperator {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "equals" => RuleOperator::Equals,
            "not_equals" => RuleOperator::NotEquals,
            "contains" => RuleOperator::Contains,
            "not_contains" => RuleOperator::NotContains,
            "greater_than" => RuleOperator::GreaterThan,
            "less_than" => RuleOperator::LessThan,
            "between" => RuleOperator::Between,
            "in" => RuleOperator::In,
            "not_in" => RuleOperator::NotIn,
            _ => RuleOperator::Unknown,
        })
    }
}

/// A single predicate over one customer field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub field: String,
    pub operator: RuleOperator,
    pub value: serde_json::Value,
    pub group_id: String,
}

/// A named sub-collection of rules combined with one boolean operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    #[serde(default)]
    pub logic: GroupLogic,
}

/// A persisted boolean rule set over customer attributes, with a cached
/// matching-customer count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub rules: Vec<Rule>,
    pub groups: Vec<Group>,
    #[serde(default)]
    pub rule_logic: GroupLogic,
    #[serde(default)]
    pub customer_count: u64,
    pub created_by: Uuid,
    #[serde(default)]
    pub last_evaluated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ─── Campaigns ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Running,
    Paused,
    Completed,
    Failed,
}

/// Aggregate delivery counters. Owned by the campaign document and mutated
/// only by the delivery pipeline, via atomic store increments.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CampaignStats {
    pub total_audience: u64,
    pub sent: u64,
    pub delivered: u64,
    pub failed: u64,
}

/// Increment applied to `CampaignStats` by the receipt reconciler. Keyed by
/// campaign id so the store can apply it without a read-modify-write cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsDelta {
    pub sent: u64,
    pub delivered: u64,
    pub failed: u64,
}

/// A scheduled or immediate send of one message template to all customers
/// currently matching a segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub segment_id: Uuid,
    /// Message template; `{name}` is substituted per customer at dispatch.
    pub message: String,
    pub status: CampaignStatus,
    #[serde(default)]
    pub schedule_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stats: CampaignStats,
    pub created_by: Uuid,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ─── Delivery logs ──────────────────────────────────────────────────────

/// Lifecycle of a single per-customer delivery. Uppercase on the wire to
/// match vendor receipts; lowercase aliases accept the queue-keyed shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    #[serde(alias = "pending")]
    Pending,
    #[serde(alias = "sent")]
    Sent,
    #[serde(alias = "delivered")]
    Delivered,
    #[serde(alias = "failed")]
    Failed,
}

impl DeliveryStatus {
    /// Terminal statuses are the only ones a receipt may carry.
    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Failed)
    }
}

/// Immediate acknowledgment returned by the vendor on message acceptance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorResponse {
    pub message_id: String,
    pub status: DeliveryStatus,
    pub timestamp: DateTime<Utc>,
}

/// The durable per-customer delivery record for one campaign. Exactly one
/// log exists per (campaign, customer) pair; the reconciler mutates it in
/// place and it is never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunicationLog {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub segment_id: Uuid,
    pub customer_id: Uuid,
    pub message: String,
    pub status: DeliveryStatus,
    #[serde(default)]
    pub vendor_response: Option<VendorResponse>,
    #[serde(default)]
    pub delivery_receipt: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub last_attempt: Option<DateTime<Utc>>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

// ─── Queue envelopes ────────────────────────────────────────────────────

pub const QUEUE_CUSTOMER_INGESTION: &str = "customer-ingestion";
pub const QUEUE_CAMPAIGN_DELIVERY: &str = "campaign-delivery";
pub const QUEUE_DELIVERY_RECEIPT: &str = "delivery-receipt";

/// Envelope on `customer-ingestion`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum IngestionMessage {
    Create(CustomerDraft),
    BulkCreate(Vec<CustomerDraft>),
    /// Unrecognized message types are logged and acknowledged without effect.
    #[serde(other)]
    Unknown,
}

/// Envelope on `campaign-delivery`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum DeliveryMessage {
    NewCampaign(NewCampaign),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCampaign {
    pub campaign_id: Uuid,
    pub segment_id: Uuid,
    pub message: String,
}

/// A delivery receipt on the `delivery-receipt` queue. Two shapes are
/// accepted: the vendor callback payload (keyed by vendor message id) and
/// the queue-keyed shape addressed by (campaign, customer).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReceiptMessage {
    Vendor(VendorReceipt),
    Direct(DirectReceipt),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorReceipt {
    pub message_id: String,
    pub status: DeliveryStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectReceipt {
    pub campaign_id: Uuid,
    pub customer_id: Uuid,
    pub status: DeliveryStatus,
    #[serde(default)]
    pub error: Option<String>,
}
