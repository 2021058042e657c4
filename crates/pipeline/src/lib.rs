//! Asynchronous campaign-delivery pipeline: queue consumers that ingest
//! customers, fan campaigns out to matching customers through the vendor
//! client, and reconcile delivery receipts into per-customer and
//! per-campaign state. At-least-once semantics throughout.

pub mod dispatcher;
pub mod ingestion;
pub mod reconciler;
pub mod vendor;

pub use dispatcher::CampaignDispatcher;
pub use ingestion::IngestionConsumer;
pub use reconciler::ReceiptReconciler;
pub use vendor::{SimulatedVendor, VendorClient};
