//! PulseCRM — customer segmentation and campaign-delivery backend.
//!
//! Composition root: loads configuration, constructs the broker and stores,
//! starts the queue consumers, and serves the REST API.

use clap::Parser;
use pulse_api::{ApiServer, AppState};
use pulse_broker::{InMemoryBroker, JetStreamBroker, MessageBroker};
use pulse_core::config::{AppConfig, BrokerMode};
use pulse_pipeline::{CampaignDispatcher, IngestionConsumer, ReceiptReconciler, SimulatedVendor};
use pulse_store::{
    CampaignStore, CommunicationLogStore, CustomerStore, InMemoryCampaignStore,
    InMemoryCommunicationLogStore, InMemoryCustomerStore, InMemorySegmentStore, SegmentStore,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "pulse-crm")]
#[command(about = "Customer segmentation and campaign delivery backend")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "PULSE_CRM__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "PULSE_CRM__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Skip queue consumers (API-only mode)
    #[arg(long, default_value_t = false)]
    api_only: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulse_crm=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("PulseCRM starting up");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        broker = ?config.broker.mode,
        "Configuration loaded"
    );

    // Broker: in-memory queues for single-node dev, JetStream for durability
    // across restarts.
    let broker: Arc<dyn MessageBroker> = match config.broker.mode {
        BrokerMode::Memory => Arc::new(InMemoryBroker::new()),
        BrokerMode::Jetstream => Arc::new(JetStreamBroker::connect(&config.nats).await?),
    };

    // Record stores. The document-store-backed implementations plug in here.
    let customers: Arc<dyn CustomerStore> = Arc::new(InMemoryCustomerStore::new());
    let segments: Arc<dyn SegmentStore> = Arc::new(InMemorySegmentStore::new());
    let campaigns: Arc<dyn CampaignStore> = Arc::new(InMemoryCampaignStore::new());
    let logs: Arc<dyn CommunicationLogStore> = Arc::new(InMemoryCommunicationLogStore::new());

    let vendor = Arc::new(SimulatedVendor::new(broker.clone(), config.vendor.clone()));
    let reconciler = Arc::new(ReceiptReconciler::new(campaigns.clone(), logs.clone()));

    // Queue consumers (unless API-only mode)
    if !cli.api_only {
        let max_attempts = config.broker.max_delivery_attempts;
        Arc::new(IngestionConsumer::new(customers.clone()))
            .start(broker.as_ref())
            .await?;
        Arc::new(CampaignDispatcher::new(
            customers.clone(),
            segments.clone(),
            campaigns.clone(),
            logs.clone(),
            vendor,
        ))
        .start(broker.as_ref(), max_attempts)
        .await?;
        reconciler
            .clone()
            .start(broker.as_ref(), max_attempts)
            .await?;
        info!("Queue consumers started");
    } else {
        info!("Running in API-only mode (no queue consumers)");
    }

    let state = AppState {
        broker,
        customers,
        segments,
        campaigns,
        logs,
        reconciler,
        system_user: Uuid::nil(),
        node_id: config.node_id.clone(),
        start_time: Instant::now(),
    };

    let api_server = ApiServer::new(config, state);

    if let Err(e) = api_server.start_metrics().await {
        error!(error = %e, "Failed to start metrics exporter");
    }

    info!("PulseCRM is ready to serve traffic");

    // Start HTTP server (blocks until shutdown)
    api_server.start_http().await?;

    Ok(())
}
