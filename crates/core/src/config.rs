use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `PULSE_CRM__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub nats: NatsConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub vendor: VendorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    #[serde(default = "default_nats_urls")]
    pub urls: Vec<String>,
    #[serde(default = "default_stream_prefix")]
    pub stream_prefix: String,
    #[serde(default = "default_nats_max_reconnects")]
    pub max_reconnects: usize,
}

/// Which `MessageBroker` implementation the composition root constructs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerMode {
    /// In-process queues; single-node dev and tests.
    Memory,
    /// NATS JetStream; messages survive broker restart.
    Jetstream,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_mode")]
    pub mode: BrokerMode,
    /// Redeliveries before a poison message is dead-lettered.
    #[serde(default = "default_max_delivery_attempts")]
    pub max_delivery_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VendorConfig {
    /// Probability the simulated vendor accepts a send.
    #[serde(default = "default_success_rate")]
    pub success_rate: f64,
    #[serde(default = "default_receipt_delay_min_ms")]
    pub receipt_delay_min_ms: u64,
    #[serde(default = "default_receipt_delay_max_ms")]
    pub receipt_delay_max_ms: u64,
    /// Probability an accepted send later reports a FAILED receipt.
    #[serde(default = "default_receipt_failure_rate")]
    pub receipt_failure_rate: f64,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_nats_urls() -> Vec<String> {
    vec!["nats://localhost:4222".to_string()]
}
fn default_stream_prefix() -> String {
    "pulse".to_string()
}
fn default_nats_max_reconnects() -> usize {
    60
}
fn default_broker_mode() -> BrokerMode {
    BrokerMode::Memory
}
fn default_max_delivery_attempts() -> u32 {
    5
}
fn default_success_rate() -> f64 {
    0.9
}
fn default_receipt_delay_min_ms() -> u64 {
    1000
}
fn default_receipt_delay_max_ms() -> u64 {
    5000
}
fn default_receipt_failure_rate() -> f64 {
    0.0
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            urls: default_nats_urls(),
            stream_prefix: default_stream_prefix(),
            max_reconnects: default_nats_max_reconnects(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            mode: default_broker_mode(),
            max_delivery_attempts: default_max_delivery_attempts(),
        }
    }
}

impl Default for VendorConfig {
    fn default() -> Self {
        Self {
            success_rate: default_success_rate(),
            receipt_delay_min_ms: default_receipt_delay_min_ms(),
            receipt_delay_max_ms: default_receipt_delay_max_ms(),
            receipt_failure_rate: default_receipt_failure_rate(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            nats: NatsConfig::default(),
            broker: BrokerConfig::default(),
            vendor: VendorConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("PULSE_CRM")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
