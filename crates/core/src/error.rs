use thiserror::Error;

pub type PulseResult<T> = Result<T, PulseError>;

#[derive(Error, Debug)]
pub enum PulseError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{0} not found: {1}")]
    NotFound(&'static str, String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Vendor dispatch error: {0}")]
    Vendor(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl PulseError {
    /// Fatal errors cannot succeed on redelivery; consumers ack and drop
    /// the message instead of requeueing it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PulseError::NotFound(..) | PulseError::Validation(_))
    }
}
