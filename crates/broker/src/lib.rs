//! Durable message-broker abstraction.
//!
//! The broker is an injected dependency owned by the composition root — an
//! `Arc<dyn MessageBroker>` handed to every producer and consumer — rather
//! than a process-wide singleton, so tests can swap in the in-memory
//! implementation.

pub mod memory;
pub mod nats;

use pulse_core::PulseResult;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

pub use memory::InMemoryBroker;
pub use nats::JetStreamBroker;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Handler invoked once per message. `Ok` acknowledges the message
/// (permanent removal); `Err` triggers the queue's failure policy.
pub type Handler = Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, PulseResult<()>> + Send + Sync>;

/// What happens to a message whose handler fails.
#[derive(Debug, Clone, Copy)]
pub enum ConsumePolicy {
    /// Discard. Used by the ingestion queue, where redelivering a poison
    /// record would stall bulk imports.
    Drop,
    /// Redeliver up to `max_attempts` total deliveries, then move the
    /// payload to the queue's dead-letter companion.
    Requeue { max_attempts: u32 },
}

/// Dead-letter companion queue for a work queue.
pub fn dlq_name(queue: &str) -> String {
    format!("{queue}.dlq")
}

/// Durable publish/consume seam. Messages are persistent: the JetStream
/// implementation survives a broker restart until acknowledged.
pub trait MessageBroker: Send + Sync {
    /// Durable enqueue.
    fn publish<'a>(&'a self, queue: &'a str, payload: Vec<u8>) -> BoxFuture<'a, PulseResult<()>>;

    /// Enqueue that becomes visible to consumers only after `delay`.
    /// Timer-deferred effects (the simulated vendor's delivery receipt) go
    /// through this seam instead of bare in-process timers.
    fn publish_after<'a>(
        &'a self,
        queue: &'a str,
        payload: Vec<u8>,
        delay: Duration,
    ) -> BoxFuture<'a, PulseResult<()>>;

    /// Register `handler` for `queue` and start a consumer task. Each
    /// registered consumer runs independently; the broker serializes
    /// per-queue handoff but queues run in parallel with each other.
    fn consume<'a>(
        &'a self,
        queue: &'a str,
        policy: ConsumePolicy,
        handler: Handler,
    ) -> BoxFuture<'a, PulseResult<()>>;
}

/// Serialize `value` and publish it.
pub async fn publish_json<T: Serialize>(
    broker: &dyn MessageBroker,
    queue: &str,
    value: &T,
) -> PulseResult<()> {
    let payload = serde_json::to_vec(value)?;
    broker.publish(queue, payload).await
}
