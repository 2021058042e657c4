//! In-process broker for tests and single-node dev mode. Queues are
//! unbounded channels with redelivery bookkeeping; durability extends to
//! the process lifetime only.

use crate::{dlq_name, BoxFuture, ConsumePolicy, Handler, MessageBroker};
use dashmap::DashMap;
use parking_lot::Mutex;
use pulse_core::{PulseError, PulseResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, warn};

struct Delivery {
    payload: Vec<u8>,
    /// 1-based delivery attempt, incremented on each redelivery.
    attempt: u32,
}

struct Queue {
    tx: mpsc::UnboundedSender<Delivery>,
    /// Present until a consumer claims the queue.
    rx: Mutex<Option<mpsc::UnboundedReceiver<Delivery>>>,
}

impl Queue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }
}

/// In-memory `MessageBroker`. Messages published before a consumer registers
/// are buffered and drained once consumption starts, matching the durable
/// behavior of the JetStream implementation within a single process.
#[derive(Default)]
pub struct InMemoryBroker {
    queues: Arc<DashMap<String, Arc<Queue>>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, name: &str) -> Arc<Queue> {
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Queue::new()))
            .clone()
    }

    fn enqueue(&self, queue: &str, delivery: Delivery) -> PulseResult<()> {
        self.queue(queue)
            .tx
            .send(delivery)
            .map_err(|_| PulseError::Broker(format!("queue '{queue}' is closed")))
    }
}

impl MessageBroker for InMemoryBroker {
    fn publish<'a>(&'a self, queue: &'a str, payload: Vec<u8>) -> BoxFuture<'a, PulseResult<()>> {
        Box::pin(async move {
            metrics::counter!("broker.published", "queue" => queue.to_string()).increment(1);
            self.enqueue(queue, Delivery { payload, attempt: 1 })
        })
    }

    fn publish_after<'a>(
        &'a self,
        queue: &'a str,
        payload: Vec<u8>,
        delay: Duration,
    ) -> BoxFuture<'a, PulseResult<()>> {
        Box::pin(async move {
            let tx = self.queue(queue).tx.clone();
            let queue = queue.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                metrics::counter!("broker.published", "queue" => queue.clone()).increment(1);
                if tx.send(Delivery { payload, attempt: 1 }).is_err() {
                    warn!(queue = %queue, "Delayed publish arrived after queue closed");
                }
            });
            Ok(())
        })
    }

    fn consume<'a>(
        &'a self,
        queue: &'a str,
        policy: ConsumePolicy,
        handler: Handler,
    ) -> BoxFuture<'a, PulseResult<()>> {
        Box::pin(async move {
            let q = self.queue(queue);
            let mut rx = q.rx.lock().take().ok_or_else(|| {
                PulseError::Broker(format!("queue '{queue}' already has a consumer"))
            })?;

            let tx = q.tx.clone();
            let queues = self.queues.clone();
            let queue = queue.to_string();

            tokio::spawn(async move {
                while let Some(delivery) = rx.recv().await {
                    match handler(delivery.payload.clone()).await {
                        Ok(()) => {
                            metrics::counter!("broker.acked", "queue" => queue.clone())
                                .increment(1);
                        }
                        Err(e) => handle_failure(&queue, &tx, &queues, policy, delivery, &e),
                    }
                }
            });

            Ok(())
        })
    }
}

fn handle_failure(
    queue: &str,
    tx: &mpsc::UnboundedSender<Delivery>,
    queues: &DashMap<String, Arc<Queue>>,
    policy: ConsumePolicy,
    delivery: Delivery,
    err: &PulseError,
) {
    match policy {
        ConsumePolicy::Drop => {
            warn!(queue = %queue, error = %err, "Handler failed, dropping message");
            metrics::counter!("broker.dropped", "queue" => queue.to_string()).increment(1);
        }
        ConsumePolicy::Requeue { max_attempts } => {
            if delivery.attempt >= max_attempts {
                error!(
                    queue = %queue,
                    attempts = delivery.attempt,
                    error = %err,
                    "Delivery attempts exhausted, dead-lettering"
                );
                metrics::counter!("broker.dead_lettered", "queue" => queue.to_string())
                    .increment(1);
                let dlq = queues
                    .entry(dlq_name(queue))
                    .or_insert_with(|| Arc::new(Queue::new()))
                    .clone();
                let _ = dlq.tx.send(Delivery {
                    payload: delivery.payload,
                    attempt: 1,
                });
            } else {
                warn!(
                    queue = %queue,
                    attempt = delivery.attempt,
                    error = %err,
                    "Handler failed, requeueing"
                );
                metrics::counter!("broker.requeued", "queue" => queue.to_string()).increment(1);
                let _ = tx.send(Delivery {
                    payload: delivery.payload,
                    attempt: delivery.attempt + 1,
                });
            }
        }
    }
}
