//! NATS JetStream broker — durable work queues with explicit acknowledgment.
//! Messages survive a broker restart until acked.

use crate::{dlq_name, BoxFuture, ConsumePolicy, Handler, MessageBroker};
use async_nats::jetstream::consumer::pull;
use async_nats::jetstream::consumer::AckPolicy;
use async_nats::jetstream::stream::{Config as StreamConfig, RetentionPolicy, StorageType};
use async_nats::jetstream::AckKind;
use pulse_core::config::NatsConfig;
use pulse_core::{PulseError, PulseResult};
use std::time::Duration;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};

pub struct JetStreamBroker {
    jetstream: async_nats::jetstream::Context,
    stream_prefix: String,
}

impl JetStreamBroker {
    /// Connect to the configured NATS servers and bind a JetStream context.
    pub async fn connect(config: &NatsConfig) -> PulseResult<Self> {
        let client = async_nats::ConnectOptions::new()
            .max_reconnects(Some(config.max_reconnects))
            .connect(config.urls.join(","))
            .await
            .map_err(|e| PulseError::Broker(e.to_string()))?;

        info!(urls = ?config.urls, "Connected to NATS");

        Ok(Self {
            jetstream: async_nats::jetstream::new(client),
            stream_prefix: config.stream_prefix.clone(),
        })
    }

    /// Stream names may not contain subject separators.
    fn stream_name(&self, queue: &str) -> String {
        format!("{}-{}", self.stream_prefix, queue.replace('.', "-"))
    }

    async fn ensure_stream(
        &self,
        queue: &str,
    ) -> PulseResult<async_nats::jetstream::stream::Stream> {
        self.jetstream
            .get_or_create_stream(StreamConfig {
                name: self.stream_name(queue),
                subjects: vec![queue.to_string()],
                retention: RetentionPolicy::WorkQueue,
                storage: StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| PulseError::Broker(format!("stream for '{queue}': {e}")))
    }

    async fn publish_inner(&self, queue: &str, payload: Vec<u8>) -> PulseResult<()> {
        self.ensure_stream(queue).await?;
        let ack = self
            .jetstream
            .publish(queue.to_string(), payload.into())
            .await
            .map_err(|e| PulseError::Broker(format!("publish to '{queue}': {e}")))?;
        ack.await
            .map_err(|e| PulseError::Broker(format!("publish ack from '{queue}': {e}")))?;
        metrics::counter!("broker.published", "queue" => queue.to_string()).increment(1);
        Ok(())
    }
}

impl MessageBroker for JetStreamBroker {
    fn publish<'a>(&'a self, queue: &'a str, payload: Vec<u8>) -> BoxFuture<'a, PulseResult<()>> {
        Box::pin(self.publish_inner(queue, payload))
    }

    // TODO: switch to a JetStream delay stream (subject-per-deadline with
    // redelivery backoff) so scheduled receipts survive a process restart.
    fn publish_after<'a>(
        &'a self,
        queue: &'a str,
        payload: Vec<u8>,
        delay: Duration,
    ) -> BoxFuture<'a, PulseResult<()>> {
        Box::pin(async move {
            self.ensure_stream(queue).await?;
            let jetstream = self.jetstream.clone();
            let queue = queue.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                match jetstream.publish(queue.clone(), payload.into()).await {
                    Ok(ack) => {
                        if let Err(e) = ack.await {
                            error!(queue = %queue, error = %e, "Delayed publish not acked");
                        } else {
                            metrics::counter!("broker.published", "queue" => queue.clone())
                                .increment(1);
                        }
                    }
                    Err(e) => error!(queue = %queue, error = %e, "Delayed publish failed"),
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
            let stream = self.ensure_stream(queue).await?;
            if let ConsumePolicy::Requeue { .. } = policy {
                // Dead-lettered payloads need a stream bound up front.
                self.ensure_stream(&dlq_name(queue)).await?;
            }

            let max_deliver = match policy {
                ConsumePolicy::Drop => 1,
                ConsumePolicy::Requeue { max_attempts } => max_attempts as i64,
            };
            let consumer_name = format!("{}-worker", queue.replace('.', "-"));
            let consumer = stream
                .get_or_create_consumer(
                    &consumer_name,
                    pull::Config {
                        durable_name: Some(consumer_name.clone()),
                        ack_policy: AckPolicy::Explicit,
                        max_deliver,
                        ..Default::default()
                    },
                )
                .await
                .map_err(|e| PulseError::Broker(format!("consumer for '{queue}': {e}")))?;

            let mut messages = consumer
                .messages()
                .await
                .map_err(|e| PulseError::Broker(format!("subscribe to '{queue}': {e}")))?;

            let jetstream = self.jetstream.clone();
            let queue = queue.to_string();

            info!(queue = %queue, ?policy, "Consumer started");

            tokio::spawn(async move {
                while let Some(next) = messages.next().await {
                    let msg = match next {
                        Ok(msg) => msg,
                        Err(e) => {
                            warn!(queue = %queue, error = %e, "Failed to pull message");
                            continue;
                        }
                    };

                    match handler(msg.payload.to_vec()).await {
                        Ok(()) => {
                            metrics::counter!("broker.acked", "queue" => queue.clone())
                                .increment(1);
                            if let Err(e) = msg.ack().await {
                                warn!(queue = %queue, error = %e, "Ack failed");
                            }
                        }
                        Err(e) => {
                            let delivered =
                                msg.info().map(|info| info.delivered).unwrap_or(i64::MAX);
                            match policy {
                                ConsumePolicy::Drop => {
                                    warn!(
                                        queue = %queue,
                                        error = %e,
                                        "Handler failed, dropping message"
                                    );
                                    metrics::counter!("broker.dropped", "queue" => queue.clone())
                                        .increment(1);
                                    let _ = msg.ack().await;
                                }
                                ConsumePolicy::Requeue { max_attempts } => {
                                    if delivered >= max_attempts as i64 {
                                        error!(
                                            queue = %queue,
                                            attempts = delivered,
                                            error = %e,
                                            "Delivery attempts exhausted, dead-lettering"
                                        );
                                        metrics::counter!(
                                            "broker.dead_lettered",
                                            "queue" => queue.clone()
                                        )
                                        .increment(1);
                                        let _ = jetstream
                                            .publish(dlq_name(&queue), msg.payload.clone())
                                            .await;
                                        let _ = msg.ack().await;
                                    } else {
                                        warn!(
                                            queue = %queue,
                                            attempt = delivered,
                                            error = %e,
                                            "Handler failed, requeueing"
                                        );
                                        metrics::counter!(
                                            "broker.requeued",
                                            "queue" => queue.clone()
                                        )
                                        .increment(1);
                                        let _ = msg.ack_with(AckKind::Nak(None)).await;
                                    }
                                }
                            }
                        }
                    }
                }
                warn!(queue = %queue, "Consumer stream ended");
            });

            Ok(())
        })
    }
}
