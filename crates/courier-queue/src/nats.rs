//! NATS JetStream queue.

use async_nats::HeaderMap;
use async_nats::jetstream::{
    self,
    consumer::{AckPolicy, pull::Config as ConsumerConfig},
    stream::{Config as StreamConfig, RetentionPolicy, StorageType},
};
use async_trait::async_trait;
use courier_core::{
    Delivery, DeliveryStream, Envelope, Error, HeaderTable, HealthCheck, MessageQueue, Result,
    coerce_header_value,
};
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::metrics::QueueMetrics;

/// How long the broker waits for an ack before redelivering.
const ACK_WAIT: Duration = Duration::from_secs(30);

/// Queue backed by a JetStream work-queue stream.
///
/// The stream uses memory storage, so queued messages do not survive a
/// broker restart. Messages are acknowledged as soon as they are pulled,
/// before the consumer processes them: a consumer that fails afterwards
/// loses the message. This keeps delivery at-most-once, with no redelivery
/// and no dead-letter queue. The consumer holds at most one unacknowledged
/// message, so nothing buffered can be redelivered and yielded twice.
#[derive(Clone)]
pub struct NatsQueue {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    config: QueueConfig,
    metrics: Arc<QueueMetrics>,
    closed: Arc<watch::Sender<bool>>,
}

impl NatsQueue {
    /// Connect and declare the queue. Fails immediately when the broker
    /// cannot be reached.
    pub async fn connect(config: QueueConfig) -> Result<Self> {
        let urls = config.urls.join(",");
        info!("Connecting to NATS at {}", urls);

        let client = async_nats::ConnectOptions::new()
            .connection_timeout(config.connection_timeout)
            .request_timeout(Some(config.request_timeout))
            .connect(&urls)
            .await
            .map_err(|e| Error::Transport(format!("Failed to connect to NATS: {}", e)))?;

        let jetstream = jetstream::new(client.clone());

        let stream_config = StreamConfig {
            name: config.stream_name(),
            subjects: vec![config.name.clone()],
            retention: RetentionPolicy::WorkQueue,
            storage: StorageType::Memory,
            ..Default::default()
        };

        jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| Error::Transport(format!("Failed to declare queue: {}", e)))?;

        info!(queue = %config.name, stream = %config.stream_name(), "Queue declared");

        Ok(Self {
            client,
            jetstream,
            config,
            metrics: QueueMetrics::new(),
            closed: Arc::new(watch::Sender::new(false)),
        })
    }

    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<QueueMetrics> {
        &self.metrics
    }

    pub fn is_connected(&self) -> bool {
        self.client.connection_state() == async_nats::connection::State::Connected
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

/// Durable pull consumer for the queue's subject. At most one message is in
/// flight and a message is delivered once.
fn consumer_config(config: &QueueConfig) -> ConsumerConfig {
    ConsumerConfig {
        durable_name: Some(config.consumer_name()),
        filter_subject: config.name.clone(),
        ack_policy: AckPolicy::Explicit,
        ack_wait: ACK_WAIT,
        max_ack_pending: 1,
        max_deliver: 1,
        max_batch: 1,
        ..Default::default()
    }
}

/// Transport headers as NATS headers. Values are coerced to text; anything
/// that has no text form is left out.
fn to_nats_headers(table: &HeaderTable, content_type: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (key, value) in table {
        if let Some(text) = coerce_header_value(value) {
            headers.insert(key.as_str(), text.as_str());
        }
    }
    headers.insert("content-type", content_type);
    headers
}

fn from_nats_headers(headers: Option<&HeaderMap>) -> HeaderTable {
    let mut table = HeaderTable::new();
    if let Some(headers) = headers {
        for (name, values) in headers.iter() {
            if let Some(value) = values.first() {
                table.insert(
                    name.to_string().to_ascii_lowercase(),
                    Value::String(value.to_string()),
                );
            }
        }
    }
    table
}

#[async_trait]
impl MessageQueue for NatsQueue {
    fn system(&self) -> &'static str {
        "nats"
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    async fn publish(&self, envelope: &Envelope) -> Result<()> {
        if self.is_closed() {
            self.metrics.record_publish_failure();
            return Err(Error::Transport(format!(
                "Cannot publish: queue {} is closed",
                self.config.name
            )));
        }

        let message = envelope.encode(self.config.carrier_placement)?;
        let headers = to_nats_headers(&message.headers, &message.content_type);
        let payload_len = message.body.len() as u64;
        let started = Instant::now();

        match self
            .jetstream
            .publish_with_headers(self.config.name.clone(), headers, message.body.into())
            .await
        {
            Ok(ack_future) => {
                ack_future.await.map_err(|e| {
                    self.metrics.record_publish_failure();
                    Error::Transport(format!("Failed to confirm publish: {}", e))
                })?;
                self.metrics.record_publish(payload_len);
                debug!(
                    queue = %self.config.name,
                    latency_ms = started.elapsed().as_millis() as u64,
                    "Message published"
                );
                Ok(())
            }
            Err(e) => {
                self.metrics.record_publish_failure();
                Err(Error::Transport(format!(
                    "Failed to publish to {}: {}",
                    self.config.name, e
                )))
            }
        }
    }

    async fn consume(&self) -> Result<DeliveryStream> {
        debug!(queue = %self.config.name, "Attaching consumer");

        let consumer = self
            .jetstream
            .create_consumer_on_stream(consumer_config(&self.config), self.config.stream_name())
            .await
            .map_err(|e| Error::Transport(format!("Failed to create consumer: {}", e)))?;

        let messages = consumer
            .stream()
            .max_messages_per_batch(1)
            .messages()
            .await
            .map_err(|e| Error::Transport(format!("Failed to get messages: {}", e)))?;

        let metrics = self.metrics.clone();
        let mut closed = self.closed.subscribe();
        let sequence = Arc::new(AtomicU64::new(0));

        let stream = messages
            .take_until(async move {
                let _ = closed.wait_for(|closed| *closed).await;
            })
            .then(move |msg_result| {
                let metrics = metrics.clone();
                let sequence = sequence.clone();
                async move {
                    match msg_result {
                        Ok(msg) => {
                            // Acknowledge on receipt, before any processing.
                            if let Err(e) = msg.ack().await {
                                metrics.record_ack_failure();
                                warn!("Failed to acknowledge message: {}", e);
                            }
                            metrics.record_receive(msg.payload.len() as u64);

                            let seq = sequence.fetch_add(1, Ordering::SeqCst) + 1;
                            Ok(Delivery::new(
                                seq,
                                from_nats_headers(msg.headers.as_ref()),
                                msg.payload.to_vec(),
                            ))
                        }
                        Err(e) => Err(Error::Transport(format!("Message error: {}", e))),
                    }
                }
            });

        Ok(Box::pin(stream))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.send_replace(true) {
            return Ok(());
        }

        info!(queue = %self.config.name, "Closing queue connection");
        if let Err(e) = self.client.drain().await {
            error!("Error draining NATS connection: {}", e);
        }
        Ok(())
    }

    fn health(&self) -> HealthCheck {
        self.metrics.health(
            &self.config.name,
            self.system(),
            self.is_connected() && !self.is_closed(),
        )
    }
}
