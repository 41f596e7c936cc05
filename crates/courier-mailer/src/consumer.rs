//! Serial consumer loop.

use courier_core::{CarrierPlacement, Delivery, Error, MessageQueue, Result};
use courier_trace::{
    MessagingAttributes, MessagingOperation, OpenTelemetrySpanExt, SpanId, SpanIds, Status,
    TraceId, end_span, extract, messaging_span, start_span,
};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{Instrument, debug, error, info, warn};

use crate::sender::MailSender;

/// Where a delivery is in its short life.
///
/// `Received → ContextExtracted → SpanOpen → Processed | Failed →
/// SpanClosed → Discarded`. Both outcomes end in `Discarded`: the message
/// was acknowledged on receipt and is never seen again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Received,
    ContextExtracted,
    SpanOpen,
    Processed,
    Failed,
    SpanClosed,
    Discarded,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Received => "received",
            DeliveryState::ContextExtracted => "context_extracted",
            DeliveryState::SpanOpen => "span_open",
            DeliveryState::Processed => "processed",
            DeliveryState::Failed => "failed",
            DeliveryState::SpanClosed => "span_closed",
            DeliveryState::Discarded => "discarded",
        }
    }
}

/// Result of processing one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Processed,
    Failed(String),
}

impl Outcome {
    pub fn is_processed(&self) -> bool {
        matches!(self, Outcome::Processed)
    }
}

/// Counters returned when the consumer loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub processed: u64,
    pub failed: u64,
    pub stream_errors: u64,
}

/// Pulls deliveries and processes them one by one.
///
/// A slow or hung sender blocks the whole loop. Failures are logged and
/// the delivery dropped; there is no retry.
pub struct Consumer {
    queue: Arc<dyn MessageQueue>,
    sender: Arc<dyn MailSender>,
    placement: CarrierPlacement,
}

impl Consumer {
    pub fn new(queue: Arc<dyn MessageQueue>, sender: Arc<dyn MailSender>) -> Self {
        Self {
            queue,
            sender,
            placement: CarrierPlacement::Headers,
        }
    }

    /// Read propagation headers from the same place the producer put them.
    pub fn with_placement(mut self, placement: CarrierPlacement) -> Self {
        self.placement = placement;
        self
    }

    /// Consume until the delivery stream ends, which happens once the
    /// queue is closed and drained.
    pub async fn run(&self) -> Result<ConsumerStats> {
        let mut stream = self.queue.consume().await?;
        info!(queue = self.queue.name(), "Consumer started");

        let mut stats = ConsumerStats::default();
        while let Some(item) = stream.next().await {
            match item {
                Ok(delivery) => match self.process(delivery).await {
                    Outcome::Processed => stats.processed += 1,
                    Outcome::Failed(_) => stats.failed += 1,
                },
                Err(err) => {
                    stats.stream_errors += 1;
                    error!(error = %err, queue = self.queue.name(), "Failed to receive delivery");
                }
            }
        }

        info!(
            queue = self.queue.name(),
            processed = stats.processed,
            failed = stats.failed,
            "Consumer stopped"
        );
        Ok(stats)
    }

    /// Process a single delivery. Never fails: malformed headers start a
    /// new trace, and any other problem becomes [`Outcome::Failed`].
    pub async fn process(&self, delivery: Delivery) -> Outcome {
        let sequence = delivery.sequence;
        transition(sequence, DeliveryState::Received);

        let remote = extract(&delivery.carrier(self.placement));
        transition(sequence, DeliveryState::ContextExtracted);

        let attributes = MessagingAttributes::new(self.queue.system(), MessagingOperation::Process)
            .destination(self.queue.name())
            .message_id(sequence);
        let (cx, span) = start_span(messaging_span(&attributes), &remote);
        transition(sequence, DeliveryState::SpanOpen);

        let outcome = match self.handle(&delivery).instrument(span.clone()).await {
            Ok(()) => {
                span.set_status(Status::Ok);
                transition(sequence, DeliveryState::Processed);
                Outcome::Processed
            }
            Err(err) => {
                let reason = err.to_string();
                span.in_scope(|| {
                    warn!(error = %reason, sequence, "Dropping delivery");
                });
                span.set_status(Status::error(reason.clone()));
                transition(sequence, DeliveryState::Failed);
                Outcome::Failed(reason)
            }
        };

        let ids = SpanIds::of(&cx);
        let parent = SpanIds::of(&remote);
        span.in_scope(|| {
            info!(
                trace_id = %ids.map_or(TraceId::INVALID, |ids| ids.trace_id),
                span_id = %ids.map_or(SpanId::INVALID, |ids| ids.span_id),
                parent_span_id = %parent.map_or(SpanId::INVALID, |ids| ids.span_id),
                processed = outcome.is_processed(),
                "Delivery handled"
            );
        });

        end_span(span);
        transition(sequence, DeliveryState::SpanClosed);

        drop(delivery);
        transition(sequence, DeliveryState::Discarded);

        outcome
    }

    async fn handle(&self, delivery: &Delivery) -> Result<()> {
        let payload = delivery.payload().inspect_err(|_| {
            debug!(body = %delivery.body_lossy(), "Unreadable payload");
        })?;
        self.sender
            .send_reset_email(&payload)
            .await
            .map_err(Error::from)
    }
}

fn transition(sequence: u64, state: DeliveryState) {
    debug!(sequence, state = state.as_str(), "Delivery state changed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::{MailError, SimulatedMailSender};
    use async_trait::async_trait;
    use courier_core::{Carrier, Envelope, HeaderTable, ResetPasswordPayload, TransportMessage};
    use courier_queue::MemoryQueue;
    use courier_trace::testing::{SpanCapture, attribute, parent_id, remote_context};
    use courier_trace::{Context, inject};
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records recipients; fails for any address listed in `fail_for`.
    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<String>>,
        attempts: Mutex<Vec<String>>,
        fail_for: Vec<String>,
    }

    impl RecordingSender {
        fn failing_for(emails: &[&str]) -> Self {
            Self {
                fail_for: emails.iter().map(|e| e.to_string()).collect(),
                ..Default::default()
            }
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }

        fn attempts(&self) -> Vec<String> {
            self.attempts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MailSender for RecordingSender {
        async fn send_reset_email(&self, payload: &ResetPasswordPayload) -> std::result::Result<(), MailError> {
            self.attempts.lock().unwrap().push(payload.email.clone());
            if self.fail_for.contains(&payload.email) {
                return Err(MailError::Unavailable("smtp down".into()));
            }
            self.sent.lock().unwrap().push(payload.email.clone());
            Ok(())
        }
    }

    fn consumer(queue: &MemoryQueue, sender: Arc<dyn MailSender>) -> (Consumer, SpanCapture) {
        let capture = SpanCapture::install();
        let consumer =
            Consumer::new(Arc::new(queue.clone()), sender).with_placement(queue.placement());
        (consumer, capture)
    }

    fn producer_ids(cx: &Context) -> SpanIds {
        SpanIds::of(cx).unwrap()
    }

    async fn next_delivery(queue: &MemoryQueue) -> Delivery {
        let mut stream = queue.consume().await.unwrap();
        stream.next().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_process_continues_producer_trace() {
        let queue = MemoryQueue::default();
        let producer = remote_context();
        queue
            .publish(&Envelope::new(inject(&producer), ResetPasswordPayload::new("a@b.com")))
            .await
            .unwrap();

        let sender = Arc::new(RecordingSender::default());
        let (consumer, spans) = consumer(&queue, sender.clone());

        let outcome = consumer.process(next_delivery(&queue).await).await;
        assert_eq!(outcome, Outcome::Processed);
        assert_eq!(sender.sent(), vec!["a@b.com".to_string()]);

        let producer = producer_ids(&producer);
        let span = spans.span("email_queue process").unwrap();
        assert_eq!(span.span_context.trace_id(), producer.trace_id);
        assert_eq!(parent_id(&span), Some(producer.span_id));
        assert_ne!(span.span_context.span_id(), producer.span_id);
        assert_eq!(attribute(&span, "messaging.operation").as_deref(), Some("process"));
        assert_eq!(attribute(&span, "messaging.message.id").as_deref(), Some("1"));
        assert_eq!(span.status, Status::Ok);
    }

    #[tokio::test]
    async fn test_sender_failure_is_dropped() {
        let queue = MemoryQueue::default();
        queue
            .publish(&Envelope::new(
                inject(&remote_context()),
                ResetPasswordPayload::new("fail@b.com"),
            ))
            .await
            .unwrap();

        let sender = Arc::new(RecordingSender::failing_for(&["fail@b.com"]));
        let (consumer, spans) = consumer(&queue, sender.clone());

        let outcome = consumer.process(next_delivery(&queue).await).await;
        assert!(matches!(outcome, Outcome::Failed(ref reason) if reason.contains("smtp down")));
        assert!(queue.is_empty());

        let span = spans.span("email_queue process").unwrap();
        assert!(matches!(span.status, Status::Error { .. }));
    }

    #[tokio::test]
    async fn test_malformed_payload_fails_without_sending() {
        let queue = MemoryQueue::default();
        queue
            .push(TransportMessage {
                headers: HeaderTable::new(),
                body: b"{not json".to_vec(),
                content_type: "application/json".into(),
            })
            .unwrap();

        let sender = Arc::new(RecordingSender::default());
        let (consumer, spans) = consumer(&queue, sender.clone());

        let outcome = consumer.process(next_delivery(&queue).await).await;
        assert!(matches!(outcome, Outcome::Failed(ref reason) if reason.contains("invalid message payload")));
        assert!(sender.attempts().is_empty());
        assert_eq!(spans.spans_named("email_queue process").len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_headers_start_new_trace() {
        let queue = MemoryQueue::default();
        let mut headers = HeaderTable::new();
        headers.insert("traceparent".into(), json!(42));
        headers.insert("sentry-trace".into(), json!(["x"]));
        headers.insert("baggage".into(), json!(null));
        queue
            .push(TransportMessage {
                headers,
                body: br#"{"email":"a@b.com"}"#.to_vec(),
                content_type: "application/json".into(),
            })
            .unwrap();

        let sender = Arc::new(RecordingSender::default());
        let (consumer, spans) = consumer(&queue, sender.clone());

        let outcome = consumer.process(next_delivery(&queue).await).await;
        assert_eq!(outcome, Outcome::Processed);

        let span = spans.span("email_queue process").unwrap();
        assert_eq!(parent_id(&span), None);
    }

    #[tokio::test]
    async fn test_run_is_serial_and_in_order() {
        let queue = MemoryQueue::default();
        for email in ["1@b.com", "2@b.com", "3@b.com"] {
            queue
                .publish(&Envelope::new(Carrier::new(), ResetPasswordPayload::new(email)))
                .await
                .unwrap();
        }
        queue.close().await.unwrap();

        let sender = Arc::new(RecordingSender::default());
        let (consumer, spans) = consumer(&queue, sender.clone());

        let stats = consumer.run().await.unwrap();
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.failed, 0);
        assert_eq!(sender.sent(), vec!["1@b.com", "2@b.com", "3@b.com"]);

        let ids: Vec<String> = spans
            .spans_named("email_queue process")
            .iter()
            .filter_map(|span| attribute(span, "messaging.message.id"))
            .collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_failed_delivery_is_not_redelivered() {
        let queue = MemoryQueue::default();
        for email in ["fail@b.com", "ok@b.com"] {
            queue
                .publish(&Envelope::new(Carrier::new(), ResetPasswordPayload::new(email)))
                .await
                .unwrap();
        }
        queue.close().await.unwrap();

        let sender = Arc::new(RecordingSender::failing_for(&["fail@b.com"]));
        let (consumer, _) = consumer(&queue, sender.clone());

        let stats = consumer.run().await.unwrap();
        assert_eq!(stats, ConsumerStats { processed: 1, failed: 1, stream_errors: 0 });
        assert_eq!(sender.attempts(), vec!["fail@b.com", "ok@b.com"]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_body_placement() {
        let queue = MemoryQueue::default().with_placement(CarrierPlacement::Body);
        let producer = remote_context();
        queue
            .publish(&Envelope::new(inject(&producer), ResetPasswordPayload::new("a@b.com")))
            .await
            .unwrap();

        let (consumer, spans) = consumer(&queue, Arc::new(RecordingSender::default()));
        assert!(consumer.process(next_delivery(&queue).await).await.is_processed());

        let span = spans.span("email_queue process").unwrap();
        assert_eq!(parent_id(&span), Some(producer_ids(&producer).span_id));
    }

    #[tokio::test]
    async fn test_run_with_simulated_sender() {
        let queue = MemoryQueue::default();
        queue
            .publish(&Envelope::new(Carrier::new(), ResetPasswordPayload::new("a@b.com")))
            .await
            .unwrap();
        queue.close().await.unwrap();

        let (consumer, _) = consumer(
            &queue,
            Arc::new(SimulatedMailSender::new(Duration::from_millis(1))),
        );
        assert_eq!(consumer.run().await.unwrap().processed, 1);
    }

    #[tokio::test]
    async fn test_run_fails_when_consumer_already_attached() {
        let queue = MemoryQueue::default();
        let _stream = queue.consume().await.unwrap();

        let (consumer, _) = consumer(&queue, Arc::new(RecordingSender::default()));
        assert!(matches!(consumer.run().await, Err(Error::Transport(_))));
    }
}
