//! Test helper functions and utilities.

use async_trait::async_trait;
use courier_core::{
    DeliveryStream, Envelope, Error, HealthCheck, MessageQueue, ResetPasswordPayload, Result,
};
use courier_mailer::{MailError, MailSender};
use courier_queue::MemoryQueue;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Mail sender that records every call and fails for chosen recipients.
#[derive(Default)]
pub struct RecordingSender {
    attempts: Mutex<Vec<String>>,
    sent: Mutex<Vec<String>>,
    fail_for: Vec<String>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(emails: &[&str]) -> Self {
        Self {
            fail_for: emails.iter().map(|e| e.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Every recipient the worker tried, in order.
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    /// Recipients whose email went out.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailSender for RecordingSender {
    async fn send_reset_email(
        &self,
        payload: &ResetPasswordPayload,
    ) -> std::result::Result<(), MailError> {
        self.attempts.lock().unwrap().push(payload.email.clone());
        if self.fail_for.contains(&payload.email) {
            return Err(MailError::Unavailable(format!(
                "refusing to send to {}",
                payload.email
            )));
        }
        self.sent.lock().unwrap().push(payload.email.clone());
        Ok(())
    }
}

/// Queue whose next `failures` publishes fail with a transport error
/// before reaching the wrapped queue. Failures count against the wrapped
/// queue's health.
pub struct FlakyQueue {
    inner: MemoryQueue,
    failures: AtomicUsize,
}

impl FlakyQueue {
    pub fn new(inner: MemoryQueue, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl MessageQueue for FlakyQueue {
    fn system(&self) -> &'static str {
        self.inner.system()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn publish(&self, envelope: &Envelope) -> Result<()> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            self.inner.metrics().record_publish_failure();
            return Err(Error::Transport("broker connection reset".to_string()));
        }
        self.inner.publish(envelope).await
    }

    async fn consume(&self) -> Result<DeliveryStream> {
        self.inner.consume().await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    fn health(&self) -> HealthCheck {
        self.inner.health()
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn wait_for<F>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
