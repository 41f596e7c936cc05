//! Mail sending port.

use async_trait::async_trait;
use courier_core::ResetPasswordPayload;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Recipient rejected: {0}")]
    Rejected(String),
    #[error("Mail service unavailable: {0}")]
    Unavailable(String),
}

impl From<MailError> for courier_core::Error {
    fn from(err: MailError) -> Self {
        courier_core::Error::Handler(err.to_string())
    }
}

/// Delivers the reset email. Implementations may be slow; the worker waits
/// for each call before taking the next message.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send_reset_email(&self, payload: &ResetPasswordPayload) -> Result<(), MailError>;
}

/// Settings for the simulated sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailerConfig {
    pub simulated_delay_ms: u64,
}

impl Default for MailerConfig {
    fn default() -> Self {
        Self {
            simulated_delay_ms: 50,
        }
    }
}

/// Stand-in for a real mail provider: waits, logs and succeeds.
#[derive(Debug, Clone)]
pub struct SimulatedMailSender {
    delay: Duration,
}

impl Default for SimulatedMailSender {
    fn default() -> Self {
        Self::from_config(&MailerConfig::default())
    }
}

impl SimulatedMailSender {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn from_config(config: &MailerConfig) -> Self {
        Self::new(Duration::from_millis(config.simulated_delay_ms))
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

#[async_trait]
impl MailSender for SimulatedMailSender {
    async fn send_reset_email(&self, payload: &ResetPasswordPayload) -> Result<(), MailError> {
        tokio::time::sleep(self.delay).await;
        info!(email = %payload.email, "Password reset email sent");
        Ok(())
    }
}
