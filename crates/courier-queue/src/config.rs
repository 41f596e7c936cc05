//! Configuration for queue transports.

use courier_core::{CarrierPlacement, DEFAULT_QUEUE_NAME};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which transport backs the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackend {
    #[default]
    Nats,
    Memory,
}

/// Configuration for a queue transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    /// Broker URLs (comma-separated for cluster).
    pub urls: Vec<String>,
    /// Queue name, also the NATS subject.
    pub name: String,
    /// Where propagation headers travel.
    pub carrier_placement: CarrierPlacement,
    /// Connection timeout.
    #[serde(with = "secs")]
    pub connection_timeout: Duration,
    /// Request timeout for JetStream operations.
    #[serde(with = "secs")]
    pub request_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Nats,
            urls: vec!["nats://localhost:4222".to_string()],
            name: DEFAULT_QUEUE_NAME.to_string(),
            carrier_placement: CarrierPlacement::Headers,
            connection_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl QueueConfig {
    /// Create a new config with a single URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            ..Default::default()
        }
    }

    pub fn memory() -> Self {
        Self {
            backend: QueueBackend::Memory,
            urls: vec![],
            ..Default::default()
        }
    }

    pub fn with_urls(mut self, urls: Vec<String>) -> Self {
        self.urls = urls;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_placement(mut self, placement: CarrierPlacement) -> Self {
        self.carrier_placement = placement;
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// JetStream stream backing the queue.
    pub fn stream_name(&self) -> String {
        self.name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect()
    }

    /// Durable consumer shared by worker processes.
    pub fn consumer_name(&self) -> String {
        format!("{}_worker", self.stream_name().to_ascii_lowercase())
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
