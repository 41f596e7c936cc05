//! Message envelope and its transport representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::carrier::{Carrier, HeaderTable};
use crate::{Error, Result};

/// Queue the reset-password envelopes are published to.
pub const DEFAULT_QUEUE_NAME: &str = "email_queue";

/// JSON body field holding the carrier when it travels inside the body.
const EMBEDDED_CARRIER_FIELD: &str = "trace";

/// Business payload of a reset-password request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetPasswordPayload {
    pub email: String,
}

impl ResetPasswordPayload {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
        }
    }
}

/// Where propagation headers travel inside a transport message.
///
/// `Headers` uses transport metadata. `Body` embeds the carrier in the JSON
/// body under `trace`. Producer and consumer of a queue must agree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CarrierPlacement {
    #[default]
    Headers,
    Body,
}

/// Unit published to and consumed from the queue.
///
/// Fields are private: headers are fixed at construction (publish time) and
/// the payload cannot change once the envelope exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    headers: Carrier,
    payload: ResetPasswordPayload,
}

impl Envelope {
    pub fn new(headers: Carrier, payload: ResetPasswordPayload) -> Self {
        Self { headers, payload }
    }

    pub fn headers(&self) -> &Carrier {
        &self.headers
    }

    pub fn payload(&self) -> &ResetPasswordPayload {
        &self.payload
    }

    pub fn into_parts(self) -> (Carrier, ResetPasswordPayload) {
        (self.headers, self.payload)
    }

    /// Serialize into a transport message.
    pub fn encode(&self, placement: CarrierPlacement) -> Result<TransportMessage> {
        let (headers, body) = match placement {
            CarrierPlacement::Headers => (
                self.headers.to_header_table(),
                serde_json::to_vec(&self.payload)?,
            ),
            CarrierPlacement::Body => {
                let mut body = serde_json::to_value(&self.payload)?;
                let object = body.as_object_mut().ok_or_else(|| {
                    Error::Serialization("payload is not a JSON object".to_string())
                })?;
                object.insert(
                    EMBEDDED_CARRIER_FIELD.to_string(),
                    serde_json::to_value(&self.headers)?,
                );
                (HeaderTable::new(), serde_json::to_vec(&body)?)
            }
        };

        Ok(TransportMessage {
            headers,
            body,
            content_type: "application/json".to_string(),
        })
    }
}

/// Serialized envelope as handed to a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportMessage {
    pub headers: HeaderTable,
    pub body: Vec<u8>,
    pub content_type: String,
}

/// A message as received from a queue.
///
/// The transport has already acknowledged it by the time it is handed out,
/// so nothing a consumer does with a delivery makes it reappear.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Position in the queue, starting at 1.
    pub sequence: u64,
    pub headers: HeaderTable,
    pub body: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

impl Delivery {
    pub fn new(sequence: u64, headers: HeaderTable, body: Vec<u8>) -> Self {
        Self {
            sequence,
            headers,
            body,
            received_at: Utc::now(),
        }
    }

    pub fn from_message(sequence: u64, message: TransportMessage) -> Self {
        Self::new(sequence, message.headers, message.body)
    }

    /// Propagation headers of this delivery. Never fails: unreadable
    /// headers or bodies produce an empty or partial carrier.
    pub fn carrier(&self, placement: CarrierPlacement) -> Carrier {
        match placement {
            CarrierPlacement::Headers => Carrier::from_header_table(&self.headers),
            CarrierPlacement::Body => serde_json::from_slice::<Value>(&self.body)
                .ok()
                .and_then(|body| body.get(EMBEDDED_CARRIER_FIELD).map(Carrier::from_json))
                .unwrap_or_default(),
        }
    }

    pub fn payload(&self) -> Result<ResetPasswordPayload> {
        serde_json::from_slice(&self.body)
            .map_err(|e| Error::Serialization(format!("invalid message payload: {}", e)))
    }

    /// Decode into an envelope, failing only on the payload.
    pub fn decode(&self, placement: CarrierPlacement) -> Result<Envelope> {
        let payload = self.payload()?;
        Ok(Envelope::new(self.carrier(placement), payload))
    }

    pub fn body_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
