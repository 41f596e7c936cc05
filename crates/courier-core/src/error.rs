//! Error types for Courier.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The inbound request body was rejected.
    #[error("Bad Request: {0}")]
    Validation(String),

    /// The queue is unreachable, closed or refused the message.
    #[error("Transport error: {0}")]
    Transport(String),

    /// An envelope or payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Propagation headers could not be understood.
    #[error("Carrier error: {0}")]
    Carrier(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The business action for a delivery failed.
    #[error("Handler failed: {0}")]
    Handler(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the caller sent something we will never accept.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
