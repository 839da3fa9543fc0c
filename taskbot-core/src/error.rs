//! Error taxonomy shared by every core operation.
//!
//! Each error is scoped to the single message or command being handled; none is
//! fatal to the process.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskbotError {
    /// The chat transport could not deliver or receive a message.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// The language-understanding service call failed (network, HTTP status, empty body).
    #[error("language model call failed: {0}")]
    CollaboratorCallFailed(String),

    /// The language model answered, but not with the JSON shape the prompt asked for.
    #[error("could not decode model response: {0}")]
    ResponseDecodeFailed(String),

    /// The spreadsheet backend rejected the request or could not be reached.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Input or decoded data violated a domain rule.
    #[error("validation failed: {0}")]
    ValidationFailed(String),
}

impl TaskbotError {
    pub fn call(msg: impl Into<String>) -> Self {
        Self::CollaboratorCallFailed(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::ResponseDecodeFailed(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::StorageUnavailable(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationFailed(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::TransportUnavailable(msg.into())
    }

    /// Storage failures are the only kind surfaced to chat users as an explicit notice.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }
}

impl From<serde_json::Error> for TaskbotError {
    fn from(e: serde_json::Error) -> Self {
        Self::decode(e.to_string())
    }
}

pub type Result<T, E = TaskbotError> = std::result::Result<T, E>;
