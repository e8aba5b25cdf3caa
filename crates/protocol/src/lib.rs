//! Wire protocol types shared by the form upload client and the intake server.
//!
//! Everything that crosses a process boundary lives here: the JSON message
//! envelope, the request/response payloads of the application API, the
//! upload metadata keys understood by the resumable transport hooks, and the
//! status enums both sides agree on.

pub mod constants;
pub mod envelope;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use constants::MessageType;
pub use envelope::{ErrorDetail, Message};
pub use types::{ApplicationStatus, CorrelationKey, UploadStatus, UploadedFileInfo};

/// Errors produced while interpreting protocol values.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing payload")]
    MissingPayload,

    #[error("unknown application status: {0}")]
    UnknownStatus(String),
}
