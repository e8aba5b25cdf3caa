use formupload_protocol::ProtocolError;
use formupload_transfer::TransferError;
use tokio_tungstenite::tungstenite;

/// Errors from the intake client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("upload error: {0}")]
    Transfer(#[from] TransferError),

    #[error("request timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,

    #[error("intake error {code}: {message}")]
    Api { code: i32, message: String },
}

impl ClientError {
    /// True for an API error carrying the given code.
    pub fn is_code(&self, code: i32) -> bool {
        matches!(self, Self::Api { code: c, .. } if *c == code)
    }
}
