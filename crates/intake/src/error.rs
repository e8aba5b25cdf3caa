//! Intake error types.

use formupload_file_ops::FileOpsError;
use formupload_protocol::ApplicationStatus;

/// Errors produced by the application record store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("application not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("cannot move application {id} from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: ApplicationStatus,
        to: ApplicationStatus,
    },
}

/// Errors produced while reconciling a batch with its application.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("application not found: {0}")]
    NotFound(String),

    #[error("invalid batch id: {0}")]
    InvalidBatch(String),

    #[error("storage error: {0}")]
    Storage(#[from] FileOpsError),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("blocking task failed: {0}")]
    Join(String),
}

/// Errors produced by the resumable transport event hooks.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("upload is missing a correlation key (batchId or applicationId)")]
    MissingCorrelationKey,

    #[error("upload of {size} bytes exceeds the limit of {limit} bytes")]
    UploadTooLarge { size: u64, limit: u64 },

    #[error("invalid upload metadata: {0}")]
    InvalidMetadata(String),

    #[error("storage error: {0}")]
    Storage(#[from] FileOpsError),

    #[error("blocking task failed: {0}")]
    Join(String),
}

impl HookError {
    /// Status the transport should answer a rejected request with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MissingCorrelationKey
            | Self::InvalidMetadata(_)
            | Self::Storage(FileOpsError::InvalidName(_)) => 400,
            Self::UploadTooLarge { .. } => 413,
            Self::Storage(_) | Self::Join(_) => 500,
        }
    }
}

/// Errors surfaced at the request boundary.
///
/// `Internal` keeps its detail for logging only; callers see a generic
/// message.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    TooLarge(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Wire error code.
    pub fn code(&self) -> i32 {
        match self {
            Self::BadRequest(_) => 400,
            Self::NotFound(_) => 404,
            Self::TooLarge(_) => 413,
            Self::Internal(_) => 500,
        }
    }

    /// Message safe to send to the caller.
    pub fn public_message(&self) -> String {
        match self {
            Self::BadRequest(m) | Self::NotFound(m) | Self::TooLarge(m) => m.clone(),
            Self::Internal(_) => "internal error".into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => Self::NotFound(format!("application not found: {id}")),
            StoreError::InvalidInput(m) => Self::BadRequest(m),
            e @ StoreError::InvalidTransition { .. } => Self::BadRequest(e.to_string()),
        }
    }
}

impl From<ReconcileError> for ApiError {
    fn from(e: ReconcileError) -> Self {
        match e {
            ReconcileError::NotFound(id) => {
                Self::NotFound(format!("application not found: {id}"))
            }
            e @ ReconcileError::InvalidBatch(_) => Self::BadRequest(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<HookError> for ApiError {
    fn from(e: HookError) -> Self {
        match e.status_code() {
            400 => Self::BadRequest(e.to_string()),
            413 => Self::TooLarge(e.to_string()),
            _ => Self::Internal(e.to_string()),
        }
    }
}
