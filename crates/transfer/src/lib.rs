//! Client-side orchestration of background file uploads.
//!
//! An [`Uploader`] turns a set of files into an upload session: one
//! [`UploadTask`] per file, at most `concurrency_limit` of them running at a
//! time, each driven by a [`Transport`] built by the caller's
//! [`TransportFactory`]. The session exposes aggregate progress,
//! cancellation and a completion signal. Reporting results to the server is
//! left to the caller.

mod progress;
mod session;
mod settings;
mod task;
mod transport;

pub use progress::{
    Partition, ProgressCallback, ProgressTracker, SessionSnapshot, StatusSummary, TaskProgress,
    aggregate_percent,
};
pub use session::{CANCELLED_REASON, SessionHandle, Uploader, WaitOutcome};
pub use settings::UploadSettings;
pub use task::{FileSource, UploadFile, UploadTask, file_key};
pub use transport::{Transport, TransportEvents, TransportFactory, TransportRequest};

/// Default chunk size: 5 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Default number of concurrently running transports per session.
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 4;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("session cancelled")]
    Cancelled,

    #[error("duplicate file key: {0}")]
    DuplicateFileKey(String),

    #[error("concurrency limit must be at least 1")]
    InvalidConcurrency,

    #[error("unknown task: {0}")]
    UnknownTask(String),
}
