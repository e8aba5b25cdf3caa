//! Contract with the resumable transport that moves one file's bytes.
//!
//! The session never frames chunks, negotiates offsets or times retries.
//! It hands a [`TransportRequest`] to a [`TransportFactory`] and reacts to
//! the four signals a transport can produce: progress, success, error, and
//! the completion of `abort`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Weak;
use std::time::Duration;

use crate::TransferError;
use crate::session::SessionShared;
use crate::task::UploadFile;

/// Everything a transport needs to move one file.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub file: UploadFile,
    /// Upload metadata (`filename`, `filetype`, correlation key, `fileIndex`, `fileKey`).
    pub metadata: HashMap<String, String>,
    pub endpoint: String,
    pub chunk_size: usize,
    pub retry_delays: Vec<Duration>,
    /// Identity used by the transport to find a prior partial upload of the
    /// same file and resume from its offset.
    pub fingerprint: String,
}

/// One file's transfer.
///
/// `run` drives the transfer to the end and reports through the
/// [`TransportEvents`] handed to the factory. It must emit exactly one
/// terminal event (`success` or `error`). A `run` that returns without one
/// is treated as a failure.
pub trait Transport: Send + Sync {
    fn run(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Stops the transfer and makes a best-effort request to discard the
    /// partial upload on the server. Events emitted after an abort are
    /// ignored by the session.
    fn abort(&self) -> Pin<Box<dyn Future<Output = Result<(), TransferError>> + Send + '_>>;
}

/// Builds transports for admitted tasks.
///
/// `create` is called while the session holds its task list; it must not
/// emit events synchronously. Emitting from `run` is fine.
pub trait TransportFactory: Send + Sync {
    fn create(
        &self,
        request: TransportRequest,
        events: TransportEvents,
    ) -> Result<std::sync::Arc<dyn Transport>, TransferError>;
}

/// Event sink bound to one task of one session.
///
/// Cheap to clone. Once the task is terminal (or removed, or the session is
/// gone) every call is a no-op, which is what suppresses late events after
/// an abort.
#[derive(Clone)]
pub struct TransportEvents {
    pub(crate) session: Weak<SessionShared>,
    pub(crate) seq: u64,
    pub(crate) file_key: String,
}

impl TransportEvents {
    /// Key of the task these events belong to.
    pub fn file_key(&self) -> &str {
        &self.file_key
    }

    pub fn progress(&self, bytes_uploaded: u64, bytes_total: u64) {
        if let Some(shared) = self.session.upgrade() {
            shared.on_progress(self.seq, bytes_uploaded, bytes_total);
        }
    }

    pub fn success(&self) {
        if let Some(shared) = self.session.upgrade() {
            shared.on_success(self.seq);
        }
    }

    pub fn error(&self, reason: impl Into<String>) {
        if let Some(shared) = self.session.upgrade() {
            shared.on_error(self.seq, reason.into());
        }
    }

    /// Called when `run` returns. Fails the task if it is still uploading.
    pub(crate) fn ended(&self) {
        if let Some(shared) = self.session.upgrade() {
            shared.on_error(self.seq, "transport ended without a result".into());
        }
    }
}

impl std::fmt::Debug for TransportEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportEvents")
            .field("seq", &self.seq)
            .field("file_key", &self.file_key)
            .finish()
    }
}
