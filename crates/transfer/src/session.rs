//! Bounded-concurrency scheduling of the uploads of one form submission.
//!
//! A session owns its task list behind a single mutex. All bookkeeping
//! (admission, terminal transitions, cancellation) happens synchronously
//! under that lock; transports run as independent tokio tasks and only
//! touch the session through [`TransportEvents`]. Every mutation publishes
//! a fresh [`SessionSnapshot`] on a `watch` channel, which is what
//! [`SessionHandle::wait_for_completion`] and subscribers observe.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use formupload_protocol::{CorrelationKey, UploadStatus};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::TransferError;
use crate::progress::{Partition, SessionSnapshot, StatusSummary};
use crate::settings::UploadSettings;
use crate::task::{UploadFile, UploadTask};
use crate::transport::{Transport, TransportEvents, TransportFactory, TransportRequest};

/// Error text given to tasks stopped by [`SessionHandle::cancel_all`].
pub const CANCELLED_REASON: &str = "cancelled";

/// Creates upload sessions that share one transport factory and settings.
pub struct Uploader {
    factory: Arc<dyn TransportFactory>,
    settings: UploadSettings,
}

impl Uploader {
    pub fn new(factory: Arc<dyn TransportFactory>, settings: UploadSettings) -> Self {
        Self { factory, settings }
    }

    pub fn settings(&self) -> &UploadSettings {
        &self.settings
    }

    /// Creates a session for `files` and immediately starts up to
    /// `concurrency_limit` of them.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit(
        &self,
        files: Vec<UploadFile>,
        key: CorrelationKey,
        concurrency_limit: usize,
    ) -> Result<SessionHandle, TransferError> {
        if concurrency_limit == 0 {
            return Err(TransferError::InvalidConcurrency);
        }

        let id = uuid::Uuid::new_v4().to_string();
        let (snapshot_tx, _) = watch::channel(SessionSnapshot::build(
            &id,
            key.value(),
            0,
            false,
            Vec::new(),
        ));
        let shared = Arc::new(SessionShared {
            id,
            key,
            factory: Arc::clone(&self.factory),
            settings: self.settings.clone(),
            state: Mutex::new(SessionState {
                tasks: Vec::new(),
                active: HashSet::new(),
                live: HashMap::new(),
                limit: concurrency_limit,
                cancelled: false,
                next_index: 0,
                next_seq: 0,
            }),
            snapshot_tx,
        });
        let handle = SessionHandle { shared };

        info!(
            session = %handle.id(),
            key = %handle.correlation_key(),
            files = files.len(),
            limit = concurrency_limit,
            "upload session submitted"
        );
        handle.add_files(files)?;
        Ok(handle)
    }
}

/// Result of [`SessionHandle::wait_for_completion`].
#[derive(Debug, Clone)]
pub enum WaitOutcome {
    /// Every task reached a terminal state.
    Completed(SessionSnapshot),
    /// The wait limit elapsed first; the snapshot shows where things stood.
    TimedOut(SessionSnapshot),
}

impl WaitOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn snapshot(&self) -> &SessionSnapshot {
        match self {
            Self::Completed(s) | Self::TimedOut(s) => s,
        }
    }
}

struct LiveTransport {
    file_key: String,
    transport: Arc<dyn Transport>,
}

struct Launch {
    transport: Arc<dyn Transport>,
    events: TransportEvents,
}

struct SessionState {
    tasks: Vec<UploadTask>,
    /// Sequence numbers of tasks currently uploading.
    active: HashSet<u64>,
    live: HashMap<u64, LiveTransport>,
    limit: usize,
    cancelled: bool,
    /// Ordinal for the next file's key. Restarts on reset.
    next_index: usize,
    /// Identity for the next task. Never reused, so events from a
    /// transport of a destroyed task can never match a newer one.
    next_seq: u64,
}

pub(crate) struct SessionShared {
    id: String,
    key: CorrelationKey,
    factory: Arc<dyn TransportFactory>,
    settings: UploadSettings,
    state: Mutex<SessionState>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl SessionShared {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot_of(&self, state: &SessionState) -> SessionSnapshot {
        SessionSnapshot::build(
            &self.id,
            self.key.value(),
            state.active.len(),
            state.cancelled,
            state.tasks.iter().map(UploadTask::to_progress).collect(),
        )
    }

    fn publish(&self, state: &SessionState) {
        self.snapshot_tx.send_replace(self.snapshot_of(state));
    }

    /// Moves pending tasks to uploading until the active set is full.
    fn admit(self: &Arc<Self>, state: &mut SessionState) -> Vec<Launch> {
        let mut launches = Vec::new();
        if state.cancelled {
            return launches;
        }

        while state.active.len() < state.limit {
            let Some(pos) = state
                .tasks
                .iter()
                .position(|t| t.status() == UploadStatus::Pending)
            else {
                break;
            };

            let task = &mut state.tasks[pos];
            task.start();
            let seq = task.seq;
            let file_key = task.file_key.clone();
            let events = TransportEvents {
                session: Arc::downgrade(self),
                seq,
                file_key: file_key.clone(),
            };
            let request = TransportRequest {
                file: task.file.clone(),
                metadata: task.metadata(&self.key),
                endpoint: self.settings.endpoint.clone(),
                chunk_size: self.settings.chunk_size,
                retry_delays: self.settings.retry_delays(),
                fingerprint: task.fingerprint(),
            };

            match self.factory.create(request, events.clone()) {
                Ok(transport) => {
                    debug!(session = %self.id, file_key = %file_key, "upload started");
                    state.active.insert(seq);
                    state.live.insert(
                        seq,
                        LiveTransport {
                            file_key,
                            transport: Arc::clone(&transport),
                        },
                    );
                    launches.push(Launch { transport, events });
                }
                Err(e) => {
                    warn!(session = %self.id, file_key = %file_key, error = %e, "failed to create transport");
                    state.tasks[pos].fail(e.to_string());
                }
            }
        }
        launches
    }

    fn launch(launches: Vec<Launch>) {
        for Launch { transport, events } in launches {
            tokio::spawn(async move {
                transport.run().await;
                events.ended();
            });
        }
    }

    fn spawn_aborts(&self, aborted: Vec<LiveTransport>) {
        for LiveTransport {
            file_key,
            transport,
        } in aborted
        {
            let session = self.id.clone();
            tokio::spawn(async move {
                if let Err(e) = transport.abort().await {
                    warn!(session = %session, file_key = %file_key, error = %e, "transport abort failed");
                }
            });
        }
    }

    pub(crate) fn on_progress(&self, seq: u64, bytes_uploaded: u64, bytes_total: u64) {
        let mut state = self.lock();
        let Some(task) = state.tasks.iter_mut().find(|t| t.seq == seq) else {
            return;
        };
        if task.record_progress(bytes_uploaded, bytes_total) {
            self.publish(&state);
        }
    }

    pub(crate) fn on_success(self: &Arc<Self>, seq: u64) {
        self.finish(seq, Ok(()));
    }

    pub(crate) fn on_error(self: &Arc<Self>, seq: u64, reason: String) {
        self.finish(seq, Err(reason));
    }

    fn finish(self: &Arc<Self>, seq: u64, outcome: Result<(), String>) {
        let launches = {
            let mut state = self.lock();
            let Some(task) = state.tasks.iter_mut().find(|t| t.seq == seq) else {
                return;
            };
            let applied = match &outcome {
                Ok(()) => task.complete(),
                Err(reason) => task.fail(reason.clone()),
            };
            if !applied {
                return;
            }
            match &outcome {
                Ok(()) => debug!(session = %self.id, file_key = %task.file_key, "upload complete"),
                Err(reason) => {
                    warn!(session = %self.id, file_key = %task.file_key, error = %reason, "upload failed")
                }
            }

            state.active.remove(&seq);
            state.live.remove(&seq);
            let launches = self.admit(&mut state);
            self.publish(&state);
            launches
        };
        Self::launch(launches);
    }
}

/// Handle to one upload session. Cheap to clone.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<SessionShared>,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn correlation_key(&self) -> &CorrelationKey {
        &self.shared.key
    }

    pub fn concurrency_limit(&self) -> usize {
        self.shared.lock().limit
    }

    /// Adds files to a running session and starts them as slots free up.
    /// Returns the new tasks' file keys.
    pub fn add_files(&self, files: Vec<UploadFile>) -> Result<Vec<String>, TransferError> {
        let shared = &self.shared;
        let (keys, launches) = {
            let mut state = shared.lock();
            if state.cancelled {
                return Err(TransferError::Cancelled);
            }

            let mut added: Vec<UploadTask> = Vec::with_capacity(files.len());
            for (offset, file) in files.into_iter().enumerate() {
                let task = UploadTask::new(
                    state.next_seq + offset as u64,
                    state.next_index + offset,
                    &shared.key,
                    file,
                );
                if state
                    .tasks
                    .iter()
                    .chain(added.iter())
                    .any(|t| t.file_key == task.file_key)
                {
                    return Err(TransferError::DuplicateFileKey(task.file_key));
                }
                added.push(task);
            }

            state.next_seq += added.len() as u64;
            state.next_index += added.len();
            let keys: Vec<String> = added.iter().map(|t| t.file_key.clone()).collect();
            state.tasks.extend(added);

            let launches = shared.admit(&mut state);
            shared.publish(&state);
            (keys, launches)
        };
        SessionShared::launch(launches);
        Ok(keys)
    }

    /// Drops one file from the session, aborting its transport if it is live.
    ///
    /// Removal is local. A file that already reached `Complete` stays
    /// recorded on the server, so a later report's success count can be
    /// lower than the server's uploaded count for the same key.
    pub fn remove(&self, file_key: &str) -> Result<(), TransferError> {
        let shared = &self.shared;
        let (aborted, launches) = {
            let mut state = shared.lock();
            let pos = state
                .tasks
                .iter()
                .position(|t| t.file_key == file_key)
                .ok_or_else(|| TransferError::UnknownTask(file_key.to_string()))?;
            let task = state.tasks.remove(pos);
            state.active.remove(&task.seq);
            let aborted: Vec<LiveTransport> = state.live.remove(&task.seq).into_iter().collect();

            let launches = shared.admit(&mut state);
            shared.publish(&state);
            (aborted, launches)
        };
        debug!(session = %shared.id, file_key = %file_key, "upload removed");
        shared.spawn_aborts(aborted);
        SessionShared::launch(launches);
        Ok(())
    }

    /// Marks every non-terminal task as failed with [`CANCELLED_REASON`] and
    /// aborts live transports in the background. Calling it again is a no-op.
    pub fn cancel_all(&self) {
        let shared = &self.shared;
        let aborted = {
            let mut state = shared.lock();
            if state.cancelled {
                return;
            }
            state.cancelled = true;
            for task in state.tasks.iter_mut() {
                if !task.is_terminal() {
                    task.fail(CANCELLED_REASON);
                }
            }
            state.active.clear();
            let aborted: Vec<LiveTransport> = state.live.drain().map(|(_, l)| l).collect();
            shared.publish(&state);
            aborted
        };
        info!(session = %shared.id, aborted = aborted.len(), "upload session cancelled");
        shared.spawn_aborts(aborted);
    }

    /// Cancels everything and destroys all tasks. The session accepts new
    /// files afterwards.
    pub fn reset(&self) {
        let shared = &self.shared;
        let aborted = {
            let mut state = shared.lock();
            let aborted: Vec<LiveTransport> = state.live.drain().map(|(_, l)| l).collect();
            state.tasks.clear();
            state.active.clear();
            state.cancelled = false;
            state.next_index = 0;
            shared.publish(&state);
            aborted
        };
        info!(session = %shared.id, aborted = aborted.len(), "upload session reset");
        shared.spawn_aborts(aborted);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.shared.lock();
        self.shared.snapshot_of(&state)
    }

    /// Size-weighted completion percentage.
    pub fn aggregate_progress(&self) -> u8 {
        self.snapshot().progress
    }

    pub fn summary(&self) -> StatusSummary {
        self.snapshot().summary
    }

    pub fn partition(&self) -> Partition {
        self.snapshot().partition()
    }

    pub fn has_active_uploads(&self) -> bool {
        !self.summary().is_settled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.lock().cancelled
    }

    /// Receives a snapshot after every change to the session.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.snapshot_tx.subscribe()
    }

    /// Resolves once no task is pending or uploading, or when `timeout`
    /// elapses first. Resolves immediately if the session is already settled.
    pub async fn wait_for_completion(&self, timeout: Option<Duration>) -> WaitOutcome {
        let mut rx = self.subscribe();
        let settled = async move {
            rx.wait_for(SessionSnapshot::is_settled)
                .await
                .map(|s| SessionSnapshot::clone(&s))
        };

        let result = match timeout {
            None => Some(settled.await),
            Some(limit) => tokio::time::timeout(limit, settled).await.ok(),
        };

        match result {
            Some(Ok(snapshot)) => WaitOutcome::Completed(snapshot),
            // The sender lives as long as this handle; treat closure as settled.
            Some(Err(_)) => WaitOutcome::Completed(self.snapshot()),
            None => {
                let snapshot = self.snapshot();
                warn!(
                    session = %self.id(),
                    pending = snapshot.summary.pending,
                    uploading = snapshot.summary.uploading,
                    "timed out waiting for uploads"
                );
                WaitOutcome::TimedOut(snapshot)
            }
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.shared.id)
            .field("key", &self.shared.key)
            .finish()
    }
}
