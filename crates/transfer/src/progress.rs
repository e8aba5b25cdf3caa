use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use formupload_protocol::UploadStatus;
use serde::Serialize;

use crate::session::SessionHandle;

/// Default progress notification interval.
const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

/// Point-in-time view of one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgress {
    pub file_key: String,
    pub filename: String,
    pub status: UploadStatus,
    pub bytes_uploaded: u64,
    pub bytes_total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Task counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub pending: usize,
    pub uploading: usize,
    pub complete: usize,
    pub error: usize,
}

impl StatusSummary {
    pub fn total(&self) -> usize {
        self.pending + self.uploading + self.complete + self.error
    }

    /// True when nothing is pending or uploading.
    pub fn is_settled(&self) -> bool {
        self.pending == 0 && self.uploading == 0
    }

    fn count(&mut self, status: UploadStatus) {
        match status {
            UploadStatus::Pending => self.pending += 1,
            UploadStatus::Uploading => self.uploading += 1,
            UploadStatus::Complete => self.complete += 1,
            UploadStatus::Error => self.error += 1,
        }
    }
}

/// Terminal tasks split by outcome. Non-terminal tasks are in neither list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Partition {
    pub successful: Vec<TaskProgress>,
    pub failed: Vec<TaskProgress>,
}

/// Point-in-time view of a whole session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub correlation_key: String,
    /// Size-weighted completion percentage, 0 to 100.
    pub progress: u8,
    pub summary: StatusSummary,
    pub active: usize,
    pub cancelled: bool,
    pub tasks: Vec<TaskProgress>,
}

impl SessionSnapshot {
    pub(crate) fn build(
        session_id: &str,
        correlation_key: &str,
        active: usize,
        cancelled: bool,
        tasks: Vec<TaskProgress>,
    ) -> Self {
        let mut summary = StatusSummary::default();
        for t in &tasks {
            summary.count(t.status);
        }
        Self {
            session_id: session_id.to_string(),
            correlation_key: correlation_key.to_string(),
            progress: aggregate_percent(&tasks),
            summary,
            active,
            cancelled,
            tasks,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.summary.is_settled()
    }

    pub fn partition(&self) -> Partition {
        let mut out = Partition::default();
        for t in &self.tasks {
            match t.status {
                UploadStatus::Complete => out.successful.push(t.clone()),
                UploadStatus::Error => out.failed.push(t.clone()),
                UploadStatus::Pending | UploadStatus::Uploading => {}
            }
        }
        out
    }
}

/// `floor(100 * sum(uploaded) / sum(total))`, or 0 when nothing has a size.
pub fn aggregate_percent(tasks: &[TaskProgress]) -> u8 {
    let (uploaded, total) = tasks.iter().fold((0u128, 0u128), |(u, t), task| {
        (u + task.bytes_uploaded as u128, t + task.bytes_total as u128)
    });
    if total == 0 {
        return 0;
    }
    ((uploaded * 100) / total).min(100) as u8
}

/// Callback invoked with a session snapshot.
pub type ProgressCallback = Box<dyn Fn(SessionSnapshot) + Send + Sync>;

/// Tracks several sessions and notifies callbacks periodically.
pub struct ProgressTracker {
    inner: Arc<RwLock<TrackerInner>>,
    stop: Mutex<Option<tokio::sync::oneshot::Sender<()>>>,
}

struct TrackerInner {
    callbacks: Vec<ProgressCallback>,
    sessions: HashMap<String, SessionHandle>,
    interval: Duration,
}

impl ProgressTracker {
    /// Creates a new tracker with the given notification interval.
    ///
    /// If `interval` is `None`, defaults to 500 ms.
    pub fn new(interval: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(TrackerInner {
                callbacks: Vec::new(),
                sessions: HashMap::new(),
                interval: interval.unwrap_or(DEFAULT_INTERVAL),
            })),
            stop: Mutex::new(None),
        }
    }

    pub fn on_progress(&self, callback: ProgressCallback) {
        self.write().callbacks.push(callback);
    }

    pub fn track(&self, session: SessionHandle) {
        let id = session.id().to_string();
        self.write().sessions.insert(id, session);
    }

    pub fn untrack(&self, session_id: &str) {
        self.write().sessions.remove(session_id);
    }

    pub fn get_session(&self, session_id: &str) -> Option<SessionHandle> {
        self.read().sessions.get(session_id).cloned()
    }

    /// Sends a one-time notification for a session.
    pub fn notify_progress(&self, session_id: &str) {
        let inner = self.read();
        if let Some(session) = inner.sessions.get(session_id) {
            let snapshot = session.snapshot();
            for cb in &inner.callbacks {
                cb(snapshot.clone());
            }
        }
    }

    /// Starts periodic notifications for sessions with active uploads.
    ///
    /// Call [`stop`](Self::stop) to cancel.
    pub fn start(&self) {
        let (tx, mut rx) = tokio::sync::oneshot::channel();
        {
            let mut stop = self.stop.lock().unwrap_or_else(PoisonError::into_inner);
            *stop = Some(tx);
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let interval = inner.read().unwrap_or_else(PoisonError::into_inner).interval;
            let mut ticker = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let i = inner.read().unwrap_or_else(PoisonError::into_inner);
                        for session in i.sessions.values() {
                            if session.has_active_uploads() {
                                let snapshot = session.snapshot();
                                for cb in &i.callbacks {
                                    cb(snapshot.clone());
                                }
                            }
                        }
                    }
                    _ = &mut rx => break,
                }
            }
        });
    }

    /// Stops the periodic notification task.
    pub fn stop(&self) {
        // Dropping the sender ends the task.
        self.stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, TrackerInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, TrackerInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        self.stop();
    }
}
