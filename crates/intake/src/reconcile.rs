//! Binding uploads made under a provisional batch key to their application.
//!
//! Each step is safe to repeat, so a client that retries a report converges
//! on the same result:
//! 1. move `<buffer>/<batch>` to `<buffer>/<application>` (a leftover
//!    destination from an earlier attempt is replaced; a missing source is
//!    only logged);
//! 2. rekey the registry from batch to application;
//! 3. move the application from `Pending` to `Submitted`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use formupload_file_ops::RelocateOutcome;
use formupload_protocol::UploadedFileInfo;
use formupload_protocol::messages::DocumentsCompleteRequest;
use tracing::{info, warn};

use crate::applications::{ApplicationRecord, ApplicationStore};
use crate::error::{ReconcileError, StoreError};
use crate::registry::Registry;

/// Outcome of one reconciliation.
#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub application: ApplicationRecord,
    pub uploaded_files: Vec<UploadedFileInfo>,
    pub success_count: u32,
    pub failed_count: u32,
    /// What happened to the batch folder, if a batch was given.
    pub relocation: Option<RelocateOutcome>,
}

impl ReconcileReport {
    pub fn message(&self) -> String {
        if self.failed_count > 0 {
            format!(
                "Application submitted with {} failed uploads",
                self.failed_count
            )
        } else {
            "Application submitted successfully with all documents".into()
        }
    }
}

pub struct Reconciler {
    registry: Arc<Registry>,
    applications: Arc<ApplicationStore>,
    buffer: PathBuf,
    /// One lock per application. Reports for the same application run one
    /// at a time so a retry never removes a folder another report just
    /// relocated.
    in_flight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Reconciler {
    pub fn new(
        registry: Arc<Registry>,
        applications: Arc<ApplicationStore>,
        buffer: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            applications,
            buffer: buffer.into(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    fn application_lock(&self, app_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(app_id.to_string()).or_default())
    }

    /// Reconciles a client's report. Without a batch id (uploads were tagged
    /// with the application id directly) only the status transition runs.
    ///
    /// Failed uploads never block the transition; they are reported back.
    pub async fn reconcile(
        &self,
        request: &DocumentsCompleteRequest,
    ) -> Result<ReconcileReport, ReconcileError> {
        let app_id = request.application_id.as_str();
        if !self.applications.exists(app_id) {
            return Err(ReconcileError::NotFound(app_id.to_string()));
        }

        let lock = self.application_lock(app_id);
        let _guard = lock.lock().await;

        let batch_id = request
            .batch_id
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty());

        let relocation = match batch_id {
            Some(batch_id) => {
                formupload_file_ops::validate_segment(batch_id)
                    .map_err(|_| ReconcileError::InvalidBatch(batch_id.to_string()))?;
                let outcome = self.relocate(batch_id, app_id).await?;
                self.registry.rekey(batch_id, app_id);
                Some(outcome)
            }
            None => None,
        };

        let application = self
            .applications
            .update_to_submitted(app_id)
            .map_err(|e| match e {
                StoreError::NotFound(id) => ReconcileError::NotFound(id),
                other => ReconcileError::Store(other),
            })?;

        info!(
            application_id = %app_id,
            batch_id = batch_id.unwrap_or(""),
            success = request.success_count,
            failed = request.failed_count,
            uploaded = application.uploaded_documents,
            "documents reconciled"
        );

        Ok(ReconcileReport {
            uploaded_files: self.registry.get_uploaded(app_id),
            application,
            success_count: request.success_count,
            failed_count: request.failed_count,
            relocation,
        })
    }

    async fn relocate(&self, batch_id: &str, app_id: &str) -> Result<RelocateOutcome, ReconcileError> {
        let buffer = self.buffer.clone();
        let from = batch_id.to_string();
        let to = app_id.to_string();
        let outcome = tokio::task::spawn_blocking(move || {
            formupload_file_ops::relocate_key_dir(&buffer, &from, &to)
        })
        .await
        .map_err(|e| ReconcileError::Join(e.to_string()))??;

        match &outcome {
            RelocateOutcome::Moved { .. } => {
                info!(batch_id, application_id = app_id, "batch folder relocated");
            }
            RelocateOutcome::Missing(path) => {
                warn!(
                    batch_id,
                    application_id = app_id,
                    path = %path.display(),
                    "batch folder not found, continuing with registry state"
                );
            }
            RelocateOutcome::Unchanged(_) => {}
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use formupload_protocol::ApplicationStatus;

    struct Fixture {
        _tmp: tempfile::TempDir,
        buffer: PathBuf,
        registry: Arc<Registry>,
        applications: Arc<ApplicationStore>,
        reconciler: Reconciler,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let buffer = tmp.path().to_path_buf();
        let registry = Arc::new(Registry::new());
        let applications = Arc::new(ApplicationStore::new(Arc::clone(&registry)));
        let reconciler = Reconciler::new(
            Arc::clone(&registry),
            Arc::clone(&applications),
            buffer.clone(),
        );
        Fixture {
            _tmp: tmp,
            buffer,
            registry,
            applications,
            reconciler,
        }
    }

    fn request(app: &str, batch: Option<&str>, ok: u32, failed: u32) -> DocumentsCompleteRequest {
        DocumentsCompleteRequest {
            application_id: app.into(),
            batch_id: batch.map(str::to_string),
            success_count: ok,
            failed_count: failed,
            completed_at: Some(Utc::now()),
        }
    }

    fn track(f: &Fixture, key: &str, file_id: &str) {
        let dir = f.buffer.join(key);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{file_id}_doc.pdf"));
        std::fs::write(&path, file_id).unwrap();
        f.registry.track_completed(
            key,
            UploadedFileInfo {
                file_id: file_id.into(),
                filename: "doc.pdf".into(),
                file_type: "application/pdf".into(),
                uploaded_at: Utc::now(),
                storage_path: path.to_string_lossy().into_owned(),
            },
        );
    }

    #[tokio::test]
    async fn unknown_application_is_not_found() {
        let f = fixture();
        let err = f
            .reconciler
            .reconcile(&request("APP-missing", Some("b1"), 0, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::NotFound(_)));
    }

    #[tokio::test]
    async fn batch_is_relocated_and_rekeyed() {
        let f = fixture();
        let app = f.applications.create("Ada", "", 2).unwrap();
        let id = app.application_id.clone();
        track(&f, "b1", "f1");
        track(&f, "b1", "f2");

        let report = f
            .reconciler
            .reconcile(&request(&id, Some("b1"), 2, 0))
            .await
            .unwrap();

        assert_eq!(report.application.status, ApplicationStatus::Submitted);
        assert_eq!(report.application.uploaded_documents, 2);
        assert_eq!(report.uploaded_files.len(), 2);
        assert!(matches!(report.relocation, Some(RelocateOutcome::Moved { .. })));
        assert!(!f.buffer.join("b1").exists());
        assert!(f.buffer.join(&id).join("f1_doc.pdf").is_file());
        for doc in &report.uploaded_files {
            assert!(std::path::Path::new(&doc.storage_path).is_file());
        }
        assert!(f.registry.is_complete(&id));
        assert_eq!(report.message(), "Application submitted successfully with all documents");
    }

    #[tokio::test]
    async fn repeated_report_is_stable() {
        let f = fixture();
        let id = f.applications.create("Ada", "", 2).unwrap().application_id;
        track(&f, "b1", "f1");
        track(&f, "b1", "f2");

        let first = f
            .reconciler
            .reconcile(&request(&id, Some("b1"), 2, 0))
            .await
            .unwrap();
        let second = f
            .reconciler
            .reconcile(&request(&id, Some("b1"), 2, 0))
            .await
            .unwrap();

        assert_eq!(second.application, first.application);
        assert_eq!(second.uploaded_files.len(), 2);
        assert!(matches!(second.relocation, Some(RelocateOutcome::Missing(_))));
        assert!(f.buffer.join(&id).join("f2_doc.pdf").is_file());
    }

    #[tokio::test]
    async fn reports_for_one_application_run_one_at_a_time() {
        let f = fixture();
        let id = f.applications.create("Ada", "", 1).unwrap().application_id;
        track(&f, "b1", "f1");
        let reconciler = Arc::new(f.reconciler);

        let held = reconciler.application_lock(&id);
        let guard = held.lock().await;

        let task = {
            let reconciler = Arc::clone(&reconciler);
            let id = id.clone();
            tokio::spawn(async move { reconciler.reconcile(&request(&id, Some("b1"), 1, 0)).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!task.is_finished());
        assert!(f.buffer.join("b1").exists());

        drop(guard);
        let report = task.await.unwrap().unwrap();
        assert_eq!(report.application.uploaded_documents, 1);
        assert!(f.buffer.join(&id).join("f1_doc.pdf").is_file());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_identical_reports_keep_relocated_files() {
        for _ in 0..20 {
            let f = fixture();
            let id = f.applications.create("Ada", "", 2).unwrap().application_id;
            track(&f, "b1", "f1");
            track(&f, "b1", "f2");
            let reconciler = Arc::new(f.reconciler);

            let reports: Vec<_> = (0..2)
                .map(|_| {
                    let reconciler = Arc::clone(&reconciler);
                    let id = id.clone();
                    tokio::spawn(async move {
                        reconciler.reconcile(&request(&id, Some("b1"), 2, 0)).await
                    })
                })
                .collect();
            for report in reports {
                let report = report.await.unwrap().unwrap();
                assert_eq!(report.application.uploaded_documents, 2);
            }

            assert!(f.buffer.join(&id).join("f1_doc.pdf").is_file());
            assert!(f.buffer.join(&id).join("f2_doc.pdf").is_file());
        }
    }

    #[tokio::test]
    async fn batch_id_must_be_a_plain_name() {
        let f = fixture();
        let id = f.applications.create("Ada", "", 1).unwrap().application_id;
        let err = f
            .reconciler
            .reconcile(&request(&id, Some("../etc"), 1, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidBatch(_)));
        assert_eq!(
            f.applications.get(&id).unwrap().status,
            ApplicationStatus::Pending
        );
    }

    #[tokio::test]
    async fn missing_batch_folder_still_submits() {
        let f = fixture();
        let id = f.applications.create("Ada", "", 1).unwrap().application_id;

        let report = f
            .reconciler
            .reconcile(&request(&id, Some("b-empty"), 0, 1))
            .await
            .unwrap();
        assert_eq!(report.application.status, ApplicationStatus::Submitted);
        assert_eq!(report.application.uploaded_documents, 0);
        assert_eq!(report.message(), "Application submitted with 1 failed uploads");
    }

    #[tokio::test]
    async fn direct_flow_skips_relocation() {
        let f = fixture();
        let id = f.applications.create("Ada", "", 1).unwrap().application_id;
        track(&f, &id, "f1");

        let report = f
            .reconciler
            .reconcile(&request(&id, None, 1, 0))
            .await
            .unwrap();
        assert!(report.relocation.is_none());
        assert_eq!(report.application.uploaded_documents, 1);
    }

    #[tokio::test]
    async fn late_arrival_after_reconcile_lands_under_application() {
        let f = fixture();
        let id = f.applications.create("Ada", "", 2).unwrap().application_id;
        track(&f, "b1", "f1");
        f.reconciler
            .reconcile(&request(&id, Some("b1"), 2, 0))
            .await
            .unwrap();

        track(&f, "b1", "f2");
        assert_eq!(f.registry.get_count(&id), 2);
        // The status snapshot was taken at submission time.
        assert_eq!(f.applications.get(&id).unwrap().uploaded_documents, 1);
    }
}
