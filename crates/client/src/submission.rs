//! Form submission flows.
//!
//! Batch-first: files start uploading under a fresh provisional batch key as
//! soon as they are chosen, the application is created when the form is
//! submitted, and the final report tells the server which batch to bind to
//! the new application. Direct: the application exists before any upload,
//! so files are tagged with its id and the report carries no batch.
//!
//! Either way the client waits for every upload to settle (or for the
//! configured timeout, after which outstanding uploads are cancelled) and
//! reports success and failure counts. Failed uploads never block the
//! report.

use std::sync::Arc;

use chrono::Utc;
use formupload_protocol::CorrelationKey;
use formupload_protocol::messages::{
    ApplicationCreatedResponse, CreateApplicationRequest, DocumentsCompleteRequest,
    DocumentsCompleteResponse,
};
use formupload_transfer::{SessionHandle, SessionSnapshot, TaskProgress, UploadFile, Uploader};
use tracing::{info, warn};

use crate::api::ApplicationApi;
use crate::error::ClientError;

/// Applicant details entered on the form.
#[derive(Debug, Clone, Default)]
pub struct ApplicantForm {
    pub name: String,
    pub email: String,
}

/// Everything the client learned from one submission.
#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
    pub application: ApplicationCreatedResponse,
    pub report: DocumentsCompleteResponse,
    /// Session state when the report was sent.
    pub snapshot: SessionSnapshot,
    /// True when the wait limit elapsed and outstanding uploads were
    /// cancelled.
    pub timed_out: bool,
}

impl SubmissionOutcome {
    pub fn failed(&self) -> Vec<TaskProgress> {
        self.snapshot.partition().failed
    }
}

/// Drives uploads and the application API for one form.
pub struct FormSubmission {
    api: Arc<dyn ApplicationApi>,
    uploader: Uploader,
}

impl FormSubmission {
    pub fn new(api: Arc<dyn ApplicationApi>, uploader: Uploader) -> Self {
        Self { api, uploader }
    }

    /// Starts uploading `files` under a new provisional batch key. More
    /// files can be added to the returned session until the form is
    /// submitted.
    pub fn begin_batch(&self, files: Vec<UploadFile>) -> Result<SessionHandle, ClientError> {
        let key = CorrelationKey::new_batch(uuid::Uuid::new_v4().to_string());
        let limit = self.uploader.settings().concurrency_limit;
        Ok(self.uploader.submit(files, key, limit)?)
    }

    /// Creates the application for a batch that is already uploading, waits
    /// for the batch to settle and reports the outcome.
    ///
    /// The expected document count is the number of files in the session at
    /// submission time.
    pub async fn submit_batch(
        &self,
        form: &ApplicantForm,
        session: &SessionHandle,
    ) -> Result<SubmissionOutcome, ClientError> {
        let expected = session.summary().total() as u32;
        let application = self.create(form, expected).await?;
        self.finish(application, session).await
    }

    /// Creates the application first, then uploads `files` tagged with its
    /// id and reports once they settle.
    pub async fn submit_direct(
        &self,
        form: &ApplicantForm,
        files: Vec<UploadFile>,
    ) -> Result<SubmissionOutcome, ClientError> {
        let application = self.create(form, files.len() as u32).await?;
        let key = CorrelationKey::Application(application.application_id.clone());
        let limit = self.uploader.settings().concurrency_limit;
        let session = self.uploader.submit(files, key, limit)?;
        self.finish(application, &session).await
    }

    async fn create(
        &self,
        form: &ApplicantForm,
        document_count: u32,
    ) -> Result<ApplicationCreatedResponse, ClientError> {
        let req = CreateApplicationRequest {
            name: form.name.clone(),
            email: form.email.clone(),
            document_count,
        };
        let created = self.api.create_application(&req).await?;
        info!(
            application_id = %created.application_id,
            expected = document_count,
            "application created"
        );
        Ok(created)
    }

    async fn finish(
        &self,
        application: ApplicationCreatedResponse,
        session: &SessionHandle,
    ) -> Result<SubmissionOutcome, ClientError> {
        let outcome = session
            .wait_for_completion(self.uploader.settings().wait_timeout())
            .await;
        let timed_out = !outcome.is_completed();
        let snapshot = if timed_out {
            session.cancel_all();
            session.snapshot()
        } else {
            outcome.snapshot().clone()
        };

        let partition = snapshot.partition();
        let key = session.correlation_key();
        let req = DocumentsCompleteRequest {
            application_id: application.application_id.clone(),
            batch_id: key.is_provisional().then(|| key.value().to_string()),
            success_count: partition.successful.len() as u32,
            failed_count: partition.failed.len() as u32,
            completed_at: Some(Utc::now()),
        };
        if req.failed_count > 0 {
            warn!(
                application_id = %req.application_id,
                failed = req.failed_count,
                "reporting documents with failed uploads"
            );
        }

        let report = self.api.documents_complete(&req).await?;
        info!(
            application_id = %report.application_id,
            batch_id = req.batch_id.as_deref().unwrap_or(""),
            status = %report.status,
            uploaded = report.uploaded_documents,
            "documents reported"
        );
        Ok(SubmissionOutcome {
            application,
            report,
            snapshot,
            timed_out,
        })
    }
}
