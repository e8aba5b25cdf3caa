//! Request boundary for the application API.
//!
//! Maps the stores and reconciliation onto the wire DTOs and folds every
//! failure into an [`ApiError`]. Internal failures are logged here with the
//! ids involved; the caller only sees a generic message.

use std::sync::Arc;

use formupload_protocol::messages::{
    ApplicationCreatedResponse, CreateApplicationRequest, DocumentsCompleteRequest,
    DocumentsCompleteResponse, DocumentsRequest, DocumentsResponse, StatusRequest, StatusResponse,
};
use tracing::error;

use crate::applications::ApplicationStore;
use crate::error::ApiError;
use crate::reconcile::Reconciler;
use crate::registry::Registry;

pub struct IntakeService {
    registry: Arc<Registry>,
    applications: Arc<ApplicationStore>,
    reconciler: Reconciler,
    upload_endpoint: String,
}

impl IntakeService {
    pub fn new(
        registry: Arc<Registry>,
        applications: Arc<ApplicationStore>,
        reconciler: Reconciler,
        upload_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            applications,
            reconciler,
            upload_endpoint: upload_endpoint.into(),
        }
    }

    pub fn upload_endpoint(&self) -> &str {
        &self.upload_endpoint
    }

    pub fn create_application(
        &self,
        req: &CreateApplicationRequest,
    ) -> Result<ApplicationCreatedResponse, ApiError> {
        let record = self
            .applications
            .create(&req.name, &req.email, req.document_count)?;
        Ok(ApplicationCreatedResponse {
            application_id: record.application_id,
            status: record.status,
            documents_expected: record.expected_documents,
            upload_endpoint: self.upload_endpoint.clone(),
        })
    }

    pub async fn documents_complete(
        &self,
        req: &DocumentsCompleteRequest,
    ) -> Result<DocumentsCompleteResponse, ApiError> {
        let report = self.reconciler.reconcile(req).await.map_err(|e| {
            let e = ApiError::from(e);
            if let ApiError::Internal(detail) = &e {
                error!(
                    application_id = %req.application_id,
                    batch_id = req.batch_id.as_deref().unwrap_or(""),
                    "documents complete failed: {detail}"
                );
            }
            e
        })?;

        let message = report.message();
        Ok(DocumentsCompleteResponse {
            application_id: report.application.application_id,
            status: report.application.status,
            uploaded_documents: report.application.uploaded_documents,
            success_count: report.success_count,
            failed_count: report.failed_count,
            uploaded_files: report.uploaded_files,
            message,
        })
    }

    /// Live view of an application. `uploadedDocuments` counts everything
    /// the registry holds now, including uploads that landed after
    /// submission.
    pub fn get_status(&self, req: &StatusRequest) -> Result<StatusResponse, ApiError> {
        let record = self.applications.get(&req.application_id)?;
        let id = record.application_id.as_str();
        Ok(StatusResponse {
            application_id: id.to_string(),
            status: record.status,
            expected_documents: record.expected_documents,
            uploaded_documents: self.registry.get_count(id),
            is_complete: record.status.is_submitted_or_later(),
            uploaded_files: self.registry.get_uploaded(id),
            created_at: record.created_at,
            submitted_at: record.submitted_at,
        })
    }

    pub fn get_documents(&self, req: &DocumentsRequest) -> Result<DocumentsResponse, ApiError> {
        if !self.applications.exists(&req.application_id) {
            return Err(ApiError::NotFound(format!(
                "application not found: {}",
                req.application_id
            )));
        }
        Ok(DocumentsResponse {
            application_id: req.application_id.clone(),
            documents: self.registry.get_uploaded(&req.application_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use formupload_protocol::{ApplicationStatus, UploadedFileInfo};

    fn service(buffer: &std::path::Path) -> (Arc<Registry>, IntakeService) {
        let registry = Arc::new(Registry::new());
        let applications = Arc::new(ApplicationStore::new(Arc::clone(&registry)));
        let reconciler = Reconciler::new(Arc::clone(&registry), Arc::clone(&applications), buffer);
        let service = IntakeService::new(
            Arc::clone(&registry),
            applications,
            reconciler,
            "http://localhost:8080/api/tus",
        );
        (registry, service)
    }

    fn create(service: &IntakeService, count: u32) -> String {
        service
            .create_application(&CreateApplicationRequest {
                name: "Ada".into(),
                email: "ada@example.com".into(),
                document_count: count,
            })
            .unwrap()
            .application_id
    }

    fn rec(id: &str) -> UploadedFileInfo {
        UploadedFileInfo {
            file_id: id.into(),
            filename: "a.pdf".into(),
            file_type: "application/pdf".into(),
            uploaded_at: Utc::now(),
            storage_path: String::new(),
        }
    }

    #[test]
    fn create_returns_endpoint_and_pending() {
        let tmp = tempfile::tempdir().unwrap();
        let (_, service) = service(tmp.path());
        let resp = service
            .create_application(&CreateApplicationRequest {
                name: "Ada".into(),
                email: String::new(),
                document_count: 3,
            })
            .unwrap();
        assert_eq!(resp.status, ApplicationStatus::Pending);
        assert_eq!(resp.documents_expected, 3);
        assert_eq!(resp.upload_endpoint, "http://localhost:8080/api/tus");
    }

    #[test]
    fn create_with_blank_name_is_bad_request() {
        let tmp = tempfile::tempdir().unwrap();
        let (_, service) = service(tmp.path());
        let err = service
            .create_application(&CreateApplicationRequest {
                name: " ".into(),
                email: String::new(),
                document_count: 1,
            })
            .unwrap_err();
        assert_eq!(err.code(), 400);
        assert_eq!(err.public_message(), "Applicant name is required");
    }

    #[test]
    fn status_of_unknown_application_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let (_, service) = service(tmp.path());
        let err = service
            .get_status(&StatusRequest {
                application_id: "APP-nope".into(),
            })
            .unwrap_err();
        assert_eq!(err.code(), 404);
        let err = service
            .get_documents(&DocumentsRequest {
                application_id: "APP-nope".into(),
            })
            .unwrap_err();
        assert_eq!(err.code(), 404);
    }

    #[tokio::test]
    async fn status_reflects_submission() {
        let tmp = tempfile::tempdir().unwrap();
        let (registry, service) = service(tmp.path());
        let id = create(&service, 1);
        registry.track_completed(&id, rec("f1"));

        let req = StatusRequest {
            application_id: id.clone(),
        };
        let before = service.get_status(&req).unwrap();
        assert!(!before.is_complete);
        assert_eq!(before.uploaded_documents, 1);

        let resp = service
            .documents_complete(&DocumentsCompleteRequest {
                application_id: id.clone(),
                batch_id: None,
                success_count: 1,
                failed_count: 0,
                completed_at: Some(Utc::now()),
            })
            .await
            .unwrap();
        assert_eq!(resp.status, ApplicationStatus::Submitted);
        assert_eq!(resp.uploaded_documents, 1);

        let after = service.get_status(&req).unwrap();
        assert!(after.is_complete);
        assert!(after.submitted_at.is_some());
        assert_eq!(after.uploaded_files.len(), 1);

        let docs = service
            .get_documents(&DocumentsRequest { application_id: id })
            .unwrap();
        assert_eq!(docs.documents.len(), 1);
    }

    #[tokio::test]
    async fn documents_complete_for_unknown_application_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let (_, service) = service(tmp.path());
        let err = service
            .documents_complete(&DocumentsCompleteRequest {
                application_id: "APP-nope".into(),
                batch_id: Some("b1".into()),
                success_count: 0,
                failed_count: 0,
                completed_at: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), 404);
    }
}
