//! Application record store.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use formupload_protocol::ApplicationStatus;
use tracing::info;

use crate::error::StoreError;
use crate::registry::Registry;

/// Durable record of one application.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationRecord {
    pub application_id: String,
    pub applicant_name: String,
    pub email: String,
    pub status: ApplicationStatus,
    pub expected_documents: u32,
    pub uploaded_documents: u32,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
}

/// Generates an id of the form `APP-<yyyyMMdd>-<8 upper-case hex>`.
pub fn generate_application_id(now: DateTime<Utc>) -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "APP-{}-{}",
        now.format("%Y%m%d"),
        uuid[..8].to_ascii_uppercase()
    )
}

/// In-memory store of application records.
pub struct ApplicationStore {
    records: RwLock<HashMap<String, ApplicationRecord>>,
    registry: Arc<Registry>,
}

impl ApplicationStore {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            registry,
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, ApplicationRecord>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates a `Pending` application and registers its expected document
    /// count with the upload registry.
    pub fn create(
        &self,
        applicant_name: &str,
        email: &str,
        expected_documents: u32,
    ) -> Result<ApplicationRecord, StoreError> {
        if applicant_name.trim().is_empty() {
            return Err(StoreError::InvalidInput("Applicant name is required".into()));
        }

        let now = Utc::now();
        let record = {
            let mut records = self.write();
            let mut id = generate_application_id(now);
            while records.contains_key(&id) {
                id = generate_application_id(now);
            }
            let record = ApplicationRecord {
                application_id: id.clone(),
                applicant_name: applicant_name.trim().to_string(),
                email: email.trim().to_string(),
                status: ApplicationStatus::Pending,
                expected_documents,
                uploaded_documents: 0,
                created_at: now,
                submitted_at: None,
            };
            records.insert(id, record.clone());
            record
        };

        self.registry
            .register_expected(&record.application_id, expected_documents);
        info!(
            application_id = %record.application_id,
            expected = expected_documents,
            "application created"
        );
        Ok(record)
    }

    pub fn get(&self, application_id: &str) -> Result<ApplicationRecord, StoreError> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(application_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(application_id.to_string()))
    }

    pub fn exists(&self, application_id: &str) -> bool {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(application_id)
    }

    /// Moves a `Pending` application to `Submitted`, recording the current
    /// upload count. Any other state is left untouched and returned as is.
    pub fn update_to_submitted(&self, application_id: &str) -> Result<ApplicationRecord, StoreError> {
        let mut records = self.write();
        let record = records
            .get_mut(application_id)
            .ok_or_else(|| StoreError::NotFound(application_id.to_string()))?;

        if record.status == ApplicationStatus::Pending {
            record.status = ApplicationStatus::Submitted;
            record.submitted_at = Some(Utc::now());
            record.uploaded_documents = self.registry.get_count(application_id);
            info!(
                application_id,
                uploaded = record.uploaded_documents,
                expected = record.expected_documents,
                "application submitted"
            );
        }
        Ok(record.clone())
    }

    /// Moves an application strictly forward, for downstream processing.
    pub fn advance(
        &self,
        application_id: &str,
        status: ApplicationStatus,
    ) -> Result<ApplicationRecord, StoreError> {
        let mut records = self.write();
        let record = records
            .get_mut(application_id)
            .ok_or_else(|| StoreError::NotFound(application_id.to_string()))?;

        if !record.status.can_advance_to(status) {
            return Err(StoreError::InvalidTransition {
                id: application_id.to_string(),
                from: record.status,
                to: status,
            });
        }
        if status == ApplicationStatus::Submitted {
            record.submitted_at = Some(Utc::now());
            record.uploaded_documents = self.registry.get_count(application_id);
        }
        record.status = status;
        info!(application_id, status = %status, "application advanced");
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use formupload_protocol::UploadedFileInfo;

    fn store() -> (Arc<Registry>, ApplicationStore) {
        let registry = Arc::new(Registry::new());
        let store = ApplicationStore::new(Arc::clone(&registry));
        (registry, store)
    }

    fn rec(id: &str) -> UploadedFileInfo {
        UploadedFileInfo {
            file_id: id.into(),
            filename: "a.pdf".into(),
            file_type: "application/pdf".into(),
            uploaded_at: Utc::now(),
            storage_path: format!("/buf/x/{id}_a.pdf"),
        }
    }

    #[test]
    fn id_format() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let id = generate_application_id(now);
        assert!(id.starts_with("APP-20240501-"), "got {id}");
        let suffix = &id["APP-20240501-".len()..];
        assert_eq!(suffix.len(), 8);
        assert!(
            suffix
                .chars()
                .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
        );
    }

    #[test]
    fn create_registers_expected() {
        let (registry, store) = store();
        let app = store.create("Ada Lovelace", "ada@example.com", 2).unwrap();
        assert_eq!(app.status, ApplicationStatus::Pending);
        assert_eq!(registry.get_expected_count(&app.application_id), 2);
        assert!(store.exists(&app.application_id));
    }

    #[test]
    fn create_rejects_blank_name() {
        let (_, store) = store();
        let err = store.create("   ", "x@example.com", 1).unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
    }

    #[test]
    fn get_unknown_is_not_found() {
        let (_, store) = store();
        assert!(matches!(store.get("APP-x"), Err(StoreError::NotFound(_))));
        assert!(matches!(
            store.update_to_submitted("APP-x"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn submit_counts_uploads_and_is_idempotent() {
        let (registry, store) = store();
        let app = store.create("Ada", "", 2).unwrap();
        registry.track_completed(&app.application_id, rec("f1"));
        registry.track_completed(&app.application_id, rec("f2"));

        let first = store.update_to_submitted(&app.application_id).unwrap();
        assert_eq!(first.status, ApplicationStatus::Submitted);
        assert_eq!(first.uploaded_documents, 2);
        assert!(first.submitted_at.is_some());

        registry.track_completed(&app.application_id, rec("f3"));
        let second = store.update_to_submitted(&app.application_id).unwrap();
        assert_eq!(second, first);
    }

    #[test]
    fn advance_only_moves_forward() {
        let (_, store) = store();
        let app = store.create("Ada", "", 0).unwrap();
        let id = &app.application_id;
        store.update_to_submitted(id).unwrap();
        store.advance(id, ApplicationStatus::Processing).unwrap();
        let err = store.advance(id, ApplicationStatus::Submitted).unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
        let done = store.advance(id, ApplicationStatus::Complete).unwrap();
        assert_eq!(done.status, ApplicationStatus::Complete);
        assert!(store.advance(id, ApplicationStatus::Failed).is_err());
    }
}
