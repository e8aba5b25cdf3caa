use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ProtocolError;
use crate::constants::{META_APPLICATION_ID, META_BATCH_ID};

/// Client-side state of a single file upload.
///
/// Transitions are monotone: `Pending -> Uploading -> {Complete | Error}`.
/// A pending task may also go straight to `Error` when its session is
/// cancelled before it was admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UploadStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "uploading")]
    Uploading,
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "error")]
    Error,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }

    /// Returns true if `self -> next` is an allowed edge.
    pub fn can_transition_to(self, next: UploadStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Uploading)
                | (Self::Pending, Self::Error)
                | (Self::Uploading, Self::Complete)
                | (Self::Uploading, Self::Error)
        )
    }
}

/// Lifecycle of a durable application record. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApplicationStatus {
    Pending,
    Submitted,
    Processing,
    Complete,
    Failed,
}

impl ApplicationStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Submitted => 1,
            Self::Processing => 2,
            Self::Complete | Self::Failed => 3,
        }
    }

    /// Returns true if moving from `self` to `next` goes strictly forward.
    /// `Complete` and `Failed` are both final; neither leads to the other.
    pub fn can_advance_to(self, next: ApplicationStatus) -> bool {
        next.rank() > self.rank()
    }

    /// True once documents have been reported for the application.
    pub fn is_submitted_or_later(self) -> bool {
        self.rank() >= Self::Submitted.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Submitted => "Submitted",
            Self::Processing => "Processing",
            Self::Complete => "Complete",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplicationStatus {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Submitted" => Ok(Self::Submitted),
            "Processing" => Ok(Self::Processing),
            "Complete" => Ok(Self::Complete),
            "Failed" => Ok(Self::Failed),
            other => Err(ProtocolError::UnknownStatus(other.to_string())),
        }
    }
}

/// Groups a set of uploads. A batch key is provisional and generated by the
/// client; an application key is the durable id issued by the intake server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CorrelationKey {
    Batch(String),
    Application(String),
}

impl CorrelationKey {
    /// Wraps a client-generated batch id.
    pub fn new_batch(id: impl Into<String>) -> Self {
        Self::Batch(id.into())
    }

    /// Upload metadata key under which this correlation key travels.
    pub fn metadata_name(&self) -> &'static str {
        match self {
            Self::Batch(_) => META_BATCH_ID,
            Self::Application(_) => META_APPLICATION_ID,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Self::Batch(v) | Self::Application(v) => v,
        }
    }

    pub fn is_provisional(&self) -> bool {
        matches!(self, Self::Batch(_))
    }

    /// Extracts the correlation key from upload metadata. A non-empty
    /// `batchId` wins over `applicationId`.
    pub fn from_metadata(metadata: &HashMap<String, String>) -> Option<Self> {
        let non_empty = |name: &str| {
            metadata
                .get(name)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        non_empty(META_BATCH_ID)
            .map(Self::Batch)
            .or_else(|| non_empty(META_APPLICATION_ID).map(Self::Application))
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value())
    }
}

/// Server-side record of one completed upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFileInfo {
    pub file_id: String,
    pub filename: String,
    pub file_type: String,
    pub uploaded_at: DateTime<Utc>,
    pub storage_path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_status_edges() {
        use UploadStatus::*;
        assert!(Pending.can_transition_to(Uploading));
        assert!(Uploading.can_transition_to(Complete));
        assert!(Uploading.can_transition_to(Error));
        assert!(Pending.can_transition_to(Error));
        assert!(!Complete.can_transition_to(Error));
        assert!(!Error.can_transition_to(Uploading));
        assert!(!Uploading.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Complete));
    }

    #[test]
    fn upload_status_serialization() {
        assert_eq!(
            serde_json::to_string(&UploadStatus::Uploading).unwrap(),
            "\"uploading\""
        );
    }

    #[test]
    fn application_status_only_moves_forward() {
        use ApplicationStatus::*;
        assert!(Pending.can_advance_to(Submitted));
        assert!(Submitted.can_advance_to(Processing));
        assert!(Processing.can_advance_to(Failed));
        assert!(!Submitted.can_advance_to(Pending));
        assert!(!Submitted.can_advance_to(Submitted));
        assert!(!Complete.can_advance_to(Failed));
    }

    #[test]
    fn application_status_wire_name() {
        assert_eq!(
            serde_json::to_string(&ApplicationStatus::Pending).unwrap(),
            "\"Pending\""
        );
        assert_eq!(
            "Submitted".parse::<ApplicationStatus>().unwrap(),
            ApplicationStatus::Submitted
        );
        assert!("submitted".parse::<ApplicationStatus>().is_err());
    }

    #[test]
    fn correlation_key_prefers_batch() {
        let mut meta = HashMap::new();
        meta.insert("applicationId".to_string(), "APP-1".to_string());
        assert_eq!(
            CorrelationKey::from_metadata(&meta),
            Some(CorrelationKey::Application("APP-1".into()))
        );

        meta.insert("batchId".to_string(), "b1".to_string());
        let key = CorrelationKey::from_metadata(&meta).unwrap();
        assert_eq!(key, CorrelationKey::Batch("b1".into()));
        assert_eq!(key.metadata_name(), "batchId");
    }

    #[test]
    fn correlation_key_ignores_blank_values() {
        let mut meta = HashMap::new();
        meta.insert("batchId".to_string(), "  ".to_string());
        assert_eq!(CorrelationKey::from_metadata(&meta), None);
    }

    #[test]
    fn uploaded_file_info_field_names() {
        let json = r#"{"fileId":"f1","filename":"a.pdf","fileType":"application/pdf","uploadedAt":"2024-05-01T10:00:00Z","storagePath":"/buf/APP-1/f1_a.pdf"}"#;
        let info: UploadedFileInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.file_id, "f1");
        assert_eq!(info.storage_path, "/buf/APP-1/f1_a.pdf");
    }
}
