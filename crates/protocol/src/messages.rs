use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ApplicationStatus, UploadedFileInfo};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Creates a durable application record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateApplicationRequest {
    pub name: String,
    #[serde(default)]
    pub email: String,
    pub document_count: u32,
}

/// Reports that a client upload session has settled.
///
/// `batch_id` is present in the batch-first flow, where uploads were tagged
/// with a provisional key before the application existed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentsCompleteRequest {
    pub application_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    pub success_count: u32,
    pub failed_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Asks for the status of an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRequest {
    pub application_id: String,
}

/// Asks for the documents recorded for an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentsRequest {
    pub application_id: String,
}

/// Sent by the transport before it creates an upload. A rejection aborts
/// the creation with the error code as HTTP status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadCreateRequest {
    /// Raw `Upload-Metadata` header.
    #[serde(default)]
    pub upload_metadata: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_length: Option<u64>,
}

/// Sent by the transport once every byte of an upload has arrived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFinishedRequest {
    pub file_id: String,
    #[serde(default)]
    pub upload_metadata: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_length: Option<u64>,
}

/// Sent by the transport when a client discards a partial upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTerminatedRequest {
    pub file_id: String,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationCreatedResponse {
    pub application_id: String,
    pub status: ApplicationStatus,
    pub documents_expected: u32,
    /// Where the client should send resumable uploads.
    pub upload_endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentsCompleteResponse {
    pub application_id: String,
    pub status: ApplicationStatus,
    pub uploaded_documents: u32,
    pub success_count: u32,
    pub failed_count: u32,
    #[serde(default)]
    pub uploaded_files: Vec<UploadedFileInfo>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub application_id: String,
    pub status: ApplicationStatus,
    pub expected_documents: u32,
    pub uploaded_documents: u32,
    pub is_complete: bool,
    #[serde(default)]
    pub uploaded_files: Vec<UploadedFileInfo>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentsResponse {
    pub application_id: String,
    #[serde(default)]
    pub documents: Vec<UploadedFileInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadAcceptedResponse {
    /// `applicationId` or `batchId`.
    pub key_name: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRecordedResponse {
    pub file: UploadedFileInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRemovedResponse {
    pub file_id: String,
    /// Whether partial data was found and deleted.
    pub removed: bool,
}
