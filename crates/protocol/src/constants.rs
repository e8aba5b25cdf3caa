use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Time allowed to write a WebSocket message.
pub const WS_WRITE_WAIT: Duration = Duration::from_secs(10);

/// Read deadline: if nothing arrives within this window (no pong, no
/// request), the connection is considered dead.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// How often the server pings connected clients.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(20);

/// Maximum accepted message size in bytes (1 MiB). API payloads are small;
/// file bytes never travel over this channel.
pub const WS_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Timeout for request/response operations.
pub const WS_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Upload metadata key carrying the original file name.
pub const META_FILENAME: &str = "filename";

/// Upload metadata key carrying the MIME type.
pub const META_FILETYPE: &str = "filetype";

/// Upload metadata key carrying a durable application id.
pub const META_APPLICATION_ID: &str = "applicationId";

/// Upload metadata key carrying a provisional batch id.
pub const META_BATCH_ID: &str = "batchId";

/// Upload metadata key carrying the file's ordinal within its session.
pub const META_FILE_INDEX: &str = "fileIndex";

/// Upload metadata key carrying the session-unique file key.
pub const META_FILE_KEY: &str = "fileKey";

/// MIME type used when the client cannot determine one.
pub const DEFAULT_FILETYPE: &str = "application/octet-stream";

/// WebSocket message type identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // Keepalive
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "pong")]
    Pong,

    // Requests from client to intake
    #[serde(rename = "create_application")]
    CreateApplication,
    #[serde(rename = "documents_complete")]
    DocumentsComplete,
    #[serde(rename = "get_status")]
    GetStatus,
    #[serde(rename = "get_documents")]
    GetDocuments,

    // Lifecycle events from the resumable transport to intake
    #[serde(rename = "upload_create")]
    UploadCreate,
    #[serde(rename = "upload_finished")]
    UploadFinished,
    #[serde(rename = "upload_terminated")]
    UploadTerminated,

    // Responses from intake to client
    #[serde(rename = "application_created")]
    ApplicationCreated,
    #[serde(rename = "documents_complete_response")]
    DocumentsCompleteResponse,
    #[serde(rename = "status_response")]
    StatusResponse,
    #[serde(rename = "documents_response")]
    DocumentsResponse,
    #[serde(rename = "upload_accepted")]
    UploadAccepted,
    #[serde(rename = "upload_recorded")]
    UploadRecorded,
    #[serde(rename = "upload_removed")]
    UploadRemoved,
    #[serde(rename = "error")]
    Error,
}
