//! Resumable transport event hooks.
//!
//! The transport server calls [`UploadHooks::on_before_create`] before
//! accepting a new upload, [`UploadHooks::on_file_complete`] once all bytes
//! of an upload have arrived, and [`UploadHooks::on_terminated`] when a
//! client discards a partial upload.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use formupload_file_ops::{StoreOutcome, key_dir, stored_name, validate_segment};
use formupload_protocol::constants::{DEFAULT_FILETYPE, META_FILENAME, META_FILETYPE};
use formupload_protocol::messages::{
    UploadAcceptedResponse, UploadCreateRequest, UploadFinishedRequest, UploadRecordedResponse,
    UploadRemovedResponse, UploadTerminatedRequest,
};
use formupload_protocol::{CorrelationKey, UploadedFileInfo};
use tracing::{debug, info, warn};

use crate::error::HookError;
use crate::registry::Registry;

/// Parses a tus `Upload-Metadata` header: comma-separated `key base64value`
/// pairs, where the value may be omitted.
pub fn parse_upload_metadata(header: &str) -> Result<HashMap<String, String>, HookError> {
    let mut out = HashMap::new();
    for pair in header.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let mut parts = pair.splitn(2, ' ');
        let key = parts.next().unwrap_or_default().trim();
        if key.is_empty() {
            return Err(HookError::InvalidMetadata(pair.to_string()));
        }
        let value = match parts.next().map(str::trim).filter(|v| !v.is_empty()) {
            Some(encoded) => {
                let bytes = STANDARD
                    .decode(encoded)
                    .map_err(|e| HookError::InvalidMetadata(format!("{key}: {e}")))?;
                String::from_utf8(bytes)
                    .map_err(|e| HookError::InvalidMetadata(format!("{key}: {e}")))?
            }
            None => String::new(),
        };
        out.insert(key.to_string(), value);
    }
    Ok(out)
}

pub struct UploadHooks {
    registry: Arc<Registry>,
    buffer: PathBuf,
    max_upload_size: u64,
}

impl UploadHooks {
    pub fn new(registry: Arc<Registry>, buffer: impl Into<PathBuf>, max_upload_size: u64) -> Self {
        Self {
            registry,
            buffer: buffer.into(),
            max_upload_size,
        }
    }

    /// Validates a new upload. Rejects uploads without a usable correlation
    /// key and uploads whose declared length exceeds the size limit.
    pub fn on_before_create(
        &self,
        metadata: &HashMap<String, String>,
        upload_length: Option<u64>,
    ) -> Result<CorrelationKey, HookError> {
        let key = CorrelationKey::from_metadata(metadata).ok_or(HookError::MissingCorrelationKey)?;
        validate_segment(key.value())
            .map_err(|e| HookError::InvalidMetadata(format!("{}: {e}", key.metadata_name())))?;

        if let Some(size) = upload_length
            && size > self.max_upload_size
        {
            return Err(HookError::UploadTooLarge {
                size,
                limit: self.max_upload_size,
            });
        }

        info!(
            key = %key,
            key_kind = key.metadata_name(),
            filename = metadata.get(META_FILENAME).map(String::as_str).unwrap_or(""),
            size = upload_length.unwrap_or(0),
            "upload started"
        );
        Ok(key)
    }

    /// Records a completed upload under the key its correlation key
    /// currently resolves to, then files the transport's data file into
    /// that key's folder.
    ///
    /// The record is visible before the file is moved. A missing data file
    /// is logged and the record kept.
    pub async fn on_file_complete(
        &self,
        file_id: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<UploadedFileInfo, HookError> {
        validate_segment(file_id)?;
        let key = CorrelationKey::from_metadata(metadata).ok_or(HookError::MissingCorrelationKey)?;
        let filename = metadata.get(META_FILENAME).cloned().unwrap_or_default();
        let file_type = metadata
            .get(META_FILETYPE)
            .filter(|t| !t.is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_FILETYPE.to_string());

        let resolved = self.registry.resolve(key.value());
        let storage_path = key_dir(&self.buffer, &resolved)?.join(stored_name(file_id, &filename));
        let record = UploadedFileInfo {
            file_id: file_id.to_string(),
            filename: filename.clone(),
            file_type,
            uploaded_at: Utc::now(),
            storage_path: storage_path.to_string_lossy().into_owned(),
        };
        let count = self.registry.track_completed(&resolved, record.clone());
        info!(
            file_id,
            key = %key,
            resolved = %resolved,
            filename = %filename,
            count,
            "upload complete"
        );

        let buffer = self.buffer.clone();
        let id = file_id.to_string();
        let outcome = tokio::task::spawn_blocking(move || {
            formupload_file_ops::store_completed(&buffer, &id, &resolved, &filename)
        })
        .await
        .map_err(|e| HookError::Join(e.to_string()))??;

        match outcome {
            StoreOutcome::Stored(path) => debug!(file_id, path = %path.display(), "upload filed"),
            StoreOutcome::Missing(path) => {
                warn!(file_id, path = %path.display(), "completed upload data file not found")
            }
        }
        Ok(record)
    }

    /// Handles an `upload_create` event from the transport.
    pub fn handle_create(
        &self,
        req: &UploadCreateRequest,
    ) -> Result<UploadAcceptedResponse, HookError> {
        let metadata = parse_upload_metadata(&req.upload_metadata)?;
        let key = self.on_before_create(&metadata, req.upload_length)?;
        Ok(UploadAcceptedResponse {
            key_name: key.metadata_name().to_string(),
            key: key.value().to_string(),
        })
    }

    /// Handles an `upload_finished` event from the transport.
    pub async fn handle_finished(
        &self,
        req: &UploadFinishedRequest,
    ) -> Result<UploadRecordedResponse, HookError> {
        let metadata = parse_upload_metadata(&req.upload_metadata)?;
        let file = self.on_file_complete(&req.file_id, &metadata).await?;
        Ok(UploadRecordedResponse { file })
    }

    /// Handles an `upload_terminated` event from the transport.
    pub async fn handle_terminated(
        &self,
        req: &UploadTerminatedRequest,
    ) -> Result<UploadRemovedResponse, HookError> {
        let removed = self.on_terminated(&req.file_id).await?;
        Ok(UploadRemovedResponse {
            file_id: req.file_id.clone(),
            removed,
        })
    }

    /// Removes a partial upload the client abandoned.
    pub async fn on_terminated(&self, file_id: &str) -> Result<bool, HookError> {
        let buffer = self.buffer.clone();
        let id = file_id.to_string();
        let removed = tokio::task::spawn_blocking(move || {
            formupload_file_ops::remove_partial(&buffer, &id)
        })
        .await
        .map_err(|e| HookError::Join(e.to_string()))??;
        debug!(file_id, removed, "upload terminated");
        Ok(removed)
    }
}
