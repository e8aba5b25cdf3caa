use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use formupload_protocol::constants::{
    DEFAULT_FILETYPE, META_FILE_INDEX, META_FILE_KEY, META_FILENAME, META_FILETYPE,
};
use formupload_protocol::{CorrelationKey, UploadStatus};

use crate::TransferError;
use crate::progress::TaskProgress;

/// Where a file's bytes come from.
#[derive(Debug, Clone)]
pub enum FileSource {
    Memory(Arc<[u8]>),
    Path(PathBuf),
}

/// A file chosen for upload.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    /// MIME type, if known.
    pub file_type: Option<String>,
    pub size: u64,
    pub source: FileSource,
}

impl UploadFile {
    pub fn from_bytes(name: impl Into<String>, file_type: Option<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            file_type,
            size: data.len() as u64,
            source: FileSource::Memory(data.into()),
        }
    }

    /// A file on disk. Its size is read now; the bytes are read by the
    /// transport.
    pub fn from_path(
        name: impl Into<String>,
        file_type: Option<String>,
        path: impl Into<PathBuf>,
    ) -> Result<Self, TransferError> {
        let path = path.into();
        let meta = std::fs::metadata(&path)?;
        if !meta.is_file() {
            return Err(TransferError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a regular file: {}", path.display()),
            )));
        }
        Ok(Self {
            name: name.into(),
            file_type,
            size: meta.len(),
            source: FileSource::Path(path),
        })
    }
}

/// Builds the session-unique key for a file: `<key>-<name>-<index>`.
pub fn file_key(key: &CorrelationKey, name: &str, index: usize) -> String {
    format!("{}-{}-{}", key.value(), name, index)
}

/// Per-file upload state machine.
///
/// Mutated only by transport events and by session cancellation. Every
/// mutator returns whether the transition was applied; edges outside
/// `Pending -> Uploading -> {Complete | Error}` are refused.
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub(crate) seq: u64,
    pub(crate) index: usize,
    pub(crate) file_key: String,
    pub(crate) file: UploadFile,
    pub(crate) status: UploadStatus,
    pub(crate) bytes_uploaded: u64,
    pub(crate) bytes_total: u64,
    pub(crate) error: Option<String>,
}

impl UploadTask {
    pub(crate) fn new(seq: u64, index: usize, key: &CorrelationKey, file: UploadFile) -> Self {
        Self {
            seq,
            index,
            file_key: file_key(key, &file.name, index),
            bytes_total: file.size,
            file,
            status: UploadStatus::Pending,
            bytes_uploaded: 0,
            error: None,
        }
    }

    pub fn file_key(&self) -> &str {
        &self.file_key
    }

    pub fn status(&self) -> UploadStatus {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub(crate) fn start(&mut self) -> bool {
        self.transition(UploadStatus::Uploading)
    }

    pub(crate) fn record_progress(&mut self, bytes_uploaded: u64, bytes_total: u64) -> bool {
        if self.status != UploadStatus::Uploading {
            return false;
        }
        if bytes_total > 0 {
            self.bytes_total = bytes_total;
        }
        self.bytes_uploaded = bytes_uploaded.min(self.bytes_total);
        true
    }

    pub(crate) fn complete(&mut self) -> bool {
        if !self.transition(UploadStatus::Complete) {
            return false;
        }
        self.bytes_uploaded = self.bytes_total;
        true
    }

    pub(crate) fn fail(&mut self, reason: impl Into<String>) -> bool {
        if !self.transition(UploadStatus::Error) {
            return false;
        }
        self.error = Some(reason.into());
        true
    }

    fn transition(&mut self, next: UploadStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        true
    }

    /// Upload metadata sent with this file.
    pub fn metadata(&self, key: &CorrelationKey) -> HashMap<String, String> {
        let mut meta = HashMap::new();
        meta.insert(META_FILENAME.to_string(), self.file.name.clone());
        meta.insert(
            META_FILETYPE.to_string(),
            self.file
                .file_type
                .clone()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_FILETYPE.to_string()),
        );
        meta.insert(key.metadata_name().to_string(), key.value().to_string());
        meta.insert(META_FILE_INDEX.to_string(), self.index.to_string());
        meta.insert(META_FILE_KEY.to_string(), self.file_key.clone());
        meta
    }

    /// Identity for resume lookup: same key, name, size and index.
    pub(crate) fn fingerprint(&self) -> String {
        format!("{}:{}", self.file_key, self.file.size)
    }

    pub fn to_progress(&self) -> TaskProgress {
        TaskProgress {
            file_key: self.file_key.clone(),
            filename: self.file.name.clone(),
            status: self.status,
            bytes_uploaded: self.bytes_uploaded,
            bytes_total: self.bytes_total,
            error: self.error.clone(),
        }
    }
}
