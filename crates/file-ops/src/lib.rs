//! Storage layout for completed uploads.
//!
//! The resumable transport writes each upload to `<buffer>/<fileId>`. Once
//! complete, files are filed under a per-key folder, and reconciliation moves
//! a provisional key's folder to its durable key. All functions here are
//! blocking; async callers run them on the blocking pool.

mod layout;
mod relocate;

pub use layout::{
    SIDECAR_SUFFIXES, UNNAMED, ensure_buffer_dir, key_dir, sanitize_filename, stored_name,
    upload_file, validate_segment,
};
pub use relocate::{
    RelocateOutcome, StoreOutcome, relocate_key_dir, remove_partial, store_completed,
};

/// Errors produced by the file-ops crate.
#[derive(Debug, thiserror::Error)]
pub enum FileOpsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid name: {0}")]
    InvalidName(String),
}

/// Default upload buffer: `<tmp>/tus-uploads`.
pub fn default_buffer_path() -> std::path::PathBuf {
    std::env::temp_dir().join("tus-uploads")
}
