//! Moving completed uploads into key folders, and key folders between keys.

use std::path::{Path, PathBuf};

use crate::FileOpsError;
use crate::layout::{SIDECAR_SUFFIXES, key_dir, sidecar, stored_name, upload_file};

/// Result of filing a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    /// The file now lives at this path.
    Stored(PathBuf),
    /// The transport file was not found; nothing was moved.
    Missing(PathBuf),
}

/// Result of moving a key folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelocateOutcome {
    Moved { from: PathBuf, to: PathBuf },
    /// The source folder does not exist (already moved, or no files).
    Missing(PathBuf),
    /// Source and destination are the same key.
    Unchanged(PathBuf),
}

/// Moves `<buffer>/<file_id>` to `<buffer>/<key>/<file_id>_<filename>` and
/// deletes the transport sidecars. An existing file at the destination is
/// replaced.
pub fn store_completed(
    buffer: &Path,
    file_id: &str,
    key: &str,
    filename: &str,
) -> Result<StoreOutcome, FileOpsError> {
    let source = upload_file(buffer, file_id)?;
    let dir = key_dir(buffer, key)?;
    let dest = dir.join(stored_name(file_id, filename));

    if !source.is_file() {
        return Ok(StoreOutcome::Missing(source));
    }

    std::fs::create_dir_all(&dir)?;
    if dest.exists() {
        std::fs::remove_file(&dest)?;
    }
    std::fs::rename(&source, &dest)?;

    for suffix in SIDECAR_SUFFIXES {
        remove_if_exists(&sidecar(&source, suffix))?;
    }

    tracing::debug!(file_id, key, path = %dest.display(), "stored completed upload");
    Ok(StoreOutcome::Stored(dest))
}

/// Moves the folder of key `from` to key `to`. If the destination already
/// exists from an earlier attempt it is removed first, so retries converge.
pub fn relocate_key_dir(
    buffer: &Path,
    from: &str,
    to: &str,
) -> Result<RelocateOutcome, FileOpsError> {
    let source = key_dir(buffer, from)?;
    let dest = key_dir(buffer, to)?;

    if from == to {
        return Ok(RelocateOutcome::Unchanged(dest));
    }
    if !source.is_dir() {
        return Ok(RelocateOutcome::Missing(source));
    }

    if dest.exists() {
        std::fs::remove_dir_all(&dest)?;
    }
    std::fs::rename(&source, &dest)?;

    tracing::info!(from, to, "relocated upload folder");
    Ok(RelocateOutcome::Moved {
        from: source,
        to: dest,
    })
}

fn remove_if_exists(path: &Path) -> Result<(), FileOpsError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Deletes a partial upload and its sidecars. Returns true if the data file
/// existed.
pub fn remove_partial(buffer: &Path, file_id: &str) -> Result<bool, FileOpsError> {
    let path = upload_file(buffer, file_id)?;
    let existed = path.is_file();
    remove_if_exists(&path)?;
    for suffix in SIDECAR_SUFFIXES {
        remove_if_exists(&sidecar(&path, suffix))?;
    }
    if existed {
        tracing::debug!(file_id, "removed partial upload");
    }
    Ok(existed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, content: &str) {
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn store_moves_file_and_cleans_sidecars() {
        let tmp = tempfile::tempdir().unwrap();
        let buf = tmp.path();
        write(&buf.join("f1"), "pdf bytes");
        write(&buf.join("f1.metadata"), "meta");
        write(&buf.join("f1.uploadlength"), "9");

        let out = store_completed(buf, "f1", "b1", "id:card.pdf").unwrap();
        let expected = buf.join("b1").join("f1_id_card.pdf");
        assert_eq!(out, StoreOutcome::Stored(expected.clone()));
        assert_eq!(std::fs::read_to_string(expected).unwrap(), "pdf bytes");
        assert!(!buf.join("f1").exists());
        assert!(!buf.join("f1.metadata").exists());
        assert!(!buf.join("f1.uploadlength").exists());
    }

    #[test]
    fn store_replaces_existing_destination() {
        let tmp = tempfile::tempdir().unwrap();
        let buf = tmp.path();
        std::fs::create_dir_all(buf.join("b1")).unwrap();
        write(&buf.join("b1").join("f1_a.txt"), "old");
        write(&buf.join("f1"), "new");

        store_completed(buf, "f1", "b1", "a.txt").unwrap();
        let content = std::fs::read_to_string(buf.join("b1").join("f1_a.txt")).unwrap();
        assert_eq!(content, "new");
    }

    #[test]
    fn store_missing_source_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let out = store_completed(tmp.path(), "ghost", "b1", "a.txt").unwrap();
        assert!(matches!(out, StoreOutcome::Missing(_)));
        assert!(!tmp.path().join("b1").exists());
    }

    #[test]
    fn store_rejects_traversal() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(store_completed(tmp.path(), "f1", "../escape", "a.txt").is_err());
        assert!(store_completed(tmp.path(), "../f1", "b1", "a.txt").is_err());
    }

    #[test]
    fn relocate_moves_folder() {
        let tmp = tempfile::tempdir().unwrap();
        let buf = tmp.path();
        std::fs::create_dir_all(buf.join("b1")).unwrap();
        write(&buf.join("b1").join("f1_a.txt"), "a");

        let out = relocate_key_dir(buf, "b1", "APP-1").unwrap();
        assert!(matches!(out, RelocateOutcome::Moved { .. }));
        assert!(!buf.join("b1").exists());
        assert!(buf.join("APP-1").join("f1_a.txt").is_file());
    }

    #[test]
    fn relocate_overwrites_previous_attempt() {
        let tmp = tempfile::tempdir().unwrap();
        let buf = tmp.path();
        std::fs::create_dir_all(buf.join("b1")).unwrap();
        std::fs::create_dir_all(buf.join("APP-1")).unwrap();
        write(&buf.join("b1").join("f2_b.txt"), "b");
        write(&buf.join("APP-1").join("stale.txt"), "x");

        relocate_key_dir(buf, "b1", "APP-1").unwrap();
        assert!(buf.join("APP-1").join("f2_b.txt").is_file());
        assert!(!buf.join("APP-1").join("stale.txt").exists());
    }

    #[test]
    fn relocate_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let buf = tmp.path();
        std::fs::create_dir_all(buf.join("b1")).unwrap();
        write(&buf.join("b1").join("f1_a.txt"), "a");

        relocate_key_dir(buf, "b1", "APP-1").unwrap();
        let second = relocate_key_dir(buf, "b1", "APP-1").unwrap();
        assert!(matches!(second, RelocateOutcome::Missing(_)));
        assert!(buf.join("APP-1").join("f1_a.txt").is_file());
    }

    #[test]
    fn relocate_same_key_is_unchanged() {
        let tmp = tempfile::tempdir().unwrap();
        let out = relocate_key_dir(tmp.path(), "APP-1", "APP-1").unwrap();
        assert!(matches!(out, RelocateOutcome::Unchanged(_)));
    }

    #[test]
    fn remove_partial_deletes_data_and_sidecars() {
        let tmp = tempfile::tempdir().unwrap();
        let buf = tmp.path();
        write(&buf.join("f9"), "half");
        write(&buf.join("f9.metadata"), "meta");

        assert!(remove_partial(buf, "f9").unwrap());
        assert!(!buf.join("f9").exists());
        assert!(!buf.join("f9.metadata").exists());
        assert!(!remove_partial(buf, "f9").unwrap());
    }
}
