//! On-disk layout of the upload buffer.
//!
//! ```text
//! <buffer>/<fileId>                      in-flight or just-completed upload
//! <buffer>/<fileId>.metadata             transport sidecars
//! <buffer>/<fileId>.uploadlength
//! <buffer>/<key>/<fileId>_<filename>     completed upload filed under its key
//! ```

use std::path::{Component, Path, PathBuf};

use crate::FileOpsError;

/// Transport sidecar suffixes removed once a file is filed away.
pub const SIDECAR_SUFFIXES: [&str; 2] = [".metadata", ".uploadlength"];

/// Name used when an upload carries no filename.
pub const UNNAMED: &str = "unnamed";

/// Replaces characters that are not allowed in file names with `_`.
/// An empty name becomes [`UNNAMED`].
pub fn sanitize_filename(name: &str) -> String {
    if name.is_empty() {
        return UNNAMED.to_string();
    }
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// Checks that `segment` is exactly one normal path component, so a
/// correlation key or file id can never address anything outside the buffer.
pub fn validate_segment(segment: &str) -> Result<(), FileOpsError> {
    if segment.is_empty() {
        return Err(FileOpsError::InvalidName("empty name".into()));
    }
    if segment.contains(['/', '\\']) {
        return Err(FileOpsError::InvalidName(format!(
            "path separator not allowed: {segment}"
        )));
    }

    let mut components = Path::new(segment).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(FileOpsError::InvalidName(format!(
            "not a plain name: {segment}"
        ))),
    }
}

/// Folder holding the completed uploads of one correlation key.
pub fn key_dir(buffer: &Path, key: &str) -> Result<PathBuf, FileOpsError> {
    validate_segment(key)?;
    Ok(buffer.join(key))
}

/// Path of a raw transport file.
pub fn upload_file(buffer: &Path, file_id: &str) -> Result<PathBuf, FileOpsError> {
    validate_segment(file_id)?;
    Ok(buffer.join(file_id))
}

/// Name of a completed upload inside its key folder.
pub fn stored_name(file_id: &str, filename: &str) -> String {
    format!("{file_id}_{}", sanitize_filename(filename))
}

pub(crate) fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// Ensures the buffer directory exists, creating it if necessary.
///
/// Returns the canonicalized path.
pub fn ensure_buffer_dir(path: &Path) -> Result<PathBuf, FileOpsError> {
    std::fs::create_dir_all(path)?;
    Ok(std::fs::canonicalize(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_invalid_chars() {
        assert_eq!(sanitize_filename("a/b\\c:d*e?.pdf"), "a_b_c_d_e_.pdf");
        assert_eq!(sanitize_filename("tax return 2023.pdf"), "tax return 2023.pdf");
        assert_eq!(sanitize_filename("line\nbreak"), "line_break");
    }

    #[test]
    fn sanitize_empty_is_unnamed() {
        assert_eq!(sanitize_filename(""), "unnamed");
    }

    #[test]
    fn segment_validation() {
        assert!(validate_segment("APP-20240501-0A1B2C3D").is_ok());
        assert!(validate_segment("b1").is_ok());
        assert!(validate_segment("").is_err());
        assert!(validate_segment("..").is_err());
        assert!(validate_segment(".").is_err());
        assert!(validate_segment("a/b").is_err());
        assert!(validate_segment("/etc").is_err());
        assert!(validate_segment("..\\x").is_err());
    }

    #[test]
    fn key_dir_joins_buffer() {
        let dir = key_dir(Path::new("/buf"), "b1").unwrap();
        assert_eq!(dir, PathBuf::from("/buf/b1"));
        assert!(key_dir(Path::new("/buf"), "../x").is_err());
    }

    #[test]
    fn stored_name_format() {
        assert_eq!(stored_name("f1", "id card.png"), "f1_id card.png");
        assert_eq!(stored_name("f2", ""), "f2_unnamed");
    }

    #[test]
    fn sidecar_appends_suffix() {
        let p = sidecar(Path::new("/buf/f1"), ".metadata");
        assert_eq!(p, PathBuf::from("/buf/f1.metadata"));
    }

    #[test]
    fn ensure_buffer_dir_creates_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("tus").join("uploads");
        let canon = ensure_buffer_dir(&dir).unwrap();
        assert!(dir.is_dir());
        assert!(canon.is_absolute());
    }
}
