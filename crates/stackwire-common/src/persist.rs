//! JSON document persistence shared by the state and registry stores.
//!
//! Writes go to a sibling temporary file that is renamed over the target,
//! so readers never observe a half-written document. The previous revision
//! is kept next to it with a `.backup` suffix.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::constants::BACKUP_SUFFIX;
use crate::error::{Result, StackwireError};

/// Reads a JSON document, returning `None` when the file does not exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "document not found");
            return Ok(None);
        }
        Err(e) => {
            return Err(StackwireError::Io {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };
    Ok(Some(serde_json::from_str(&content)?))
}

/// Persists a JSON document atomically, keeping the previous revision as a backup.
///
/// # Errors
///
/// Returns an error if the parent directory cannot be created or any write fails.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let body = serde_json::to_string_pretty(value)?;

    if path.exists() {
        let backup = sibling(path, BACKUP_SUFFIX);
        let _ = std::fs::copy(path, &backup).map_err(|e| io_err(&backup, e))?;
    }

    let tmp = sibling(path, "tmp");
    std::fs::write(&tmp, body).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    tracing::debug!(path = %path.display(), "document persisted");
    Ok(())
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

fn io_err(path: &Path, source: std::io::Error) -> StackwireError {
    StackwireError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn missing_document_reads_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loaded: Option<BTreeMap<String, String>> =
            read_json(&dir.path().join("absent.json")).expect("read");
        assert!(loaded.is_none());
    }

    #[test]
    fn second_write_keeps_a_backup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("state.json");

        let mut doc = BTreeMap::new();
        let _ = doc.insert("rev".to_string(), "1".to_string());
        write_json_atomic(&path, &doc).expect("first write");
        let _ = doc.insert("rev".to_string(), "2".to_string());
        write_json_atomic(&path, &doc).expect("second write");

        let current: BTreeMap<String, String> = read_json(&path).expect("read").expect("present");
        assert_eq!(current["rev"], "2");
        let backup: BTreeMap<String, String> = read_json(&dir.path().join("nested/state.json.backup"))
            .expect("read backup")
            .expect("backup present");
        assert_eq!(backup["rev"], "1");
        assert!(!dir.path().join("nested/state.json.tmp").exists());
    }

    #[test]
    fn corrupt_document_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").expect("write");
        let result: Result<Option<BTreeMap<String, String>>> = read_json(&path);
        assert!(matches!(result, Err(StackwireError::Serialization { .. })));
    }
}
