//! JSON file persistence
//!
//! Every durable file in the data directory (credentials, response cache,
//! offline queue) is a single JSON document. Writes go through
//! [`atomic_write`] (write to temp file, then rename) so a crash never
//! leaves a half-written file behind. Credentials use [`save_private_json`].

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::error::{StorageError, StorageResult};

/// Read and decode a JSON file
///
/// Returns `None` if the file doesn't exist.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> StorageResult<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }

    let json =
        fs::read_to_string(path).map_err(|e| StorageError::reading(e, path.to_path_buf()))?;

    serde_json::from_str(&json)
        .map(Some)
        .map_err(|e| StorageError::Corrupt {
            path: path.to_path_buf(),
            details: e.to_string(),
        })
}

/// Encode a value as JSON and write it atomically
pub fn save_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> StorageResult<()> {
    let json = serde_json::to_vec_pretty(value)?;
    atomic_write(path, &json)
}

/// Like [`save_json`], but the file is readable by its owner only, from the
/// moment the temp file is created
pub fn save_private_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> StorageResult<()> {
    let json = serde_json::to_vec_pretty(value)?;
    replace_file(path, &json, true)
}

/// Write data atomically
///
/// Writes to a temp file in the same directory, syncs it, then renames it
/// over the target path.
pub fn atomic_write(path: &Path, data: &[u8]) -> StorageResult<()> {
    replace_file(path, data, false)
}

fn replace_file(path: &Path, data: &[u8], private: bool) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| StorageError::writing(e, parent.to_path_buf()))?;
    }

    let temp_path = path.with_extension("tmp");

    // A leftover from a crashed write would keep its old mode
    match fs::remove_file(&temp_path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => {
            return Err(StorageError::writing(e, temp_path));
        }
        _ => {}
    }

    let mut file = create_new(&temp_path, private)
        .map_err(|e| StorageError::writing(e, temp_path.clone()))?;

    file.write_all(data)
        .map_err(|e| StorageError::writing(e, temp_path.clone()))?;

    // Sync to disk before rename
    file.sync_all()
        .map_err(|e| StorageError::writing(e, temp_path.clone()))?;

    fs::rename(&temp_path, path).map_err(|source| StorageError::Rename {
        from: temp_path.clone(),
        to: path.to_path_buf(),
        source,
    })?;

    Ok(())
}

#[cfg(unix)]
fn create_new(path: &Path, private: bool) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    if private {
        options.mode(0o600);
    }
    options.open(path)
}

#[cfg(not(unix))]
fn create_new(path: &Path, _private: bool) -> io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}
