//! Storage errors
//!
//! Every variant carries the file it concerns so a failure while persisting
//! the queue can be told apart from one in the credential store.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Permission denied on '{path}'. Check the data directory permissions.")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A file or directory expected to exist is gone
    #[error("'{path}' not found")]
    NotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("No space left while writing '{path}'")]
    DiskFull {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The file exists but does not hold the expected JSON document
    #[error("'{path}' is damaged ({details}). Delete it to start over.")]
    Corrupt { path: PathBuf, details: String },

    #[error("Failed to encode value: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Could not move '{from}' into place at '{to}': {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    /// Wrap a read-side I/O error
    pub fn reading(error: io::Error, path: PathBuf) -> Self {
        Self::classify(error, path).unwrap_or_else(|(error, path)| StorageError::Read {
            path,
            source: error,
        })
    }

    /// Wrap a write-side I/O error
    pub fn writing(error: io::Error, path: PathBuf) -> Self {
        Self::classify(error, path).unwrap_or_else(|(error, path)| StorageError::Write {
            path,
            source: error,
        })
    }

    /// Single out the cases a user can act on; the rest are handed back
    fn classify(error: io::Error, path: PathBuf) -> Result<Self, (io::Error, PathBuf)> {
        match error.kind() {
            io::ErrorKind::PermissionDenied => Ok(StorageError::PermissionDenied {
                path,
                source: error,
            }),
            io::ErrorKind::NotFound => Ok(StorageError::NotFound {
                path,
                source: error,
            }),
            _ if is_disk_full(&error) => Ok(StorageError::DiskFull {
                path,
                source: error,
            }),
            _ => Err((error, path)),
        }
    }

    /// Whether the user can fix the cause and retry
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StorageError::PermissionDenied { .. }
                | StorageError::DiskFull { .. }
                | StorageError::Corrupt { .. }
        )
    }

    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            StorageError::PermissionDenied { .. } => {
                Some("Make the data directory writable by the current user.")
            }
            StorageError::DiskFull { .. } => Some("Free up disk space and try again."),
            StorageError::Corrupt { .. } => Some(
                "Delete the damaged file. Credentials require a new login; the cache refills on the next request.",
            ),
            StorageError::NotFound { .. } => {
                Some("Check that data_dir points at an existing, mounted location.")
            }
            _ => None,
        }
    }
}

fn is_disk_full(error: &io::Error) -> bool {
    let msg = error.to_string().to_lowercase();
    msg.contains("no space left") || msg.contains("quota exceeded")
}

pub type StorageResult<T> = Result<T, StorageError>;
