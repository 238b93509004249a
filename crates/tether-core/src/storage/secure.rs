//! Durable key-value store for credentials
//!
//! The platform keychain is abstracted behind [`SecureStore`]. The file
//! backend keeps all keys in one owner-only JSON object.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::error::StorageResult;
use super::persistence::{load_json, save_private_json};

/// Key/value storage with get/set/remove semantics
#[async_trait]
pub trait SecureStore: Send + Sync {
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    async fn remove(&self, key: &str) -> StorageResult<()>;

    /// Write several keys as one update
    ///
    /// The default writes them one by one; backends that can do better
    /// override it.
    async fn set_many(&self, entries: &[(&str, &str)]) -> StorageResult<()> {
        for (key, value) in entries {
            self.set(key, value).await?;
        }
        Ok(())
    }

    /// Remove several keys
    async fn remove_many(&self, keys: &[&str]) -> StorageResult<()> {
        for key in keys {
            self.remove(key).await?;
        }
        Ok(())
    }
}

/// File-backed store
pub struct FileSecureStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileSecureStore {
    /// Open the store, loading any existing file
    pub fn open(path: PathBuf) -> StorageResult<Self> {
        let entries = load_json(&path)?.unwrap_or_default();
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> StorageResult<()> {
        save_private_json(&self.path, entries)
    }
}

#[async_trait]
impl SecureStore for FileSecureStore {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.set_many(&[(key, value)]).await
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.remove_many(&[key]).await
    }

    async fn set_many(&self, new_entries: &[(&str, &str)]) -> StorageResult<()> {
        let mut entries = self.entries.lock().await;
        let mut next = entries.clone();
        for (key, value) in new_entries {
            next.insert(key.to_string(), value.to_string());
        }
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }

    async fn remove_many(&self, keys: &[&str]) -> StorageResult<()> {
        let mut entries = self.entries.lock().await;
        let mut next = entries.clone();
        for key in keys {
            next.remove(*key);
        }
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }
}

/// In-process store, nothing survives a restart
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecureStore for MemoryStore {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}
