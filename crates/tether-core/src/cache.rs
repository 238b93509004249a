//! Response cache for offline reads
//!
//! Successful read responses are stored by canonical request key. When a
//! later read of the same key fails at the transport level, the client
//! serves the cached payload instead.
//!
//! Staleness is a soft marker: an entry older than the freshness threshold
//! is still returned, flagged `is_stale`. Entries are only ever replaced by
//! a newer response or dropped by [`ResponseCache::clear`] at logout.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::http::ApiRequest;
use crate::storage::{load_json, save_json, StorageResult};

const KEY_BASE: &str = "http://cache.key/";

/// Canonical cache key: path plus query pairs sorted by name, then value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build a key from a path (which may carry an inline query string) and
    /// extra query pairs
    pub fn new(path: &str, query: &[(String, String)]) -> Self {
        let Ok(mut url) = Url::parse(KEY_BASE).and_then(|base| base.join(path)) else {
            return CacheKey(path.to_string());
        };

        let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        pairs.extend(query.iter().cloned());
        pairs.sort();

        url.set_query(None);
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs.iter());
        }

        let mut key = url.path().to_string();
        if let Some(query) = url.query() {
            key.push('?');
            key.push_str(query);
        }
        CacheKey(key)
    }

    pub fn for_request(request: &ApiRequest) -> Self {
        Self::new(&request.path, &request.query)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub status: u16,
    pub payload: Value,
    pub stored_at: DateTime<Utc>,
}

/// Result of a cache lookup
#[derive(Debug, Clone, PartialEq)]
pub struct CachedPayload {
    pub status: u16,
    pub payload: Value,
    pub stored_at: DateTime<Utc>,
    pub is_stale: bool,
}

pub struct ResponseCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    freshness: Duration,
    path: Option<PathBuf>,
}

impl ResponseCache {
    /// Cache that lives only as long as the process
    pub fn in_memory(freshness: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            freshness,
            path: None,
        }
    }

    /// Cache persisted to `path`, loading previous entries if present
    pub fn with_path(path: PathBuf, freshness: Duration) -> StorageResult<Self> {
        let stored: Vec<CacheEntry> = load_json(&path)?.unwrap_or_default();
        let entries = stored
            .into_iter()
            .map(|entry| (entry.key.clone(), entry))
            .collect();

        Ok(Self {
            entries: Mutex::new(entries),
            freshness,
            path: Some(path),
        })
    }

    pub fn freshness(&self) -> Duration {
        self.freshness
    }

    /// Store a successful read response, replacing any previous entry
    pub async fn set(&self, key: CacheKey, status: u16, payload: Value) -> StorageResult<()> {
        let mut entries = self.entries.lock().await;
        debug!("Caching response for {}", key);
        entries.insert(
            key.clone(),
            CacheEntry {
                key,
                status,
                payload,
                stored_at: Utc::now(),
            },
        );
        self.persist(&entries)
    }

    /// Look up a key; stale entries are returned with `is_stale` set
    pub async fn get(&self, key: &CacheKey) -> Option<CachedPayload> {
        self.get_at(key, Utc::now()).await
    }

    pub(crate) async fn get_at(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<CachedPayload> {
        let entries = self.entries.lock().await;
        let entry = entries.get(key)?;

        // A clock that moved backwards counts as fresh
        let is_stale = (now - entry.stored_at)
            .to_std()
            .map(|age| age > self.freshness)
            .unwrap_or(false);

        Some(CachedPayload {
            status: entry.status,
            payload: entry.payload.clone(),
            stored_at: entry.stored_at,
            is_stale,
        })
    }

    /// Drop every entry
    pub async fn clear(&self) -> StorageResult<()> {
        let mut entries = self.entries.lock().await;
        entries.clear();
        debug!("Response cache cleared");
        self.persist(&entries)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    fn persist(&self, entries: &HashMap<CacheKey, CacheEntry>) -> StorageResult<()> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        let snapshot: Vec<&CacheEntry> = entries.values().collect();
        save_json(path, &snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_key_ignores_parameter_order() {
        let a = CacheKey::new("/attendance", &pairs(&[("class", "3b"), ("day", "mon")]));
        let b = CacheKey::new("/attendance", &pairs(&[("day", "mon"), ("class", "3b")]));
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "/attendance?class=3b&day=mon");
    }

    #[test]
    fn test_key_merges_inline_query() {
        let inline = CacheKey::new("/meals?week=12", &pairs(&[("day", "tue")]));
        let explicit = CacheKey::new("/meals", &pairs(&[("week", "12"), ("day", "tue")]));
        assert_eq!(inline, explicit);
    }

    #[test]
    fn test_key_encodes_values() {
        let key = CacheKey::new("/search", &pairs(&[("q", "a&b c")]));
        assert_eq!(key.as_str(), "/search?q=a%26b+c");
        assert_ne!(key, CacheKey::new("/search", &pairs(&[("q", "a"), ("b c", "")])));
    }

    #[test]
    fn test_key_without_query() {
        assert_eq!(CacheKey::new("/children", &[]).as_str(), "/children");
        assert_eq!(
            CacheKey::for_request(&ApiRequest::get("/children").query("page", "2")).as_str(),
            "/children?page=2"
        );
    }

    #[tokio::test]
    async fn test_set_then_get_returns_payload() {
        let cache = ResponseCache::in_memory(Duration::from_secs(60));
        let key = CacheKey::new("/activities", &[]);

        cache.set(key.clone(), 200, json!([{"id": 1}])).await.unwrap();

        let hit = cache.get(&key).await.unwrap();
        assert_eq!(hit.payload, json!([{"id": 1}]));
        assert_eq!(hit.status, 200);
        assert!(!hit.is_stale);
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let cache = ResponseCache::in_memory(Duration::from_secs(60));
        let key = CacheKey::new("/activities", &[]);

        cache.set(key.clone(), 200, json!("old")).await.unwrap();
        cache.set(key.clone(), 200, json!("new")).await.unwrap();

        assert_eq!(cache.get(&key).await.unwrap().payload, json!("new"));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_stale_entry_is_still_returned() {
        let cache = ResponseCache::in_memory(Duration::from_secs(60));
        let key = CacheKey::new("/meals", &[]);
        cache.set(key.clone(), 200, json!({"menu": "soup"})).await.unwrap();

        let later = Utc::now() + chrono::Duration::minutes(10);
        let hit = cache.get_at(&key, later).await.unwrap();
        assert!(hit.is_stale);
        assert_eq!(hit.payload, json!({"menu": "soup"}));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_clear_then_get_misses() {
        let cache = ResponseCache::in_memory(Duration::from_secs(60));
        let key = CacheKey::new("/media", &[]);
        cache.set(key.clone(), 200, json!([])).await.unwrap();

        cache.clear().await.unwrap();

        assert!(cache.get(&key).await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_persisted_cache_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("response_cache.json");
        let key = CacheKey::new("/children", &pairs(&[("class", "2a")]));

        {
            let cache = ResponseCache::with_path(path.clone(), Duration::from_secs(60)).unwrap();
            cache.set(key.clone(), 200, json!(["Ada", "Linus"])).await.unwrap();
        }

        let cache = ResponseCache::with_path(path.clone(), Duration::from_secs(60)).unwrap();
        assert_eq!(cache.get(&key).await.unwrap().payload, json!(["Ada", "Linus"]));

        cache.clear().await.unwrap();
        let reopened = ResponseCache::with_path(path, Duration::from_secs(60)).unwrap();
        assert!(reopened.is_empty().await);
    }
}
