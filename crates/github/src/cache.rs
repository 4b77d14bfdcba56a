//! Content-addressed, disk-persisted response cache.
//!
//! One JSON file per entry, named by the SHA-256 of the request's dry-run
//! flag and query text. Entries expire a fixed `ttl` after they were written;
//! reading never extends that. Expired or unreadable entries are treated as
//! misses and removed.
//!
//! Writes happen in the background so that callers get their response
//! without waiting for the disk. Until a write settles its response is served
//! from memory, so a repeat of the request is a hit even before the file
//! exists. [`DiskCache::flush`] waits for every outstanding write.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::errors::ClientError;

const ENTRY_EXTENSION: &str = "json";

/// Deterministic key for a `(query text, dry run)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Hashes the pair. Identical inputs always produce the same key.
    pub fn new(query_text: &str, dry_run: bool) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(if dry_run { b"dry-run\n" as &[u8] } else { b"live\n" });
        hasher.update(query_text.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// The hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_file_name(path: &Path) -> Option<Self> {
        if path.extension()? != ENTRY_EXTENSION {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let is_digest = stem.len() == 64 && stem.bytes().all(|b| b.is_ascii_hexdigit());
        is_digest.then(|| Self(stem.to_string()))
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    created_at: DateTime<Utc>,
    response: Value,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        // A timestamp from the future converts to an error: treat it as fresh.
        (now - self.created_at).to_std().is_ok_and(|age| age > ttl)
    }
}

struct Inner {
    dir: PathBuf,
    ttl: Duration,
    pending: AtomicUsize,
    settled: Notify,
    /// Responses whose write has not settled, tagged with the write that
    /// stored them so an older write never evicts a newer response.
    unsettled: Mutex<HashMap<CacheKey, (u64, Value)>>,
    next_write: AtomicU64,
}

impl Inner {
    fn unsettled(&self) -> MutexGuard<'_, HashMap<CacheKey, (u64, Value)>> {
        self.unsettled.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Process-wide response cache. Clones share pending-write tracking.
#[derive(Clone)]
pub struct DiskCache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DiskCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskCache")
            .field("dir", &self.inner.dir)
            .field("ttl", &self.inner.ttl)
            .field("pending", &self.pending_writes())
            .finish()
    }
}

impl DiskCache {
    /// Opens (without touching the disk) the cache described by `config`.
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                dir: config.dir.clone(),
                ttl: config.ttl,
                pending: AtomicUsize::new(0),
                settled: Notify::new(),
                unsettled: Mutex::new(HashMap::new()),
                next_write: AtomicU64::new(0),
            }),
        }
    }

    /// Directory holding the entries.
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.inner
            .dir
            .join(format!("{}.{ENTRY_EXTENSION}", key.as_str()))
    }

    /// Returns the stored response, or `None` on a miss. Expired and corrupt
    /// entries are deleted and reported as misses.
    pub async fn get(&self, key: &CacheKey) -> Result<Option<Value>, ClientError> {
        let unsettled = self.inner.unsettled().get(key).map(|(_, response)| response.clone());
        if let Some(response) = unsettled {
            debug!(key = %key, "cache hit (write pending)");
            return Ok(Some(response));
        }
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(key = %key, "cache miss");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        let entry: CacheEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(key = %key, error = %err, "discarding unreadable cache entry");
                remove_if_present(&path).await?;
                return Ok(None);
            }
        };
        if entry.is_expired(self.inner.ttl, Utc::now()) {
            debug!(key = %key, created_at = %entry.created_at, "cache entry expired");
            remove_if_present(&path).await?;
            return Ok(None);
        }
        debug!(key = %key, "cache hit");
        Ok(Some(entry.response))
    }

    /// Stores `response` under `key` in the background. Failures are logged
    /// and otherwise ignored: a lost write is only a future miss.
    pub fn put(&self, key: CacheKey, response: Value) {
        let write = self.inner.next_write.fetch_add(1, Ordering::SeqCst);
        self.inner
            .unsettled()
            .insert(key.clone(), (write, response.clone()));
        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        let this = self.clone();
        tokio::spawn(async move {
            let path = this.path_for(&key);
            let entry = CacheEntry {
                created_at: Utc::now(),
                response,
            };
            let written = tokio::task::spawn_blocking(move || write_entry(&path, &entry)).await;
            match written {
                Ok(Ok(())) => debug!(key = %key, "cache entry written"),
                Ok(Err(err)) => warn!(key = %key, error = %err, "cache write failed"),
                Err(err) => warn!(key = %key, error = %err, "cache write task failed"),
            }
            {
                let mut unsettled = this.inner.unsettled();
                if unsettled.get(&key).is_some_and(|(tag, _)| *tag == write) {
                    unsettled.remove(&key);
                }
            }
            if this.inner.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                this.inner.settled.notify_waiters();
            }
        });
    }

    /// Number of writes not yet on disk.
    pub fn pending_writes(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Resolves once every write started so far has settled.
    pub async fn flush(&self) {
        loop {
            let settled = self.inner.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();
            if self.pending_writes() == 0 {
                return;
            }
            settled.await;
        }
    }

    /// Every key currently on disk, expired or not.
    pub async fn keys(&self) -> Result<Vec<CacheKey>, ClientError> {
        let mut entries = match tokio::fs::read_dir(&self.inner.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(key) = CacheKey::from_file_name(&entry.path()) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Deletes every entry and returns how many were removed.
    ///
    /// Must complete before query traffic starts: a concurrent read may
    /// observe a half-wiped cache.
    pub async fn wipe(&self) -> Result<usize, ClientError> {
        self.inner.unsettled().clear();
        let keys = self.keys().await?;
        for key in &keys {
            remove_if_present(&self.path_for(key)).await?;
        }
        debug!(removed = keys.len(), dir = %self.inner.dir.display(), "cache wiped");
        Ok(keys.len())
    }
}

fn write_entry(path: &Path, entry: &CacheEntry) -> Result<(), ClientError> {
    let parent = path.parent().ok_or_else(|| ClientError::Cache {
        message: format!("no parent dir for {}", path.display()),
    })?;
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    serde_json::to_writer(&mut tmp, entry)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|err| ClientError::Cache {
        message: err.to_string(),
    })?;
    Ok(())
}

async fn remove_if_present(path: &Path) -> Result<(), ClientError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache_in(dir: &Path) -> DiskCache {
        DiskCache::new(&CacheConfig {
            enabled: true,
            dir: dir.to_path_buf(),
            ttl: Duration::from_secs(24 * 60 * 60),
        })
    }

    #[test]
    fn keys_depend_on_query_and_dry_run() {
        let a = CacheKey::new("query{x}", false);
        assert_eq!(a, CacheKey::new("query{x}", false));
        assert_ne!(a, CacheKey::new("query{x}", true));
        assert_ne!(a, CacheKey::new("query{y}", false));
        assert_eq!(a.as_str().len(), 64);
    }

    #[tokio::test]
    async fn put_then_get_after_flush() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache_in(tmp.path());
        let key = CacheKey::new("viewer", false);

        assert_eq!(cache.get(&key).await.unwrap(), None);
        cache.put(key.clone(), json!({"data": {"viewer": 1}}));
        cache.flush().await;

        assert_eq!(cache.pending_writes(), 0);
        assert_eq!(cache.get(&key).await.unwrap(), Some(json!({"data": {"viewer": 1}})));
    }

    #[tokio::test]
    async fn get_sees_a_put_before_its_write_settles() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache_in(tmp.path());
        let key = CacheKey::new("viewer", false);

        cache.put(key.clone(), json!({"data": {"viewer": 1}}));

        assert_eq!(cache.get(&key).await.unwrap(), Some(json!({"data": {"viewer": 1}})));
        cache.flush().await;
        assert_eq!(cache.get(&key).await.unwrap(), Some(json!({"data": {"viewer": 1}})));
        assert!(cache.inner.unsettled().is_empty());
    }

    #[tokio::test]
    async fn later_put_of_the_same_key_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache_in(tmp.path());
        let key = CacheKey::new("viewer", false);

        cache.put(key.clone(), json!({"data": 1}));
        cache.put(key.clone(), json!({"data": 2}));

        assert_eq!(cache.get(&key).await.unwrap(), Some(json!({"data": 2})));
    }

    #[tokio::test]
    async fn expired_entries_are_misses_and_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache_in(tmp.path());
        let key = CacheKey::new("viewer", false);
        let stale = CacheEntry {
            created_at: Utc::now() - chrono::Duration::hours(25),
            response: json!({"data": {}}),
        };
        write_entry(&cache.path_for(&key), &stale).unwrap();

        assert_eq!(cache.get(&key).await.unwrap(), None);
        assert!(!cache.path_for(&key).exists());
    }

    #[tokio::test]
    async fn corrupt_entries_are_misses() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache_in(tmp.path());
        let key = CacheKey::new("viewer", false);
        std::fs::write(cache.path_for(&key), b"not json").unwrap();

        assert_eq!(cache.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn wipe_removes_every_entry_and_ignores_strangers() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache_in(tmp.path());
        for query in ["a", "b", "c"] {
            cache.put(CacheKey::new(query, false), json!({"data": query}));
        }
        cache.flush().await;
        std::fs::write(tmp.path().join("README.txt"), b"keep me").unwrap();

        assert_eq!(cache.keys().await.unwrap().len(), 3);
        assert_eq!(cache.wipe().await.unwrap(), 3);
        assert!(cache.keys().await.unwrap().is_empty());
        assert!(tmp.path().join("README.txt").exists());
    }

    #[tokio::test]
    async fn missing_directory_has_no_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache_in(&tmp.path().join("absent"));
        assert!(cache.keys().await.unwrap().is_empty());
        assert_eq!(cache.wipe().await.unwrap(), 0);
    }
}
