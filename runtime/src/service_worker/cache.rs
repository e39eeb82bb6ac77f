//! Cache API Implementation
//!
//! Provides the named caches a service worker reads and writes. The worker
//! only sees the [`CacheStorage`] and [`Cache`] traits; [`MemoryCacheStorage`]
//! is the in-process backing store used by the runtime and by tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use spin::RwLock;

use super::fetch::Response;

/// Default per-origin quota (50 MB).
pub const DEFAULT_QUOTA: usize = 50 * 1024 * 1024;

/// Cache error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// Cache not found
    #[error("cache not found: {0}")]
    NotFound(String),
    /// Quota exceeded
    #[error("cache quota exceeded ({quota} bytes)")]
    QuotaExceeded { quota: usize },
    /// Backing store failure
    #[error("cache storage error: {0}")]
    Storage(String),
}

/// A single named cache (the JS `Cache` object).
#[async_trait]
pub trait Cache: Send + Sync {
    /// Cache name
    fn name(&self) -> &str;

    /// Store a response under `key`, replacing any previous entry.
    async fn put(&self, key: &str, response: Response) -> Result<(), CacheError>;

    /// Look up the response stored under `key`.
    async fn match_key(&self, key: &str) -> Result<Option<Response>, CacheError>;

    /// Delete the entry stored under `key`.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// All keys currently stored.
    async fn keys(&self) -> Result<Vec<String>, CacheError>;
}

/// The set of named caches for one origin (the JS `caches` global).
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a cache, creating it when missing.
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>, CacheError>;

    /// Whether a cache with this name exists.
    async fn has(&self, name: &str) -> Result<bool, CacheError>;

    /// Names of all caches, in creation order.
    async fn keys(&self) -> Result<Vec<String>, CacheError>;

    /// Delete a cache. `Ok(false)` when it did not exist.
    async fn delete(&self, name: &str) -> Result<bool, CacheError>;
}

// ── In-memory implementation ────────────────────────────────

/// A cached response plus its accounted size.
#[derive(Debug, Clone)]
struct CacheEntry {
    response: Response,
    size: usize,
}

impl CacheEntry {
    fn new(response: Response) -> Self {
        let size = response.body.len()
            + response
                .headers
                .iter()
                .map(|(k, v)| k.len() + v.len())
                .sum::<usize>();
        Self { response, size }
    }
}

/// In-memory cache
#[derive(Debug)]
pub struct MemoryCache {
    /// Cache name
    name: String,
    /// Cached entries (key -> entry); `None` once the cache was deleted
    entries: RwLock<Option<BTreeMap<String, CacheEntry>>>,
    /// Bytes used across the owning storage
    usage: Arc<AtomicUsize>,
    /// Quota of the owning storage
    quota: usize,
}

impl MemoryCache {
    fn new(name: &str, usage: Arc<AtomicUsize>, quota: usize) -> Self {
        Self {
            name: String::from(name),
            entries: RwLock::new(Some(BTreeMap::new())),
            usage,
            quota,
        }
    }

    /// Bytes held by this cache
    pub fn size(&self) -> usize {
        self.entries
            .read()
            .as_ref()
            .map(|entries| entries.values().map(|e| e.size).sum())
            .unwrap_or(0)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().as_ref().map_or(0, BTreeMap::len)
    }

    /// Whether this cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry and stop accepting writes. Handles opened earlier
    /// see an empty cache from now on.
    fn detach(&self) {
        if let Some(entries) = self.entries.write().take() {
            let freed = entries.values().map(|e| e.size).sum();
            release(&self.usage, freed);
        }
    }

    fn deleted(&self) -> CacheError {
        CacheError::NotFound(self.name.clone())
    }
}

/// Subtract from a usage counter without wrapping.
fn release(usage: &AtomicUsize, bytes: usize) {
    // The closure always returns `Some`, so the update cannot fail.
    let _ = usage.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
        Some(used.saturating_sub(bytes))
    });
}

#[async_trait]
impl Cache for MemoryCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, key: &str, response: Response) -> Result<(), CacheError> {
        let entry = CacheEntry::new(response);
        let mut guard = self.entries.write();
        let entries = guard.as_mut().ok_or_else(|| self.deleted())?;

        let replaced = entries.get(key).map(|e| e.size).unwrap_or(0);
        let quota = self.quota;
        self.usage
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                let next = used.saturating_sub(replaced).checked_add(entry.size)?;
                (next <= quota).then_some(next)
            })
            .map_err(|_| CacheError::QuotaExceeded { quota })?;

        entries.insert(String::from(key), entry);
        Ok(())
    }

    async fn match_key(&self, key: &str) -> Result<Option<Response>, CacheError> {
        Ok(self
            .entries
            .read()
            .as_ref()
            .and_then(|entries| entries.get(key))
            .map(|e| e.response.clone()))
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut guard = self.entries.write();
        let Some(entries) = guard.as_mut() else {
            return Ok(false);
        };
        match entries.remove(key) {
            Some(entry) => {
                release(&self.usage, entry.size);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self
            .entries
            .read()
            .as_ref()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default())
    }
}

/// In-memory cache storage for one origin.
///
/// Share one `Arc<MemoryCacheStorage>` between successive workers to keep
/// cached entries across a worker restart.
pub struct MemoryCacheStorage {
    /// Caches in creation order
    caches: RwLock<Vec<Arc<MemoryCache>>>,
    /// Quota (bytes)
    quota: usize,
    /// Usage (bytes)
    usage: Arc<AtomicUsize>,
}

impl MemoryCacheStorage {
    /// Create new cache storage with the default quota
    pub fn new() -> Self {
        Self::with_quota(DEFAULT_QUOTA)
    }

    /// Create new cache storage with an explicit quota
    pub fn with_quota(quota: usize) -> Self {
        Self {
            caches: RwLock::new(Vec::new()),
            quota,
            usage: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Get quota
    pub fn quota(&self) -> usize {
        self.quota
    }

    /// Get usage
    pub fn usage(&self) -> usize {
        self.usage.load(Ordering::SeqCst)
    }

    fn find(&self, name: &str) -> Option<Arc<MemoryCache>> {
        self.caches.read().iter().find(|c| c.name == name).cloned()
    }
}

impl Default for MemoryCacheStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>, CacheError> {
        if let Some(cache) = self.find(name) {
            return Ok(cache);
        }

        let mut caches = self.caches.write();
        // Re-check under the write lock; another opener may have won.
        if let Some(cache) = caches.iter().find(|c| c.name == name) {
            return Ok(cache.clone());
        }
        let cache = Arc::new(MemoryCache::new(name, self.usage.clone(), self.quota));
        caches.push(cache.clone());
        log::debug!("[ShellWorker Cache] Created cache '{}'", name);
        Ok(cache)
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.find(name).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.caches.read().iter().map(|c| c.name.clone()).collect())
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let mut caches = self.caches.write();
        match caches.iter().position(|c| c.name == name) {
            Some(pos) => {
                caches.remove(pos).detach();
                log::debug!("[ShellWorker Cache] Deleted cache '{}'", name);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
