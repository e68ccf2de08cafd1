//! The read-side cache and its invalidation coordinator.
//!
//! The CRUD/read layer serves hot lookups (job detail, job lists, top jobs, reputation) out of [`ReadCache`],
//! keyed strictly by the enumerated [`CacheKey`] set. The sync engine invalidates through
//! [`CacheCoordinator::invalidate`] synchronously within the cycle, so a completed cycle implies the cache no
//! longer serves stale entries for the touched keys. Invalidation is precise: only the emitted keys are
//! removed. If the store misbehaves the coordinator falls back to a full flush and logs degraded mode, which
//! trades hit rate for correctness.
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use log::{debug, trace, warn};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::sync::CacheKey;

#[derive(Debug, Clone, Error)]
#[error("Cache store failure: {0}")]
pub struct CacheError(pub String);

const DEFAULT_TTL: Duration = Duration::from_secs(60);

#[derive(Clone)]
struct Entry {
    value: Value,
    expires_at: Instant,
}

//--------------------------------------      ReadCache       --------------------------------------------------------
/// An in-process TTL cache for read-side responses. Values are JSON documents, keyed by the rendered
/// [`CacheKey`] string so that the key contract stays observable in logs and tests.
#[derive(Clone)]
pub struct ReadCache {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    ttl: Duration,
    #[cfg(any(feature = "test_utils", test))]
    poisoned: Arc<std::sync::atomic::AtomicBool>,
}

impl Default for ReadCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl ReadCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
            #[cfg(any(feature = "test_utils", test))]
            poisoned: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    pub async fn get(&self, key: &CacheKey) -> Option<Value> {
        let key = key.to_string();
        let entries = self.entries.read().await;
        let entry = entries.get(&key)?;
        if entry.expires_at <= Instant::now() {
            trace!("🗂️ Cache entry {key} has expired");
            return None;
        }
        Some(entry.value.clone())
    }

    pub async fn put(&self, key: &CacheKey, value: Value) {
        let entry = Entry { value, expires_at: Instant::now() + self.ttl };
        self.entries.write().await.insert(key.to_string(), entry);
    }

    pub async fn remove(&self, key: &CacheKey) -> Result<(), CacheError> {
        #[cfg(any(feature = "test_utils", test))]
        if self.poisoned.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(CacheError("store poisoned".to_string()));
        }
        self.entries.write().await.remove(&key.to_string());
        Ok(())
    }

    pub async fn flush_all(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Makes every subsequent `remove` fail, to exercise the coordinator's degraded mode.
    #[cfg(any(feature = "test_utils", test))]
    pub fn poison(&self) {
        self.poisoned.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

//--------------------------------------  CacheCoordinator    --------------------------------------------------------
/// Applies cache-invalidation effects. The only component allowed to remove entries on behalf of the sync
/// engine, so the invalidation-key contract lives in exactly one place.
#[derive(Clone, Default)]
pub struct CacheCoordinator {
    cache: ReadCache,
}

impl CacheCoordinator {
    pub fn new(cache: ReadCache) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &ReadCache {
        &self.cache
    }

    /// Remove exactly the given keys. On a store failure the coordinator flushes the whole cache instead so
    /// that no stale entry can outlive the cycle, and logs that it is running degraded.
    pub async fn invalidate(&self, keys: &[CacheKey]) {
        for key in keys {
            if let Err(e) = self.cache.remove(key).await {
                warn!("🗂️ Cache store failed while invalidating {key} ({e}). Falling back to a full flush (degraded mode).");
                self.cache.flush_all().await;
                return;
            }
            debug!("🗂️ Invalidated cache key {key}");
        }
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;
    use crate::db_types::JobStatus;

    #[tokio::test]
    async fn invalidation_removes_only_the_emitted_keys() {
        let cache = ReadCache::default();
        cache.put(&CacheKey::Job(1), json!({"id": 1})).await;
        cache.put(&CacheKey::Job(2), json!({"id": 2})).await;
        cache.put(&CacheKey::JobListByStatus(JobStatus::Posted), json!([1, 2])).await;

        let coordinator = CacheCoordinator::new(cache.clone());
        coordinator.invalidate(&[CacheKey::Job(1), CacheKey::JobListByStatus(JobStatus::Posted)]).await;

        assert!(cache.get(&CacheKey::Job(1)).await.is_none());
        assert!(cache.get(&CacheKey::JobListByStatus(JobStatus::Posted)).await.is_none());
        assert!(cache.get(&CacheKey::Job(2)).await.is_some(), "untouched keys must survive");
    }

    #[tokio::test]
    async fn store_failure_degrades_to_a_full_flush() {
        let cache = ReadCache::default();
        cache.put(&CacheKey::Job(1), json!({"id": 1})).await;
        cache.put(&CacheKey::TopJobs, json!([])).await;
        cache.poison();

        let coordinator = CacheCoordinator::new(cache.clone());
        coordinator.invalidate(&[CacheKey::Job(1)]).await;
        assert!(cache.is_empty().await, "degraded mode must flush everything");
    }

    #[tokio::test]
    async fn entries_expire_after_the_ttl() {
        let cache = ReadCache::new(Duration::from_millis(20));
        cache.put(&CacheKey::TopJobs, json!([1])).await;
        assert!(cache.get(&CacheKey::TopJobs).await.is_some());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get(&CacheKey::TopJobs).await.is_none());
    }
}
