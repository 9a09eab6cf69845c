//! Named cache storage abstraction, shaped after the browser's `CacheStorage`.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use super::http::Response;
use crate::error::{Error, Result};

/// A set of named caches, each mapping a request path to a response.
///
/// Caches not created by this crate (for example the inference engine's
/// model caches) may share the same storage; implementations must never
/// touch a cache unless asked for it by name.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Names of all existing caches.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Whether a cache with this name exists.
    async fn has(&self, cache: &str) -> Result<bool>;

    /// Deletes a cache. Returns whether it existed.
    async fn delete(&self, cache: &str) -> Result<bool>;

    /// Looks up an entry by exact key.
    async fn lookup(&self, cache: &str, key: &str) -> Result<Option<Response>>;

    /// Stores one entry, creating the cache if needed.
    async fn put(&self, cache: &str, key: &str, response: Response) -> Result<()>;

    /// Replaces the cache's contents with `entries`, all or nothing. On
    /// failure the cache is left as it was.
    async fn put_all(&self, cache: &str, entries: Vec<(String, Response)>) -> Result<()>;

    /// Keys stored in a cache (empty if it does not exist).
    async fn entries(&self, cache: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Default)]
struct MemoryCaches {
    caches: BTreeMap<String, BTreeMap<String, Response>>,
    used_bytes: usize,
}

/// Cache storage kept in process memory, with an optional byte quota.
///
/// Clones share the same caches.
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheStorage {
    inner: Arc<RwLock<MemoryCaches>>,
    quota: Option<usize>,
}

impl MemoryCacheStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits the total body bytes held across all caches.
    #[must_use]
    pub const fn with_quota(mut self, bytes: usize) -> Self {
        self.quota = Some(bytes);
        self
    }

    fn check_quota(&self, used: usize, extra: usize) -> Result<()> {
        match self.quota {
            Some(limit) if used + extra > limit => Err(Error::Cache(format!(
                "quota exceeded: {} of {limit} bytes",
                used + extra
            ))),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn keys(&self) -> Result<Vec<String>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.caches.keys().cloned().collect())
    }

    async fn has(&self, cache: &str) -> Result<bool> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.caches.contains_key(cache))
    }

    async fn delete(&self, cache: &str) -> Result<bool> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let Some(removed) = inner.caches.remove(cache) else {
            return Ok(false);
        };
        let freed: usize = removed.values().map(|r| r.body.len()).sum();
        inner.used_bytes = inner.used_bytes.saturating_sub(freed);
        Ok(true)
    }

    async fn lookup(&self, cache: &str, key: &str) -> Result<Option<Response>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.caches.get(cache).and_then(|c| c.get(key).cloned()))
    }

    async fn put(&self, cache: &str, key: &str, response: Response) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let replaced = inner
            .caches
            .get(cache)
            .and_then(|c| c.get(key))
            .map_or(0, |r| r.body.len());
        let used = inner.used_bytes.saturating_sub(replaced);
        self.check_quota(used, response.body.len())?;

        inner.used_bytes = used + response.body.len();
        inner
            .caches
            .entry(cache.to_string())
            .or_default()
            .insert(key.to_string(), response);
        Ok(())
    }

    async fn put_all(&self, cache: &str, entries: Vec<(String, Response)>) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let replaced: usize = inner
            .caches
            .get(cache)
            .map_or(0, |c| c.values().map(|r| r.body.len()).sum());
        let added: usize = entries.iter().map(|(_, r)| r.body.len()).sum();
        let used = inner.used_bytes.saturating_sub(replaced);
        self.check_quota(used, added)?;

        inner.used_bytes = used + added;
        inner
            .caches
            .insert(cache.to_string(), entries.into_iter().collect());
        Ok(())
    }

    async fn entries(&self, cache: &str) -> Result<Vec<String>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner
            .caches
            .get(cache)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_creates_cache_and_lookup_finds_it() {
        let storage = MemoryCacheStorage::new();
        storage
            .put("cache-v1", "/a.js", Response::new(200, "a"))
            .await
            .unwrap();

        assert!(storage.has("cache-v1").await.unwrap());
        assert_eq!(
            storage.lookup("cache-v1", "/a.js").await.unwrap(),
            Some(Response::new(200, "a"))
        );
        assert_eq!(storage.lookup("cache-v1", "/b.js").await.unwrap(), None);
        assert_eq!(storage.lookup("other", "/a.js").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let storage = MemoryCacheStorage::new();
        storage.put("c", "/x", Response::new(200, "x")).await.unwrap();
        assert!(storage.delete("c").await.unwrap());
        assert!(!storage.delete("c").await.unwrap());
        assert!(storage.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn quota_rejects_oversized_put() {
        let storage = MemoryCacheStorage::new().with_quota(4);
        storage.put("c", "/a", Response::new(200, "abc")).await.unwrap();
        let err = storage.put("c", "/b", Response::new(200, "de")).await;
        assert!(matches!(err, Err(Error::Cache(_))));
        // Replacing an entry only counts the difference
        storage.put("c", "/a", Response::new(200, "abcd")).await.unwrap();
    }

    #[tokio::test]
    async fn put_all_is_all_or_nothing() {
        let storage = MemoryCacheStorage::new().with_quota(3);
        let result = storage
            .put_all(
                "cache-v1",
                vec![
                    ("/a".to_string(), Response::new(200, "aa")),
                    ("/b".to_string(), Response::new(200, "bb")),
                ],
            )
            .await;
        assert!(result.is_err());
        assert!(!storage.has("cache-v1").await.unwrap());
    }

    #[tokio::test]
    async fn put_all_replaces_previous_contents() {
        let storage = MemoryCacheStorage::new().with_quota(4);
        storage.put("cache-v1", "/old", Response::new(200, "ooo")).await.unwrap();
        storage
            .put_all("cache-v1", vec![("/new".to_string(), Response::new(200, "nnn"))])
            .await
            .unwrap();
        assert_eq!(
            storage.entries("cache-v1").await.unwrap(),
            vec!["/new".to_string()]
        );
    }

    #[tokio::test]
    async fn delete_frees_quota() {
        let storage = MemoryCacheStorage::new().with_quota(2);
        storage.put("old", "/a", Response::new(200, "aa")).await.unwrap();
        storage.delete("old").await.unwrap();
        storage.put("new", "/a", Response::new(200, "bb")).await.unwrap();
        assert_eq!(storage.entries("new").await.unwrap(), vec!["/a".to_string()]);
    }
}
