//! Named Cache Storage
//!
//! The process-wide set of named request→response stores. Each store is a Moka
//! cache without a TTL: expiry is decided by the policies from the timestamp
//! header, and expired records stay around as stale fallbacks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use moka::sync::Cache;
use tokio::sync::RwLock;
use tracing::{debug, info, trace};

use super::disk::DiskStore;
use super::StoreError;
use crate::net::{Request, Response, ResponseSource};

/// A single named store
pub struct NamedCache {
    /// Entries by request key; Moka serializes concurrent writes per key
    entries: Cache<String, Response>,
}

impl NamedCache {
    fn new(name: &str) -> Self {
        Self {
            entries: Cache::builder().name(name).build(),
        }
    }

    pub fn get(&self, key: &str) -> Option<Response> {
        self.entries.get(key).map(|r| r.with_source(ResponseSource::Cache))
    }

    pub fn insert(&self, key: String, response: Response) {
        self.entries.insert(key, response);
    }

    pub fn len(&self) -> usize {
        self.entries.iter().count()
    }
}

/// All named stores, plus optional disk persistence and hit/miss counters
pub struct CacheStorage {
    caches: RwLock<HashMap<String, Arc<NamedCache>>>,
    disk: Option<DiskStore>,
    /// Cache hit counter
    hits: AtomicU64,
    /// Cache miss counter
    misses: AtomicU64,
}

impl CacheStorage {
    /// Purely in-memory storage
    pub fn in_memory() -> Self {
        Self {
            caches: RwLock::new(HashMap::new()),
            disk: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Storage backed by `disk`, repopulated from what it already holds
    pub async fn load(disk: DiskStore) -> Result<Self, StoreError> {
        let reader = disk.clone();
        let stores = tokio::task::spawn_blocking(move || reader.load_all())
            .await
            .map_err(|e| StoreError::Task(e.to_string()))??;

        let mut caches = HashMap::new();
        let mut total = 0;
        for (name, entries) in stores {
            let cache = NamedCache::new(&name);
            total += entries.len();
            for (key, response) in entries {
                cache.insert(key, response);
            }
            caches.insert(name, Arc::new(cache));
        }

        info!(
            stores = caches.len(),
            entries = total,
            root = %disk.root().display(),
            "Cache storage loaded from disk"
        );

        Ok(Self {
            caches: RwLock::new(caches),
            disk: Some(disk),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Open (or create) a named store
    pub async fn open(&self, name: &str) -> Arc<NamedCache> {
        if let Some(cache) = self.caches.read().await.get(name) {
            return Arc::clone(cache);
        }

        let mut caches = self.caches.write().await;
        let cache = caches.entry(name.to_string()).or_insert_with(|| {
            debug!(store = name, "Created store");
            Arc::new(NamedCache::new(name))
        });
        Arc::clone(cache)
    }

    /// List all store names, sorted
    pub async fn keys(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Delete a named store; returns whether it existed
    pub async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        // Held until the directory is gone so a concurrent `put` cannot persist into it
        let mut caches = self.caches.write().await;
        let removed = caches.remove(name).is_some();

        if let Some(disk) = &self.disk {
            let disk = disk.clone();
            let store = name.to_string();
            tokio::task::spawn_blocking(move || disk.remove_store(&store))
                .await
                .map_err(|e| StoreError::Task(e.to_string()))??;
        }
        drop(caches);

        if removed {
            info!(store = name, "Deleted store");
        }
        Ok(removed)
    }

    /// Delete every store unconditionally; returns how many were removed
    pub async fn clear(&self) -> Result<usize, StoreError> {
        let mut removed = 0;
        for name in self.keys().await {
            if self.delete(&name).await? {
                removed += 1;
            }
        }
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        info!(removed = removed, "Cleared all stores");
        Ok(removed)
    }

    /// Look up a request in one store without creating it
    pub async fn match_in(&self, name: &str, request: &Request) -> Option<Response> {
        let cache = self.caches.read().await.get(name).cloned();
        let found = cache.and_then(|c| c.get(&request.cache_key()));
        self.record(name, request, found.is_some());
        found
    }

    /// Look up a request across all stores (first hit in name order)
    pub async fn match_any(&self, request: &Request) -> Option<Response> {
        let key = request.cache_key();
        let caches = self.caches.read().await;
        let mut names: Vec<&String> = caches.keys().collect();
        names.sort();
        let found = names
            .into_iter()
            .find_map(|name| caches.get(name).and_then(|c| c.get(&key)));
        self.record("*", request, found.is_some());
        found
    }

    /// Store a response under a request, creating the store if needed
    ///
    /// The in-memory write always lands; a failed disk write is reported to the caller.
    pub async fn put(&self, name: &str, request: &Request, response: Response) -> Result<(), StoreError> {
        let key = request.cache_key();
        let cache = self.open(name).await;
        cache.insert(key.clone(), response.clone());
        debug!(store = name, key = %key, "Stored response");

        if let Some(disk) = &self.disk {
            let caches = self.caches.read().await;
            if !caches.contains_key(name) {
                debug!(store = name, key = %key, "Store deleted before persisting, skipping disk write");
                return Ok(());
            }
            let disk = disk.clone();
            let store = name.to_string();
            tokio::task::spawn_blocking(move || disk.write(&store, &key, &response))
                .await
                .map_err(|e| StoreError::Task(e.to_string()))??;
            drop(caches);
        }
        Ok(())
    }

    /// Store names with their entry counts
    pub async fn summary(&self) -> Vec<(String, usize)> {
        let caches = self.caches.read().await;
        let mut summary: Vec<(String, usize)> = caches
            .iter()
            .map(|(name, cache)| (name.clone(), cache.len()))
            .collect();
        summary.sort();
        summary
    }

    fn record(&self, store: &str, request: &Request, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(store = store, url = %request.url, "Cache HIT");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(store = store, url = %request.url, "Cache MISS");
        }
    }

    /// Get cache statistics
    ///
    /// Returns (hits, misses, hit_rate)
    pub fn stats(&self) -> (u64, u64, f64) {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        (hits, misses, hit_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(url: &str) -> Request {
        Request::get(url.parse().unwrap())
    }

    #[tokio::test]
    async fn test_put_and_match() {
        let storage = CacheStorage::in_memory();
        let request = req("https://blog.example.com/css/index.css");

        assert!(storage.match_in("fullstack-ai-v2", &request).await.is_none());
        assert!(storage.keys().await.is_empty());

        storage
            .put("fullstack-ai-v2", &request, Response::new(200, "body{}"))
            .await
            .unwrap();

        let hit = storage.match_in("fullstack-ai-v2", &request).await.unwrap();
        assert_eq!(hit.body.as_ref(), b"body{}");
        assert_eq!(hit.source, ResponseSource::Cache);

        let (hits, misses, hit_rate) = storage.stats();
        assert_eq!(hits, 1);
        assert_eq!(misses, 1);
        assert!(hit_rate > 49.0 && hit_rate < 51.0);
    }

    #[tokio::test]
    async fn test_match_in_does_not_create_store() {
        let storage = CacheStorage::in_memory();
        storage.match_in("api-cache", &req("https://blog.example.com/api/a")).await;
        assert!(storage.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_match_any_searches_all_stores() {
        let storage = CacheStorage::in_memory();
        let request = req("https://blog.example.com/offline.html");
        storage
            .put("cdn-cache", &request, Response::new(200, "offline"))
            .await
            .unwrap();

        assert!(storage.match_any(&request).await.is_some());
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let storage = CacheStorage::in_memory();
        let request = req("https://blog.example.com/");
        for name in ["fullstack-ai-v1", "fullstack-ai-v2", "cdn-cache"] {
            storage.put(name, &request, Response::new(200, "x")).await.unwrap();
        }

        assert!(storage.delete("fullstack-ai-v1").await.unwrap());
        assert!(!storage.delete("fullstack-ai-v1").await.unwrap());
        assert_eq!(storage.keys().await, vec!["cdn-cache", "fullstack-ai-v2"]);

        assert_eq!(storage.clear().await.unwrap(), 2);
        assert!(storage.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_reload_from_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let request = req("https://blog.example.com/tags/");

        {
            let disk = DiskStore::with_root(tmp.path().to_path_buf()).unwrap();
            let storage = CacheStorage::load(disk).await.unwrap();
            storage
                .put("fullstack-ai-v2", &request, Response::new(200, "tags"))
                .await
                .unwrap();
            storage
                .put("api-cache", &request, Response::new(200, "gone"))
                .await
                .unwrap();
            storage.delete("api-cache").await.unwrap();
        }

        let disk = DiskStore::with_root(tmp.path().to_path_buf()).unwrap();
        let storage = CacheStorage::load(disk).await.unwrap();
        assert_eq!(storage.keys().await, vec!["fullstack-ai-v2"]);
        let hit = storage.match_in("fullstack-ai-v2", &request).await.unwrap();
        assert_eq!(hit.body.as_ref(), b"tags");
        assert_eq!(storage.summary().await, vec![("fullstack-ai-v2".to_string(), 1)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_clear_racing_puts_leaves_disk_consistent() {
        let tmp = tempfile::tempdir().unwrap();
        let disk = DiskStore::with_root(tmp.path().to_path_buf()).unwrap();
        let storage = Arc::new(CacheStorage::load(disk).await.unwrap());

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..40 {
            let put_storage = Arc::clone(&storage);
            tasks.spawn(async move {
                let store = format!("fullstack-ai-v{}", i % 4);
                let request = req(&format!("https://blog.example.com/posts/{}/", i));
                put_storage.put(&store, &request, Response::new(200, "post")).await.unwrap();
            });
            if i % 10 == 5 {
                let storage = Arc::clone(&storage);
                tasks.spawn(async move {
                    storage.clear().await.unwrap();
                });
            }
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap();
        }

        let in_memory = storage.keys().await;
        let disk = DiskStore::with_root(tmp.path().to_path_buf()).unwrap();
        let reloaded = CacheStorage::load(disk).await.unwrap();
        assert_eq!(reloaded.keys().await, in_memory);
    }
}
