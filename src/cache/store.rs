//! Entry Store Module
//!
//! Maps logical keys to cache entries held in the shared backend.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, warn};

use crate::backend::BackendAdapter;
use crate::cache::{CacheEntry, CacheKey, CacheStats, GroupIndex, MAX_VALUE_SIZE};
use crate::error::{CacheError, Result};

// == Entry Store ==
/// Namespaced view of the backend holding cache entries.
///
/// Entry keys live under `ns:<namespace>:` so they never collide with lock
/// or rate-limit keys sharing the backend.
#[derive(Debug)]
pub struct EntryStore {
    backend: BackendAdapter,
    namespace: String,
    index: GroupIndex,
    stats: Mutex<CacheStats>,
}

impl EntryStore {
    // == Constructor ==
    /// Fails with `InvalidRequest` if `namespace` is empty or contains `:`,
    /// since either would let one namespace's keys fall under another's prefix.
    pub fn new(backend: BackendAdapter, namespace: impl Into<String>) -> Result<Self> {
        let namespace = namespace.into();
        if namespace.is_empty() || namespace.contains(':') {
            return Err(CacheError::InvalidRequest(format!(
                "namespace '{}' must be non-empty and contain no ':'",
                namespace
            )));
        }

        Ok(Self {
            backend,
            namespace,
            index: GroupIndex::new(),
            stats: Mutex::new(CacheStats::new()),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn backend(&self) -> &BackendAdapter {
        &self.backend
    }

    pub fn index(&self) -> &GroupIndex {
        &self.index
    }

    fn key_prefix(&self) -> String {
        format!("ns:{}:", self.namespace)
    }

    fn backend_key(&self, key: &CacheKey) -> String {
        format!("ns:{}:{}", self.namespace, key)
    }

    fn stats_mut(&self) -> MutexGuard<'_, CacheStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn backend_failed(&self, err: CacheError) -> CacheError {
        if matches!(err, CacheError::BackendUnavailable(_)) {
            self.stats_mut().record_backend_error();
        }
        err
    }

    // == Read ==
    /// Returns the live entry for `key`, or None on a miss.
    ///
    /// An envelope that fails to decode is reported as a miss. A miss on a key
    /// whose indexed entry has expired drops it from the group index.
    pub async fn read(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let bytes = self
            .backend
            .get(&self.backend_key(key))
            .await
            .map_err(|e| self.backend_failed(e))?;

        let entry = match bytes.map(|bytes| CacheEntry::decode(&bytes)) {
            Some(Ok(entry)) if !entry.is_expired() => Some(entry),
            Some(Err(e)) => {
                warn!(key = %key, error = %e, "discarding undecodable cache entry");
                None
            }
            _ => None,
        };

        if entry.is_some() {
            self.stats_mut().record_hit();
        } else {
            self.index.forget_if_expired(key);
            self.stats_mut().record_miss();
        }
        Ok(entry)
    }

    // == Write ==
    /// Stores a value under `key`. A `None` TTL never expires.
    pub async fn write(&self, key: &CacheKey, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        if value.len() > MAX_VALUE_SIZE {
            return Err(CacheError::ValueTooLarge(value.len()));
        }

        let bytes = CacheEntry::new(key.clone(), value, ttl).encode()?;
        // Indexed before the backend write so the index covers every live key
        self.index.record(key, ttl);
        self.backend
            .set(&self.backend_key(key), bytes, ttl)
            .await
            .map_err(|e| self.backend_failed(e))?;

        self.stats_mut().record_write();
        debug!(key = %key, ttl = ?ttl, "cache entry written");
        Ok(())
    }

    // == Remove ==
    /// Deletes the entry for `key`. Returns whether a live entry was removed.
    pub async fn remove(&self, key: &CacheKey) -> Result<bool> {
        let removed = self
            .backend
            .delete(&self.backend_key(key))
            .await
            .map_err(|e| self.backend_failed(e))?;
        self.index.forget(key);

        if removed {
            self.stats_mut().record_removals(1);
        }
        Ok(removed)
    }

    // == Remove Matching ==
    /// Deletes entries matching `pattern`. Returns the number removed.
    ///
    /// A trailing `*` matches by prefix (`product:*`, or `*` for the whole
    /// namespace); anything else is an exact key. Prefix matches use backend
    /// key enumeration when available and the group index otherwise.
    pub async fn remove_matching(&self, pattern: &str) -> Result<usize> {
        let Some(prefix) = pattern.strip_suffix('*') else {
            let key = CacheKey::parse(pattern)?;
            return Ok(usize::from(self.remove(&key).await?));
        };

        let namespace_prefix = self.key_prefix();
        let listed = self
            .backend
            .keys_with_prefix(&format!("{}{}", namespace_prefix, prefix))
            .await
            .map_err(|e| self.backend_failed(e))?;

        let keys: Vec<CacheKey> = match listed {
            Some(backend_keys) => backend_keys
                .iter()
                .filter_map(|k| k.strip_prefix(&namespace_prefix))
                .filter_map(|k| CacheKey::parse(k).ok())
                .chain(self.index.keys_with_prefix(prefix))
                .collect(),
            None => self.index.keys_with_prefix(prefix),
        };

        self.remove_all(keys).await
    }

    // == Remove Group ==
    /// Deletes every entry tagged with `group`. Returns the number removed.
    ///
    /// When the backend can enumerate keys, entries written by other
    /// processes (`<group>:*` and the bare `<group>` key) are found too;
    /// otherwise only keys in this process's index are removed.
    pub async fn remove_group(&self, group: &str) -> Result<usize> {
        let mut keys = self.index.keys_in(group);

        let namespace_prefix = self.key_prefix();
        let listed = self
            .backend
            .keys_with_prefix(&format!("{}{}:", namespace_prefix, group))
            .await
            .map_err(|e| self.backend_failed(e))?;

        if let Some(backend_keys) = listed {
            keys.extend(
                backend_keys
                    .iter()
                    .filter_map(|k| k.strip_prefix(&namespace_prefix))
                    .filter_map(|k| CacheKey::parse(k).ok()),
            );
            if let Ok(bare) = CacheKey::parse(group) {
                if bare.group() == group {
                    keys.push(bare);
                }
            }
        }

        self.remove_all(keys).await
    }

    /// Drops expired keys from the group index. Returns the number dropped.
    pub fn prune_index(&self) -> usize {
        self.index.prune_expired()
    }

    async fn remove_all(&self, mut keys: Vec<CacheKey>) -> Result<usize> {
        keys.sort();
        keys.dedup();

        let mut removed = 0;
        for key in &keys {
            if self.remove(key).await? {
                removed += 1;
            }
        }
        debug!(candidates = keys.len(), removed, "bulk removal finished");
        Ok(removed)
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats_mut().clone()
    }

    pub(crate) fn record_load(&self, succeeded: bool) {
        self.stats_mut().record_load(succeeded);
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CacheBackend, InMemoryBackend};
    use std::sync::Arc;

    fn setup() -> (Arc<InMemoryBackend>, EntryStore) {
        let backend = Arc::new(InMemoryBackend::new());
        let adapter = BackendAdapter::new(backend.clone(), Duration::from_millis(500));
        (backend, EntryStore::new(adapter, "test").unwrap())
    }

    fn key(raw: &str) -> CacheKey {
        CacheKey::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_store_write_and_read() {
        let (backend, store) = setup();

        store.write(&key("product:1"), b"value1".to_vec(), None).await.unwrap();
        let entry = store.read(&key("product:1")).await.unwrap().unwrap();

        assert_eq!(entry.value, b"value1");
        assert_eq!(entry.key, key("product:1"));
        assert!(backend.get("ns:test:product:1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_store_read_missing() {
        let (_, store) = setup();
        assert!(store.read(&key("product:404")).await.unwrap().is_none());
        assert_eq!(store.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_store_overwrite() {
        let (_, store) = setup();

        store.write(&key("k:1"), b"v1".to_vec(), None).await.unwrap();
        store.write(&key("k:1"), b"v2".to_vec(), None).await.unwrap();

        let entry = store.read(&key("k:1")).await.unwrap().unwrap();
        assert_eq!(entry.value, b"v2");
    }

    #[tokio::test]
    async fn test_store_ttl_expiration() {
        let (_, store) = setup();

        store
            .write(&key("k:1"), b"v".to_vec(), Some(Duration::from_millis(100)))
            .await
            .unwrap();
        assert!(store.read(&key("k:1")).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(store.read(&key("k:1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_remove() {
        let (_, store) = setup();

        store.write(&key("k:1"), b"v".to_vec(), None).await.unwrap();
        assert!(store.remove(&key("k:1")).await.unwrap());
        assert!(!store.remove(&key("k:1")).await.unwrap());
        assert!(store.read(&key("k:1")).await.unwrap().is_none());
        assert!(store.index().is_empty());
    }

    #[tokio::test]
    async fn test_store_value_too_large() {
        let (_, store) = setup();
        let large = vec![0u8; MAX_VALUE_SIZE + 1];

        let result = store.write(&key("k:1"), large, None).await;
        assert!(matches!(result, Err(CacheError::ValueTooLarge(_))));
    }

    #[tokio::test]
    async fn test_store_undecodable_entry_is_miss() {
        let (backend, store) = setup();
        backend
            .set("ns:test:k:1", b"garbage".to_vec(), None)
            .await
            .unwrap();

        assert!(store.read(&key("k:1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_remove_matching_prefix() {
        let (backend, store) = setup();
        store.write(&key("product:1"), b"a".to_vec(), None).await.unwrap();
        store.write(&key("product:2"), b"b".to_vec(), None).await.unwrap();
        store.write(&key("user:1"), b"c".to_vec(), None).await.unwrap();
        backend.set("lock:product", b"t".to_vec(), None).await.unwrap();

        assert_eq!(store.remove_matching("product:*").await.unwrap(), 2);
        assert!(store.read(&key("user:1")).await.unwrap().is_some());
        assert!(backend.get("lock:product").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_store_remove_matching_exact() {
        let (_, store) = setup();
        store.write(&key("product:1"), b"a".to_vec(), None).await.unwrap();
        store.write(&key("product:10"), b"b".to_vec(), None).await.unwrap();

        assert_eq!(store.remove_matching("product:1").await.unwrap(), 1);
        assert!(store.read(&key("product:10")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_store_remove_group() {
        let (_, store) = setup();
        store.write(&key("product:1"), b"a".to_vec(), None).await.unwrap();
        store.write(&key("product:2"), b"b".to_vec(), None).await.unwrap();
        store.write(&key("user:1"), b"c".to_vec(), None).await.unwrap();

        assert_eq!(store.remove_group("product").await.unwrap(), 2);
        assert_eq!(store.remove_group("product").await.unwrap(), 0);
        assert_eq!(store.index().keys_in("user").len(), 1);
    }

    #[tokio::test]
    async fn test_store_remove_group_finds_keys_written_elsewhere() {
        let (backend, store) = setup();
        let adapter = BackendAdapter::new(backend.clone(), Duration::from_millis(500));
        let peer = EntryStore::new(adapter, "test").unwrap();
        peer.write(&key("product:1"), b"a".to_vec(), None).await.unwrap();
        peer.write(&key("product"), b"b".to_vec(), None).await.unwrap();
        peer.write(&key("products:1"), b"c".to_vec(), None).await.unwrap();

        assert!(store.index().is_empty());
        assert_eq!(store.remove_group("product").await.unwrap(), 2);
        assert!(peer.read(&key("product:1")).await.unwrap().is_none());
        assert!(peer.read(&key("products:1")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_store_read_miss_drops_expired_index_entry() {
        let (_, store) = setup();
        store
            .write(&key("session:1"), b"v".to_vec(), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        store.write(&key("session:2"), b"v".to_vec(), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(store.read(&key("session:1")).await.unwrap().is_none());
        assert_eq!(store.index().keys_in("session"), vec![key("session:2")]);
    }

    #[tokio::test]
    async fn test_store_prune_index_after_expiry() {
        let (_, store) = setup();
        for id in 0..50 {
            let key = CacheKey::new("temp", id).unwrap();
            store
                .write(&key, b"v".to_vec(), Some(Duration::from_millis(10)))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(store.prune_index(), 50);
        assert!(store.index().is_empty());
    }

    #[test]
    fn test_store_rejects_invalid_namespace() {
        let backend = Arc::new(InMemoryBackend::new());
        for namespace in ["", "app:x"] {
            let adapter = BackendAdapter::new(backend.clone(), Duration::from_millis(500));
            let result = EntryStore::new(adapter, namespace);
            assert!(matches!(result, Err(CacheError::InvalidRequest(_))));
        }
    }

    #[tokio::test]
    async fn test_store_backend_unavailable() {
        let (backend, store) = setup();
        backend.set_available(false);

        let result = store.read(&key("k:1")).await;
        assert!(matches!(result, Err(CacheError::BackendUnavailable(_))));
        let result = store.write(&key("k:1"), b"v".to_vec(), None).await;
        assert!(matches!(result, Err(CacheError::BackendUnavailable(_))));
        assert_eq!(store.stats().backend_errors, 2);
    }

    #[tokio::test]
    async fn test_store_stats() {
        let (_, store) = setup();

        store.write(&key("k:1"), b"v".to_vec(), None).await.unwrap();
        store.read(&key("k:1")).await.unwrap();
        store.read(&key("k:2")).await.unwrap();

        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.writes, 1);
    }
}
