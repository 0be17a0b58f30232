//! Strategy Module
//!
//! Read-through, write-through, write-behind and cache-aside access
//! patterns over the entry store.
//!
//! Each pattern takes its authoritative-store callbacks explicitly: a
//! [`Loader`] for reads and a [`Saver`] for writes.

mod singleflight;
mod write_behind;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheKey, EntryStore};
use crate::error::{CacheError, Result};

pub use singleflight::Singleflight;
pub use write_behind::{DeadLetter, FlushPolicy, FlushReport, PendingWrite, WriteBehindQueue};

// == Callback Contracts ==
/// Fetches a value from the authoritative store.
///
/// Must have no side effects beyond the read. `Ok(None)` means the record
/// does not exist.
#[async_trait]
pub trait Loader: Send + Sync {
    async fn load(&self, key: &CacheKey) -> anyhow::Result<Option<Vec<u8>>>;
}

/// Persists a value to the authoritative store.
///
/// Must be safe to repeat: write-behind retries failed saves.
#[async_trait]
pub trait Saver: Send + Sync {
    async fn save(&self, key: &CacheKey, value: &[u8]) -> anyhow::Result<()>;
}

/// [`Loader`] backed by a closure. See [`loader_fn`].
pub struct FnLoader<F>(F);

/// [`Saver`] backed by a closure. See [`saver_fn`].
pub struct FnSaver<F>(F);

/// Wraps `Fn(CacheKey) -> Future<Output = anyhow::Result<Option<Vec<u8>>>>`.
pub fn loader_fn<F, Fut>(f: F) -> FnLoader<F>
where
    F: Fn(CacheKey) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Option<Vec<u8>>>> + Send,
{
    FnLoader(f)
}

/// Wraps `Fn(CacheKey, Vec<u8>) -> Future<Output = anyhow::Result<()>>`.
pub fn saver_fn<F, Fut>(f: F) -> FnSaver<F>
where
    F: Fn(CacheKey, Vec<u8>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    FnSaver(f)
}

#[async_trait]
impl<F, Fut> Loader for FnLoader<F>
where
    F: Fn(CacheKey) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Option<Vec<u8>>>> + Send,
{
    async fn load(&self, key: &CacheKey) -> anyhow::Result<Option<Vec<u8>>> {
        (self.0)(key.clone()).await
    }
}

#[async_trait]
impl<F, Fut> Saver for FnSaver<F>
where
    F: Fn(CacheKey, Vec<u8>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn save(&self, key: &CacheKey, value: &[u8]) -> anyhow::Result<()> {
        (self.0)(key.clone(), value.to_vec()).await
    }
}

type LoadOutcome = Result<Option<Vec<u8>>>;

// == Strategy Engine ==
/// Cache access patterns sharing one entry store.
///
/// Cheap to clone; clones share the store, in-flight loads and the
/// write-behind queue.
#[derive(Clone)]
pub struct StrategyEngine {
    store: Arc<EntryStore>,
    default_ttl: Duration,
    flights: Arc<Singleflight<LoadOutcome>>,
    write_behind: Arc<WriteBehindQueue>,
}

impl StrategyEngine {
    pub fn new(store: Arc<EntryStore>, default_ttl: Duration, policy: FlushPolicy) -> Self {
        Self {
            store,
            default_ttl,
            flights: Arc::new(Singleflight::new()),
            write_behind: Arc::new(WriteBehindQueue::new(policy)),
        }
    }

    pub fn store(&self) -> &Arc<EntryStore> {
        &self.store
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn write_behind(&self) -> &Arc<WriteBehindQueue> {
        &self.write_behind
    }

    /// Keys with a read-through load currently in flight.
    pub fn loads_in_flight(&self) -> usize {
        self.flights.in_flight()
    }

    // == Read-Through ==
    /// Returns the cached value, loading and caching it on a miss.
    ///
    /// Concurrent misses on the same key share one loader call. A cache read
    /// error is treated as a miss. Loader failures propagate and are never
    /// cached, nor is an absent record.
    pub async fn get<L>(&self, key: &CacheKey, loader: Arc<L>) -> Result<Option<Vec<u8>>>
    where
        L: Loader + ?Sized + 'static,
    {
        match self.store.read(key).await {
            Ok(Some(entry)) => return Ok(Some(entry.value)),
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = %e, "cache read failed, falling back to loader"),
        }

        let store = Arc::clone(&self.store);
        let ttl = self.default_ttl;
        let owned_key = key.clone();
        self.flights
            .run(key.as_str(), move || async move {
                load_and_populate(&store, &owned_key, loader.as_ref(), ttl).await
            })
            .await
    }

    /// Read-through returning a JSON-decoded value.
    pub async fn get_json<T, L>(&self, key: &CacheKey, loader: Arc<L>) -> Result<Option<T>>
    where
        T: DeserializeOwned,
        L: Loader + ?Sized + 'static,
    {
        self.get(key, loader)
            .await?
            .map(|bytes| serde_json::from_slice(&bytes).map_err(CacheError::from))
            .transpose()
    }

    // == Write-Through ==
    /// Persists through `saver`, then caches the value.
    ///
    /// A saver failure leaves the cache untouched. If the cache write fails
    /// after a successful save, the previous entry is dropped so it cannot
    /// be served stale, and the error is returned.
    pub async fn put<S>(&self, key: &CacheKey, value: Vec<u8>, saver: &S) -> Result<()>
    where
        S: Saver + ?Sized,
    {
        if let Err(e) = saver.save(key, &value).await {
            let err = CacheError::saver(e);
            warn!(key = %key, error = %err, "write-through save failed, cache untouched");
            return Err(err);
        }

        if let Err(err) = self.store.write(key, value, Some(self.default_ttl)).await {
            warn!(key = %key, error = %err, "write-through cache write failed after save");
            if let Err(e) = self.store.remove(key).await {
                warn!(key = %key, error = %e, "could not drop previous entry");
            }
            return Err(err);
        }
        Ok(())
    }

    /// Write-through of a JSON-encoded value.
    pub async fn put_json<T, S>(&self, key: &CacheKey, value: &T, saver: &S) -> Result<()>
    where
        T: Serialize + ?Sized,
        S: Saver + ?Sized,
    {
        self.put(key, serde_json::to_vec(value)?, saver).await
    }

    // == Write-Behind ==
    /// Caches the value now and queues it for deferred persistence.
    ///
    /// If the cache write fails nothing is queued. Returns true if the write
    /// superseded one still awaiting persistence.
    pub async fn put_async(&self, key: &CacheKey, value: Vec<u8>) -> Result<bool> {
        self.store
            .write(key, value.clone(), Some(self.default_ttl))
            .await?;
        let superseded = self.write_behind.enqueue(key.clone(), value);
        debug!(key = %key, superseded, "write-behind enqueued");
        Ok(superseded)
    }

    /// Persists one batch of pending writes now.
    pub async fn flush_now<S>(&self, saver: &S) -> FlushReport
    where
        S: Saver + ?Sized,
    {
        self.write_behind.flush(saver).await
    }

    /// Number of writes awaiting persistence.
    pub fn pending_writes(&self) -> usize {
        self.write_behind.len()
    }

    pub fn subscribe_dead_letters(&self) -> broadcast::Receiver<DeadLetter> {
        self.write_behind.subscribe_dead_letters()
    }

    // == Cache-Aside ==
    /// Raw cache lookup. Read errors are reported as a miss.
    pub async fn get_manual(&self, key: &CacheKey) -> Option<CacheEntry> {
        match self.store.read(key).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = %key, error = %e, "cache-aside read failed, reporting miss");
                None
            }
        }
    }

    /// Raw cache write with a caller-chosen TTL (`None` never expires).
    pub async fn set_manual(&self, key: &CacheKey, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.store.write(key, value, ttl).await
    }

    /// Cache-aside lookup decoding JSON. An undecodable value is an error.
    pub async fn get_manual_json<T>(&self, key: &CacheKey) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        self.get_manual(key)
            .await
            .map(|entry| serde_json::from_slice(&entry.value).map_err(CacheError::from))
            .transpose()
    }

    pub async fn set_manual_json<T>(&self, key: &CacheKey, value: &T, ttl: Option<Duration>) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.set_manual(key, serde_json::to_vec(value)?, ttl).await
    }
}

async fn load_and_populate<L>(
    store: &EntryStore,
    key: &CacheKey,
    loader: &L,
    ttl: Duration,
) -> LoadOutcome
where
    L: Loader + ?Sized,
{
    let loaded = loader.load(key).await;
    store.record_load(loaded.is_ok());

    match loaded {
        Ok(Some(value)) => {
            if let Err(e) = store.write(key, value.clone(), Some(ttl)).await {
                warn!(key = %key, error = %e, "loaded value not cached");
            }
            Ok(Some(value))
        }
        Ok(None) => {
            debug!(key = %key, "authoritative record absent, nothing cached");
            Ok(None)
        }
        Err(e) => {
            let err = CacheError::loader(e);
            warn!(key = %key, error = %err, "read-through load failed");
            Err(err)
        }
    }
}
