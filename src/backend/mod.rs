//! Backend Module
//!
//! Contract over the shared key-value substrate and the adapter every other
//! component talks to.
//!
//! All operations are individually atomic. No multi-key transactions are
//! assumed. Every operation fails with `BackendUnavailable` on connectivity
//! loss or when the adapter's per-call timeout elapses.

mod memory;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use tracing::warn;

use crate::error::{CacheError, Result};

pub use memory::InMemoryBackend;

/// Infinite stream of pub/sub messages. Dropping it cancels the subscription.
pub type MessageStream = BoxStream<'static, String>;

// == Backend Contract ==
/// Primitive operations offered by the shared key-value substrate.
#[async_trait]
pub trait CacheBackend: Send + Sync + 'static {
    /// A name for tracing, e.g. "memory" or "redis".
    fn name(&self) -> &'static str;

    /// Returns the stored bytes, `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Stores bytes, replacing any previous value. `None` TTL never expires.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Stores bytes only if the key is absent. Returns whether it was stored.
    async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>)
        -> Result<bool>;

    /// Deletes a key. Returns whether a live key was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Atomically increments an integer counter, creating it at 1.
    async fn increment(&self, key: &str) -> Result<i64>;

    /// Sets the expiry of a live key. Returns false if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Publishes a message. Returns the number of subscribers reached.
    async fn publish(&self, channel: &str, message: String) -> Result<usize>;

    /// Subscribes to a channel.
    async fn subscribe(&self, channel: &str) -> Result<MessageStream>;

    /// Enumerates live keys by prefix. `None` means enumeration is unsupported.
    async fn keys_with_prefix(&self, _prefix: &str) -> Result<Option<Vec<String>>> {
        Ok(None)
    }

    /// Deletes a key only if it currently holds `expected`.
    ///
    /// The default is a read-check-delete sequence: another writer can slip
    /// in between the read and the delete. Backends with a native
    /// compare-and-delete should override it.
    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool> {
        match self.get(key).await? {
            Some(current) if current == expected => self.delete(key).await,
            _ => Ok(false),
        }
    }
}

// == Backend Adapter ==
/// Shared handle over a backend that bounds every call with a timeout.
#[derive(Clone)]
pub struct BackendAdapter {
    inner: Arc<dyn CacheBackend>,
    timeout: Duration,
}

impl BackendAdapter {
    /// Creates an adapter applying `timeout` to each backend call.
    pub fn new(inner: Arc<dyn CacheBackend>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// Name of the wrapped backend.
    pub fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn call<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(backend = self.inner.name(), op, timeout = ?self.timeout, "backend call timed out");
                Err(CacheError::BackendUnavailable(format!(
                    "{} timed out after {:?}",
                    op, self.timeout
                )))
            }
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.call("get", self.inner.get(key)).await
    }

    pub async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.call("set", self.inner.set(key, value, ttl)).await
    }

    pub async fn set_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        self.call("set_if_absent", self.inner.set_if_absent(key, value, ttl))
            .await
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.call("delete", self.inner.delete(key)).await
    }

    pub async fn increment(&self, key: &str) -> Result<i64> {
        self.call("increment", self.inner.increment(key)).await
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.call("expire", self.inner.expire(key, ttl)).await
    }

    pub async fn publish(&self, channel: &str, message: String) -> Result<usize> {
        self.call("publish", self.inner.publish(channel, message))
            .await
    }

    /// Subscribes to a channel. The timeout bounds only the subscription setup.
    pub async fn subscribe(&self, channel: &str) -> Result<MessageStream> {
        self.call("subscribe", self.inner.subscribe(channel)).await
    }

    pub async fn keys_with_prefix(&self, prefix: &str) -> Result<Option<Vec<String>>> {
        self.call("keys_with_prefix", self.inner.keys_with_prefix(prefix))
            .await
    }

    pub async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool> {
        self.call("delete_if_equals", self.inner.delete_if_equals(key, expected))
            .await
    }
}

impl std::fmt::Debug for BackendAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendAdapter")
            .field("backend", &self.inner.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}
