//! In-Memory Backend
//!
//! Process-local implementation of the backend contract. Expired keys are
//! dropped lazily on access and in bulk by `purge_expired`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::warn;

use super::{CacheBackend, MessageStream};
use crate::error::{CacheError, Result};

/// Buffered messages per channel before slow subscribers start lagging.
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct Slot {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Slot {
    fn new(value: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if now >= at)
    }
}

// == In-Memory Backend ==
/// Shared key-value substrate held in process memory.
#[derive(Debug)]
pub struct InMemoryBackend {
    entries: Mutex<HashMap<String, Slot>>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    available: AtomicBool,
    latency_ms: AtomicU64,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// Simulates connectivity loss (`false`) or recovery (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Adds an artificial delay before every operation.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    // == Purge Expired ==
    /// Removes every expired key. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, slot| !slot.is_expired(now));
        before - entries.len()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries()
            .values()
            .filter(|slot| !slot.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<String>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn ensure_reachable(&self) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::BackendUnavailable(
                "in-memory backend marked unavailable".to_string(),
            ))
        }
    }

    /// Returns the live slot for `key`, dropping it first if expired.
    fn live<'a>(entries: &'a mut HashMap<String, Slot>, key: &str) -> Option<&'a mut Slot> {
        let now = Instant::now();
        if entries.get(key).is_some_and(|slot| slot.is_expired(now)) {
            entries.remove(key);
        }
        entries.get_mut(key)
    }
}

#[async_trait]
impl CacheBackend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_reachable().await?;
        let mut entries = self.entries();
        Ok(Self::live(&mut entries, key).map(|slot| slot.value.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.ensure_reachable().await?;
        self.entries().insert(key.to_string(), Slot::new(value, ttl));
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        self.ensure_reachable().await?;
        let mut entries = self.entries();
        if Self::live(&mut entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(key.to_string(), Slot::new(value, ttl));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.ensure_reachable().await?;
        let mut entries = self.entries();
        let existed = Self::live(&mut entries, key).is_some();
        entries.remove(key);
        Ok(existed)
    }

    async fn increment(&self, key: &str) -> Result<i64> {
        self.ensure_reachable().await?;
        let mut entries = self.entries();
        match Self::live(&mut entries, key) {
            Some(slot) => {
                let current: i64 = std::str::from_utf8(&slot.value)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| {
                        CacheError::Backend(format!("value at '{}' is not an integer", key))
                    })?;
                let next = current.checked_add(1).ok_or_else(|| {
                    CacheError::Backend(format!("counter at '{}' would overflow", key))
                })?;
                slot.value = next.to_string().into_bytes();
                Ok(next)
            }
            None => {
                entries.insert(key.to_string(), Slot::new(b"1".to_vec(), None));
                Ok(1)
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.ensure_reachable().await?;
        let mut entries = self.entries();
        match Self::live(&mut entries, key) {
            Some(slot) => {
                slot.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn publish(&self, channel: &str, message: String) -> Result<usize> {
        self.ensure_reachable().await?;
        let sender = self.channels().get(channel).cloned();
        Ok(sender
            .map(|sender| sender.send(message).unwrap_or_default())
            .unwrap_or(0))
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream> {
        self.ensure_reachable().await?;
        let receiver = self
            .channels()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();
        let channel = channel.to_string();

        let messages = stream::unfold(receiver, move |mut receiver| {
            let channel = channel.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(message) => return Some((message, receiver)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(channel = %channel, skipped, "subscriber lagged, messages dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });
        Ok(messages.boxed())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Option<Vec<String>>> {
        self.ensure_reachable().await?;
        let now = Instant::now();
        let keys = self
            .entries()
            .iter()
            .filter(|(key, slot)| key.starts_with(prefix) && !slot.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        Ok(Some(keys))
    }

    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool> {
        self.ensure_reachable().await?;
        let mut entries = self.entries();
        let matches = Self::live(&mut entries, key).is_some_and(|slot| slot.value == expected);
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }
}
