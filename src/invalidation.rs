//! Invalidation Module
//!
//! Explicit, group and namespace-wide eviction, optionally broadcast to
//! peers sharing the backend.

use std::sync::Arc;

use futures_util::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{CacheKey, EntryStore};
use crate::error::Result;

// == Invalidation Event ==
/// What an eviction covered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum InvalidationScope {
    Key(CacheKey),
    Group(String),
    Namespace(String),
}

/// Broadcast after an eviction is acknowledged by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationEvent {
    /// Instance that performed the eviction
    pub origin: Uuid,
    pub scope: InvalidationScope,
}

// == Invalidation Manager ==
/// Evicts entries from the shared entry store.
///
/// Races with concurrent writes resolve to whichever backend operation lands
/// last; no ordering is added on top of the backend's per-key atomicity.
#[derive(Debug, Clone)]
pub struct InvalidationManager {
    store: Arc<EntryStore>,
    channel: Option<String>,
    origin: Uuid,
}

impl InvalidationManager {
    pub fn new(store: Arc<EntryStore>) -> Self {
        Self {
            store,
            channel: None,
            origin: Uuid::new_v4(),
        }
    }

    /// Publishes an [`InvalidationEvent`] on `channel` after each eviction.
    pub fn with_broadcast(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Identifier stamped on events published by this manager.
    pub fn origin(&self) -> Uuid {
        self.origin
    }

    // == Evict ==
    /// Deletes one entry. Returns whether a live entry was removed.
    pub async fn evict(&self, key: &CacheKey) -> Result<bool> {
        let removed = self.store.remove(key).await?;
        debug!(key = %key, removed, "evicted");
        self.announce(InvalidationScope::Key(key.clone())).await;
        Ok(removed)
    }

    // == Evict Group ==
    /// Deletes every entry tagged with `group` at write time.
    pub async fn evict_all(&self, group: &str) -> Result<usize> {
        let removed = self.store.remove_group(group).await?;
        info!(group, removed, "group evicted");
        self.announce(InvalidationScope::Group(group.to_string()))
            .await;
        Ok(removed)
    }

    /// Deletes every entry matching a key pattern (`prefix*` or exact key).
    pub async fn evict_matching(&self, pattern: &str) -> Result<usize> {
        let removed = self.store.remove_matching(pattern).await?;
        info!(pattern, removed, "pattern evicted");
        Ok(removed)
    }

    // == Clear Namespace ==
    /// Deletes every entry in the namespace. Cost grows with the key count.
    pub async fn clear_namespace(&self) -> Result<usize> {
        let removed = self.store.remove_matching("*").await?;
        info!(namespace = self.store.namespace(), removed, "namespace cleared");
        self.announce(InvalidationScope::Namespace(
            self.store.namespace().to_string(),
        ))
        .await;
        Ok(removed)
    }

    /// Publishing is best-effort: the eviction itself already succeeded.
    async fn announce(&self, scope: InvalidationScope) {
        let Some(channel) = &self.channel else {
            return;
        };
        let event = InvalidationEvent {
            origin: self.origin,
            scope,
        };
        let message = match serde_json::to_string(&event) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "could not encode invalidation event");
                return;
            }
        };
        if let Err(e) = self.store.backend().publish(channel, message).await {
            warn!(channel = %channel, error = %e, "invalidation broadcast failed");
        }
    }

    // == Subscribe ==
    /// Stream of invalidation events from every manager on the channel,
    /// this one included. Undecodable messages are skipped.
    ///
    /// Returns None if this manager has no broadcast channel.
    pub async fn subscribe(&self) -> Result<Option<BoxStream<'static, InvalidationEvent>>> {
        let Some(channel) = &self.channel else {
            return Ok(None);
        };
        let messages = self.store.backend().subscribe(channel).await?;
        let events = messages.filter_map(|message| async move {
            match serde_json::from_str::<InvalidationEvent>(&message) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(error = %e, "skipping malformed invalidation message");
                    None
                }
            }
        });
        Ok(Some(events.boxed()))
    }
}
