//! Cache Entry Module
//!
//! Defines the envelope stored in the backend for each cached value.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::CacheKey;
use crate::error::Result;

// == Cache Entry ==
/// A cached value with its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Logical key the entry is stored under
    pub key: CacheKey,
    /// The stored value
    pub value: Vec<u8>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Expiration timestamp, None = no expiration
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new cache entry with optional TTL.
    ///
    /// A TTL too large to represent as a timestamp never expires.
    pub fn new(key: CacheKey, value: Vec<u8>, ttl: Option<Duration>) -> Self {
        let now = Utc::now();
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .and_then(|ttl| now.checked_add_signed(ttl));

        Self {
            key,
            value,
            created_at: now,
            expires_at,
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// An entry is expired once the current time reaches its expiration time.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires) if now >= expires)
    }

    // == Time To Live ==
    /// Returns remaining TTL, or None if no expiration is set.
    ///
    /// Returns `Some(Duration::ZERO)` once the entry has expired.
    pub fn ttl_remaining(&self) -> Option<Duration> {
        self.expires_at.map(|expires| {
            (expires - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
        })
    }

    // == Envelope Codec ==
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
