//! Cache Key Module
//!
//! Validated logical keys of the form `tag:id`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cache::MAX_KEY_LENGTH;
use crate::error::{CacheError, Result};

/// Prefixes the engine reserves for its own backend keys.
pub const RESERVED_PREFIXES: [&str; 3] = ["ns:", "lock:", "rl:"];

// == Cache Key ==
/// Logical cache key, e.g. `product:42`.
///
/// Never empty, at most `MAX_KEY_LENGTH` bytes, and never starts with a
/// reserved prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CacheKey(String);

impl CacheKey {
    // == Constructor ==
    /// Builds a key from a type tag and an identifier.
    pub fn new(tag: &str, id: impl fmt::Display) -> Result<Self> {
        if tag.is_empty() || tag.contains(':') {
            return Err(CacheError::InvalidKey(format!(
                "type tag '{}' must be non-empty and contain no ':'",
                tag
            )));
        }
        Self::parse(format!("{}:{}", tag, id))
    }

    // == Parse ==
    /// Validates a raw key string.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(CacheError::InvalidKey("key cannot be empty".to_string()));
        }
        if raw.len() > MAX_KEY_LENGTH {
            return Err(CacheError::InvalidKey(format!(
                "key exceeds maximum length of {} bytes",
                MAX_KEY_LENGTH
            )));
        }
        if let Some(prefix) = RESERVED_PREFIXES.iter().find(|p| raw.starts_with(**p)) {
            return Err(CacheError::InvalidKey(format!(
                "key '{}' uses reserved prefix '{}'",
                raw, prefix
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Type tag of the key, used as its invalidation group.
    ///
    /// A key without `:` is its own group.
    pub fn group(&self) -> &str {
        self.0
            .split_once(':')
            .map_or(self.0.as_str(), |(tag, _)| tag)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CacheKey {
    type Error = CacheError;

    fn try_from(raw: String) -> Result<Self> {
        Self::parse(raw)
    }
}

impl TryFrom<&str> for CacheKey {
    type Error = CacheError;

    fn try_from(raw: &str) -> Result<Self> {
        Self::parse(raw)
    }
}

impl FromStr for CacheKey {
    type Err = CacheError;

    fn from_str(raw: &str) -> Result<Self> {
        Self::parse(raw)
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}
