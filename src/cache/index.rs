//! Group Index Module
//!
//! Tracks which keys were written under each group tag, for backends that
//! cannot enumerate keys by prefix.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::cache::CacheKey;

/// Records between automatic sweeps of expired keys.
const PRUNE_EVERY: usize = 256;

type Deadline = Option<Instant>;

#[derive(Debug, Default)]
struct Groups {
    by_tag: HashMap<String, HashMap<CacheKey, Deadline>>,
    records_since_prune: usize,
}

impl Groups {
    fn prune(&mut self, now: Instant) -> usize {
        let mut pruned = 0;
        self.by_tag.retain(|_, keys| {
            let before = keys.len();
            keys.retain(|_, deadline| !is_past(*deadline, now));
            pruned += before - keys.len();
            !keys.is_empty()
        });
        self.records_since_prune = 0;
        pruned
    }
}

fn is_past(deadline: Deadline, now: Instant) -> bool {
    matches!(deadline, Some(at) if now >= at)
}

// == Group Index ==
/// Secondary index from group tag to the keys written under it.
///
/// Process-local: peers sharing the backend each hold their own index.
/// Each key carries the expiry it was written with; expired keys are swept
/// every few hundred records and on demand via [`GroupIndex::prune_expired`].
#[derive(Debug, Default)]
pub struct GroupIndex {
    groups: Mutex<Groups>,
}

impl GroupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn groups(&self) -> MutexGuard<'_, Groups> {
        self.groups.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // == Record ==
    /// Tags a key with its group. `ttl` is the lifetime of the written entry.
    pub fn record(&self, key: &CacheKey, ttl: Option<Duration>) {
        let now = Instant::now();
        let deadline = ttl.and_then(|ttl| now.checked_add(ttl));

        let mut groups = self.groups();
        groups
            .by_tag
            .entry(key.group().to_string())
            .or_default()
            .insert(key.clone(), deadline);
        groups.records_since_prune += 1;
        if groups.records_since_prune >= PRUNE_EVERY {
            groups.prune(now);
        }
    }

    // == Forget ==
    /// Removes a key from its group, dropping the group once empty.
    pub fn forget(&self, key: &CacheKey) {
        let mut groups = self.groups();
        if let Some(keys) = groups.by_tag.get_mut(key.group()) {
            keys.remove(key);
            if keys.is_empty() {
                groups.by_tag.remove(key.group());
            }
        }
    }

    /// Forgets `key` only if the entry it was recorded for has expired.
    ///
    /// A key recorded by a write that has not reached the backend yet keeps
    /// its future deadline and stays indexed.
    pub fn forget_if_expired(&self, key: &CacheKey) {
        let now = Instant::now();
        let mut groups = self.groups();
        if let Some(keys) = groups.by_tag.get_mut(key.group()) {
            if keys.get(key).is_some_and(|deadline| is_past(*deadline, now)) {
                keys.remove(key);
            }
            if keys.is_empty() {
                groups.by_tag.remove(key.group());
            }
        }
    }

    // == Prune ==
    /// Drops every key whose entry has expired. Returns the number dropped.
    pub fn prune_expired(&self) -> usize {
        self.groups().prune(Instant::now())
    }

    /// Keys currently tagged with `group`.
    pub fn keys_in(&self, group: &str) -> Vec<CacheKey> {
        self.groups()
            .by_tag
            .get(group)
            .map(|keys| keys.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Every indexed key starting with `prefix`.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<CacheKey> {
        self.groups()
            .by_tag
            .values()
            .flat_map(HashMap::keys)
            .filter(|key| key.as_str().starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Number of indexed keys across all groups.
    pub fn len(&self) -> usize {
        self.groups().by_tag.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
