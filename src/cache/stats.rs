//! Cache Statistics Module
//!
//! Tracks entry store and read-through activity.

use serde::Serialize;

// == Cache Stats ==
/// Tracks cache performance metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Reads served from the cache
    pub hits: u64,
    /// Reads that found nothing (absent, expired or undecodable)
    pub misses: u64,
    /// Successful entry writes
    pub writes: u64,
    /// Entries removed by explicit invalidation
    pub removals: u64,
    /// Backend calls that failed
    pub backend_errors: u64,
    /// Loader invocations issued by read-through
    pub loads: u64,
    /// Loader invocations that failed
    pub load_failures: u64,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no reads have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_write(&mut self) {
        self.writes += 1;
    }

    pub fn record_removals(&mut self, count: usize) {
        self.removals += count as u64;
    }

    pub fn record_backend_error(&mut self) {
        self.backend_errors += 1;
    }

    // == Record Load ==
    /// Counts a loader invocation and whether it succeeded.
    pub fn record_load(&mut self, succeeded: bool) {
        self.loads += 1;
        if !succeeded {
            self.load_failures += 1;
        }
    }
}
