//! Cache Module
//!
//! Entry store over the shared backend: keys, entry envelopes, the group
//! index and statistics.

mod entry;
mod index;
mod key;
mod stats;
mod store;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use entry::CacheEntry;
pub use index::GroupIndex;
pub use key::{CacheKey, RESERVED_PREFIXES};
pub use stats::CacheStats;
pub use store::EntryStore;

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;

/// Maximum allowed value size in bytes
pub const MAX_VALUE_SIZE: usize = 1024 * 1024; // 1 MB
