//! Cache Coord - cache coordination over a shared key-value backend
//!
//! Provides read-through, write-through, write-behind and cache-aside
//! strategies, invalidation, distributed locks and fixed-window rate limits.

pub mod backend;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod invalidation;
pub mod lock;
pub mod product;
pub mod rate_limit;
pub mod strategy;
pub mod tasks;

pub use backend::{BackendAdapter, CacheBackend, InMemoryBackend};
pub use cache::{CacheEntry, CacheKey, CacheStats, EntryStore};
pub use config::Config;
pub use engine::CacheEngine;
pub use error::{CacheError, Result};
pub use invalidation::{InvalidationEvent, InvalidationManager, InvalidationScope};
pub use lock::{Lock, LockManager};
pub use rate_limit::{RateDecision, RateLimiter, RateWindow};
pub use strategy::{loader_fn, saver_fn, Loader, Saver, StrategyEngine};
pub use tasks::{spawn_cleanup_task, spawn_flush_task};
