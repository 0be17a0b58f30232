//! Background Tasks Module
//!
//! Contains background tasks that run periodically alongside the engine.
//!
//! # Tasks
//! - TTL Cleanup: Sweeps expired keys out of the in-memory backend
//! - Write-Behind Flush: Persists pending writes to the authoritative store

mod cleanup;
mod flush;

pub use cleanup::spawn_cleanup_task;
pub use flush::spawn_flush_task;
