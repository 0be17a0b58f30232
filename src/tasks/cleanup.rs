//! TTL Cleanup Task
//!
//! Background task that periodically sweeps expired keys out of the
//! in-memory backend. Expired keys are already invisible to readers; the
//! sweep only reclaims their memory.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::backend::InMemoryBackend;

/// Spawns a background task that periodically purges expired keys.
///
/// # Arguments
/// * `backend` - Shared in-memory backend
/// * `cleanup_interval_secs` - Interval in seconds between sweeps
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
pub fn spawn_cleanup_task(
    backend: Arc<InMemoryBackend>,
    cleanup_interval_secs: u64,
) -> JoinHandle<()> {
    let interval = Duration::from_secs(cleanup_interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            "Starting TTL cleanup task with interval of {} seconds",
            interval.as_secs()
        );

        loop {
            tokio::time::sleep(interval).await;

            let removed = backend.purge_expired();
            if removed > 0 {
                info!("TTL cleanup: removed {} expired keys", removed);
            } else {
                debug!("TTL cleanup: no expired keys found");
            }
        }
    })
}
