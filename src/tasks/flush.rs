//! Write-Behind Flush Task
//!
//! Background task that periodically persists pending writes. It is the
//! single consumer of the queue it is given.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::strategy::{Saver, WriteBehindQueue};

/// Shortest allowed pause between flushes.
const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

/// Spawns a background task flushing `queue` through `saver` every `interval`.
///
/// The task stops between flushes once `true` is sent on `shutdown` (or the
/// sender is dropped), so a save is never interrupted. Await the returned
/// handle, then `drain` the queue to persist what is left.
pub fn spawn_flush_task(
    queue: Arc<WriteBehindQueue>,
    saver: Arc<dyn Saver>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let interval = interval.max(MIN_FLUSH_INTERVAL);

    tokio::spawn(async move {
        info!(interval = ?interval, "Starting write-behind flush task");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            if queue.is_empty() {
                continue;
            }
            let report = queue.flush(saver.as_ref()).await;
            if report.retried > 0 || report.dead_lettered > 0 {
                info!(
                    persisted = report.persisted,
                    retried = report.retried,
                    dead_lettered = report.dead_lettered,
                    "write-behind flush finished with failures"
                );
            } else {
                debug!(persisted = report.persisted, "write-behind flush finished");
            }
        }
        info!("Write-behind flush task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheKey;
    use crate::strategy::{saver_fn, FlushPolicy};
    use std::sync::Mutex;

    fn recording_saver() -> (Arc<Mutex<Vec<(String, Vec<u8>)>>>, Arc<dyn Saver>) {
        let saved = Arc::new(Mutex::new(Vec::new()));
        let sink = saved.clone();
        let saver: Arc<dyn Saver> = Arc::new(saver_fn(move |key: CacheKey, value: Vec<u8>| {
            sink.lock().unwrap().push((key.to_string(), value));
            async { anyhow::Ok(()) }
        }));
        (saved, saver)
    }

    #[tokio::test]
    async fn test_flush_task_persists_pending_writes() {
        let queue = Arc::new(WriteBehindQueue::new(FlushPolicy::default()));
        let (saved, saver) = recording_saver();
        let (_stop, shutdown) = watch::channel(false);

        queue.enqueue(CacheKey::new("product", 1).unwrap(), b"a".to_vec());
        queue.enqueue(CacheKey::new("product", 2).unwrap(), b"b".to_vec());

        let handle = spawn_flush_task(queue.clone(), saver, Duration::from_millis(20), shutdown);
        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.abort();

        assert!(queue.is_empty());
        assert_eq!(
            *saved.lock().unwrap(),
            vec![
                ("product:1".to_string(), b"a".to_vec()),
                ("product:2".to_string(), b"b".to_vec())
            ]
        );
    }

    #[tokio::test]
    async fn test_flush_task_stops_on_shutdown_signal() {
        let queue = Arc::new(WriteBehindQueue::new(FlushPolicy::default()));
        let (_saved, saver) = recording_saver();
        let (stop, shutdown) = watch::channel(false);
        let handle = spawn_flush_task(queue, saver, Duration::from_secs(60), shutdown);

        stop.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("flush task should stop promptly")
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_save_in_progress() {
        let queue = Arc::new(WriteBehindQueue::new(FlushPolicy::default()));
        let saved = Arc::new(Mutex::new(Vec::new()));
        let sink = saved.clone();
        let saver: Arc<dyn Saver> = Arc::new(saver_fn(move |key: CacheKey, _value: Vec<u8>| {
            let sink = sink.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                sink.lock().unwrap().push(key.to_string());
                anyhow::Ok(())
            }
        }));
        let (stop, shutdown) = watch::channel(false);
        queue.enqueue(CacheKey::new("product", 1).unwrap(), b"a".to_vec());

        let handle = spawn_flush_task(queue.clone(), saver, Duration::from_millis(10), shutdown);
        tokio::time::sleep(Duration::from_millis(40)).await;
        stop.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(*saved.lock().unwrap(), vec!["product:1".to_string()]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_zero_interval_is_clamped() {
        let queue = Arc::new(WriteBehindQueue::new(FlushPolicy::default()));
        let (saved, saver) = recording_saver();
        let (stop, shutdown) = watch::channel(false);
        queue.enqueue(CacheKey::new("product", 1).unwrap(), b"a".to_vec());

        let handle = spawn_flush_task(queue.clone(), saver, Duration::ZERO, shutdown);
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(saved.lock().unwrap().len(), 1);
    }
}
