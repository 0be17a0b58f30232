//! Engine Module
//!
//! Wires every component over one shared backend connection.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backend::{BackendAdapter, CacheBackend};
use crate::cache::{CacheStats, EntryStore};
use crate::config::Config;
use crate::error::Result;
use crate::invalidation::InvalidationManager;
use crate::lock::LockManager;
use crate::rate_limit::RateLimiter;
use crate::strategy::{FlushPolicy, Saver, StrategyEngine};
use crate::tasks::spawn_flush_task;

/// Cache coordination engine shared across the application.
///
/// Cloning is cheap; clones share the backend, entry store and write-behind
/// queue.
#[derive(Clone)]
pub struct CacheEngine {
    pub backend: BackendAdapter,
    pub store: Arc<EntryStore>,
    pub strategy: StrategyEngine,
    pub invalidation: InvalidationManager,
    pub locks: LockManager,
    pub limiter: RateLimiter,
    config: Config,
}

impl CacheEngine {
    /// Builds an engine over `backend` using the given configuration.
    ///
    /// Fails if the configured namespace is not a valid namespace.
    pub fn new(backend: Arc<dyn CacheBackend>, config: &Config) -> Result<Self> {
        let adapter = BackendAdapter::new(backend, config.backend_timeout());
        let store = Arc::new(EntryStore::new(adapter.clone(), config.namespace.clone())?);
        let policy = FlushPolicy {
            batch_size: config.flush_batch_size.max(1),
            max_retries: config.flush_max_retries.max(1),
            retry_backoff: config.flush_retry_backoff(),
        };

        Ok(Self {
            strategy: StrategyEngine::new(store.clone(), config.default_ttl(), policy),
            invalidation: InvalidationManager::new(store.clone())
                .with_broadcast(config.invalidation_channel.clone()),
            locks: LockManager::new(adapter.clone(), config.lock_retry_interval()),
            limiter: RateLimiter::new(adapter.clone()),
            backend: adapter,
            store,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current entry store statistics.
    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }

    /// Starts the write-behind flush worker persisting through `saver`.
    ///
    /// The worker stops between flushes once `true` is sent on `shutdown`.
    pub fn spawn_flush_task(
        &self,
        saver: Arc<dyn Saver>,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        spawn_flush_task(
            self.strategy.write_behind().clone(),
            saver,
            self.config.flush_interval(),
            shutdown,
        )
    }
}
