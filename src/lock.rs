//! Distributed Lock Module
//!
//! Mutual exclusion across processes sharing the backend, built on
//! set-if-absent with an expiring lease.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::BackendAdapter;
use crate::error::{CacheError, Result};

/// Cap on the retry backoff exponent while waiting for a lock.
const MAX_RETRY_SHIFT: u32 = 4;

// == Lock ==
/// Proof of holding a named lock.
///
/// Only the holder of the matching token can release or renew it. The lease
/// is not extended automatically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lock {
    pub name: String,
    pub token: String,
    pub acquired_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl Lock {
    /// Local estimate of when the lease lapses.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.acquired_at.checked_add_signed(ttl))
    }
}

// == Lock Manager ==
#[derive(Debug, Clone)]
pub struct LockManager {
    backend: BackendAdapter,
    retry_interval: Duration,
}

impl LockManager {
    /// Creates a manager retrying contended locks around `retry_interval`.
    pub fn new(backend: BackendAdapter, retry_interval: Duration) -> Self {
        Self {
            backend,
            retry_interval,
        }
    }

    fn lock_key(name: &str) -> String {
        format!("lock:{}", name)
    }

    /// Exponential backoff with +/-50% jitter.
    fn retry_delay(&self, attempt: u32) -> Duration {
        let base = self
            .retry_interval
            .saturating_mul(1 << attempt.min(MAX_RETRY_SHIFT));
        base.mul_f64(rand::thread_rng().gen_range(0.5..1.5))
    }

    // == Try Acquire ==
    /// Single acquisition attempt. None if the lock is held elsewhere.
    pub async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<Option<Lock>> {
        let token = Uuid::new_v4().to_string();
        let acquired = self
            .backend
            .set_if_absent(&Self::lock_key(name), token.clone().into_bytes(), Some(ttl))
            .await?;

        if !acquired {
            return Ok(None);
        }
        debug!(lock = name, ttl = ?ttl, "lock acquired");
        Ok(Some(Lock {
            name: name.to_string(),
            token,
            acquired_at: Utc::now(),
            ttl,
        }))
    }

    // == Acquire ==
    /// Acquires the lock, retrying with jittered backoff for up to `wait`.
    ///
    /// A zero `wait` makes a single attempt. Fails with `LockTimeout` once the
    /// budget is spent.
    pub async fn acquire(&self, name: &str, ttl: Duration, wait: Duration) -> Result<Lock> {
        let deadline = Instant::now() + wait;
        let mut attempt = 0;

        loop {
            if let Some(lock) = self.try_acquire(name, ttl).await? {
                return Ok(lock);
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(lock = name, wait = ?wait, attempts = attempt + 1, "lock wait exhausted");
                return Err(CacheError::LockTimeout(format!(
                    "'{}' still held after {:?}",
                    name, wait
                )));
            }

            let pause = self.retry_delay(attempt).min(deadline - now);
            attempt += 1;
            tokio::time::sleep(pause).await;
        }
    }

    // == Release ==
    /// Releases the lock if `lock` still owns it.
    ///
    /// Releasing an expired or already released lock is a no-op returning
    /// false. Without a native compare-and-delete in the backend, a lease
    /// that lapses between the token check and the delete can remove the
    /// next holder's lock.
    pub async fn release(&self, lock: &Lock) -> Result<bool> {
        let released = self
            .backend
            .delete_if_equals(&Self::lock_key(&lock.name), lock.token.as_bytes())
            .await?;
        if released {
            debug!(lock = %lock.name, "lock released");
        } else {
            debug!(lock = %lock.name, "release skipped, lock no longer owned");
        }
        Ok(released)
    }

    // == Renew ==
    /// Resets the lease to `ttl` if `lock` still owns it.
    pub async fn renew(&self, lock: &Lock, ttl: Duration) -> Result<bool> {
        let key = Self::lock_key(&lock.name);
        match self.backend.get(&key).await? {
            Some(current) if current == lock.token.as_bytes() => {
                self.backend.expire(&key, ttl).await
            }
            _ => Ok(false),
        }
    }

    /// Whether any process currently holds `name`.
    pub async fn is_locked(&self, name: &str) -> Result<bool> {
        Ok(self.backend.get(&Self::lock_key(name)).await?.is_some())
    }

    // == With Lock ==
    /// Runs `critical` while holding `name`, releasing it afterwards.
    pub async fn with_lock<F, Fut, T>(
        &self,
        name: &str,
        ttl: Duration,
        wait: Duration,
        critical: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = self.acquire(name, ttl, wait).await?;
        let output = critical().await;
        if let Err(e) = self.release(&lock).await {
            warn!(lock = name, error = %e, "release failed, lease will lapse on its own");
        }
        Ok(output)
    }
}
