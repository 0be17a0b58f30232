//! Rate Limiter Module
//!
//! Fixed-window request counters kept in the shared backend.
//!
//! Windows are aligned to wall-clock multiples of the window length, so a
//! burst straddling a boundary can see up to twice the limit in one window's
//! worth of time. Clock skew between processes is assumed negligible.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::backend::BackendAdapter;
use crate::error::{CacheError, Result};

// == Rate Window ==
/// Counter state for one subject in the current window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateWindow {
    pub subject: String,
    pub window_start: DateTime<Utc>,
    pub count: u64,
}

// == Rate Decision ==
/// Outcome of counting one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateDecision {
    pub window: RateWindow,
    pub limit: u64,
    pub allowed: bool,
    /// Requests left in this window
    pub remaining: u64,
    /// When the current window ends
    pub resets_at: DateTime<Utc>,
}

// == Rate Limiter ==
#[derive(Debug, Clone)]
pub struct RateLimiter {
    backend: BackendAdapter,
}

impl RateLimiter {
    pub fn new(backend: BackendAdapter) -> Self {
        Self { backend }
    }

    /// Start of the window containing `now_ms`, in Unix milliseconds.
    fn window_start_ms(now_ms: i64, window_ms: i64) -> i64 {
        now_ms.div_euclid(window_ms) * window_ms
    }

    fn counter_key(subject: &str, window_start_ms: i64) -> String {
        format!("rl:{}:{}", subject, window_start_ms)
    }

    // == Hit ==
    /// Counts one request for `subject` and decides whether it is allowed.
    pub async fn hit(&self, subject: &str, limit: u64, window: Duration) -> Result<RateDecision> {
        let window_ms = i64::try_from(window.as_millis())
            .ok()
            .filter(|ms| *ms > 0)
            .ok_or_else(|| {
                CacheError::InvalidRequest(format!("unusable rate window {:?}", window))
            })?;

        let now = Utc::now();
        let start_ms = Self::window_start_ms(now.timestamp_millis(), window_ms);
        let key = Self::counter_key(subject, start_ms);

        let count = self.backend.increment(&key).await?;
        if count == 1 {
            // First hit in a fresh window owns the expiry
            if let Err(e) = self.backend.expire(&key, window).await {
                // A counter without expiry would outlive its window
                if let Err(cleanup) = self.backend.delete(&key).await {
                    warn!(key = %key, error = %cleanup, "failed to remove counter without expiry");
                }
                return Err(e);
            }
        }
        let count = u64::try_from(count).unwrap_or(0);

        let window_start = Utc
            .timestamp_millis_opt(start_ms)
            .single()
            .unwrap_or(now);
        let resets_at = Utc
            .timestamp_millis_opt(start_ms + window_ms)
            .single()
            .unwrap_or(now);
        let allowed = count <= limit;
        if !allowed {
            debug!(subject, count, limit, "rate limit exceeded");
        }

        Ok(RateDecision {
            window: RateWindow {
                subject: subject.to_string(),
                window_start,
                count,
            },
            limit,
            allowed,
            remaining: limit.saturating_sub(count),
            resets_at,
        })
    }

    // == Allow ==
    /// Counts one request and returns whether it is within `limit`.
    pub async fn allow(&self, subject: &str, limit: u64, window: Duration) -> Result<bool> {
        Ok(self.hit(subject, limit, window).await?.allowed)
    }
}
