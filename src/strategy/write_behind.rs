//! Write-Behind Queue
//!
//! Pending writes awaiting persistence to the authoritative store, with
//! per-key coalescing, bounded retries and dead-letter reporting.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::cache::CacheKey;
use crate::error::CacheError;
use crate::strategy::Saver;

/// Buffered dead letters before slow subscribers start lagging.
const DEAD_LETTER_CAPACITY: usize = 256;

/// Upper bound on the retry backoff exponent.
const MAX_BACKOFF_SHIFT: u32 = 10;

// == Pending Write ==
/// A value accepted into the cache and awaiting persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    pub key: CacheKey,
    pub value: Vec<u8>,
    pub enqueued_at: DateTime<Utc>,
}

// == Dead Letter ==
/// A pending write dropped after exhausting its persist attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub key: CacheKey,
    pub value: Vec<u8>,
    pub attempts: u32,
    pub last_error: CacheError,
}

impl DeadLetter {
    /// The loss expressed as an error, for callers that surface it.
    pub fn to_error(&self) -> CacheError {
        CacheError::FlushExhausted(format!(
            "'{}' dropped after {} attempts: {}",
            self.key, self.attempts, self.last_error
        ))
    }
}

// == Flush Policy ==
#[derive(Debug, Clone)]
pub struct FlushPolicy {
    /// Maximum pending writes persisted per flush
    pub batch_size: usize,
    /// Persist attempts before dead-lettering
    pub max_retries: u32,
    /// Base of the exponential retry backoff
    pub retry_backoff: Duration,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            batch_size: 64,
            max_retries: 5,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

impl FlushPolicy {
    fn backoff(&self, attempts: u32) -> Duration {
        let shift = attempts.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
        self.retry_backoff.saturating_mul(1 << shift)
    }
}

// == Flush Report ==
/// Outcome of one flush pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub persisted: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.persisted == 0 && self.retried == 0 && self.dead_lettered == 0
    }

    fn absorb(&mut self, other: FlushReport) {
        self.persisted += other.persisted;
        self.retried += other.retried;
        self.dead_lettered += other.dead_lettered;
    }
}

#[derive(Debug)]
struct Slot {
    write: PendingWrite,
    attempts: u32,
    not_before: Option<Instant>,
    /// Bumped whenever a newer write replaces this one
    generation: u64,
    /// Handed to the saver and not yet settled
    in_flight: bool,
}

/// A slot handed out for persistence. The slot itself stays queued until
/// the outcome is settled, so a flush cancelled mid-save loses nothing.
#[derive(Debug)]
struct Claim {
    key: CacheKey,
    value: Vec<u8>,
    attempts: u32,
    generation: u64,
}

/// What a failed save means for its slot.
enum Failure {
    Retry,
    Exhausted(PendingWrite),
    Superseded,
}

#[derive(Debug, Default)]
struct Pending {
    order: VecDeque<CacheKey>,
    slots: HashMap<CacheKey, Slot>,
}

impl Pending {
    fn unlink(&mut self, key: &CacheKey) -> Option<Slot> {
        let slot = self.slots.remove(key)?;
        self.order.retain(|queued| queued != key);
        Some(slot)
    }
}

// == Write-Behind Queue ==
/// Ordered queue of pending writes, holding at most one write per key.
///
/// Enqueueing a key that is already pending replaces its value in place
/// (last write wins). Flushes are serialized so a key is only ever persisted
/// from one consumer at a time. A write leaves the queue only once it has
/// been persisted or dead-lettered.
#[derive(Debug)]
pub struct WriteBehindQueue {
    pending: Mutex<Pending>,
    flush_guard: tokio::sync::Mutex<()>,
    policy: FlushPolicy,
    dead_letters: broadcast::Sender<DeadLetter>,
}

impl WriteBehindQueue {
    pub fn new(policy: FlushPolicy) -> Self {
        let (dead_letters, _) = broadcast::channel(DEAD_LETTER_CAPACITY);
        Self {
            pending: Mutex::new(Pending::default()),
            flush_guard: tokio::sync::Mutex::new(()),
            policy,
            dead_letters,
        }
    }

    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn policy(&self) -> &FlushPolicy {
        &self.policy
    }

    // == Enqueue ==
    /// Queues a write. Returns true if it superseded an unflushed write.
    pub fn enqueue(&self, key: CacheKey, value: Vec<u8>) -> bool {
        let write = PendingWrite {
            key: key.clone(),
            value,
            enqueued_at: Utc::now(),
        };

        let mut pending = self.pending();
        if let Some(slot) = pending.slots.get_mut(&key) {
            slot.write = write;
            slot.attempts = 0;
            slot.not_before = None;
            slot.generation += 1;
            slot.in_flight = false;
            debug!(key = %key, "pending write superseded");
            return true;
        }

        pending.order.push_back(key.clone());
        pending.slots.insert(
            key,
            Slot {
                write,
                attempts: 0,
                not_before: None,
                generation: 0,
                in_flight: false,
            },
        );
        false
    }

    /// Number of writes awaiting persistence, including any being saved.
    pub fn len(&self) -> usize {
        self.pending().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of pending writes in flush order.
    pub fn snapshot(&self) -> Vec<PendingWrite> {
        let pending = self.pending();
        pending
            .order
            .iter()
            .filter_map(|key| pending.slots.get(key))
            .map(|slot| slot.write.clone())
            .collect()
    }

    /// Subscribes to writes dropped after exhausting their retries.
    pub fn subscribe_dead_letters(&self) -> broadcast::Receiver<DeadLetter> {
        self.dead_letters.subscribe()
    }

    /// Claims up to one batch of writes whose backoff has elapsed.
    ///
    /// Called with the flush guard held, so any slot still marked in flight
    /// belongs to a flush that was cancelled before settling it.
    fn claim_ready(&self, ignore_backoff: bool) -> Vec<Claim> {
        let now = Instant::now();
        let mut pending = self.pending();
        let Pending { order, slots } = &mut *pending;

        let mut batch = Vec::new();
        for key in order.iter() {
            if batch.len() >= self.policy.batch_size {
                break;
            }
            let Some(slot) = slots.get_mut(key) else {
                continue;
            };
            if slot.in_flight {
                debug!(key = %key, "reclaiming write from an interrupted flush");
            }
            let ready = ignore_backoff || slot.not_before.map_or(true, |at| now >= at);
            if !ready {
                slot.in_flight = false;
                continue;
            }
            slot.in_flight = true;
            batch.push(Claim {
                key: key.clone(),
                value: slot.write.value.clone(),
                attempts: slot.attempts,
                generation: slot.generation,
            });
        }
        batch
    }

    /// Drops a persisted write unless a newer one replaced it meanwhile.
    fn settle_saved(&self, claim: &Claim) {
        let mut pending = self.pending();
        match pending.slots.get(&claim.key) {
            Some(slot) if slot.generation == claim.generation => {
                pending.unlink(&claim.key);
            }
            _ => debug!(key = %claim.key, "persisted write superseded while in flight, newer value stays queued"),
        }
    }

    /// Records a failed attempt against the claimed slot.
    fn settle_failed(&self, claim: &Claim, attempts: u32) -> Failure {
        let mut pending = self.pending();
        let slot = match pending.slots.get_mut(&claim.key) {
            Some(slot) if slot.generation == claim.generation => slot,
            _ => return Failure::Superseded,
        };
        if attempts < self.policy.max_retries {
            slot.attempts = attempts;
            slot.not_before = Some(Instant::now() + self.policy.backoff(attempts));
            slot.in_flight = false;
            return Failure::Retry;
        }
        match pending.unlink(&claim.key) {
            Some(slot) => Failure::Exhausted(slot.write),
            None => Failure::Superseded,
        }
    }

    fn dead_letter(&self, write: PendingWrite, attempts: u32, last_error: CacheError) {
        error!(
            key = %write.key,
            attempts,
            error = %last_error,
            "write-behind retries exhausted, dropping pending write"
        );
        let letter = DeadLetter {
            key: write.key,
            value: write.value,
            attempts,
            last_error,
        };
        // No subscriber is fine: the loss is already logged
        let _ = self.dead_letters.send(letter);
    }

    // == Flush ==
    /// Persists one batch of ready writes through `saver`.
    ///
    /// Cancelling the returned future leaves every unsettled write queued
    /// for the next flush.
    pub async fn flush<S>(&self, saver: &S) -> FlushReport
    where
        S: Saver + ?Sized,
    {
        self.flush_batch(saver, false).await
    }

    async fn flush_batch<S>(&self, saver: &S, ignore_backoff: bool) -> FlushReport
    where
        S: Saver + ?Sized,
    {
        let _single_consumer = self.flush_guard.lock().await;
        let mut report = FlushReport::default();

        for claim in self.claim_ready(ignore_backoff) {
            let attempts = claim.attempts + 1;
            match saver.save(&claim.key, &claim.value).await {
                Ok(()) => {
                    debug!(key = %claim.key, attempts, "pending write persisted");
                    self.settle_saved(&claim);
                    report.persisted += 1;
                }
                Err(e) => {
                    let err = CacheError::saver(e);
                    match self.settle_failed(&claim, attempts) {
                        Failure::Retry => {
                            warn!(key = %claim.key, attempts, error = %err, "pending write failed, will retry");
                            report.retried += 1;
                        }
                        Failure::Exhausted(write) => {
                            self.dead_letter(write, attempts, err);
                            report.dead_lettered += 1;
                        }
                        Failure::Superseded => {
                            debug!(key = %claim.key, error = %err, "failed write superseded while in flight, dropping");
                        }
                    }
                }
            }
        }
        report
    }

    // == Drain ==
    /// Flushes until the queue is empty, ignoring retry backoff.
    ///
    /// Writes that keep failing are dead-lettered once out of attempts.
    pub async fn drain<S>(&self, saver: &S) -> FlushReport
    where
        S: Saver + ?Sized,
    {
        let mut total = FlushReport::default();
        while !self.is_empty() {
            let report = self.flush_batch(saver, true).await;
            if report.is_empty() {
                break;
            }
            total.absorb(report);
        }
        total
    }
}
