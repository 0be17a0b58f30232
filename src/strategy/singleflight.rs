//! Singleflight Module
//!
//! Collapses concurrent calls for the same key into one in-flight future.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::{BoxFuture, FutureExt, Shared, WeakShared};

struct Flight<T> {
    id: u64,
    future: WeakShared<BoxFuture<'static, T>>,
}

type Flights<T> = Arc<Mutex<HashMap<String, Flight<T>>>>;

// == Singleflight ==
/// One in-flight call per key; concurrent callers await the same result.
///
/// The shared future is driven by whichever caller polls it. Once every
/// caller has been dropped the future is dropped with them, so a cancelled
/// call never completes unobserved. The next caller starts a fresh flight.
pub struct Singleflight<T> {
    flights: Flights<T>,
    next_id: AtomicU64,
}

impl<T> Default for Singleflight<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Singleflight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    fn flights(&self) -> MutexGuard<'_, HashMap<String, Flight<T>>> {
        lock(&self.flights)
    }

    // == Run ==
    /// Joins the flight for `key`, starting it with `start` if none is live.
    ///
    /// `start` is only invoked by the caller that starts the flight.
    pub async fn run<F, Fut>(&self, key: &str, start: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let shared = self.join_or_start(key, start);
        shared.await
    }

    fn join_or_start<F, Fut>(&self, key: &str, start: F) -> Shared<BoxFuture<'static, T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut flights = self.flights();
        if let Some(live) = flights.get(key).and_then(|f| f.future.upgrade()) {
            return live;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::clone(&self.flights);
        let owned_key = key.to_string();
        let work = start();

        let shared = async move {
            let output = work.await;
            let mut flights = lock(&registry);
            if flights.get(&owned_key).is_some_and(|f| f.id == id) {
                flights.remove(&owned_key);
            }
            output
        }
        .boxed()
        .shared();

        if let Some(future) = shared.downgrade() {
            flights.insert(key.to_string(), Flight { id, future });
        }
        shared
    }

    /// Number of keys with a live flight.
    pub fn in_flight(&self) -> usize {
        self.flights()
            .values()
            .filter(|f| f.future.upgrade().is_some())
            .count()
    }
}

fn lock<T>(flights: &Mutex<HashMap<String, Flight<T>>>) -> MutexGuard<'_, HashMap<String, Flight<T>>> {
    flights.lock().unwrap_or_else(PoisonError::into_inner)
}
