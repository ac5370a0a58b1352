//! Per-key coalescing of concurrent async work.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

type SharedFuture<T> = Shared<BoxFuture<'static, T>>;

/// Runs at most one future per key at a time.
///
/// Callers arriving while a future for their key is in flight await the same
/// future and receive a clone of its output. The entry is removed once the
/// future resolves, so later callers start fresh work.
pub struct SingleFlight<K, T>
where
    T: Clone,
{
    in_flight: Mutex<HashMap<K, SharedFuture<T>>>,
}

impl<K, T> SingleFlight<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Run `make()` for `key`, or join the run already in flight.
    ///
    /// Returns the output and whether this caller joined an existing run.
    pub async fn run<F, Fut>(&self, key: K, make: F) -> (T, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (shared, joined) = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(&key) {
                Some(existing) => (existing.clone(), true),
                None => {
                    let shared = make().boxed().shared();
                    in_flight.insert(key.clone(), shared.clone());
                    (shared, false)
                }
            }
        };

        let output = shared.clone().await;

        let mut in_flight = self.in_flight.lock();
        if let Some(current) = in_flight.get(&key) {
            if Shared::ptr_eq(current, &shared) {
                in_flight.remove(&key);
            }
        }

        (output, joined)
    }

    /// Number of keys with work in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }
}

impl<K, T> Default for SingleFlight<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
