//! Per-transfer async locks.

use std::sync::Arc;

use dashmap::DashMap;
use remit_common::TransferId;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Serialises read-check-write sequences on a single transfer.
///
/// Operations on different transfers never contend.
#[derive(Default)]
pub struct RecordLocks {
    locks: DashMap<TransferId, Arc<Mutex<()>>>,
}

impl RecordLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`.
    pub async fn acquire(&self, id: TransferId) -> OwnedMutexGuard<()> {
        let mutex = self.locks.entry(id).or_default().clone();
        mutex.lock_owned().await
    }

    /// Drop the lock entry for `id` if nobody holds or waits on it.
    pub fn prune(&self, id: TransferId) {
        self.locks.remove_if(&id, |_, mutex| Arc::strong_count(mutex) == 1);
    }

    /// Number of tracked lock entries.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
