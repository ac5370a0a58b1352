//! In-process transfer store.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use remit_common::{
    ReferenceNumber, RemitError, Result, StatusHistoryEntry, Transfer, TransferId, TransferStatus,
    UserId,
};

use crate::store::{Page, TransferFilter, TransferStore};

#[derive(Default)]
struct Tables {
    transfers: HashMap<TransferId, Transfer>,
    by_reference: HashMap<String, TransferId>,
    history: HashMap<TransferId, Vec<StatusHistoryEntry>>,
}

/// Transfer store backed by a single lock over plain maps.
///
/// Every method takes the lock once, so each call is atomic.
#[derive(Default)]
pub struct MemoryTransferStore {
    tables: RwLock<Tables>,
}

impl MemoryTransferStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored transfers.
    pub fn len(&self) -> usize {
        self.tables.read().transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TransferStore for MemoryTransferStore {
    async fn insert(&self, transfer: &Transfer, initial: &StatusHistoryEntry) -> Result<()> {
        let mut tables = self.tables.write();

        let reference = transfer.reference_number.as_str().to_string();
        if tables.by_reference.contains_key(&reference) {
            return Err(RemitError::ReferenceCollision { attempts: 1 });
        }
        if tables.transfers.contains_key(&transfer.id) {
            return Err(RemitError::Storage(format!(
                "Transfer {} already exists",
                transfer.id
            )));
        }

        tables.by_reference.insert(reference, transfer.id);
        tables.transfers.insert(transfer.id, transfer.clone());
        tables.history.insert(transfer.id, vec![initial.clone()]);

        Ok(())
    }

    async fn get(&self, id: TransferId) -> Result<Option<Transfer>> {
        Ok(self.tables.read().transfers.get(&id).cloned())
    }

    async fn get_by_reference(&self, reference: &ReferenceNumber) -> Result<Option<Transfer>> {
        let tables = self.tables.read();
        Ok(tables
            .by_reference
            .get(reference.as_str())
            .and_then(|id| tables.transfers.get(id))
            .cloned())
    }

    async fn update_status(
        &self,
        expected: TransferStatus,
        updated: &Transfer,
        entry: &StatusHistoryEntry,
    ) -> Result<bool> {
        let mut tables = self.tables.write();

        let Some(current) = tables.transfers.get_mut(&updated.id) else {
            return Err(RemitError::NotFound(format!("Transfer {}", updated.id)));
        };
        if current.status != expected {
            return Ok(false);
        }

        current.status = updated.status;
        current.updated_at = updated.updated_at;
        current.completed_at = updated.completed_at;
        current.failure_reason = updated.failure_reason.clone();

        tables
            .history
            .entry(updated.id)
            .or_default()
            .push(entry.clone());

        Ok(true)
    }

    async fn history(&self, id: TransferId) -> Result<Vec<StatusHistoryEntry>> {
        let mut entries = self
            .tables
            .read()
            .history
            .get(&id)
            .cloned()
            .unwrap_or_default();
        // Stable sort keeps insertion order for equal timestamps.
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    async fn list_for_user(
        &self,
        user: UserId,
        filter: &TransferFilter,
        page: Page,
    ) -> Result<(Vec<Transfer>, u64)> {
        let tables = self.tables.read();

        let mut matching: Vec<&Transfer> = tables
            .transfers
            .values()
            .filter(|t| t.user_id == user && filter.matches(t))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = matching.len() as u64;
        let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
        let rows = matching
            .into_iter()
            .skip(offset)
            .take(page.limit() as usize)
            .cloned()
            .collect();

        Ok((rows, total))
    }
}
