//! Transfer persistence contract.

use async_trait::async_trait;
use remit_common::{
    RecipientId, ReferenceNumber, RemitError, Result, StatusHistoryEntry, Transfer, TransferId,
    TransferStatus, UserId,
};
use serde::{Deserialize, Serialize};

/// Largest page a caller may request.
pub const MAX_PAGE_LIMIT: u32 = 50;

/// Page size when none is given.
pub const DEFAULT_PAGE_LIMIT: u32 = 10;

/// Optional narrowing of a transfer listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferFilter {
    pub status: Option<TransferStatus>,
    pub recipient_id: Option<RecipientId>,
}

impl TransferFilter {
    pub fn matches(&self, transfer: &Transfer) -> bool {
        self.status.map_or(true, |s| transfer.status == s)
            && self.recipient_id.map_or(true, |r| transfer.recipient_id == r)
    }
}

/// A validated one-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Page {
    page: u32,
    limit: u32,
}

impl Page {
    /// Validate `page >= 1` and `1 <= limit <= 50`.
    pub fn new(page: u32, limit: u32) -> Result<Self> {
        if page == 0 {
            return Err(RemitError::InvalidRequest {
                message: "page must be at least 1".to_string(),
                field: Some("page".to_string()),
            });
        }
        if limit == 0 || limit > MAX_PAGE_LIMIT {
            return Err(RemitError::InvalidRequest {
                message: format!("limit must be between 1 and {}", MAX_PAGE_LIMIT),
                field: Some("limit".to_string()),
            });
        }
        Ok(Self { page, limit })
    }

    /// Build from optional query values, applying defaults.
    pub fn from_query(page: Option<u32>, limit: Option<u32>) -> Result<Self> {
        Self::new(page.unwrap_or(1), limit.unwrap_or(DEFAULT_PAGE_LIMIT))
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

/// Pagination metadata returned with a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total_count: u64,
    pub total_pages: u64,
    pub has_more: bool,
}

impl Pagination {
    pub fn new(page: Page, total_count: u64) -> Self {
        let limit = u64::from(page.limit);
        Self {
            page: page.page,
            limit: page.limit,
            total_count,
            total_pages: total_count.div_ceil(limit),
            has_more: u64::from(page.page) * limit < total_count,
        }
    }
}

/// Durable storage for transfers and their status history.
///
/// Implementations must make `insert` and `update_status` atomic: the
/// transfer row and its history row are written together or not at all.
#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Persist a new transfer with its first history entry.
    ///
    /// Fails with [`RemitError::ReferenceCollision`] when the reference
    /// number is already taken.
    async fn insert(&self, transfer: &Transfer, initial: &StatusHistoryEntry) -> Result<()>;

    async fn get(&self, id: TransferId) -> Result<Option<Transfer>>;

    /// Look up by reference number (already normalised to upper case).
    async fn get_by_reference(&self, reference: &ReferenceNumber) -> Result<Option<Transfer>>;

    /// Compare-and-set the status of `updated.id`.
    ///
    /// Writes the status-related fields of `updated` and appends `entry` only
    /// if the stored status still equals `expected`. Returns whether the
    /// write happened.
    async fn update_status(
        &self,
        expected: TransferStatus,
        updated: &Transfer,
        entry: &StatusHistoryEntry,
    ) -> Result<bool>;

    /// History for a transfer, oldest first.
    async fn history(&self, id: TransferId) -> Result<Vec<StatusHistoryEntry>>;

    /// A user's transfers, newest first, with the unpaged match count.
    async fn list_for_user(
        &self,
        user: UserId,
        filter: &TransferFilter,
        page: Page,
    ) -> Result<(Vec<Transfer>, u64)>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_bounds() {
        assert!(Page::new(0, 10).is_err());
        assert!(Page::new(1, 0).is_err());
        assert!(Page::new(1, 51).is_err());
        assert!(Page::new(1, 50).is_ok());

        let page = Page::from_query(None, None).unwrap();
        assert_eq!((page.page(), page.limit(), page.offset()), (1, 10, 0));
        assert_eq!(Page::new(3, 20).unwrap().offset(), 40);
    }

    #[test]
    fn test_pagination_metadata() {
        let info = Pagination::new(Page::new(2, 10).unwrap(), 25);
        assert_eq!(info.total_pages, 3);
        assert!(info.has_more);

        let last = Pagination::new(Page::new(3, 10).unwrap(), 25);
        assert!(!last.has_more);

        let empty = Pagination::new(Page::default(), 0);
        assert_eq!(empty.total_pages, 0);
        assert!(!empty.has_more);
    }

    #[test]
    fn test_pagination_serializes_camel_case() {
        let json = serde_json::to_value(Pagination::new(Page::default(), 3)).unwrap();
        assert_eq!(json["totalCount"], 3);
        assert_eq!(json["hasMore"], false);
    }
}
