//! Remit Ledger
//!
//! Transfer records and the state machine that moves them from creation to a
//! terminal status, with an append-only status history per transfer.

pub mod engine;
pub mod locks;
pub mod memory;
pub mod pg;
pub mod recipient;
pub mod reference;
pub mod store;
pub mod tracking;

pub use engine::{LedgerConfig, NewTransfer, TransferLedger, TransferPage, TransferWithHistory};
pub use memory::MemoryTransferStore;
pub use pg::PgTransferStore;
pub use recipient::RecipientProfile;
pub use reference::{ReferenceGenerator, TimestampReferenceGenerator};
pub use store::{Page, Pagination, TransferFilter, TransferStore};
pub use tracking::{TimelineEntry, TrackedTransfer};

#[cfg(any(test, feature = "test-utils"))]
pub use reference::SequenceReferenceGenerator;
