//! Public tracking projection.

use remit_common::{
    Currency, RecipientId, ReferenceNumber, StatusHistoryEntry, Timestamp, Transfer,
    TransferStatus,
};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::recipient::RecipientProfile;

/// One step in a tracked transfer's timeline. Notes are not exposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineEntry {
    pub status: TransferStatus,
    pub timestamp: Timestamp,
}

/// What anyone holding a reference number may see about a transfer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedTransfer {
    pub reference_number: ReferenceNumber,
    pub status: TransferStatus,
    pub recipient_first_name: Option<String>,
    pub destination_country: Option<String>,
    pub send_amount: Decimal,
    pub send_currency: Currency,
    pub receive_amount: Decimal,
    pub receive_currency: Currency,
    pub estimated_delivery: Timestamp,
    pub completed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub timeline: Vec<TimelineEntry>,
    /// Used to resolve the recipient fields; never serialized.
    #[serde(skip)]
    pub recipient_id: RecipientId,
}

impl TrackedTransfer {
    pub fn new(transfer: Transfer, history: &[StatusHistoryEntry]) -> Self {
        Self {
            reference_number: transfer.reference_number,
            status: transfer.status,
            recipient_first_name: None,
            destination_country: None,
            send_amount: transfer.send_amount,
            send_currency: transfer.send_currency,
            receive_amount: transfer.receive_amount,
            receive_currency: transfer.receive_currency,
            estimated_delivery: transfer.estimated_delivery,
            completed_at: transfer.completed_at,
            created_at: transfer.created_at,
            timeline: history
                .iter()
                .map(|e| TimelineEntry {
                    status: e.status,
                    timestamp: e.created_at,
                })
                .collect(),
            recipient_id: transfer.recipient_id,
        }
    }

    /// Fill in the recipient's first name and destination country.
    pub fn with_recipient(mut self, recipient: &RecipientProfile) -> Self {
        self.recipient_first_name = Some(recipient.first_name.clone());
        self.destination_country = Some(recipient.country_name.clone());
        self
    }
}
