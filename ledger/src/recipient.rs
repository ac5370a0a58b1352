//! What the ledger needs to know about a transfer's recipient.

use remit_common::{Currency, DeliveryMethod, RecipientId, UserId};
use serde::{Deserialize, Serialize};

/// Recipient fields consumed at creation and in public projections.
///
/// Contact details and account numbers stay with the recipient directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientProfile {
    pub id: RecipientId,
    pub owner_user_id: UserId,
    pub first_name: String,
    pub last_name: String,
    /// ISO 3166 alpha-3 country code.
    pub country_code: String,
    pub country_name: String,
    pub country_currency: Currency,
    pub delivery_method: DeliveryMethod,
}

impl RecipientProfile {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}
