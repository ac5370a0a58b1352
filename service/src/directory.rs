//! Recipient directory and caller identity.

use async_trait::async_trait;
use dashmap::DashMap;
use remit_common::{Currency, DeliveryMethod, RecipientId, Result, UserId};
use remit_ledger::RecipientProfile;
use serde::{Deserialize, Serialize};

/// The authenticated user behind a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: UserId,
    /// Identity checks passed; required to create transfers.
    pub kyc_verified: bool,
}

impl Caller {
    pub fn verified(user_id: UserId) -> Self {
        Self {
            user_id,
            kyc_verified: true,
        }
    }

    pub fn unverified(user_id: UserId) -> Self {
        Self {
            user_id,
            kyc_verified: false,
        }
    }
}

/// A saved recipient, joined with its destination country.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub id: RecipientId,
    pub owner_user_id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// ISO 3166 alpha-3 country code.
    pub country_code: String,
    pub country_name: String,
    pub country_currency: Currency,
    pub delivery_method: DeliveryMethod,
    pub bank_name: Option<String>,
    pub bank_account_number: Option<String>,
    pub mobile_wallet_number: Option<String>,
    pub is_active: bool,
}

impl Recipient {
    /// The subset the ledger works with.
    pub fn profile(&self) -> RecipientProfile {
        RecipientProfile {
            id: self.id,
            owner_user_id: self.owner_user_id,
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            country_code: self.country_code.clone(),
            country_name: self.country_name.clone(),
            country_currency: self.country_currency.clone(),
            delivery_method: self.delivery_method,
        }
    }

    /// What the owner sees on a transfer. Account numbers are left out.
    pub fn summary(&self) -> RecipientSummary {
        RecipientSummary {
            name: format!("{} {}", self.first_name, self.last_name),
            email: self.email.clone(),
            phone: self.phone.clone(),
            country: self.country_code.clone(),
            country_name: self.country_name.clone(),
            delivery_method: self.delivery_method,
            bank_name: self.bank_name.clone(),
        }
    }
}

/// Recipient details attached to a transfer for its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientSummary {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub country: String,
    pub country_name: String,
    pub delivery_method: DeliveryMethod,
    pub bank_name: Option<String>,
}

/// Lookup of saved recipients.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    /// Any recipient with this id, active or not.
    async fn find(&self, id: RecipientId) -> Result<Option<Recipient>>;
}

/// Directory held in memory.
#[derive(Default)]
pub struct MemoryRecipientDirectory {
    recipients: DashMap<RecipientId, Recipient>,
}

impl MemoryRecipientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a recipient.
    pub fn upsert(&self, recipient: Recipient) {
        self.recipients.insert(recipient.id, recipient);
    }

    /// Soft-delete a recipient. Returns false if it does not exist.
    pub fn deactivate(&self, id: RecipientId) -> bool {
        match self.recipients.get_mut(&id) {
            Some(mut recipient) => {
                recipient.is_active = false;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.recipients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }
}

#[async_trait]
impl RecipientDirectory for MemoryRecipientDirectory {
    async fn find(&self, id: RecipientId) -> Result<Option<Recipient>> {
        Ok(self.recipients.get(&id).map(|r| r.clone()))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// An active Mexican cash-pickup recipient owned by `owner`.
    pub fn mexican_recipient(owner: UserId) -> Recipient {
        Recipient {
            id: RecipientId::new(),
            owner_user_id: owner,
            first_name: "Maria".to_string(),
            last_name: "Lopez".to_string(),
            email: Some("maria@example.com".to_string()),
            phone: Some("+525512345678".to_string()),
            country_code: "MEX".to_string(),
            country_name: "Mexico".to_string(),
            country_currency: Currency::mxn(),
            delivery_method: DeliveryMethod::CashPickup,
            bank_name: None,
            bank_account_number: None,
            mobile_wallet_number: None,
            is_active: true,
        }
    }

    /// An active Philippine mobile-wallet recipient owned by `owner`.
    pub fn philippine_recipient(owner: UserId) -> Recipient {
        Recipient {
            id: RecipientId::new(),
            owner_user_id: owner,
            first_name: "Jose".to_string(),
            last_name: "Reyes".to_string(),
            email: None,
            phone: Some("+639171234567".to_string()),
            country_code: "PHL".to_string(),
            country_name: "Philippines".to_string(),
            country_currency: Currency::php(),
            delivery_method: DeliveryMethod::MobileWallet,
            bank_name: None,
            bank_account_number: None,
            mobile_wallet_number: Some("09171234567".to_string()),
            is_active: true,
        }
    }
}
