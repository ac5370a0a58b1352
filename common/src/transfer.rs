//! Transfer records and the transfer status state machine.

use crate::{Currency, RecipientId, ReferenceNumber, RemitError, TransferId, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Transfer status representing the lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Recorded, awaiting acceptance.
    Pending,
    /// Accepted and moving through the payout network.
    Processing,
    /// Funds delivered to the recipient.
    Completed,
    /// Payout failed; `failure_reason` says why.
    Failed,
    /// Cancelled before payout.
    Cancelled,
    /// Funds returned to the sender.
    Refunded,
}

impl TransferStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [TransferStatus; 6] = [
        TransferStatus::Pending,
        TransferStatus::Processing,
        TransferStatus::Completed,
        TransferStatus::Failed,
        TransferStatus::Cancelled,
        TransferStatus::Refunded,
    ];

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }

    /// Whether the owner may still cancel a transfer in this state.
    pub fn is_cancellable(&self) -> bool {
        self.can_transition_to(TransferStatus::Cancelled)
    }

    /// The authoritative transition table.
    pub fn valid_transitions(&self) -> &'static [TransferStatus] {
        match self {
            TransferStatus::Pending => &[TransferStatus::Processing, TransferStatus::Cancelled],
            TransferStatus::Processing => &[
                TransferStatus::Completed,
                TransferStatus::Failed,
                TransferStatus::Cancelled,
            ],
            TransferStatus::Completed
            | TransferStatus::Failed
            | TransferStatus::Cancelled
            | TransferStatus::Refunded => &[],
        }
    }

    /// Check if transition to given state is valid.
    pub fn can_transition_to(&self, next: TransferStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    /// Wire/storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Processing => "processing",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
            TransferStatus::Cancelled => "cancelled",
            TransferStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferStatus {
    type Err = RemitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransferStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| RemitError::InvalidRequest {
                message: format!("unknown transfer status '{}'", s),
                field: Some("status".to_string()),
            })
    }
}

/// Channel through which funds reach the recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    BankDeposit,
    MobileWallet,
    CashPickup,
}

impl DeliveryMethod {
    /// Days from creation until the funds are expected to arrive.
    pub fn delivery_days(&self) -> i64 {
        match self {
            DeliveryMethod::MobileWallet => 1,
            DeliveryMethod::BankDeposit | DeliveryMethod::CashPickup => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMethod::BankDeposit => "bank_deposit",
            DeliveryMethod::MobileWallet => "mobile_wallet",
            DeliveryMethod::CashPickup => "cash_pickup",
        }
    }
}

impl fmt::Display for DeliveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryMethod {
    type Err = RemitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bank_deposit" => Ok(DeliveryMethod::BankDeposit),
            "mobile_wallet" => Ok(DeliveryMethod::MobileWallet),
            "cash_pickup" => Ok(DeliveryMethod::CashPickup),
            other => Err(RemitError::InvalidRequest {
                message: format!("unknown delivery method '{}'", other),
                field: Some("delivery_method".to_string()),
            }),
        }
    }
}

/// How the sender pays for the transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    BankTransfer,
    Debit,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Debit => "debit",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = RemitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "card" => Ok(PaymentMethod::Card),
            "bank_transfer" => Ok(PaymentMethod::BankTransfer),
            "debit" => Ok(PaymentMethod::Debit),
            other => Err(RemitError::InvalidRequest {
                message: format!("unknown payment method '{}'", other),
                field: Some("payment_method".to_string()),
            }),
        }
    }
}

/// A committed cross-border transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    pub id: TransferId,
    pub reference_number: ReferenceNumber,
    pub user_id: UserId,
    pub recipient_id: RecipientId,
    pub send_amount: Decimal,
    pub send_currency: Currency,
    pub receive_amount: Decimal,
    pub receive_currency: Currency,
    /// Six-decimal rate the transfer settled at.
    pub exchange_rate: Decimal,
    pub fee_amount: Decimal,
    /// `send_amount + fee_amount`.
    pub total_amount: Decimal,
    pub delivery_method: DeliveryMethod,
    pub status: TransferStatus,
    pub payment_method: PaymentMethod,
    pub estimated_delivery: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transfer {
    /// Apply a status change, enforcing the transition table.
    ///
    /// On error the record is left untouched.
    pub fn transition_to(
        &mut self,
        next: TransferStatus,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        self.status = next;
        self.updated_at = now;

        match next {
            TransferStatus::Completed => self.completed_at = Some(now),
            TransferStatus::Failed => {
                self.failure_reason = notes.map(str::to_string);
            }
            _ => {}
        }

        Ok(())
    }

    /// Whether `user` owns this transfer.
    pub fn is_owned_by(&self, user: UserId) -> bool {
        self.user_id == user
    }
}

/// One row of a transfer's append-only status history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusHistoryEntry {
    pub transfer_id: TransferId,
    pub status: TransferStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StatusHistoryEntry {
    pub fn new(
        transfer_id: TransferId,
        status: TransferStatus,
        notes: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            transfer_id,
            status,
            notes,
            created_at,
        }
    }
}

/// Error when attempting invalid state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: TransferStatus,
    pub to: TransferStatus,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid state transition from {} to {}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}
