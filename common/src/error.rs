//! Error types for the remittance core.

use crate::{Currency, CurrencyPair, InvalidTransition, TransferId, TransferStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

/// Main error type for remittance operations.
#[derive(Error, Debug, Clone)]
pub enum RemitError {
    /// No fresh rate, no cached rate and no fallback value.
    #[error("Exchange rate unavailable for {pair}: {reason}")]
    RateUnavailable { pair: CurrencyPair, reason: String },

    /// Non-positive or out-of-bounds send amount.
    #[error("Invalid amount {amount}: {reason}")]
    InvalidAmount { amount: Decimal, reason: String },

    /// Receive currency does not match the recipient's country currency.
    #[error("Currency mismatch: recipient receives {expected}, got {actual}")]
    CurrencyMismatch { expected: Currency, actual: Currency },

    /// The quote passed its expiry before it was committed.
    #[error("Quote expired at {expired_at}; request a new quote")]
    QuoteExpired { expired_at: DateTime<Utc> },

    /// The quote cannot be used for this request.
    #[error("Quote rejected: {0}")]
    QuoteMismatch(String),

    /// Requested status change is not in the transition table.
    #[error("Illegal transition from {from} to {to}")]
    IllegalTransition {
        from: TransferStatus,
        to: TransferStatus,
    },

    /// Cancel requested on a transfer that is no longer pending or processing.
    #[error("Transfer {transfer_id} with status '{status}' cannot be cancelled")]
    NotCancellable {
        transfer_id: TransferId,
        status: TransferStatus,
    },

    /// Generated reference numbers kept colliding.
    #[error("Could not allocate a unique reference number after {attempts} attempts")]
    ReferenceCollision { attempts: u32 },

    /// Resource does not exist or is not visible to the caller.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller may not perform this operation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Malformed request.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        message: String,
        field: Option<String>,
    },

    /// Persistence failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Coarse bucket an outer transport maps to a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    BadRequest,
    Forbidden,
    NotFound,
    Conflict,
    Unavailable,
    Internal,
}

impl RemitError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemitError::RateUnavailable { .. }
                | RemitError::ReferenceCollision { .. }
                | RemitError::Storage(_)
        )
    }

    /// Get the error class.
    pub fn class(&self) -> ErrorClass {
        match self {
            RemitError::InvalidAmount { .. }
            | RemitError::CurrencyMismatch { .. }
            | RemitError::QuoteExpired { .. }
            | RemitError::QuoteMismatch(_)
            | RemitError::NotCancellable { .. }
            | RemitError::InvalidRequest { .. } => ErrorClass::BadRequest,
            RemitError::IllegalTransition { .. } => ErrorClass::Conflict,
            RemitError::Forbidden(_) => ErrorClass::Forbidden,
            RemitError::NotFound(_) => ErrorClass::NotFound,
            RemitError::RateUnavailable { .. } => ErrorClass::Unavailable,
            RemitError::ReferenceCollision { .. }
            | RemitError::Storage(_)
            | RemitError::Internal(_)
            | RemitError::Configuration(_) => ErrorClass::Internal,
        }
    }

    /// Get the stable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            RemitError::RateUnavailable { .. } => "RATE_UNAVAILABLE",
            RemitError::InvalidAmount { .. } => "INVALID_AMOUNT",
            RemitError::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            RemitError::QuoteExpired { .. } => "QUOTE_EXPIRED",
            RemitError::QuoteMismatch(_) => "QUOTE_MISMATCH",
            RemitError::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            RemitError::NotCancellable { .. } => "NOT_CANCELLABLE",
            RemitError::ReferenceCollision { .. } => "REFERENCE_COLLISION",
            RemitError::NotFound(_) => "NOT_FOUND",
            RemitError::Forbidden(_) => "FORBIDDEN",
            RemitError::InvalidRequest { .. } => "INVALID_REQUEST",
            RemitError::Storage(_) => "STORAGE_ERROR",
            RemitError::Internal(_) => "INTERNAL_ERROR",
            RemitError::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }

    /// Shorthand for an [`RemitError::InvalidAmount`].
    pub fn invalid_amount(amount: Decimal, reason: impl Into<String>) -> Self {
        RemitError::InvalidAmount {
            amount,
            reason: reason.into(),
        }
    }
}

impl From<InvalidTransition> for RemitError {
    fn from(err: InvalidTransition) -> Self {
        RemitError::IllegalTransition {
            from: err.from,
            to: err.to,
        }
    }
}

/// Result type alias for remittance operations.
pub type Result<T> = std::result::Result<T, RemitError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_classes() {
        let pair = CurrencyPair::new(Currency::usd(), Currency::mxn());
        let unavailable = RemitError::RateUnavailable {
            pair,
            reason: "no cache".to_string(),
        };
        assert_eq!(unavailable.class(), ErrorClass::Unavailable);
        assert!(unavailable.is_retryable());

        let collision = RemitError::ReferenceCollision { attempts: 5 };
        assert_eq!(collision.class(), ErrorClass::Internal);

        let amount = RemitError::invalid_amount(dec!(-1), "must be positive");
        assert_eq!(amount.class(), ErrorClass::BadRequest);
        assert_eq!(amount.error_code(), "INVALID_AMOUNT");
        assert!(!amount.is_retryable());
    }

    #[test]
    fn test_invalid_transition_conversion() {
        let err: RemitError = InvalidTransition {
            from: TransferStatus::Completed,
            to: TransferStatus::Cancelled,
        }
        .into();

        assert!(matches!(
            err,
            RemitError::IllegalTransition {
                from: TransferStatus::Completed,
                to: TransferStatus::Cancelled
            }
        ));
        assert_eq!(err.to_string(), "Illegal transition from completed to cancelled");
    }
}
