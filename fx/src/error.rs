//! FX error types.

use remit_common::{CurrencyPair, RemitError};
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors that can occur while acquiring a rate.
///
/// `Clone` so a single coalesced fetch can hand its outcome to every waiter.
#[derive(Debug, Clone, Error)]
pub enum FxError {
    /// Rate not available for the requested currency pair.
    #[error("Rate not available for {0}")]
    RateNotAvailable(CurrencyPair),

    /// Upstream source did not answer within the fetch bound.
    #[error("Rate fetch for {pair} timed out after {timeout_ms}ms")]
    Timeout { pair: CurrencyPair, timeout_ms: u64 },

    /// Upstream source returned an error or an unusable response.
    #[error("Rate source {source_name} failed: {message}")]
    SourceError {
        source_name: String,
        message: String,
    },

    /// Source returned a rate that is not strictly positive.
    #[error("Invalid rate {rate} for {pair}")]
    InvalidRate { pair: CurrencyPair, rate: Decimal },

    /// Rate store failure.
    #[error("Rate store error: {0}")]
    Store(String),
}

impl FxError {
    pub fn source_error(source_name: &str, message: impl Into<String>) -> Self {
        FxError::SourceError {
            source_name: source_name.to_string(),
            message: message.into(),
        }
    }
}

/// Result type for FX operations.
pub type FxResult<T> = Result<T, FxError>;

impl From<FxError> for RemitError {
    fn from(err: FxError) -> Self {
        match err {
            FxError::Store(message) => RemitError::Storage(message),
            FxError::RateNotAvailable(ref pair)
            | FxError::Timeout { ref pair, .. }
            | FxError::InvalidRate { ref pair, .. } => RemitError::RateUnavailable {
                pair: pair.clone(),
                reason: err.to_string(),
            },
            FxError::SourceError { .. } => RemitError::Internal(err.to_string()),
        }
    }
}
