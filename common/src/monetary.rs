//! Monetary types: currencies, pairs, exchange rates and rounding rules.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::RemitError;

/// Decimal places kept for send, receive, fee and total amounts.
pub const AMOUNT_DECIMAL_PLACES: u32 = 2;

/// Decimal places kept for a stored exchange rate.
pub const RATE_DECIMAL_PLACES: u32 = 6;

/// Round a monetary amount to two decimals, half away from zero.
pub fn round_amount(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(AMOUNT_DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
}

/// Round an exchange rate to six decimals, half away from zero.
pub fn round_rate(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(RATE_DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
}

/// ISO 4217 currency code.
///
/// Deserialization goes through [`Currency::parse`], so codes arriving over
/// the wire are validated and upper-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    /// Create a new currency from code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().to_uppercase())
    }

    /// Parse a user-supplied code, requiring exactly three ASCII letters.
    pub fn parse(code: &str) -> Result<Self, RemitError> {
        let code = code.trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(RemitError::InvalidRequest {
                message: format!("'{}' is not a three-letter currency code", code),
                field: Some("currency".to_string()),
            });
        }
        Ok(Self::new(code))
    }

    /// Get the currency code.
    pub fn code(&self) -> &str {
        &self.0
    }

    pub fn usd() -> Self {
        Self::new("USD")
    }

    pub fn eur() -> Self {
        Self::new("EUR")
    }

    pub fn mxn() -> Self {
        Self::new("MXN")
    }

    pub fn php() -> Self {
        Self::new("PHP")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Currency {
    type Error = RemitError;

    fn try_from(code: String) -> Result<Self, Self::Error> {
        Self::parse(&code)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

impl From<&str> for Currency {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A directed currency pair: one unit of `base` buys `rate` units of `target`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CurrencyPair {
    pub base: Currency,
    pub target: Currency,
}

impl CurrencyPair {
    /// Create a new currency pair.
    pub fn new(base: Currency, target: Currency) -> Self {
        Self { base, target }
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.target)
    }
}

/// A fetched exchange rate. One row per pair; newer fetches overwrite older ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRate {
    pub pair: CurrencyPair,
    /// Units of target per unit of base, six decimals.
    pub rate: Decimal,
    pub fetched_at: DateTime<Utc>,
}

impl ExchangeRate {
    /// Create a new rate, rounding to storage precision.
    pub fn new(pair: CurrencyPair, rate: Decimal, fetched_at: DateTime<Utc>) -> Self {
        Self {
            pair,
            rate: round_rate(rate),
            fetched_at,
        }
    }

    /// Age of this rate relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.fetched_at)
    }
}
