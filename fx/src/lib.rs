//! Remit FX
//!
//! Exchange-rate acquisition and quote calculation for the remittance core.
//!
//! # Features
//!
//! - Rate cache with a 30 minute TTL over a durable store (memory or Postgres)
//! - Upstream fetch under a bounded timeout, coalesced per currency pair
//! - Stale-cache fallback when the upstream fails
//! - Fixed fallback table when no upstream credential is configured
//! - Deterministic fee and amount calculation
//! - Quote registry with single redemption and expiry
//!
//! # Example
//!
//! ```rust,ignore
//! use remit_fx::{calculate, FeeSchedule, RateProvider};
//! use remit_common::{Currency, CurrencyPair};
//!
//! let pair = CurrencyPair::new(Currency::usd(), Currency::mxn());
//! let rate = provider.get_rate(&pair).await?;
//! let calc = calculate(dec!(100), rate.rate, &FeeSchedule::default())?;
//! ```

pub mod cache;
pub mod error;
pub mod pg;
pub mod provider;
pub mod quote;
pub mod quote_book;
pub mod singleflight;
pub mod source;

pub use cache::{MemoryRateStore, RateCache, RateCacheConfig, RateStore, SharedRateCache};
pub use error::{FxError, FxResult};
pub use pg::PgRateStore;
pub use provider::{RateProvider, RateProviderConfig, RateProviderStats, RateTable, ResolvedRate};
pub use quote::{calculate, Calculation, FeeSchedule, Quote};
pub use quote_book::{QuoteBook, QuoteBookConfig, QuoteBookStats};
pub use singleflight::SingleFlight;
pub use source::{
    is_configured_key, FallbackRateSource, HttpRateSource, HttpRateSourceConfig, RateSource,
};

#[cfg(any(test, feature = "test-utils"))]
pub use source::MockRateSource;
