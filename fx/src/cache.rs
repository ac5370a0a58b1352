//! Exchange-rate cache with TTL over a durable rate store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use dashmap::DashMap;
use remit_common::time::constants;
use remit_common::{Clock, CurrencyPair, ExchangeRate};
use tracing::debug;

use crate::error::FxResult;

/// Durable keyed storage for the latest rate of each pair.
///
/// Upsert semantics: one row per pair, no history.
#[async_trait]
pub trait RateStore: Send + Sync {
    /// Load the stored rate for a pair, regardless of age.
    async fn load(&self, pair: &CurrencyPair) -> FxResult<Option<ExchangeRate>>;

    /// Insert or overwrite the rate for its pair.
    async fn upsert(&self, rate: &ExchangeRate) -> FxResult<()>;
}

/// In-process rate store.
#[derive(Default)]
pub struct MemoryRateStore {
    rates: DashMap<CurrencyPair, ExchangeRate>,
}

impl MemoryRateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

#[async_trait]
impl RateStore for MemoryRateStore {
    async fn load(&self, pair: &CurrencyPair) -> FxResult<Option<ExchangeRate>> {
        Ok(self.rates.get(pair).map(|r| r.clone()))
    }

    async fn upsert(&self, rate: &ExchangeRate) -> FxResult<()> {
        self.rates.insert(rate.pair.clone(), rate.clone());
        Ok(())
    }
}

/// Configuration for rate cache.
#[derive(Debug, Clone)]
pub struct RateCacheConfig {
    /// Age below which a stored rate counts as fresh.
    pub ttl: Duration,
}

impl Default for RateCacheConfig {
    fn default() -> Self {
        Self {
            ttl: constants::rate_cache_ttl(),
        }
    }
}

/// Freshness-aware view over a [`RateStore`].
pub struct RateCache {
    store: Arc<dyn RateStore>,
    clock: Arc<dyn Clock>,
    config: RateCacheConfig,
}

impl RateCache {
    /// Create a cache over `store`.
    pub fn new(store: Arc<dyn RateStore>, clock: Arc<dyn Clock>, config: RateCacheConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Get a rate from cache if it is still within the TTL.
    pub async fn get(&self, pair: &CurrencyPair) -> FxResult<Option<ExchangeRate>> {
        match self.store.load(pair).await? {
            Some(rate) if self.is_fresh(&rate) => {
                debug!(pair = %pair, "Cache hit");
                Ok(Some(rate))
            }
            Some(_) => {
                debug!(pair = %pair, "Cache entry expired");
                Ok(None)
            }
            None => {
                debug!(pair = %pair, "Cache miss");
                Ok(None)
            }
        }
    }

    /// Get whatever rate is stored for the pair, ignoring the TTL.
    pub async fn get_stale(&self, pair: &CurrencyPair) -> FxResult<Option<ExchangeRate>> {
        self.store.load(pair).await
    }

    /// Insert a rate into cache.
    pub async fn insert(&self, rate: &ExchangeRate) -> FxResult<()> {
        self.store.upsert(rate).await
    }

    /// Whether `rate` is younger than the TTL.
    pub fn is_fresh(&self, rate: &ExchangeRate) -> bool {
        rate.age(self.clock.now()) < self.config.ttl
    }

    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }
}

/// Shared rate cache.
pub type SharedRateCache = Arc<RateCache>;
