//! Rate resolution: cache, coalesced upstream fetch, stale fallback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Duration;
use futures::future::join_all;
use remit_common::time::constants;
use remit_common::{Clock, Currency, CurrencyPair, DurationExt, ExchangeRate, Timestamp};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::cache::RateCache;
use crate::error::{FxError, FxResult};
use crate::singleflight::SingleFlight;
use crate::source::RateSource;

/// Configuration for the rate provider.
#[derive(Debug, Clone)]
pub struct RateProviderConfig {
    /// Upper bound on a single upstream fetch.
    pub fetch_timeout: Duration,
}

impl Default for RateProviderConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: constants::rate_fetch_timeout(),
        }
    }
}

/// A rate as handed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedRate {
    pub pair: CurrencyPair,
    pub rate: Decimal,
    /// When the underlying value was fetched from upstream.
    pub timestamp: Timestamp,
    /// Served past its TTL because a fresh fetch failed.
    pub stale: bool,
}

impl ResolvedRate {
    fn fresh(rate: ExchangeRate) -> Self {
        Self {
            pair: rate.pair,
            rate: rate.rate,
            timestamp: rate.fetched_at,
            stale: false,
        }
    }

    fn stale(rate: ExchangeRate) -> Self {
        Self {
            stale: true,
            ..Self::fresh(rate)
        }
    }
}

/// Rates for many targets against one base.
#[derive(Debug, Clone, Serialize)]
pub struct RateTable {
    pub base: Currency,
    /// Targets whose rate could not be resolved are omitted.
    pub rates: Vec<(Currency, Decimal)>,
    pub timestamp: Timestamp,
}

/// Provider counters.
#[derive(Debug, Default)]
struct ProviderCounters {
    cache_hits: AtomicU64,
    upstream_fetches: AtomicU64,
    coalesced: AtomicU64,
    stale_served: AtomicU64,
    failures: AtomicU64,
}

/// Snapshot of provider counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RateProviderStats {
    pub cache_hits: u64,
    pub upstream_fetches: u64,
    pub coalesced: u64,
    pub stale_served: u64,
    pub failures: u64,
}

/// Resolves exchange rates for the rest of the system.
///
/// Order of preference: a fresh cached rate, then a fetch from the configured
/// source (coalesced per pair and bounded by `fetch_timeout`), then whatever
/// stale rate the cache still holds.
pub struct RateProvider {
    source: Arc<dyn RateSource>,
    cache: Arc<RateCache>,
    clock: Arc<dyn Clock>,
    flights: SingleFlight<CurrencyPair, FxResult<ExchangeRate>>,
    config: RateProviderConfig,
    counters: ProviderCounters,
}

impl RateProvider {
    pub fn new(
        source: Arc<dyn RateSource>,
        cache: Arc<RateCache>,
        clock: Arc<dyn Clock>,
        config: RateProviderConfig,
    ) -> Self {
        Self {
            source,
            cache,
            clock,
            flights: SingleFlight::new(),
            config,
            counters: ProviderCounters::default(),
        }
    }

    /// Name of the upstream source in use.
    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Get the current rate for a currency pair.
    #[instrument(skip(self), fields(pair = %pair))]
    pub async fn get_rate(&self, pair: &CurrencyPair) -> FxResult<ResolvedRate> {
        match self.cache.get(pair).await {
            Ok(Some(rate)) => {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(ResolvedRate::fresh(rate));
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Rate cache read failed, fetching upstream"),
        }

        let fetch_error = match self.fetch_coalesced(pair).await {
            Ok(rate) => return Ok(ResolvedRate::fresh(rate)),
            Err(e) => e,
        };

        warn!(error = %fetch_error, "Upstream rate fetch failed, trying stale cache");

        match self.cache.get_stale(pair).await {
            Ok(Some(rate)) => {
                self.counters.stale_served.fetch_add(1, Ordering::Relaxed);
                info!(fetched_at = %rate.fetched_at, "Serving stale rate");
                Ok(ResolvedRate::stale(rate))
            }
            Ok(None) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                Err(FxError::RateNotAvailable(pair.clone()))
            }
            Err(e) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Stale cache read failed");
                Err(FxError::RateNotAvailable(pair.clone()))
            }
        }
    }

    /// Get rate between two currencies.
    pub async fn get_rate_for(&self, base: Currency, target: Currency) -> FxResult<ResolvedRate> {
        self.get_rate(&CurrencyPair::new(base, target)).await
    }

    /// Resolve `base` against each target concurrently.
    ///
    /// Targets that fail are left out of the table rather than failing the call.
    #[instrument(skip(self, targets), fields(base = %base, targets = targets.len()))]
    pub async fn all_rates(&self, base: &Currency, targets: &[Currency]) -> RateTable {
        let lookups = targets.iter().map(|target| async move {
            let pair = CurrencyPair::new(base.clone(), target.clone());
            (target.clone(), self.get_rate(&pair).await)
        });

        let rates = join_all(lookups)
            .await
            .into_iter()
            .filter_map(|(target, result)| match result {
                Ok(resolved) => Some((target, resolved.rate)),
                Err(e) => {
                    warn!(target = %target, error = %e, "Omitting rate from table");
                    None
                }
            })
            .collect();

        RateTable {
            base: base.clone(),
            rates,
            timestamp: self.clock.now(),
        }
    }

    /// Get provider statistics.
    pub fn stats(&self) -> RateProviderStats {
        RateProviderStats {
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            upstream_fetches: self.counters.upstream_fetches.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            stale_served: self.counters.stale_served.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    /// Fetch upstream, sharing one in-flight request per pair.
    async fn fetch_coalesced(&self, pair: &CurrencyPair) -> FxResult<ExchangeRate> {
        let source = self.source.clone();
        let cache = self.cache.clone();
        let clock = self.clock.clone();
        let timeout = self.config.fetch_timeout;
        let key = pair.clone();

        let (result, joined) = self
            .flights
            .run(pair.clone(), move || fetch_and_store(source, cache, clock, key, timeout))
            .await;

        if joined {
            self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
            debug!(pair = %pair, "Joined in-flight rate fetch");
        } else {
            self.counters.upstream_fetches.fetch_add(1, Ordering::Relaxed);
        }

        result
    }
}

/// One upstream fetch, validated and written through to the cache.
///
/// Owns its inputs so the future can outlive the caller that started it.
async fn fetch_and_store(
    source: Arc<dyn RateSource>,
    cache: Arc<RateCache>,
    clock: Arc<dyn Clock>,
    pair: CurrencyPair,
    timeout: Duration,
) -> FxResult<ExchangeRate> {
    let fetched = tokio::time::timeout(timeout.as_std(), source.fetch_pair_rate(&pair)).await;
    let rate = match fetched {
        Ok(result) => result?,
        Err(_) => {
            return Err(FxError::Timeout {
                pair,
                timeout_ms: u64::try_from(timeout.num_milliseconds()).unwrap_or(0),
            })
        }
    };

    if rate <= Decimal::ZERO {
        return Err(FxError::InvalidRate { pair, rate });
    }

    let rate = ExchangeRate::new(pair, rate, clock.now());
    if let Err(e) = cache.insert(&rate).await {
        // The fetched value is still good for this request.
        warn!(pair = %rate.pair, error = %e, "Failed to cache fetched rate");
    }

    debug!(pair = %rate.pair, rate = %rate.rate, source = source.name(), "Fetched rate");
    Ok(rate)
}
