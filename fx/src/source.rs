//! Upstream exchange-rate sources.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use remit_common::{round_rate, Currency, CurrencyPair};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::error::{FxError, FxResult};

/// An external source of spot rates.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Get the source name.
    fn name(&self) -> &str;

    /// Fetch units of `pair.target` per unit of `pair.base`.
    async fn fetch_pair_rate(&self, pair: &CurrencyPair) -> FxResult<Decimal>;
}

/// Value some deployments ship in place of a real key.
const PLACEHOLDER_API_KEY: &str = "your-api-key-here";

/// Settings for [`HttpRateSource`].
#[derive(Debug, Clone)]
pub struct HttpRateSourceConfig {
    pub base_url: String,
    pub api_key: String,
    /// Transport-level timeout; the provider applies its own bound as well.
    pub request_timeout: Duration,
}

/// ExchangeRate-API style `GET {base_url}/{key}/pair/{base}/{target}` source.
pub struct HttpRateSource {
    client: Client,
    config: HttpRateSourceConfig,
}

#[derive(Debug, Deserialize)]
struct PairResponse {
    result: String,
    conversion_rate: Option<Decimal>,
    #[serde(rename = "error-type")]
    error_type: Option<String>,
}

impl HttpRateSource {
    pub fn new(config: HttpRateSourceConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn pair_url(&self, pair: &CurrencyPair) -> String {
        format!(
            "{}/{}/pair/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.api_key,
            pair.base,
            pair.target
        )
    }
}

#[async_trait]
impl RateSource for HttpRateSource {
    fn name(&self) -> &str {
        "exchangerate-api"
    }

    async fn fetch_pair_rate(&self, pair: &CurrencyPair) -> FxResult<Decimal> {
        let response = self
            .client
            .get(self.pair_url(pair))
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|e| FxError::source_error(self.name(), e.to_string()))?;

        if !response.status().is_success() {
            return Err(FxError::source_error(
                self.name(),
                format!("HTTP {}", response.status()),
            ));
        }

        let body: PairResponse = response
            .json()
            .await
            .map_err(|e| FxError::source_error(self.name(), e.to_string()))?;

        match (body.result.as_str(), body.conversion_rate) {
            ("success", Some(rate)) => Ok(rate),
            _ => Err(FxError::source_error(
                self.name(),
                body.error_type.unwrap_or_else(|| "API error".to_string()),
            )),
        }
    }
}

/// Fixed table of indicative rates used when no upstream is configured.
///
/// Each read applies up to ±1% random jitter.
pub struct FallbackRateSource {
    table: HashMap<CurrencyPair, Decimal>,
}

impl FallbackRateSource {
    /// Maximum relative jitter applied per read.
    const JITTER: f64 = 0.01;

    /// Default table quoted from USD.
    pub fn new() -> Self {
        let usd = Currency::usd();
        let entries: [(&str, Decimal); 15] = [
            ("MXN", Decimal::new(1715, 2)),
            ("PHP", Decimal::new(5589, 2)),
            ("INR", Decimal::new(8312, 2)),
            ("COP", Decimal::new(395000, 2)),
            ("GTQ", Decimal::new(782, 2)),
            ("DOP", Decimal::new(5850, 2)),
            ("HNL", Decimal::new(2472, 2)),
            ("NGN", Decimal::new(155000, 2)),
            ("GHS", Decimal::new(1520, 2)),
            ("KES", Decimal::new(15350, 2)),
            ("VND", Decimal::new(2450000, 2)),
            ("CNY", Decimal::new(724, 2)),
            ("GBP", Decimal::new(79, 2)),
            ("EUR", Decimal::new(92, 2)),
            ("USD", Decimal::ONE),
        ];

        let table = entries
            .into_iter()
            .map(|(code, rate)| (CurrencyPair::new(usd.clone(), Currency::new(code)), rate))
            .collect();

        Self { table }
    }

    /// The un-jittered table value for a pair.
    pub fn base_rate(&self, pair: &CurrencyPair) -> Option<Decimal> {
        self.table.get(pair).copied()
    }
}

impl Default for FallbackRateSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateSource for FallbackRateSource {
    fn name(&self) -> &str {
        "fallback-table"
    }

    async fn fetch_pair_rate(&self, pair: &CurrencyPair) -> FxResult<Decimal> {
        let base_rate = self
            .base_rate(pair)
            .ok_or_else(|| FxError::RateNotAvailable(pair.clone()))?;

        let jitter = rand::thread_rng().gen_range(-Self::JITTER..=Self::JITTER);
        let factor = Decimal::ONE + Decimal::from_f64_retain(jitter).unwrap_or(Decimal::ZERO);
        let rate = round_rate(base_rate * factor);

        debug!(pair = %pair, base_rate = %base_rate, rate = %rate, "Fallback rate");
        Ok(rate)
    }
}

/// Whether `api_key` looks like a real credential.
pub fn is_configured_key(api_key: Option<&str>) -> bool {
    matches!(api_key, Some(key) if !key.trim().is_empty() && key != PLACEHOLDER_API_KEY)
}

/// Mock rate source for testing.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockRateSource {
    name: String,
    rates: dashmap::DashMap<CurrencyPair, Decimal>,
    calls: std::sync::atomic::AtomicUsize,
    failing: std::sync::atomic::AtomicBool,
    delay: parking_lot::Mutex<Duration>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockRateSource {
    /// Create a new mock source.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rates: dashmap::DashMap::new(),
            calls: std::sync::atomic::AtomicUsize::new(0),
            failing: std::sync::atomic::AtomicBool::new(false),
            delay: parking_lot::Mutex::new(Duration::ZERO),
        }
    }

    /// Set a rate for a currency pair.
    pub fn set_rate(&self, pair: CurrencyPair, rate: Decimal) {
        self.rates.insert(pair, rate);
    }

    /// Make every fetch fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    /// Delay every fetch by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Number of fetches received so far.
    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl RateSource for MockRateSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_pair_rate(&self, pair: &CurrencyPair) -> FxResult<Decimal> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(FxError::source_error(&self.name, "upstream unavailable"));
        }

        self.rates
            .get(pair)
            .map(|r| *r)
            .ok_or_else(|| FxError::RateNotAvailable(pair.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn usd_to(code: &str) -> CurrencyPair {
        CurrencyPair::new(Currency::usd(), Currency::new(code))
    }

    #[tokio::test]
    async fn test_mock_source() {
        let source = MockRateSource::new("test");
        source.set_rate(usd_to("MXN"), dec!(17.15));

        assert_eq!(source.fetch_pair_rate(&usd_to("MXN")).await.unwrap(), dec!(17.15));
        assert!(source.fetch_pair_rate(&usd_to("PHP")).await.is_err());
        assert_eq!(source.calls(), 2);

        source.set_failing(true);
        assert!(matches!(
            source.fetch_pair_rate(&usd_to("MXN")).await,
            Err(FxError::SourceError { .. })
        ));
    }

    #[tokio::test]
    async fn test_fallback_jitter_within_one_percent() {
        let source = FallbackRateSource::new();
        let pair = usd_to("MXN");
        let base = source.base_rate(&pair).unwrap();

        for _ in 0..200 {
            let rate = source.fetch_pair_rate(&pair).await.unwrap();
            let deviation = ((rate - base) / base).abs();
            assert!(deviation <= dec!(0.0100001), "rate {} deviates {}", rate, deviation);
            assert!(rate.scale() <= 6);
        }
    }

    #[tokio::test]
    async fn test_fallback_unknown_pair() {
        let source = FallbackRateSource::new();
        let pair = CurrencyPair::new(Currency::eur(), Currency::mxn());

        assert!(matches!(
            source.fetch_pair_rate(&pair).await,
            Err(FxError::RateNotAvailable(p)) if p == pair
        ));
    }

    #[test]
    fn test_configured_key() {
        assert!(!is_configured_key(None));
        assert!(!is_configured_key(Some("")));
        assert!(!is_configured_key(Some("your-api-key-here")));
        assert!(is_configured_key(Some("abc123")));
    }

    #[test]
    fn test_pair_url() {
        let source = HttpRateSource::new(HttpRateSourceConfig {
            base_url: "https://v6.exchangerate-api.com/v6/".to_string(),
            api_key: "KEY".to_string(),
            request_timeout: Duration::from_secs(10),
        });

        assert_eq!(
            source.pair_url(&usd_to("MXN")),
            "https://v6.exchangerate-api.com/v6/KEY/pair/USD/MXN"
        );
    }
}
