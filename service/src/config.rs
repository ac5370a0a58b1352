//! Service configuration.

use chrono::Duration;
use remit_common::time::constants;
use remit_common::{Currency, DurationExt, RemitError, Result};
use remit_fx::{
    is_configured_key, FeeSchedule, HttpRateSourceConfig, QuoteBookConfig, RateCacheConfig,
    RateProviderConfig,
};
use remit_ledger::LedgerConfig;
use rust_decimal::Decimal;

/// Default ExchangeRate-API endpoint.
pub const DEFAULT_RATE_BASE_URL: &str = "https://v6.exchangerate-api.com/v6";

/// Exchange-rate configuration.
#[derive(Debug, Clone)]
pub struct RateSettings {
    /// Upstream credential. Absent or placeholder means the fallback table.
    pub api_key: Option<String>,
    /// Upstream base URL.
    pub base_url: String,
    /// Bound on a single upstream fetch.
    pub fetch_timeout: Duration,
    /// Freshness window for cached rates.
    pub cache_ttl: Duration,
}

impl Default for RateSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_RATE_BASE_URL.to_string(),
            fetch_timeout: constants::rate_fetch_timeout(),
            cache_ttl: constants::rate_cache_ttl(),
        }
    }
}

impl RateSettings {
    /// Settings for the HTTP source, or `None` when no usable key is set.
    pub fn http_source(&self) -> Option<HttpRateSourceConfig> {
        let key = self.api_key.as_deref();
        if !is_configured_key(key) {
            return None;
        }
        Some(HttpRateSourceConfig {
            base_url: self.base_url.clone(),
            api_key: key.unwrap_or_default().to_string(),
            request_timeout: self.fetch_timeout.as_std(),
        })
    }
}

/// Send amount bounds.
#[derive(Debug, Clone, Copy)]
pub struct TransferLimits {
    pub min_amount: Decimal,
    pub max_amount: Decimal,
}

impl Default for TransferLimits {
    fn default() -> Self {
        let ledger = LedgerConfig::default();
        Self {
            min_amount: ledger.min_amount,
            max_amount: ledger.max_amount,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Main service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Postgres URL. In-memory stores when unset.
    pub database_url: Option<String>,
    /// Exchange-rate configuration.
    pub rates: RateSettings,
    /// Service fee parameters.
    pub fees: FeeSchedule,
    /// Send amount bounds.
    pub limits: TransferLimits,
    /// How long an issued quote may be committed.
    pub quote_validity: Duration,
    /// Send currency used when a request names none.
    pub default_send_currency: String,
    /// Prefix of generated reference numbers.
    pub reference_prefix: String,
    /// Outstanding quotes allowed per user.
    pub max_quotes_per_user: usize,
    /// Log level.
    pub log_level: String,
    /// Log format.
    pub log_format: LogFormat,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            rates: RateSettings::default(),
            fees: FeeSchedule::default(),
            limits: TransferLimits::default(),
            quote_validity: constants::quote_validity(),
            default_send_currency: "USD".to_string(),
            reference_prefix: "RF".to_string(),
            max_quotes_per_user: QuoteBookConfig::default().max_per_user,
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("DATABASE_URL") {
            config.database_url = Some(url);
        }

        if let Some(key) = get("EXCHANGE_RATE_API_KEY") {
            config.rates.api_key = Some(key);
        }
        if let Some(url) = get("EXCHANGE_RATE_BASE_URL") {
            config.rates.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(secs) = get("RATE_FETCH_TIMEOUT_SECS") {
            config.rates.fetch_timeout = Duration::seconds(parse("RATE_FETCH_TIMEOUT_SECS", &secs)?);
        }
        if let Some(secs) = get("RATE_CACHE_TTL_SECS") {
            config.rates.cache_ttl = Duration::seconds(parse("RATE_CACHE_TTL_SECS", &secs)?);
        }

        if let Some(percent) = get("SERVICE_FEE_PERCENT") {
            config.fees.fee_percent = parse("SERVICE_FEE_PERCENT", &percent)?;
        }
        if let Some(fee) = get("MINIMUM_FEE") {
            config.fees.minimum_fee = parse("MINIMUM_FEE", &fee)?;
        }

        if let Some(min) = get("MIN_TRANSFER_AMOUNT") {
            config.limits.min_amount = parse("MIN_TRANSFER_AMOUNT", &min)?;
        }
        if let Some(max) = get("MAX_TRANSFER_AMOUNT") {
            config.limits.max_amount = parse("MAX_TRANSFER_AMOUNT", &max)?;
        }

        if let Some(secs) = get("QUOTE_VALIDITY_SECS") {
            config.quote_validity = Duration::seconds(parse("QUOTE_VALIDITY_SECS", &secs)?);
        }
        if let Some(currency) = get("DEFAULT_SEND_CURRENCY") {
            config.default_send_currency = currency;
        }
        if let Some(prefix) = get("REFERENCE_PREFIX") {
            config.reference_prefix = prefix;
        }

        if let Some(level) = get("LOG_LEVEL") {
            config.log_level = level;
        }
        if let Some(format) = get("LOG_FORMAT") {
            config.log_format = match format.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" | "text" => LogFormat::Pretty,
                other => {
                    return Err(RemitError::Configuration(format!(
                        "LOG_FORMAT must be json or pretty, got '{}'",
                        other
                    )))
                }
            };
        }

        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.rates.fetch_timeout <= Duration::zero() {
            return Err(config_error("Rate fetch timeout must be positive"));
        }
        if self.rates.cache_ttl <= Duration::zero() {
            return Err(config_error("Rate cache TTL must be positive"));
        }
        if self.quote_validity <= Duration::zero() {
            return Err(config_error("Quote validity must be positive"));
        }

        if self.fees.fee_percent < Decimal::ZERO {
            return Err(config_error("Service fee percent cannot be negative"));
        }
        if self.fees.minimum_fee < Decimal::ZERO {
            return Err(config_error("Minimum fee cannot be negative"));
        }

        if self.limits.min_amount <= Decimal::ZERO {
            return Err(config_error("Minimum transfer amount must be positive"));
        }
        if self.limits.min_amount > self.limits.max_amount {
            return Err(config_error(
                "Minimum transfer amount cannot exceed the maximum",
            ));
        }

        if self.reference_prefix.trim().is_empty() {
            return Err(config_error("Reference prefix cannot be empty"));
        }
        self.send_currency()?;

        if self.max_quotes_per_user == 0 {
            return Err(config_error("Quote cap per user must be at least 1"));
        }

        Ok(())
    }

    /// The default send currency, parsed.
    pub fn send_currency(&self) -> Result<Currency> {
        Currency::parse(&self.default_send_currency).map_err(|e| {
            RemitError::Configuration(format!("DEFAULT_SEND_CURRENCY: {}", e))
        })
    }

    pub fn cache_config(&self) -> RateCacheConfig {
        RateCacheConfig {
            ttl: self.rates.cache_ttl,
        }
    }

    pub fn provider_config(&self) -> RateProviderConfig {
        RateProviderConfig {
            fetch_timeout: self.rates.fetch_timeout,
        }
    }

    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            min_amount: self.limits.min_amount,
            max_amount: self.limits.max_amount,
            ..LedgerConfig::default()
        }
    }

    pub fn quote_book_config(&self) -> QuoteBookConfig {
        QuoteBookConfig {
            max_per_user: self.max_quotes_per_user,
            ..QuoteBookConfig::default()
        }
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| RemitError::Configuration(format!("{} has invalid value '{}'", key, value)))
}

fn config_error(message: &str) -> RemitError {
    RemitError::Configuration(message.to_string())
}
