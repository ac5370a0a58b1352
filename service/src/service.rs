//! Caller-facing remittance operations.

use std::sync::Arc;

use remit_common::{
    Clock, Currency, CurrencyPair, PaymentMethod, QuoteId, RecipientId, RemitError, Result,
    StatusHistoryEntry, SystemClock, Transfer, TransferId, TransferStatus,
};
use remit_fx::{
    calculate, FallbackRateSource, FeeSchedule, HttpRateSource, MemoryRateStore, PgRateStore,
    Quote, QuoteBook, RateCache, RateProvider, RateSource, RateStore, RateTable, ResolvedRate,
};
use remit_ledger::{
    MemoryTransferStore, NewTransfer, Page, PgTransferStore, TimestampReferenceGenerator,
    TrackedTransfer, TransferFilter, TransferLedger, TransferPage, TransferStore,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, instrument, warn};

use crate::config::ServiceConfig;
use crate::directory::{Caller, RecipientDirectory, RecipientSummary};
use crate::metrics::{Metrics, MetricsSnapshot};

/// Destination currencies offered by the rate table endpoint.
pub const SUPPORTED_TARGETS: [&str; 14] = [
    "MXN", "PHP", "INR", "COP", "GTQ", "DOP", "HNL", "NGN", "GHS", "KES", "VND", "CNY", "GBP",
    "EUR",
];

/// Request for a quote.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub send_amount: Decimal,
    /// Defaults to the configured send currency.
    pub send_currency: Option<Currency>,
    pub receive_currency: Currency,
}

/// Request to commit a quote as a transfer.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransferRequest {
    pub quote_id: QuoteId,
    pub recipient_id: RecipientId,
    pub send_amount: Decimal,
    pub receive_currency: Currency,
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
}

/// Fee breakdown returned by the public calculator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculatorResult {
    pub send_amount: Decimal,
    pub send_currency: Currency,
    pub receive_amount: Decimal,
    pub receive_currency: Currency,
    pub exchange_rate: Decimal,
    pub fee: Decimal,
    pub fee_percent: Decimal,
    pub total_amount: Decimal,
    pub rate_stale: bool,
}

/// A transfer as its owner sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferDetails {
    #[serde(flatten)]
    pub transfer: Transfer,
    /// Absent when the recipient has since been removed from the directory.
    pub recipient: Option<RecipientSummary>,
    pub status_history: Vec<StatusHistoryEntry>,
}

/// Everything the service is built from.
pub struct ServiceComponents {
    pub source: Arc<dyn RateSource>,
    pub rate_store: Arc<dyn RateStore>,
    pub transfer_store: Arc<dyn TransferStore>,
    pub directory: Arc<dyn RecipientDirectory>,
    pub clock: Arc<dyn Clock>,
}

/// The remittance core behind one facade.
pub struct RemittanceService {
    config: ServiceConfig,
    send_currency: Currency,
    clock: Arc<dyn Clock>,
    rates: Arc<RateProvider>,
    quotes: QuoteBook,
    ledger: TransferLedger,
    directory: Arc<dyn RecipientDirectory>,
    metrics: Metrics,
}

impl RemittanceService {
    /// Assemble the service from explicit components.
    pub fn new(config: ServiceConfig, components: ServiceComponents) -> Result<Self> {
        config.validate()?;
        let send_currency = config.send_currency()?;
        let clock = components.clock;

        let cache = Arc::new(RateCache::new(
            components.rate_store,
            clock.clone(),
            config.cache_config(),
        ));
        let rates = Arc::new(RateProvider::new(
            components.source,
            cache,
            clock.clone(),
            config.provider_config(),
        ));
        let quotes = QuoteBook::new(clock.clone(), config.quote_book_config());
        let ledger = TransferLedger::with_references(
            components.transfer_store,
            Arc::new(TimestampReferenceGenerator::new(config.reference_prefix.clone())),
            clock.clone(),
            config.ledger_config(),
        );

        Ok(Self {
            config,
            send_currency,
            clock,
            rates,
            quotes,
            ledger,
            directory: components.directory,
            metrics: Metrics::new(),
        })
    }

    /// Wire stores and the rate source from configuration.
    ///
    /// With `database_url` set, rates and transfers persist in Postgres and
    /// the pool is returned; otherwise both live in memory.
    pub async fn from_config(
        config: ServiceConfig,
        directory: Arc<dyn RecipientDirectory>,
    ) -> Result<(Self, Option<PgPool>)> {
        let source: Arc<dyn RateSource> = match config.rates.http_source() {
            Some(http) => {
                info!(base_url = %http.base_url, "Using HTTP rate source");
                Arc::new(HttpRateSource::new(http))
            }
            None => {
                warn!("No exchange rate API key configured, using fallback rate table");
                Arc::new(FallbackRateSource::new())
            }
        };

        let (rate_store, transfer_store, pool): (
            Arc<dyn RateStore>,
            Arc<dyn TransferStore>,
            Option<PgPool>,
        ) = match &config.database_url {
            Some(url) => {
                let pool = connect(url).await?;
                (
                    Arc::new(PgRateStore::new(pool.clone())),
                    Arc::new(PgTransferStore::new(pool.clone())),
                    Some(pool),
                )
            }
            None => {
                info!("No database configured, using in-memory stores");
                (
                    Arc::new(MemoryRateStore::new()),
                    Arc::new(MemoryTransferStore::new()),
                    None,
                )
            }
        };

        let service = Self::new(
            config,
            ServiceComponents {
                source,
                rate_store,
                transfer_store,
                directory,
                clock: Arc::new(SystemClock),
            },
        )?;

        Ok((service, pool))
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Price a transfer and register the quote for `caller`.
    #[instrument(skip(self, request), fields(user_id = %caller.user_id))]
    pub async fn quote(&self, caller: &Caller, request: QuoteRequest) -> Result<Quote> {
        let result = self.issue_quote(caller, request).await;
        match &result {
            Ok(_) => self.metrics.quote_issued(),
            Err(_) => self.metrics.quote_rejected(),
        }
        result
    }

    async fn issue_quote(&self, caller: &Caller, request: QuoteRequest) -> Result<Quote> {
        self.ledger.validate_amount(request.send_amount)?;

        let base = request
            .send_currency
            .unwrap_or_else(|| self.send_currency.clone());
        let pair = CurrencyPair::new(base, request.receive_currency);
        let resolved = self.rates.get_rate(&pair).await?;

        let quote = Quote::new(
            request.send_amount,
            &resolved,
            &self.config.fees,
            self.clock.now(),
            self.config.quote_validity,
        )?;
        self.quotes.issue(quote.clone(), caller.user_id)?;

        info!(
            quote_id = %quote.id,
            pair = %pair,
            send_amount = %quote.send_amount,
            rate = %quote.exchange_rate,
            stale = quote.rate_stale,
            "Quote issued"
        );
        Ok(quote)
    }

    /// Commit a previously issued quote as a transfer.
    #[instrument(skip(self, request), fields(
        user_id = %caller.user_id,
        quote_id = %request.quote_id,
        recipient_id = %request.recipient_id
    ))]
    pub async fn create_transfer(
        &self,
        caller: &Caller,
        request: CreateTransferRequest,
    ) -> Result<Transfer> {
        let result = self.commit_quote(caller, request).await;
        match &result {
            Ok(_) => self.metrics.transfer_created(),
            Err(_) => self.metrics.transfer_rejected(),
        }
        result
    }

    async fn commit_quote(&self, caller: &Caller, request: CreateTransferRequest) -> Result<Transfer> {
        if !caller.kyc_verified {
            return Err(RemitError::Forbidden(
                "KYC verification required to perform this action".to_string(),
            ));
        }

        let recipient = self
            .directory
            .find(request.recipient_id)
            .await?
            .filter(|r| r.is_active)
            .ok_or_else(|| RemitError::NotFound(format!("Recipient {}", request.recipient_id)))?;

        let quote = self.quotes.redeem(request.quote_id, caller.user_id)?;

        let created = self
            .ledger
            .create(NewTransfer {
                user_id: caller.user_id,
                recipient: recipient.profile(),
                send_amount: request.send_amount,
                receive_currency: request.receive_currency,
                payment_method: request.payment_method,
                notes: request.notes,
                quote,
            })
            .await;

        if let Err(e) = &created {
            if !matches!(e, RemitError::QuoteExpired { .. }) {
                self.quotes.release(request.quote_id);
            }
        }
        created
    }

    /// The caller's transfers, newest first.
    pub async fn list_transfers(
        &self,
        caller: &Caller,
        filter: &TransferFilter,
        page: Page,
    ) -> Result<TransferPage> {
        self.ledger.list(caller.user_id, filter, page).await
    }

    /// One of the caller's transfers with recipient and history.
    #[instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn get_transfer(&self, caller: &Caller, id: TransferId) -> Result<TransferDetails> {
        let found = self.ledger.get(id, caller.user_id).await?;
        let recipient = self
            .directory
            .find(found.transfer.recipient_id)
            .await?
            .map(|r| r.summary());

        Ok(TransferDetails {
            transfer: found.transfer,
            recipient,
            status_history: found.status_history,
        })
    }

    /// Public status lookup by reference number.
    pub async fn track_transfer(&self, reference: &str) -> Result<TrackedTransfer> {
        let tracked = self.ledger.track(reference).await?;
        match self.directory.find(tracked.recipient_id).await? {
            Some(recipient) => Ok(tracked.with_recipient(&recipient.profile())),
            None => Ok(tracked),
        }
    }

    /// Cancel one of the caller's transfers.
    pub async fn cancel_transfer(&self, caller: &Caller, id: TransferId) -> Result<Transfer> {
        let cancelled = self.ledger.cancel(id, caller.user_id).await?;
        self.metrics.transfer_cancelled();
        Ok(cancelled)
    }

    /// Operator or payment-processor status change.
    pub async fn transition(
        &self,
        id: TransferId,
        next: TransferStatus,
        notes: Option<&str>,
    ) -> Result<Transfer> {
        let updated = self.ledger.transition(id, next, notes).await?;
        self.metrics.transfer_transitioned();
        Ok(updated)
    }

    /// Current rate for one pair.
    pub async fn exchange_rate(&self, base: Currency, target: Currency) -> Result<ResolvedRate> {
        Ok(self.rates.get_rate_for(base, target).await?)
    }

    /// Rates from `base` to every supported destination currency.
    pub async fn all_rates(&self, base: Option<Currency>) -> RateTable {
        let base = base.unwrap_or_else(|| self.send_currency.clone());
        let targets: Vec<Currency> = SUPPORTED_TARGETS
            .iter()
            .map(|code| Currency::new(*code))
            .filter(|target| *target != base)
            .collect();
        self.rates.all_rates(&base, &targets).await
    }

    /// Fee breakdown for an amount, without registering a quote.
    pub async fn calculate(
        &self,
        amount: Decimal,
        from: Option<Currency>,
        to: Currency,
    ) -> Result<CalculatorResult> {
        if amount <= Decimal::ZERO {
            return Err(RemitError::invalid_amount(amount, "must be positive"));
        }

        let from = from.unwrap_or_else(|| self.send_currency.clone());
        let resolved = self.rates.get_rate_for(from.clone(), to.clone()).await?;
        let FeeSchedule { fee_percent, .. } = self.config.fees;
        let calc = calculate(amount, resolved.rate, &self.config.fees)?;

        Ok(CalculatorResult {
            send_amount: calc.send_amount,
            send_currency: from,
            receive_amount: calc.receive_amount,
            receive_currency: to,
            exchange_rate: calc.exchange_rate,
            fee: calc.fee,
            fee_percent,
            total_amount: calc.total_amount,
            rate_stale: resolved.stale,
        })
    }

    /// Drop expired quotes from the book.
    pub fn purge_expired_quotes(&self) -> usize {
        self.quotes.cleanup_expired()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.rates.stats(), self.quotes.stats())
    }

    /// Name of the rate source in use.
    pub fn rate_source(&self) -> &str {
        self.rates.source_name()
    }
}

async fn connect(url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .map_err(|e| RemitError::Storage(format!("Failed to connect to database: {}", e)))
}
