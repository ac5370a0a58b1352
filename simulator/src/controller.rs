//! Simulation controller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use remit_common::{
    Currency, DeliveryMethod, DurationExt, PaymentMethod, RecipientId, Result, SystemClock,
    TransferId, TransferStatus, UserId,
};
use remit_fx::{MemoryRateStore, Quote};
use remit_ledger::MemoryTransferStore;
use remit_service::{
    Caller, CreateTransferRequest, MemoryRecipientDirectory, MetricsSnapshot, QuoteRequest,
    Recipient, RemittanceService, ServiceComponents, ServiceConfig,
};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use crate::metrics::{MetricsSummary, SimulationMetrics};
use crate::scenario::{Scenario, DESTINATIONS};
use crate::upstream::SimulatedUpstream;

/// Knobs shared by every scenario.
#[derive(Debug, Clone)]
pub struct SimulationOptions {
    /// Concurrent tasks (quote-burst) or racing cancels per transfer (cancel-race).
    pub concurrency: usize,
    /// Operations per scenario phase.
    pub requests: usize,
    pub seed: Option<u64>,
    /// Delay added to every upstream fetch.
    pub upstream_latency: Duration,
}

/// A named pass/fail check evaluated after a run.
#[derive(Debug, Clone, Serialize)]
pub struct Check {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl Check {
    fn new(name: &str, passed: bool, detail: String) -> Self {
        Self {
            name: name.to_string(),
            passed,
            detail,
        }
    }
}

/// Outcome of one scenario.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub scenario: Scenario,
    pub elapsed_ms: u128,
    pub upstream_requests: u64,
    pub operations: MetricsSummary,
    pub service: MetricsSnapshot,
    pub checks: Vec<Check>,
}

impl SimulationReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }
}

/// Drives one scenario against an in-memory service.
pub struct SimulationController {
    scenario: Scenario,
    options: SimulationOptions,
    rng: StdRng,
    service: Arc<RemittanceService>,
    upstream: Arc<SimulatedUpstream>,
    directory: Arc<MemoryRecipientDirectory>,
    cache_ttl: chrono::Duration,
}

impl SimulationController {
    pub fn new(scenario: Scenario, options: SimulationOptions) -> Result<Self> {
        let rng = match options.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        let mut config = ServiceConfig::default();
        if scenario == Scenario::UpstreamOutage {
            // Short enough that the run sees rates go stale.
            config.rates.cache_ttl = chrono::Duration::milliseconds(300);
        }
        let cache_ttl = config.rates.cache_ttl;

        let upstream = Arc::new(SimulatedUpstream::new(options.upstream_latency));
        let directory = Arc::new(MemoryRecipientDirectory::new());
        let service = RemittanceService::new(
            config,
            ServiceComponents {
                source: upstream.clone(),
                rate_store: Arc::new(MemoryRateStore::new()),
                transfer_store: Arc::new(MemoryTransferStore::new()),
                directory: directory.clone(),
                clock: Arc::new(SystemClock),
            },
        )?;

        Ok(Self {
            scenario,
            options,
            rng,
            service: Arc::new(service),
            upstream,
            directory,
            cache_ttl,
        })
    }

    /// Run the scenario to completion.
    pub async fn run(&mut self) -> Result<SimulationReport> {
        info!(
            scenario = self.scenario.name(),
            description = self.scenario.description(),
            concurrency = self.options.concurrency,
            requests = self.options.requests,
            "Running scenario"
        );

        let start = Instant::now();
        let (metrics, checks) = match self.scenario {
            Scenario::QuoteBurst => self.quote_burst().await,
            Scenario::CancelRace => self.cancel_race().await?,
            Scenario::UpstreamOutage => self.upstream_outage().await,
        };
        let elapsed = start.elapsed();

        Ok(SimulationReport {
            scenario: self.scenario,
            elapsed_ms: elapsed.as_millis(),
            upstream_requests: self.upstream.requests(),
            operations: metrics.summary(elapsed),
            service: self.service.metrics(),
            checks,
        })
    }

    async fn quote_burst(&mut self) -> (SimulationMetrics, Vec<Check>) {
        let plan = self.quote_plan(self.options.requests);
        let workers = self.options.concurrency.max(1);
        let chunk = plan.len().div_ceil(workers).max(1);

        let tasks = plan.chunks(chunk).map(|requests| {
            let service = self.service.clone();
            let requests = requests.to_vec();
            tokio::spawn(async move {
                let mut metrics = SimulationMetrics::new();
                for request in requests {
                    timed_quote(&service, request, &mut metrics).await;
                }
                metrics
            })
        });
        let metrics = collect(join_all(tasks).await);

        let fetches = self.upstream.requests();
        let checks = vec![
            Check::new(
                "all quotes issued",
                metrics.failed == 0,
                format!("{} of {} succeeded", metrics.succeeded, metrics.total),
            ),
            Check::new(
                "one upstream fetch per pair",
                fetches <= DESTINATIONS.len() as u64,
                format!("{} fetches for {} pairs", fetches, DESTINATIONS.len()),
            ),
        ];
        (metrics, checks)
    }

    async fn cancel_race(&mut self) -> Result<(SimulationMetrics, Vec<Check>)> {
        let owner = Caller::verified(UserId::new());
        let recipient = race_recipient(owner.user_id);
        let recipient_id = recipient.id;
        self.directory.upsert(recipient);

        let mut transfers = Vec::with_capacity(self.options.requests);
        for _ in 0..self.options.requests {
            let amount = self.random_amount();
            let quote = self
                .service
                .quote(
                    &owner,
                    QuoteRequest {
                        send_amount: amount,
                        send_currency: None,
                        receive_currency: Currency::mxn(),
                    },
                )
                .await?;
            let transfer = self
                .service
                .create_transfer(&owner, commit(&quote, recipient_id))
                .await?;
            transfers.push(transfer.id);
        }

        let racers = self.options.concurrency.max(2);
        let mut tasks = Vec::with_capacity(transfers.len() * racers);
        for id in &transfers {
            for _ in 0..racers {
                let service = self.service.clone();
                let id = *id;
                tasks.push(tokio::spawn(async move {
                    let mut metrics = SimulationMetrics::new();
                    let started = Instant::now();
                    match service.cancel_transfer(&owner, id).await {
                        Ok(_) => metrics.record_success(started.elapsed()),
                        Err(e) => metrics.record_failure(e.error_code(), started.elapsed()),
                    }
                    metrics
                }));
            }
        }
        let metrics = collect(join_all(tasks).await);

        let mut bad_histories = 0;
        for id in &transfers {
            if !self.cancelled_once(&owner, *id).await? {
                bad_histories += 1;
            }
        }

        let expected_losers = (transfers.len() * (racers - 1)) as u64;
        let checks = vec![
            Check::new(
                "one winner per transfer",
                metrics.succeeded == transfers.len() as u64,
                format!("{} wins for {} transfers", metrics.succeeded, transfers.len()),
            ),
            Check::new(
                "losers see not-cancellable",
                metrics.failures("NOT_CANCELLABLE") == expected_losers,
                format!(
                    "{} of {} losers",
                    metrics.failures("NOT_CANCELLABLE"),
                    expected_losers
                ),
            ),
            Check::new(
                "single cancellation entry",
                bad_histories == 0,
                format!("{} transfers with unexpected history", bad_histories),
            ),
        ];
        Ok((metrics, checks))
    }

    async fn upstream_outage(&mut self) -> (SimulationMetrics, Vec<Check>) {
        let mut metrics = SimulationMetrics::new();

        // Warm the cache for every destination.
        for code in DESTINATIONS {
            let request = self.quote_request(Currency::new(code));
            timed_quote(&self.service, request, &mut metrics).await;
        }

        self.wait_past_ttl().await;
        warn!("Upstream going down");
        self.upstream.set_down(true);

        let plan = self.quote_plan(self.options.requests);
        let outage = join_all(plan.into_iter().map(|request| {
            let service = self.service.clone();
            tokio::spawn(async move {
                let mut metrics = SimulationMetrics::new();
                let quote = timed_quote(&service, request, &mut metrics).await;
                (metrics, quote.map(|q| q.rate_stale))
            })
        }))
        .await;

        let mut outage_quotes = 0;
        let mut stale_quotes = 0;
        for joined in outage {
            match joined {
                Ok((m, stale)) => {
                    metrics.merge(&m);
                    if let Some(stale) = stale {
                        outage_quotes += 1;
                        if stale {
                            stale_quotes += 1;
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Quote task panicked"),
            }
        }

        info!("Upstream recovered");
        self.upstream.set_down(false);
        self.wait_past_ttl().await;

        let mut fresh_after = 0;
        for code in DESTINATIONS {
            let request = self.quote_request(Currency::new(code));
            if let Some(quote) = timed_quote(&self.service, request, &mut metrics).await {
                if !quote.rate_stale {
                    fresh_after += 1;
                }
            }
        }

        let checks = vec![
            Check::new(
                "quotes survive the outage",
                outage_quotes == self.options.requests,
                format!("{} of {} quoted", outage_quotes, self.options.requests),
            ),
            Check::new(
                "outage quotes flagged stale",
                stale_quotes == outage_quotes,
                format!("{} of {} stale", stale_quotes, outage_quotes),
            ),
            Check::new(
                "fresh rates after recovery",
                fresh_after == DESTINATIONS.len(),
                format!("{} of {} fresh", fresh_after, DESTINATIONS.len()),
            ),
        ];
        (metrics, checks)
    }

    async fn cancelled_once(&self, owner: &Caller, id: TransferId) -> Result<bool> {
        let details = self.service.get_transfer(owner, id).await?;
        let cancellations = details
            .status_history
            .iter()
            .filter(|e| e.status == TransferStatus::Cancelled)
            .count();
        Ok(details.status_history.len() == 2 && cancellations == 1)
    }

    async fn wait_past_ttl(&self) {
        let ttl = self.cache_ttl.as_std();
        tokio::time::sleep(ttl + Duration::from_millis(50)).await;
    }

    fn quote_plan(&mut self, count: usize) -> Vec<QuoteRequest> {
        (0..count)
            .map(|_| {
                let code = DESTINATIONS[self.rng.gen_range(0..DESTINATIONS.len())];
                self.quote_request(Currency::new(code))
            })
            .collect()
    }

    fn quote_request(&mut self, to: Currency) -> QuoteRequest {
        QuoteRequest {
            send_amount: self.random_amount(),
            send_currency: None,
            receive_currency: to,
        }
    }

    /// Whole-cent amount between 10.00 and 5000.00.
    fn random_amount(&mut self) -> Decimal {
        Decimal::new(self.rng.gen_range(1_000..=500_000), 2)
    }
}

async fn timed_quote(
    service: &RemittanceService,
    request: QuoteRequest,
    metrics: &mut SimulationMetrics,
) -> Option<Quote> {
    // Each simulated sender holds one quote.
    let caller = Caller::verified(UserId::new());
    let started = Instant::now();
    match service.quote(&caller, request).await {
        Ok(quote) => {
            metrics.record_success(started.elapsed());
            Some(quote)
        }
        Err(e) => {
            metrics.record_failure(e.error_code(), started.elapsed());
            None
        }
    }
}

fn collect(
    results: Vec<std::result::Result<SimulationMetrics, tokio::task::JoinError>>,
) -> SimulationMetrics {
    let mut total = SimulationMetrics::new();
    for result in results {
        match result {
            Ok(metrics) => total.merge(&metrics),
            Err(e) => warn!(error = %e, "Simulation task panicked"),
        }
    }
    total
}

fn commit(quote: &Quote, recipient_id: RecipientId) -> CreateTransferRequest {
    CreateTransferRequest {
        quote_id: quote.id,
        recipient_id,
        send_amount: quote.send_amount,
        receive_currency: quote.receive_currency.clone(),
        payment_method: PaymentMethod::Debit,
        notes: None,
    }
}

fn race_recipient(owner: UserId) -> Recipient {
    Recipient {
        id: RecipientId::new(),
        owner_user_id: owner,
        first_name: "Ana".to_string(),
        last_name: "Garcia".to_string(),
        email: None,
        phone: None,
        country_code: "MEX".to_string(),
        country_name: "Mexico".to_string(),
        country_currency: Currency::mxn(),
        delivery_method: DeliveryMethod::BankDeposit,
        bank_name: Some("Banco Simulado".to_string()),
        bank_account_number: Some("000123456789".to_string()),
        mobile_wallet_number: None,
        is_active: true,
    }
}
