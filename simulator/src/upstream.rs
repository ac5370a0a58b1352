//! Simulated upstream rate provider.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use remit_common::CurrencyPair;
use remit_fx::{FallbackRateSource, FxError, FxResult, RateSource};
use rust_decimal::Decimal;

/// Table-backed upstream with configurable latency and an outage switch.
pub struct SimulatedUpstream {
    table: FallbackRateSource,
    latency: Duration,
    down: AtomicBool,
    requests: AtomicU64,
}

impl SimulatedUpstream {
    pub fn new(latency: Duration) -> Self {
        Self {
            table: FallbackRateSource::new(),
            latency,
            down: AtomicBool::new(false),
            requests: AtomicU64::new(0),
        }
    }

    /// Start or end an outage.
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Requests received so far, including failed ones.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RateSource for SimulatedUpstream {
    fn name(&self) -> &str {
        "simulated-upstream"
    }

    async fn fetch_pair_rate(&self, pair: &CurrencyPair) -> FxResult<Decimal> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;

        if self.down.load(Ordering::SeqCst) {
            return Err(FxError::source_error(self.name(), "service unavailable"));
        }
        self.table.fetch_pair_rate(pair).await
    }
}
