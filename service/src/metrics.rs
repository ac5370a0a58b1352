//! Counters for service monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use remit_fx::{QuoteBookStats, RateProviderStats};
use serde::Serialize;

/// Service metrics.
#[derive(Default)]
pub struct Metrics {
    /// Quotes issued.
    pub quotes_issued: AtomicU64,
    /// Quote requests rejected.
    pub quotes_rejected: AtomicU64,
    /// Transfers created.
    pub transfers_created: AtomicU64,
    /// Create requests rejected.
    pub transfers_rejected: AtomicU64,
    /// Transfers cancelled by their owner.
    pub transfers_cancelled: AtomicU64,
    /// Status transitions applied outside of cancellation.
    pub transfers_transitioned: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn quote_issued(&self) {
        self.quotes_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn quote_rejected(&self) {
        self.quotes_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transfer_created(&self) {
        self.transfers_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transfer_rejected(&self) {
        self.transfers_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transfer_cancelled(&self) {
        self.transfers_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transfer_transitioned(&self) {
        self.transfers_transitioned.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counters, with the rate provider's and quote book's alongside.
    pub fn snapshot(&self, rates: RateProviderStats, quotes: QuoteBookStats) -> MetricsSnapshot {
        MetricsSnapshot {
            quotes_issued: self.quotes_issued.load(Ordering::Relaxed),
            quotes_rejected: self.quotes_rejected.load(Ordering::Relaxed),
            transfers_created: self.transfers_created.load(Ordering::Relaxed),
            transfers_rejected: self.transfers_rejected.load(Ordering::Relaxed),
            transfers_cancelled: self.transfers_cancelled.load(Ordering::Relaxed),
            transfers_transitioned: self.transfers_transitioned.load(Ordering::Relaxed),
            rates,
            quotes,
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub quotes_issued: u64,
    pub quotes_rejected: u64,
    pub transfers_created: u64,
    pub transfers_rejected: u64,
    pub transfers_cancelled: u64,
    pub transfers_transitioned: u64,
    pub rates: RateProviderStats,
    pub quotes: QuoteBookStats,
}

impl MetricsSnapshot {
    /// Render in Prometheus text format.
    pub fn to_prometheus(&self) -> String {
        let metrics: [(&str, &str, &str, u64); 14] = [
            ("remit_quotes_issued", "Total quotes issued", "counter", self.quotes_issued),
            ("remit_quotes_rejected", "Total quote requests rejected", "counter", self.quotes_rejected),
            ("remit_transfers_created", "Total transfers created", "counter", self.transfers_created),
            ("remit_transfers_rejected", "Total transfer requests rejected", "counter", self.transfers_rejected),
            ("remit_transfers_cancelled", "Total transfers cancelled by owner", "counter", self.transfers_cancelled),
            ("remit_transfers_transitioned", "Total status transitions applied", "counter", self.transfers_transitioned),
            ("remit_rate_cache_hits", "Rate lookups served from fresh cache", "counter", self.rates.cache_hits),
            ("remit_rate_upstream_fetches", "Upstream rate fetches started", "counter", self.rates.upstream_fetches),
            ("remit_rate_coalesced", "Rate lookups that joined an in-flight fetch", "counter", self.rates.coalesced),
            ("remit_rate_stale_served", "Stale rates served after upstream failure", "counter", self.rates.stale_served),
            ("remit_rate_failures", "Rate lookups that failed outright", "counter", self.rates.failures),
            ("remit_quote_book_size", "Quotes held in the book", "gauge", self.quotes.total_quotes as u64),
            ("remit_quote_book_expired", "Expired quotes not yet swept", "gauge", self.quotes.expired_quotes as u64),
            ("remit_quote_book_redeemed", "Redeemed quotes awaiting expiry", "gauge", self.quotes.redeemed_quotes as u64),
        ];

        let mut out = String::new();
        for (name, help, kind, value) in metrics {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} {kind}\n{name} {value}\n\n"
            ));
        }
        out
    }
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_increment() {
        let metrics = Metrics::new();

        metrics.quote_issued();
        metrics.quote_issued();
        metrics.transfer_created();
        metrics.transfer_cancelled();

        let snapshot = metrics.snapshot(RateProviderStats::default(), QuoteBookStats::default());
        assert_eq!(snapshot.quotes_issued, 2);
        assert_eq!(snapshot.transfers_created, 1);
        assert_eq!(snapshot.transfers_cancelled, 1);
        assert_eq!(snapshot.transfers_transitioned, 0);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = Metrics::new();
        metrics.transfer_created();

        let stats = RateProviderStats {
            cache_hits: 7,
            ..RateProviderStats::default()
        };
        let quotes = QuoteBookStats {
            total_quotes: 3,
            ..QuoteBookStats::default()
        };
        let output = metrics.snapshot(stats, quotes).to_prometheus();
        assert!(output.contains("remit_transfers_created 1"));
        assert!(output.contains("# TYPE remit_quote_book_size gauge\nremit_quote_book_size 3"));
        assert!(output.contains("remit_rate_cache_hits 7"));
        assert!(output.contains("# TYPE remit_quotes_issued counter"));
    }
}
