//! Remit Service
//!
//! The caller-facing remittance core: quotes against live or cached rates,
//! commits quotes as transfers, and exposes listing, details, public
//! tracking and cancellation. Also hosts configuration, metrics and the
//! tracing bootstrap shared by the binaries.

pub mod config;
pub mod directory;
pub mod metrics;
pub mod service;
pub mod telemetry;

#[cfg(test)]
mod scenarios;

pub use config::{LogFormat, RateSettings, ServiceConfig, TransferLimits};
pub use directory::{Caller, MemoryRecipientDirectory, Recipient, RecipientDirectory, RecipientSummary};
pub use metrics::{Metrics, MetricsSnapshot, SharedMetrics};
pub use service::{
    CalculatorResult, CreateTransferRequest, QuoteRequest, RemittanceService, ServiceComponents,
    TransferDetails, SUPPORTED_TARGETS,
};
