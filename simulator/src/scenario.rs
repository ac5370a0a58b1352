//! Simulation scenarios.

use clap::ValueEnum;
use serde::Serialize;

/// A simulation scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    /// Many concurrent quotes over a handful of pairs. Exercises cache hits
    /// and fetch coalescing.
    QuoteBurst,
    /// Concurrent cancels racing on each transfer. Exactly one per
    /// transfer may win.
    CancelRace,
    /// Quotes keep flowing while the upstream is down, served from stale
    /// cache, then recover once it returns.
    UpstreamOutage,
}

impl Scenario {
    pub fn name(&self) -> &'static str {
        match self {
            Scenario::QuoteBurst => "quote-burst",
            Scenario::CancelRace => "cancel-race",
            Scenario::UpstreamOutage => "upstream-outage",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Scenario::QuoteBurst => "Concurrent quotes across destination currencies",
            Scenario::CancelRace => "Concurrent cancellation of the same transfers",
            Scenario::UpstreamOutage => "Quotes during and after an upstream rate outage",
        }
    }
}

/// Destinations quotes are spread across.
pub const DESTINATIONS: [&str; 6] = ["MXN", "PHP", "INR", "COP", "GTQ", "NGN"];
