//! Remit Simulator
//!
//! Load and fault scenarios against an in-memory remittance core.

use std::time::Duration;

use clap::Parser;
use remit_service::{telemetry, LogFormat};
use tracing::{error, info};

mod controller;
mod metrics;
mod scenario;
mod upstream;

use controller::{SimulationController, SimulationOptions};
use scenario::Scenario;

/// Remit Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "Remittance core load and fault simulation")]
struct Args {
    /// Scenario to run
    #[arg(short, long, value_enum, default_value = "quote-burst")]
    scenario: Scenario,

    /// Concurrent workers, or racing cancels per transfer
    #[arg(short, long, default_value = "8")]
    concurrency: usize,

    /// Operations to issue
    #[arg(short, long, default_value = "200")]
    requests: usize,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Simulated upstream latency in milliseconds
    #[arg(long, default_value = "20")]
    upstream_latency_ms: u64,

    /// Print service counters in Prometheus text format instead of JSON
    #[arg(long)]
    prometheus: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init("info", LogFormat::Pretty);

    let args = Args::parse();

    info!("Remit Simulator");
    info!("Scenario: {}", args.scenario.name());
    info!("Concurrency: {}", args.concurrency);
    info!("Requests: {}", args.requests);
    if let Some(seed) = args.seed {
        info!("Seed: {}", seed);
    }

    let options = SimulationOptions {
        concurrency: args.concurrency,
        requests: args.requests,
        seed: args.seed,
        upstream_latency: Duration::from_millis(args.upstream_latency_ms),
    };

    let mut controller = SimulationController::new(args.scenario, options)?;
    let report = controller.run().await?;

    info!("=== Simulation Results ===");
    info!("Operations: {}", report.operations.total);
    info!("Succeeded: {}", report.operations.succeeded);
    info!("Failed: {}", report.operations.failed);
    info!("Success rate: {:.2}%", report.operations.success_rate * 100.0);
    info!("Throughput: {:.2} ops/sec", report.operations.throughput_per_sec);
    info!("Avg latency: {}us", report.operations.average_latency_us);
    info!("P99 latency: {}us", report.operations.p99_latency_us);
    info!("Upstream fetches: {}", report.upstream_requests);

    for check in &report.checks {
        if check.passed {
            info!(check = %check.name, detail = %check.detail, "PASS");
        } else {
            error!(check = %check.name, detail = %check.detail, "FAIL");
        }
    }

    if args.prometheus {
        print!("{}", report.service.to_prometheus());
    } else {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    if !report.passed() {
        anyhow::bail!("scenario {} failed its checks", args.scenario.name());
    }

    Ok(())
}
