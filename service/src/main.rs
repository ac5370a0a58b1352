//! remitd: command-line entry point for the remittance core.

use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use remit_common::{Currency, UserId};
use remit_service::{
    telemetry, Caller, MemoryRecipientDirectory, QuoteRequest, RemittanceService, ServiceConfig,
};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "remitd", version, about = "Remittance core")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve the current rate for a currency pair.
    Rate {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
    },
    /// Resolve rates from a base currency to every supported destination.
    Rates {
        #[arg(long)]
        base: Option<String>,
    },
    /// Price a transfer.
    Quote {
        #[arg(long)]
        amount: Decimal,
        #[arg(long)]
        to: String,
        #[arg(long)]
        from: Option<String>,
    },
    /// Apply database migrations.
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ServiceConfig::from_env().context("Failed to load configuration")?;
    telemetry::init(&config.log_level, config.log_format);

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }

    match cli.command {
        Command::Migrate => migrate(&config).await,
        Command::Rate { from, to } => {
            let service = build(config).await?;
            let rate = service
                .exchange_rate(Currency::parse(&from)?, Currency::parse(&to)?)
                .await?;
            print_json(&rate)
        }
        Command::Rates { base } => {
            let service = build(config).await?;
            let base = base.as_deref().map(Currency::parse).transpose()?;
            print_json(&service.all_rates(base).await)
        }
        Command::Quote { amount, to, from } => {
            let service = build(config).await?;
            let request = QuoteRequest {
                send_amount: amount,
                send_currency: from.as_deref().map(Currency::parse).transpose()?,
                receive_currency: Currency::parse(&to)?,
            };
            let quote = service
                .quote(&Caller::unverified(UserId::new()), request)
                .await?;
            print_json(&quote)
        }
    }
}

async fn build(config: ServiceConfig) -> anyhow::Result<RemittanceService> {
    let directory = Arc::new(MemoryRecipientDirectory::new());
    let (service, _pool) = RemittanceService::from_config(config, directory).await?;
    info!(source = service.rate_source(), "Service ready");
    Ok(service)
}

async fn migrate(config: &ServiceConfig) -> anyhow::Result<()> {
    let Some(url) = config.database_url.as_deref() else {
        bail!("DATABASE_URL must be set to run migrations");
    };

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(1)
        .connect(url)
        .await
        .context("Failed to connect to database")?;
    sqlx::migrate!("../migrations")
        .run(&pool)
        .await
        .context("Failed to apply migrations")?;

    info!("Migrations applied");
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
