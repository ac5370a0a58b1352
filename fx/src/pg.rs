//! PostgreSQL rate store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use remit_common::{CurrencyPair, ExchangeRate};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};

use crate::cache::RateStore;
use crate::error::{FxError, FxResult};

/// `exchange_rates` table, one row per `(base_currency, target_currency)`.
pub struct PgRateStore {
    pool: PgPool,
}

impl PgRateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn store_error(err: sqlx::Error) -> FxError {
    FxError::Store(err.to_string())
}

#[async_trait]
impl RateStore for PgRateStore {
    async fn load(&self, pair: &CurrencyPair) -> FxResult<Option<ExchangeRate>> {
        let row = sqlx::query(
            r#"
            SELECT rate, fetched_at
            FROM exchange_rates
            WHERE base_currency = $1 AND target_currency = $2
            "#,
        )
        .bind(pair.base.code())
        .bind(pair.target.code())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let rate: Decimal = row.try_get("rate").map_err(store_error)?;
        let fetched_at: DateTime<Utc> = row.try_get("fetched_at").map_err(store_error)?;

        Ok(Some(ExchangeRate::new(pair.clone(), rate, fetched_at)))
    }

    async fn upsert(&self, rate: &ExchangeRate) -> FxResult<()> {
        sqlx::query(
            r#"
            INSERT INTO exchange_rates (base_currency, target_currency, rate, fetched_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (base_currency, target_currency)
            DO UPDATE SET rate = EXCLUDED.rate, fetched_at = EXCLUDED.fetched_at
            "#,
        )
        .bind(rate.pair.base.code())
        .bind(rate.pair.target.code())
        .bind(rate.rate)
        .bind(rate.fetched_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(())
    }
}
