//! PostgreSQL transfer store.
//!
//! Status changes use an atomic compare-and-set on the `status` column inside
//! the same transaction that appends the history row.

use async_trait::async_trait;
use remit_common::{
    Currency, RecipientId, ReferenceNumber, RemitError, Result, StatusHistoryEntry, Transfer,
    TransferId, TransferStatus, UserId,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::store::{Page, TransferFilter, TransferStore};

const UNIQUE_VIOLATION: &str = "23505";
const REFERENCE_CONSTRAINT: &str = "transfers_reference_number_key";

const TRANSFER_COLUMNS: &str = r#"
    id, reference_number, user_id, recipient_id, send_amount, send_currency,
    receive_amount, receive_currency, exchange_rate, fee_amount, total_amount,
    delivery_method, status, payment_method, estimated_delivery, completed_at,
    failure_reason, notes, created_at, updated_at
"#;

/// Transfer store over a Postgres pool.
pub struct PgTransferStore {
    pool: PgPool,
}

impl PgTransferStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_transfer(row: &PgRow) -> Result<Transfer> {
        let status: String = row.try_get("status").map_err(storage)?;
        let delivery_method: String = row.try_get("delivery_method").map_err(storage)?;
        let payment_method: String = row.try_get("payment_method").map_err(storage)?;
        let reference: String = row.try_get("reference_number").map_err(storage)?;
        let send_currency: String = row.try_get("send_currency").map_err(storage)?;
        let receive_currency: String = row.try_get("receive_currency").map_err(storage)?;

        Ok(Transfer {
            id: TransferId::from_uuid(row.try_get("id").map_err(storage)?),
            reference_number: ReferenceNumber::new(reference),
            user_id: UserId::from_uuid(row.try_get("user_id").map_err(storage)?),
            recipient_id: RecipientId::from_uuid(row.try_get("recipient_id").map_err(storage)?),
            send_amount: row.try_get("send_amount").map_err(storage)?,
            send_currency: Currency::new(send_currency),
            receive_amount: row.try_get("receive_amount").map_err(storage)?,
            receive_currency: Currency::new(receive_currency),
            exchange_rate: row.try_get("exchange_rate").map_err(storage)?,
            fee_amount: row.try_get("fee_amount").map_err(storage)?,
            total_amount: row.try_get("total_amount").map_err(storage)?,
            delivery_method: delivery_method.parse()?,
            status: status.parse()?,
            payment_method: payment_method.parse()?,
            estimated_delivery: row.try_get("estimated_delivery").map_err(storage)?,
            completed_at: row.try_get("completed_at").map_err(storage)?,
            failure_reason: row.try_get("failure_reason").map_err(storage)?,
            notes: row.try_get("notes").map_err(storage)?,
            created_at: row.try_get("created_at").map_err(storage)?,
            updated_at: row.try_get("updated_at").map_err(storage)?,
        })
    }

    fn row_to_entry(row: &PgRow) -> Result<StatusHistoryEntry> {
        let status: String = row.try_get("status").map_err(storage)?;
        Ok(StatusHistoryEntry {
            transfer_id: TransferId::from_uuid(row.try_get("transfer_id").map_err(storage)?),
            status: status.parse()?,
            notes: row.try_get("notes").map_err(storage)?,
            created_at: row.try_get("created_at").map_err(storage)?,
        })
    }

    async fn append_history(
        tx: &mut Transaction<'_, Postgres>,
        entry: &StatusHistoryEntry,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO transfer_status_history (transfer_id, status, notes, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(entry.transfer_id.as_uuid())
        .bind(entry.status.as_str())
        .bind(&entry.notes)
        .bind(entry.created_at)
        .execute(&mut **tx)
        .await
        .map_err(storage)?;

        Ok(())
    }
}

fn storage(err: sqlx::Error) -> RemitError {
    RemitError::Storage(err.to_string())
}

fn is_reference_collision(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            db.code().as_deref() == Some(UNIQUE_VIOLATION)
                && db.constraint() == Some(REFERENCE_CONSTRAINT)
        }
        _ => false,
    }
}

#[async_trait]
impl TransferStore for PgTransferStore {
    async fn insert(&self, transfer: &Transfer, initial: &StatusHistoryEntry) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO transfers (
                id, reference_number, user_id, recipient_id, send_amount, send_currency,
                receive_amount, receive_currency, exchange_rate, fee_amount, total_amount,
                delivery_method, status, payment_method, estimated_delivery, completed_at,
                failure_reason, notes, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15, $16, $17, $18, $19, $20
            )
            "#,
        )
        .bind(transfer.id.as_uuid())
        .bind(transfer.reference_number.as_str())
        .bind(transfer.user_id.as_uuid())
        .bind(transfer.recipient_id.as_uuid())
        .bind(transfer.send_amount)
        .bind(transfer.send_currency.code())
        .bind(transfer.receive_amount)
        .bind(transfer.receive_currency.code())
        .bind(transfer.exchange_rate)
        .bind(transfer.fee_amount)
        .bind(transfer.total_amount)
        .bind(transfer.delivery_method.as_str())
        .bind(transfer.status.as_str())
        .bind(transfer.payment_method.as_str())
        .bind(transfer.estimated_delivery)
        .bind(transfer.completed_at)
        .bind(&transfer.failure_reason)
        .bind(&transfer.notes)
        .bind(transfer.created_at)
        .bind(transfer.updated_at)
        .execute(&mut *tx)
        .await;

        if let Err(err) = inserted {
            if is_reference_collision(&err) {
                debug!(reference = %transfer.reference_number, "Reference number already taken");
                return Err(RemitError::ReferenceCollision { attempts: 1 });
            }
            return Err(storage(err));
        }

        Self::append_history(&mut tx, initial).await?;
        tx.commit().await.map_err(storage)?;

        Ok(())
    }

    async fn get(&self, id: TransferId) -> Result<Option<Transfer>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transfers WHERE id = $1",
            TRANSFER_COLUMNS
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        row.as_ref().map(Self::row_to_transfer).transpose()
    }

    async fn get_by_reference(&self, reference: &ReferenceNumber) -> Result<Option<Transfer>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transfers WHERE reference_number = $1",
            TRANSFER_COLUMNS
        ))
        .bind(reference.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        row.as_ref().map(Self::row_to_transfer).transpose()
    }

    async fn update_status(
        &self,
        expected: TransferStatus,
        updated: &Transfer,
        entry: &StatusHistoryEntry,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let result = sqlx::query(
            r#"
            UPDATE transfers
            SET status = $1, updated_at = $2, completed_at = $3, failure_reason = $4
            WHERE id = $5 AND status = $6
            "#,
        )
        .bind(updated.status.as_str())
        .bind(updated.updated_at)
        .bind(updated.completed_at)
        .bind(&updated.failure_reason)
        .bind(updated.id.as_uuid())
        .bind(expected.as_str())
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        if result.rows_affected() == 0 {
            tx.rollback().await.map_err(storage)?;
            return Ok(false);
        }

        Self::append_history(&mut tx, entry).await?;
        tx.commit().await.map_err(storage)?;

        Ok(true)
    }

    async fn history(&self, id: TransferId) -> Result<Vec<StatusHistoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT transfer_id, status, notes, created_at
            FROM transfer_status_history
            WHERE transfer_id = $1
            ORDER BY created_at ASC, seq ASC
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn list_for_user(
        &self,
        user: UserId,
        filter: &TransferFilter,
        page: Page,
    ) -> Result<(Vec<Transfer>, u64)> {
        let status = filter.status.map(|s| s.as_str());
        let recipient: Option<Uuid> = filter.recipient_id.map(|r| *r.as_uuid());

        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM transfers
            WHERE user_id = $1
              AND ($2::text IS NULL OR status = $2)
              AND ($3::uuid IS NULL OR recipient_id = $3)
            "#,
        )
        .bind(user.as_uuid())
        .bind(status)
        .bind(recipient)
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM transfers
            WHERE user_id = $1
              AND ($2::text IS NULL OR status = $2)
              AND ($3::uuid IS NULL OR recipient_id = $3)
            ORDER BY created_at DESC, id DESC
            LIMIT $4 OFFSET $5
            "#,
            TRANSFER_COLUMNS
        ))
        .bind(user.as_uuid())
        .bind(status)
        .bind(recipient)
        .bind(i64::from(page.limit()))
        .bind(i64::try_from(page.offset()).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        let transfers = rows
            .iter()
            .map(Self::row_to_transfer)
            .collect::<Result<Vec<_>>>()?;

        Ok((transfers, u64::try_from(total).unwrap_or(0)))
    }
}
