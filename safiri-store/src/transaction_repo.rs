use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::str::FromStr;
use uuid::Uuid;

use safiri_booking::models::{PaymentTransaction, TransactionStatus};
use safiri_booking::repository::{Settlement, SettleOutcome, TransactionRepository};
use safiri_core::payment::Provider;
use safiri_shared::pii::Masked;

pub struct PostgresTransactionRepository {
    pool: PgPool,
    redis: crate::redis_repo::RedisClient,
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    booking_id: Uuid,
    provider: String,
    amount_cents: i64,
    currency: String,
    phone: String,
    provider_ref: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for PaymentTransaction {
    type Error = Box<dyn std::error::Error + Send + Sync>;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let status = TransactionStatus::from_db_str(&row.status)
            .ok_or_else(|| format!("unknown transaction status: {}", row.status))?;
        let provider = Provider::from_str(&row.provider)?;
        Ok(PaymentTransaction {
            id: row.id,
            booking_id: row.booking_id,
            provider,
            amount_cents: row.amount_cents,
            currency: row.currency,
            phone: Masked(row.phone),
            provider_ref: row.provider_ref,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const SELECT_TRANSACTION: &str = r#"
    SELECT id, booking_id, provider, amount_cents, currency, phone,
           provider_ref, status, created_at, updated_at
    FROM payment_transactions
"#;

impl PostgresTransactionRepository {
    pub fn new(pool: PgPool, redis: crate::redis_repo::RedisClient) -> Self {
        Self { pool, redis }
    }
}

#[async_trait]
impl TransactionRepository for PostgresTransactionRepository {
    async fn insert(
        &self,
        transaction: &PaymentTransaction,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        // The partial unique index on booking_id WHERE status IN
        // ('INITIATED','PENDING') enforces one active transaction per
        // booking even when two initiations race.
        sqlx::query(
            r#"
            INSERT INTO payment_transactions (id, booking_id, provider, amount_cents,
                                              currency, phone, provider_ref, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(transaction.id)
        .bind(transaction.booking_id)
        .bind(transaction.provider.to_string())
        .bind(transaction.amount_cents)
        .bind(&transaction.currency)
        .bind(&transaction.phone.0)
        .bind(&transaction.provider_ref)
        .bind(transaction.status.as_db_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<PaymentTransaction>, Box<dyn std::error::Error + Send + Sync>> {
        let row: Option<TransactionRow> =
            sqlx::query_as(&format!("{} WHERE id = $1", SELECT_TRANSACTION))
                .bind(transaction_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(PaymentTransaction::try_from).transpose()
    }

    async fn find_by_provider_ref(
        &self,
        provider_ref: &str,
    ) -> Result<Option<PaymentTransaction>, Box<dyn std::error::Error + Send + Sync>> {
        let row: Option<TransactionRow> =
            sqlx::query_as(&format!("{} WHERE provider_ref = $1", SELECT_TRANSACTION))
                .bind(provider_ref)
                .fetch_optional(&self.pool)
                .await?;

        row.map(PaymentTransaction::try_from).transpose()
    }

    async fn find_active_for_booking(
        &self,
        booking_id: Uuid,
    ) -> Result<Option<PaymentTransaction>, Box<dyn std::error::Error + Send + Sync>> {
        let row: Option<TransactionRow> = sqlx::query_as(&format!(
            "{} WHERE booking_id = $1 AND status IN ('INITIATED', 'PENDING')",
            SELECT_TRANSACTION
        ))
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PaymentTransaction::try_from).transpose()
    }

    async fn find_latest_for_booking(
        &self,
        booking_id: Uuid,
    ) -> Result<Option<PaymentTransaction>, Box<dyn std::error::Error + Send + Sync>> {
        let row: Option<TransactionRow> = sqlx::query_as(&format!(
            "{} WHERE booking_id = $1 ORDER BY created_at DESC LIMIT 1",
            SELECT_TRANSACTION
        ))
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PaymentTransaction::try_from).transpose()
    }

    async fn mark_dispatched(
        &self,
        transaction_id: Uuid,
        provider_ref: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let result = sqlx::query(
            r#"
            UPDATE payment_transactions
            SET provider_ref = $2, status = 'PENDING', updated_at = NOW()
            WHERE id = $1 AND status = 'INITIATED'
            "#,
        )
        .bind(transaction_id)
        .bind(provider_ref)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() != 1 {
            return Err(format!(
                "transaction {} was not in INITIATED state",
                transaction_id
            )
            .into());
        }
        Ok(())
    }

    async fn settle(
        &self,
        settlement: &Settlement,
    ) -> Result<SettleOutcome, Box<dyn std::error::Error + Send + Sync>> {
        let mut tx = self.pool.begin().await?;

        // 1. The linearization point: flip the transaction out of its
        //    active state. Zero rows means someone already settled it.
        let flipped = sqlx::query(
            r#"
            UPDATE payment_transactions
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status IN ('INITIATED', 'PENDING')
            "#,
        )
        .bind(settlement.transaction_id)
        .bind(settlement.terminal_status.as_db_str())
        .execute(&mut *tx)
        .await?;

        if flipped.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(SettleOutcome::AlreadyTerminal);
        }

        // 2. Booking mutation, guarded by the version the caller planned
        //    against.
        let booking_updated = sqlx::query(
            r#"
            UPDATE bookings
            SET status = $3, seat_count = $4, paid_seat_count = $5,
                version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(settlement.booking_id)
        .bind(settlement.expected_booking_version)
        .bind(settlement.booking_status.as_db_str())
        .bind(settlement.seat_count)
        .bind(settlement.paid_seat_count)
        .execute(&mut *tx)
        .await?;

        if booking_updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(SettleOutcome::Conflict);
        }

        // 3. Hand failed-cycle seats back in the same transaction; money
        //    state and seat state land together or not at all.
        if settlement.release_seats > 0 {
            sqlx::query(
                r#"
                UPDATE rides
                SET committed_seats = GREATEST(committed_seats - $2, 0),
                    version = version + 1,
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(settlement.ride_id)
            .bind(settlement.release_seats)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        if settlement.release_seats > 0 {
            // Drop the cached availability so the next read re-seeds from
            // the row we just released into.
            let _ = self
                .redis
                .delete_ride_availability(&settlement.ride_id.to_string())
                .await;
        }

        Ok(SettleOutcome::Applied)
    }
}
