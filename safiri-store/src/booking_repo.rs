use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use safiri_booking::models::{Booking, BookingStatus};
use safiri_booking::repository::BookingRepository;

pub struct PostgresBookingRepository {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
pub(crate) struct BookingRow {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub rider_id: String,
    pub seat_count: i32,
    pub paid_seat_count: i32,
    pub status: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = Box<dyn std::error::Error + Send + Sync>;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let status = BookingStatus::from_db_str(&row.status)
            .ok_or_else(|| format!("unknown booking status: {}", row.status))?;
        Ok(Booking {
            id: row.id,
            ride_id: row.ride_id,
            rider_id: row.rider_id,
            seat_count: row.seat_count,
            paid_seat_count: row.paid_seat_count,
            status,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const SELECT_BOOKING: &str = r#"
    SELECT id, ride_id, rider_id, seat_count, paid_seat_count, status,
           version, created_at, updated_at
    FROM bookings
"#;

impl PostgresBookingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BookingRepository for PostgresBookingRepository {
    async fn insert(
        &self,
        booking: &Booking,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        // The partial unique index on (ride_id, rider_id) WHERE status !=
        // 'CANCELLED' turns a duplicate-insert race into an error here.
        sqlx::query(
            r#"
            INSERT INTO bookings (id, ride_id, rider_id, seat_count, paid_seat_count,
                                  status, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(booking.id)
        .bind(booking.ride_id)
        .bind(&booking.rider_id)
        .bind(booking.seat_count)
        .bind(booking.paid_seat_count)
        .bind(booking.status.as_db_str())
        .bind(booking.version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(
        &self,
        booking_id: Uuid,
    ) -> Result<Option<Booking>, Box<dyn std::error::Error + Send + Sync>> {
        let row: Option<BookingRow> =
            sqlx::query_as(&format!("{} WHERE id = $1", SELECT_BOOKING))
                .bind(booking_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(Booking::try_from).transpose()
    }

    async fn find_active(
        &self,
        ride_id: Uuid,
        rider_id: &str,
    ) -> Result<Option<Booking>, Box<dyn std::error::Error + Send + Sync>> {
        let row: Option<BookingRow> = sqlx::query_as(&format!(
            "{} WHERE ride_id = $1 AND rider_id = $2 AND status != 'CANCELLED'",
            SELECT_BOOKING
        ))
        .bind(ride_id)
        .bind(rider_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Booking::try_from).transpose()
    }

    async fn update(
        &self,
        booking: &Booking,
        expected_version: i64,
    ) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET seat_count = $3, paid_seat_count = $4, status = $5,
                version = $6, updated_at = NOW()
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(booking.id)
        .bind(expected_version)
        .bind(booking.seat_count)
        .bind(booking.paid_seat_count)
        .bind(booking.status.as_db_str())
        .bind(booking.version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_stale(
        &self,
        statuses: &[BookingStatus],
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Booking>, Box<dyn std::error::Error + Send + Sync>> {
        let status_strs: Vec<String> = statuses
            .iter()
            .map(|s| s.as_db_str().to_string())
            .collect();

        let rows: Vec<BookingRow> = sqlx::query_as(&format!(
            "{} WHERE status = ANY($1) AND updated_at < $2",
            SELECT_BOOKING
        ))
        .bind(&status_strs)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Booking::try_from).collect()
    }
}
