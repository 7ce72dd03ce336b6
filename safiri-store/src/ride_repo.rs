use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use safiri_rides::models::Ride;
use safiri_rides::repository::{ReserveOutcome, RideRepository};

use crate::redis_repo::RedisClient;

pub struct PostgresRideRepository {
    pool: PgPool,
    redis: RedisClient,
}

#[derive(sqlx::FromRow)]
struct RideRow {
    id: Uuid,
    driver_id: String,
    origin: String,
    destination: String,
    departure_time: chrono::DateTime<chrono::Utc>,
    price_per_seat_cents: i64,
    total_seats: i32,
    committed_seats: i32,
    version: i64,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<RideRow> for Ride {
    fn from(row: RideRow) -> Self {
        Ride {
            id: row.id,
            driver_id: row.driver_id,
            origin: row.origin,
            destination: row.destination,
            departure_time: row.departure_time,
            price_per_seat_cents: row.price_per_seat_cents,
            total_seats: row.total_seats,
            committed_seats: row.committed_seats,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl PostgresRideRepository {
    pub fn new(pool: PgPool, redis: RedisClient) -> Self {
        Self { pool, redis }
    }

    /// Keep the cached availability in step with the row we just wrote.
    /// Cache loss is harmless; readers fall back to SQL and re-seed.
    async fn refresh_cache(&self, ride_id: Uuid, available: i32) {
        let _ = self
            .redis
            .set_ride_availability(&ride_id.to_string(), available)
            .await;
    }

    /// Availability for the re-read the rider sees after a capacity
    /// refusal: Redis first, SQL fallback with cache seeding.
    pub async fn cached_availability(
        &self,
        ride_id: Uuid,
    ) -> Result<Option<i32>, Box<dyn std::error::Error + Send + Sync>> {
        if let Ok(Some(count)) = self
            .redis
            .get_ride_availability(&ride_id.to_string())
            .await
        {
            return Ok(Some(count));
        }

        let ride = self.get_ride(ride_id).await?;
        match ride {
            Some(ride) => {
                let available = ride.available_seats();
                self.refresh_cache(ride_id, available).await;
                Ok(Some(available))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RideRepository for PostgresRideRepository {
    async fn create_ride(
        &self,
        ride: &Ride,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        sqlx::query(
            r#"
            INSERT INTO rides (id, driver_id, origin, destination, departure_time,
                               price_per_seat_cents, total_seats, committed_seats, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(ride.id)
        .bind(&ride.driver_id)
        .bind(&ride.origin)
        .bind(&ride.destination)
        .bind(ride.departure_time)
        .bind(ride.price_per_seat_cents)
        .bind(ride.total_seats)
        .bind(ride.committed_seats)
        .bind(ride.version)
        .execute(&self.pool)
        .await?;

        self.refresh_cache(ride.id, ride.available_seats()).await;
        Ok(())
    }

    async fn get_ride(
        &self,
        ride_id: Uuid,
    ) -> Result<Option<Ride>, Box<dyn std::error::Error + Send + Sync>> {
        let row: Option<RideRow> = sqlx::query_as(
            r#"
            SELECT id, driver_id, origin, destination, departure_time,
                   price_per_seat_cents, total_seats, committed_seats, version,
                   created_at, updated_at
            FROM rides WHERE id = $1
            "#,
        )
        .bind(ride_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Ride::from))
    }

    async fn try_reserve(
        &self,
        ride_id: Uuid,
        seats: i32,
        expected_version: i64,
    ) -> Result<ReserveOutcome, Box<dyn std::error::Error + Send + Sync>> {
        // Capacity check, increment and version bump in one conditional
        // statement; the row lock makes the check-and-set atomic.
        #[derive(sqlx::FromRow)]
        struct Reserved {
            version: i64,
            total_seats: i32,
            committed_seats: i32,
        }

        let reserved: Option<Reserved> = sqlx::query_as(
            r#"
            UPDATE rides
            SET committed_seats = committed_seats + $3,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $2 AND committed_seats + $3 <= total_seats
            RETURNING version, total_seats, committed_seats
            "#,
        )
        .bind(ride_id)
        .bind(expected_version)
        .bind(seats)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = reserved {
            self.refresh_cache(ride_id, row.total_seats - row.committed_seats)
                .await;
            return Ok(ReserveOutcome::Reserved {
                new_version: row.version,
            });
        }

        // Zero rows: re-read to tell a stale version from a full ride.
        let current = self
            .get_ride(ride_id)
            .await?
            .ok_or_else(|| format!("ride {} not found", ride_id))?;

        if current.version != expected_version {
            Ok(ReserveOutcome::VersionConflict)
        } else {
            Ok(ReserveOutcome::Insufficient {
                available: current.available_seats(),
            })
        }
    }

    async fn release_seats(
        &self,
        ride_id: Uuid,
        seats: i32,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        #[derive(sqlx::FromRow)]
        struct Released {
            total_seats: i32,
            committed_seats: i32,
        }

        let row: Option<Released> = sqlx::query_as(
            r#"
            UPDATE rides
            SET committed_seats = GREATEST(committed_seats - $2, 0),
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1
            RETURNING total_seats, committed_seats
            "#,
        )
        .bind(ride_id)
        .bind(seats)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                self.refresh_cache(ride_id, row.total_seats - row.committed_seats)
                    .await;
                Ok(())
            }
            None => Err(format!("ride {} not found", ride_id).into()),
        }
    }
}
