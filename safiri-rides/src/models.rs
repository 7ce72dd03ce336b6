use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

/// A single scheduled trip offered by a driver.
///
/// `committed_seats` counts every live reservation, paid or not; `version`
/// is bumped by every inventory mutation and guards conditional updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ride {
    pub id: Uuid,
    pub driver_id: String,
    pub origin: String,
    pub destination: String,
    pub departure_time: DateTime<Utc>,
    pub price_per_seat_cents: i64,
    pub total_seats: i32,
    pub committed_seats: i32,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ride {
    pub fn new(
        driver_id: String,
        origin: String,
        destination: String,
        departure_time: DateTime<Utc>,
        price_per_seat_cents: i64,
        total_seats: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            driver_id,
            origin,
            destination,
            departure_time,
            price_per_seat_cents,
            total_seats,
            committed_seats: 0,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Seats not yet claimed by any live reservation.
    pub fn available_seats(&self) -> i32 {
        self.total_seats - self.committed_seats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ride_starts_empty() {
        let ride = Ride::new(
            "driver-1".to_string(),
            "Nairobi".to_string(),
            "Nakuru".to_string(),
            Utc::now(),
            120_000,
            4,
        );
        assert_eq!(ride.committed_seats, 0);
        assert_eq!(ride.available_seats(), 4);
        assert_eq!(ride.version, 1);
    }
}
