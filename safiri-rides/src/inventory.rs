use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use uuid::Uuid;
use async_trait::async_trait;

use crate::models::Ride;
use crate::repository::{ReserveOutcome, RideRepository};

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("Ride not found: {0}")]
    RideNotFound(Uuid),

    #[error("Insufficient capacity: requested {requested}, available {available}")]
    InsufficientCapacity { requested: i32, available: i32 },

    #[error("Ride was modified concurrently")]
    ConcurrentModification,

    #[error("Inventory storage error: {0}")]
    Storage(String),
}

/// A provisional, capacity-counted hold on ride seats, created at booking
/// time before payment settles. Pairs with either `commit` (payment
/// succeeded) or `release` (payment failed or expired).
#[derive(Debug, Clone, Copy)]
pub struct Reservation {
    pub ride_id: Uuid,
    pub seats: i32,
    pub ride_version: i64,
}

/// Atomic admission control over seat capacity.
///
/// Seats count as committed from reservation time, not from payment time,
/// so two concurrent bookers can never both be told the last seat is free.
pub struct SeatInventory {
    rides: Arc<dyn RideRepository>,
}

impl SeatInventory {
    pub fn new(rides: Arc<dyn RideRepository>) -> Self {
        Self { rides }
    }

    pub async fn get(&self, ride_id: Uuid) -> Result<Ride, InventoryError> {
        self.rides
            .get_ride(ride_id)
            .await
            .map_err(|e| InventoryError::Storage(e.to_string()))?
            .ok_or(InventoryError::RideNotFound(ride_id))
    }

    pub async fn available_seats(&self, ride_id: Uuid) -> Result<i32, InventoryError> {
        Ok(self.get(ride_id).await?.available_seats())
    }

    /// Single conditional-update attempt. On `ConcurrentModification` the
    /// caller must re-read and retry the whole operation; on
    /// `InsufficientCapacity` it must not retry blindly but surface live
    /// availability to the rider.
    pub async fn reserve(&self, ride_id: Uuid, seats: i32) -> Result<Reservation, InventoryError> {
        let ride = self.get(ride_id).await?;

        match self
            .rides
            .try_reserve(ride_id, seats, ride.version)
            .await
            .map_err(|e| InventoryError::Storage(e.to_string()))?
        {
            ReserveOutcome::Reserved { new_version } => Ok(Reservation {
                ride_id,
                seats,
                ride_version: new_version,
            }),
            ReserveOutcome::Insufficient { available } => {
                Err(InventoryError::InsufficientCapacity {
                    requested: seats,
                    available,
                })
            }
            ReserveOutcome::VersionConflict => Err(InventoryError::ConcurrentModification),
        }
    }

    pub async fn release(&self, ride_id: Uuid, seats: i32) -> Result<(), InventoryError> {
        if seats <= 0 {
            return Ok(());
        }
        self.rides
            .release_seats(ride_id, seats)
            .await
            .map_err(|e| InventoryError::Storage(e.to_string()))
    }

    /// No-op confirmation: the seats were counted at reservation time.
    /// Kept as a named operation so reserve always pairs with either
    /// commit-by-success or release-by-failure at the call site.
    pub fn commit(&self, _reservation: Reservation) {}
}

/// HashMap-backed repository. The mutex stands in for the storage layer's
/// row lock; used by the test suites and provider-less local runs.
#[derive(Default)]
pub struct InMemoryRideRepository {
    rides: Mutex<HashMap<Uuid, Ride>>,
}

impl InMemoryRideRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous release used by stores that must mutate booking and ride
    /// state under one lock (the in-memory stand-in for a DB transaction).
    pub fn release_sync(&self, ride_id: Uuid, seats: i32) -> Result<(), String> {
        let mut rides = self.rides.lock().unwrap();
        let ride = rides
            .get_mut(&ride_id)
            .ok_or_else(|| format!("ride {} not found", ride_id))?;

        ride.committed_seats = (ride.committed_seats - seats).max(0);
        ride.version += 1;
        ride.updated_at = chrono::Utc::now();
        Ok(())
    }
}

#[async_trait]
impl RideRepository for InMemoryRideRepository {
    async fn create_ride(
        &self,
        ride: &Ride,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.rides.lock().unwrap().insert(ride.id, ride.clone());
        Ok(())
    }

    async fn get_ride(
        &self,
        ride_id: Uuid,
    ) -> Result<Option<Ride>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.rides.lock().unwrap().get(&ride_id).cloned())
    }

    async fn try_reserve(
        &self,
        ride_id: Uuid,
        seats: i32,
        expected_version: i64,
    ) -> Result<ReserveOutcome, Box<dyn std::error::Error + Send + Sync>> {
        let mut rides = self.rides.lock().unwrap();
        let ride = rides
            .get_mut(&ride_id)
            .ok_or_else(|| format!("ride {} not found", ride_id))?;

        if ride.version != expected_version {
            return Ok(ReserveOutcome::VersionConflict);
        }
        if ride.committed_seats + seats > ride.total_seats {
            return Ok(ReserveOutcome::Insufficient {
                available: ride.total_seats - ride.committed_seats,
            });
        }

        ride.committed_seats += seats;
        ride.version += 1;
        ride.updated_at = chrono::Utc::now();
        Ok(ReserveOutcome::Reserved {
            new_version: ride.version,
        })
    }

    async fn release_seats(
        &self,
        ride_id: Uuid,
        seats: i32,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.release_sync(ride_id, seats).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn seeded_inventory(total_seats: i32) -> (SeatInventory, Uuid) {
        let repo = Arc::new(InMemoryRideRepository::new());
        let ride = Ride::new(
            "driver-1".to_string(),
            "Nairobi".to_string(),
            "Eldoret".to_string(),
            Utc::now(),
            100_000,
            total_seats,
        );
        let ride_id = ride.id;
        repo.rides.lock().unwrap().insert(ride_id, ride);
        (SeatInventory::new(repo), ride_id)
    }

    #[tokio::test]
    async fn test_reserve_release_round_trip() {
        let (inventory, ride_id) = seeded_inventory(10);

        let before = inventory.available_seats(ride_id).await.unwrap();
        let reservation = inventory.reserve(ride_id, 3).await.unwrap();
        assert_eq!(inventory.available_seats(ride_id).await.unwrap(), before - 3);

        inventory.release(ride_id, reservation.seats).await.unwrap();
        assert_eq!(inventory.available_seats(ride_id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_reserve_rejects_over_capacity() {
        let (inventory, ride_id) = seeded_inventory(2);

        inventory.reserve(ride_id, 2).await.unwrap();
        let err = inventory.reserve(ride_id, 1).await.unwrap_err();
        assert!(matches!(
            err,
            InventoryError::InsufficientCapacity { available: 0, .. }
        ));
    }

    #[tokio::test]
    async fn test_release_floors_at_zero() {
        let (inventory, ride_id) = seeded_inventory(5);

        inventory.reserve(ride_id, 1).await.unwrap();
        inventory.release(ride_id, 4).await.unwrap();
        assert_eq!(inventory.available_seats(ride_id).await.unwrap(), 5);
    }

    // Invariant: committed_seats <= total_seats at all times, including
    // under concurrent reservers whose sum exceeds capacity. Exactly the
    // requests that fit are admitted, independent of arrival order.
    #[tokio::test]
    async fn test_concurrent_reserve_admits_exactly_capacity() {
        let (inventory, ride_id) = seeded_inventory(6);
        let inventory = Arc::new(inventory);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let inv = inventory.clone();
            handles.push(tokio::spawn(async move {
                // Retry on version conflicts only; capacity refusals are final.
                loop {
                    match inv.reserve(ride_id, 2).await {
                        Ok(_) => return true,
                        Err(InventoryError::ConcurrentModification) => continue,
                        Err(InventoryError::InsufficientCapacity { .. }) => return false,
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 3); // 3 x 2 seats fill capacity 6
        assert_eq!(inventory.available_seats(ride_id).await.unwrap(), 0);
    }
}
