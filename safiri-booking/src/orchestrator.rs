use std::sync::Arc;
use uuid::Uuid;
use tracing::{info, warn};

use safiri_rides::inventory::{InventoryError, SeatInventory};
use safiri_core::payment::Provider;

use crate::models::{Booking, BookingStatus};
use crate::repository::{BookingRepository, TransactionRepository};

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("Ride not found: {0}")]
    RideNotFound(Uuid),

    #[error("Booking not found: {0}")]
    BookingNotFound(Uuid),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(Uuid),

    #[error("Booking is cancelled: {0}")]
    BookingCancelled(Uuid),

    #[error("Insufficient capacity: requested {requested}, available {available}")]
    InsufficientCapacity { requested: i32, available: i32 },

    #[error("Invalid seat count: {0}")]
    InvalidSeatCount(String),

    #[error("Booking was modified concurrently, try again")]
    ConcurrentModification,

    #[error("A payment is already in progress for this booking")]
    TransactionAlreadyInProgress,

    #[error("Nothing to charge: seat count did not increase")]
    NothingToCharge,

    #[error("Payment provider not configured: {0}")]
    ProviderNotConfigured(Provider),

    #[error("Payment rejected: {0}")]
    PaymentRejected(String),

    #[error("Payment provider timed out")]
    PaymentTimeout,

    #[error("Payment provider status unknown: {0}")]
    PaymentUnknown(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<InventoryError> for BookingError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::RideNotFound(id) => BookingError::RideNotFound(id),
            InventoryError::InsufficientCapacity {
                requested,
                available,
            } => BookingError::InsufficientCapacity {
                requested,
                available,
            },
            InventoryError::ConcurrentModification => BookingError::ConcurrentModification,
            InventoryError::Storage(msg) => BookingError::Storage(msg),
        }
    }
}

/// The only entry point for creating or growing a booking.
///
/// Every successful path applies exactly one inventory reservation delta.
/// Version conflicts (on the ride or the booking row) restart the whole
/// operation from a fresh read, bounded by `max_retries`.
pub struct BookingOrchestrator {
    inventory: Arc<SeatInventory>,
    bookings: Arc<dyn BookingRepository>,
    transactions: Arc<dyn TransactionRepository>,
    max_retries: u32,
}

impl BookingOrchestrator {
    pub fn new(
        inventory: Arc<SeatInventory>,
        bookings: Arc<dyn BookingRepository>,
        transactions: Arc<dyn TransactionRepository>,
        max_retries: u32,
    ) -> Self {
        Self {
            inventory,
            bookings,
            transactions,
            max_retries: max_retries.max(1),
        }
    }

    pub async fn create_or_update(
        &self,
        ride_id: Uuid,
        rider_id: &str,
        requested_seats: i32,
    ) -> Result<Booking, BookingError> {
        if requested_seats <= 0 {
            return Err(BookingError::InvalidSeatCount(format!(
                "seat count must be positive, got {}",
                requested_seats
            )));
        }

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                warn!(%ride_id, rider_id, attempt, "Retrying booking after concurrent modification");
            }
            match self.try_create_or_update(ride_id, rider_id, requested_seats).await {
                Err(BookingError::ConcurrentModification) => continue,
                other => return other,
            }
        }

        Err(BookingError::ConcurrentModification)
    }

    async fn try_create_or_update(
        &self,
        ride_id: Uuid,
        rider_id: &str,
        requested_seats: i32,
    ) -> Result<Booking, BookingError> {
        // Existence check up front so a sold-out ride still 404s correctly.
        let _ride = self.inventory.get(ride_id).await?;

        let existing = self
            .bookings
            .find_active(ride_id, rider_id)
            .await
            .map_err(|e| BookingError::Storage(e.to_string()))?;

        match existing {
            None => self.create_fresh(ride_id, rider_id, requested_seats).await,
            Some(booking) => self.grow_existing(booking, requested_seats).await,
        }
    }

    async fn create_fresh(
        &self,
        ride_id: Uuid,
        rider_id: &str,
        requested_seats: i32,
    ) -> Result<Booking, BookingError> {
        let reservation = self.inventory.reserve(ride_id, requested_seats).await?;

        let booking = Booking::new(ride_id, rider_id.to_string(), requested_seats);
        if let Err(e) = self.bookings.insert(&booking).await {
            // Lost an insert race against the same rider: hand the seats
            // back and restart from a fresh read of their booking.
            self.inventory
                .release(ride_id, requested_seats)
                .await
                .map_err(|rel| BookingError::Storage(rel.to_string()))?;
            warn!(%ride_id, rider_id, "Booking insert conflicted: {}", e);
            return Err(BookingError::ConcurrentModification);
        }

        self.inventory.commit(reservation);
        info!(booking_id = %booking.id, %ride_id, rider_id, seats = requested_seats, "Booking created");
        Ok(booking)
    }

    async fn grow_existing(
        &self,
        booking: Booking,
        requested_seats: i32,
    ) -> Result<Booking, BookingError> {
        if requested_seats < booking.paid_seat_count {
            return Err(BookingError::InvalidSeatCount(format!(
                "cannot reduce below {} already-paid seats",
                booking.paid_seat_count
            )));
        }

        match booking.status {
            BookingStatus::Completed => {
                // Only increases open a new payment cycle.
                if requested_seats <= booking.seat_count {
                    return Err(BookingError::InvalidSeatCount(format!(
                        "booking already holds {} paid seats; request more to add seats",
                        booking.seat_count
                    )));
                }
            }
            BookingStatus::PaymentInProgress => {
                // A duplicate submission of the same request is fine; a real
                // change must wait for the in-flight settlement to land,
                // otherwise the charge and the seat count drift apart.
                let active = self
                    .transactions
                    .find_active_for_booking(booking.id)
                    .await
                    .map_err(|e| BookingError::Storage(e.to_string()))?;
                if active.is_some() {
                    if requested_seats == booking.seat_count {
                        return Ok(booking);
                    }
                    return Err(BookingError::TransactionAlreadyInProgress);
                }
            }
            BookingStatus::AwaitingPayment | BookingStatus::Failed => {}
            BookingStatus::Cancelled => {
                return Err(BookingError::BookingCancelled(booking.id));
            }
        }

        // Live reservation covers seat_count, except after a terminal
        // failure, which released everything above the paid seats.
        let reserved_base = if booking.status == BookingStatus::Failed {
            booking.paid_seat_count
        } else {
            booking.seat_count
        };
        let delta = requested_seats - reserved_base;

        let mut updated = booking.clone();
        updated.seat_count = requested_seats;
        updated.status = BookingStatus::AwaitingPayment;
        updated.version = booking.version + 1;
        updated.touch();

        if delta > 0 {
            // Reserve before the booking write so committed_seats never
            // undercounts what bookings claim.
            self.inventory.reserve(booking.ride_id, delta).await?;

            let applied = self
                .bookings
                .update(&updated, booking.version)
                .await
                .map_err(|e| BookingError::Storage(e.to_string()))?;
            if !applied {
                self.inventory
                    .release(booking.ride_id, delta)
                    .await
                    .map_err(|e| BookingError::Storage(e.to_string()))?;
                return Err(BookingError::ConcurrentModification);
            }
        } else {
            let applied = self
                .bookings
                .update(&updated, booking.version)
                .await
                .map_err(|e| BookingError::Storage(e.to_string()))?;
            if !applied {
                return Err(BookingError::ConcurrentModification);
            }
            if delta < 0 {
                self.inventory.release(booking.ride_id, -delta).await?;
            }
        }

        info!(
            booking_id = %updated.id,
            ride_id = %updated.ride_id,
            seats = requested_seats,
            delta,
            "Booking updated"
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use safiri_rides::inventory::InMemoryRideRepository;
    use safiri_rides::models::Ride;
    use chrono::Utc;

    struct Fixture {
        orchestrator: BookingOrchestrator,
        store: Arc<InMemoryStore>,
        inventory: Arc<SeatInventory>,
        ride_id: Uuid,
    }

    async fn fixture(total_seats: i32) -> Fixture {
        let rides = Arc::new(InMemoryRideRepository::new());
        let ride = Ride::new(
            "driver-1".to_string(),
            "Nairobi".to_string(),
            "Mombasa".to_string(),
            Utc::now(),
            100_000,
            total_seats,
        );
        let ride_id = ride.id;
        rides.create_ride(&ride).await.unwrap();

        let store = Arc::new(InMemoryStore::new(rides.clone()));
        let inventory = Arc::new(SeatInventory::new(rides));
        let orchestrator = BookingOrchestrator::new(
            inventory.clone(),
            store.clone(),
            store.clone(),
            3,
        );
        Fixture {
            orchestrator,
            store,
            inventory,
            ride_id,
        }
    }

    use safiri_rides::repository::RideRepository;

    #[tokio::test]
    async fn test_fresh_booking_reserves_seats() {
        let f = fixture(4).await;
        let booking = f
            .orchestrator
            .create_or_update(f.ride_id, "rider-1", 3)
            .await
            .unwrap();

        assert_eq!(booking.seat_count, 3);
        assert_eq!(booking.paid_seat_count, 0);
        assert_eq!(booking.status, BookingStatus::AwaitingPayment);
        assert_eq!(f.inventory.available_seats(f.ride_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rejects_non_positive_seats() {
        let f = fixture(4).await;
        assert!(matches!(
            f.orchestrator.create_or_update(f.ride_id, "rider-1", 0).await,
            Err(BookingError::InvalidSeatCount(_))
        ));
        assert!(matches!(
            f.orchestrator.create_or_update(f.ride_id, "rider-1", -2).await,
            Err(BookingError::InvalidSeatCount(_))
        ));
    }

    // Two riders race for the last seat: exactly one wins.
    #[tokio::test]
    async fn test_concurrent_bookers_last_seat() {
        let f = fixture(1).await;
        let orchestrator = Arc::new(f.orchestrator);

        let a = {
            let o = orchestrator.clone();
            let ride_id = f.ride_id;
            tokio::spawn(async move { o.create_or_update(ride_id, "rider-a", 1).await })
        };
        let b = {
            let o = orchestrator.clone();
            let ride_id = f.ride_id;
            tokio::spawn(async move { o.create_or_update(ride_id, "rider-b", 1).await })
        };

        let results = vec![a.await.unwrap(), b.await.unwrap()];
        let wins = results.iter().filter(|r| r.is_ok()).count();
        let capacity_refusals = results
            .iter()
            .filter(|r| matches!(r, Err(BookingError::InsufficientCapacity { .. })))
            .count();

        assert_eq!(wins, 1);
        assert_eq!(capacity_refusals, 1);
        assert_eq!(f.inventory.available_seats(f.ride_id).await.unwrap(), 0);
    }

    // Repeated requests for the same pair update the one row, never insert
    // a duplicate.
    #[tokio::test]
    async fn test_resubmission_keeps_single_booking() {
        let f = fixture(8).await;
        let first = f
            .orchestrator
            .create_or_update(f.ride_id, "rider-1", 2)
            .await
            .unwrap();
        let second = f
            .orchestrator
            .create_or_update(f.ride_id, "rider-1", 4)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.seat_count, 4);
        assert_eq!(f.store.booking_count(), 1);
        // Reservation was adjusted, not duplicated.
        assert_eq!(f.inventory.available_seats(f.ride_id).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_resubmission_can_shrink_while_unpaid() {
        let f = fixture(8).await;
        f.orchestrator
            .create_or_update(f.ride_id, "rider-1", 5)
            .await
            .unwrap();
        let shrunk = f
            .orchestrator
            .create_or_update(f.ride_id, "rider-1", 2)
            .await
            .unwrap();

        assert_eq!(shrunk.seat_count, 2);
        assert_eq!(f.inventory.available_seats(f.ride_id).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_completed_booking_only_grows() {
        let f = fixture(8).await;
        let booking = f
            .orchestrator
            .create_or_update(f.ride_id, "rider-1", 2)
            .await
            .unwrap();
        f.store.force_completed(booking.id);

        // Equal and smaller requests are rejected outright.
        assert!(matches!(
            f.orchestrator.create_or_update(f.ride_id, "rider-1", 2).await,
            Err(BookingError::InvalidSeatCount(_))
        ));
        assert!(matches!(
            f.orchestrator.create_or_update(f.ride_id, "rider-1", 1).await,
            Err(BookingError::InvalidSeatCount(_))
        ));

        // A genuine increase opens a new cycle for the delta only.
        let grown = f
            .orchestrator
            .create_or_update(f.ride_id, "rider-1", 5)
            .await
            .unwrap();
        assert_eq!(grown.seat_count, 5);
        assert_eq!(grown.paid_seat_count, 2);
        assert_eq!(grown.status, BookingStatus::AwaitingPayment);
        assert_eq!(f.inventory.available_seats(f.ride_id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_reduction_below_paid_rejected() {
        let f = fixture(8).await;
        let booking = f
            .orchestrator
            .create_or_update(f.ride_id, "rider-1", 3)
            .await
            .unwrap();
        f.store.force_completed(booking.id);

        assert!(matches!(
            f.orchestrator.create_or_update(f.ride_id, "rider-1", 1).await,
            Err(BookingError::InvalidSeatCount(_))
        ));
    }

    // After a terminal payment failure the reservation only covers the paid
    // seats, so the retry delta is computed against those.
    #[tokio::test]
    async fn test_failed_booking_rebooks_against_paid_seats() {
        let f = fixture(8).await;
        let booking = f
            .orchestrator
            .create_or_update(f.ride_id, "rider-1", 3)
            .await
            .unwrap();

        // Simulate a settled failure: seats released, status Failed.
        f.store.force_status(booking.id, BookingStatus::Failed);
        f.inventory.release(f.ride_id, 3).await.unwrap();
        assert_eq!(f.inventory.available_seats(f.ride_id).await.unwrap(), 8);

        let retried = f
            .orchestrator
            .create_or_update(f.ride_id, "rider-1", 3)
            .await
            .unwrap();
        assert_eq!(retried.seat_count, 3);
        assert_eq!(retried.status, BookingStatus::AwaitingPayment);
        assert_eq!(f.inventory.available_seats(f.ride_id).await.unwrap(), 5);
    }
}
