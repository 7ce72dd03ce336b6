use async_trait::async_trait;
use uuid::Uuid;
use crate::models::Ride;

/// Result of a conditional seat reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Seats counted; the ride's new version token.
    Reserved { new_version: i64 },
    /// Capacity check failed; current availability for the caller to surface.
    Insufficient { available: i32 },
    /// The version token moved between read and write.
    VersionConflict,
}

/// Repository trait for ride data access.
///
/// `try_reserve` must be a single atomic conditional update: the capacity
/// check, the seat increment and the version bump all succeed or all fail
/// together. Read-then-write without that guard is the bug class this trait
/// exists to rule out.
#[async_trait]
pub trait RideRepository: Send + Sync {
    async fn create_ride(
        &self,
        ride: &Ride,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    async fn get_ride(
        &self,
        ride_id: Uuid,
    ) -> Result<Option<Ride>, Box<dyn std::error::Error + Send + Sync>>;

    /// Atomically add `seats` to committed_seats iff the version token still
    /// matches and capacity allows.
    async fn try_reserve(
        &self,
        ride_id: Uuid,
        seats: i32,
        expected_version: i64,
    ) -> Result<ReserveOutcome, Box<dyn std::error::Error + Send + Sync>>;

    /// Atomically subtract `seats` from committed_seats, floored at zero.
    async fn release_seats(
        &self,
        ride_id: Uuid,
        seats: i32,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}
