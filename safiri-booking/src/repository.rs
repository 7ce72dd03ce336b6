use async_trait::async_trait;
use uuid::Uuid;
use chrono::{DateTime, Utc};

use crate::models::{Booking, BookingStatus, PaymentTransaction, TransactionStatus};

/// Repository trait for booking data access.
///
/// `insert` must refuse a second active booking for the same (ride, rider)
/// pair; `update` is a conditional write guarded by the version token.
#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn insert(
        &self,
        booking: &Booking,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    async fn get(
        &self,
        booking_id: Uuid,
    ) -> Result<Option<Booking>, Box<dyn std::error::Error + Send + Sync>>;

    /// The single non-cancelled booking for this (ride, rider) pair, if any.
    async fn find_active(
        &self,
        ride_id: Uuid,
        rider_id: &str,
    ) -> Result<Option<Booking>, Box<dyn std::error::Error + Send + Sync>>;

    /// Conditional update: applies `booking` only if the stored version
    /// still equals `expected_version`. Returns false on conflict.
    async fn update(
        &self,
        booking: &Booking,
        expected_version: i64,
    ) -> Result<bool, Box<dyn std::error::Error + Send + Sync>>;

    /// Bookings sitting in one of `statuses` with no update since `cutoff`,
    /// for the reservation sweeper.
    async fn list_stale(
        &self,
        statuses: &[BookingStatus],
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Booking>, Box<dyn std::error::Error + Send + Sync>>;
}

/// The full terminal write for one payment cycle: transaction CAS, booking
/// mutation and seat release, applied as a single storage transaction.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub transaction_id: Uuid,
    pub terminal_status: TransactionStatus,
    pub booking_id: Uuid,
    pub expected_booking_version: i64,
    pub booking_status: BookingStatus,
    pub seat_count: i32,
    pub paid_seat_count: i32,
    pub ride_id: Uuid,
    /// Seats to hand back to the ride; zero on success.
    pub release_seats: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    Applied,
    /// The transaction was already terminal; nothing was mutated.
    AlreadyTerminal,
    /// The booking version moved; the caller recomputes and retries.
    Conflict,
}

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Must refuse a second Initiated/Pending transaction for the booking.
    async fn insert(
        &self,
        transaction: &PaymentTransaction,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    async fn get(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<PaymentTransaction>, Box<dyn std::error::Error + Send + Sync>>;

    async fn find_by_provider_ref(
        &self,
        provider_ref: &str,
    ) -> Result<Option<PaymentTransaction>, Box<dyn std::error::Error + Send + Sync>>;

    async fn find_active_for_booking(
        &self,
        booking_id: Uuid,
    ) -> Result<Option<PaymentTransaction>, Box<dyn std::error::Error + Send + Sync>>;

    /// Most recent transaction for the booking, any status. Backs the
    /// payment-status read.
    async fn find_latest_for_booking(
        &self,
        booking_id: Uuid,
    ) -> Result<Option<PaymentTransaction>, Box<dyn std::error::Error + Send + Sync>>;

    /// Record provider acceptance: Initiated -> Pending plus the external
    /// reference.
    async fn mark_dispatched(
        &self,
        transaction_id: Uuid,
        provider_ref: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Apply a terminal settlement as one transactional write. The
    /// transaction-status CAS (out of Initiated/Pending) is the
    /// linearization point; either every leg lands or none does.
    async fn settle(
        &self,
        settlement: &Settlement,
    ) -> Result<SettleOutcome, Box<dyn std::error::Error + Send + Sync>>;
}
