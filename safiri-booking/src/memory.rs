use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use safiri_rides::inventory::InMemoryRideRepository;

use crate::models::{Booking, BookingStatus, PaymentTransaction, TransactionStatus};
use crate::repository::{
    BookingRepository, Settlement, SettleOutcome, TransactionRepository,
};

#[derive(Default)]
struct Inner {
    bookings: HashMap<Uuid, Booking>,
    transactions: HashMap<Uuid, PaymentTransaction>,
}

/// HashMap-backed booking and transaction store for tests and local runs.
///
/// One mutex over both maps stands in for the database transaction:
/// `settle` applies the transaction CAS, the booking write and the seat
/// release while nothing else can interleave.
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    rides: Arc<InMemoryRideRepository>,
}

impl InMemoryStore {
    pub fn new(rides: Arc<InMemoryRideRepository>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            rides,
        }
    }

    pub fn get_booking(&self, booking_id: Uuid) -> Option<Booking> {
        self.inner.lock().unwrap().bookings.get(&booking_id).cloned()
    }

    pub fn get_transaction(&self, transaction_id: Uuid) -> Option<PaymentTransaction> {
        self.inner
            .lock()
            .unwrap()
            .transactions
            .get(&transaction_id)
            .cloned()
    }

    pub fn booking_count(&self) -> usize {
        self.inner.lock().unwrap().bookings.len()
    }

    pub fn transaction_count(&self) -> usize {
        self.inner.lock().unwrap().transactions.len()
    }

    /// Test helper: mark a booking settled as if a payment cycle succeeded.
    pub fn force_completed(&self, booking_id: Uuid) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(booking) = inner.bookings.get_mut(&booking_id) {
            booking.status = BookingStatus::Completed;
            booking.paid_seat_count = booking.seat_count;
            booking.version += 1;
            booking.touch();
        }
    }

    /// Test helper: force a raw status without touching counts.
    pub fn force_status(&self, booking_id: Uuid, status: BookingStatus) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(booking) = inner.bookings.get_mut(&booking_id) {
            booking.status = status;
            booking.version += 1;
            booking.touch();
        }
    }

    /// Test helper: backdate every booking so the sweeper sees it as stale.
    pub fn age_bookings(&self, by: Duration) {
        let mut inner = self.inner.lock().unwrap();
        for booking in inner.bookings.values_mut() {
            booking.updated_at = booking.updated_at - by;
        }
    }
}

#[async_trait]
impl BookingRepository for InMemoryStore {
    async fn insert(
        &self,
        booking: &Booking,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut inner = self.inner.lock().unwrap();
        let duplicate = inner.bookings.values().any(|b| {
            b.ride_id == booking.ride_id && b.rider_id == booking.rider_id && b.is_active()
        });
        if duplicate {
            return Err(format!(
                "active booking already exists for ride {} rider {}",
                booking.ride_id, booking.rider_id
            )
            .into());
        }
        inner.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn get(
        &self,
        booking_id: Uuid,
    ) -> Result<Option<Booking>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.get_booking(booking_id))
    }

    async fn find_active(
        &self,
        ride_id: Uuid,
        rider_id: &str,
    ) -> Result<Option<Booking>, Box<dyn std::error::Error + Send + Sync>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .bookings
            .values()
            .find(|b| b.ride_id == ride_id && b.rider_id == rider_id && b.is_active())
            .cloned())
    }

    async fn update(
        &self,
        booking: &Booking,
        expected_version: i64,
    ) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        let mut inner = self.inner.lock().unwrap();
        match inner.bookings.get_mut(&booking.id) {
            Some(stored) if stored.version == expected_version => {
                *stored = booking.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(format!("booking {} not found", booking.id).into()),
        }
    }

    async fn list_stale(
        &self,
        statuses: &[BookingStatus],
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Booking>, Box<dyn std::error::Error + Send + Sync>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .bookings
            .values()
            .filter(|b| statuses.contains(&b.status) && b.updated_at < cutoff)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TransactionRepository for InMemoryStore {
    async fn insert(
        &self,
        transaction: &PaymentTransaction,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut inner = self.inner.lock().unwrap();
        let active_exists = inner
            .transactions
            .values()
            .any(|t| t.booking_id == transaction.booking_id && t.status.is_active());
        if active_exists {
            return Err(format!(
                "active transaction already exists for booking {}",
                transaction.booking_id
            )
            .into());
        }
        inner
            .transactions
            .insert(transaction.id, transaction.clone());
        Ok(())
    }

    async fn get(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<PaymentTransaction>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.get_transaction(transaction_id))
    }

    async fn find_by_provider_ref(
        &self,
        provider_ref: &str,
    ) -> Result<Option<PaymentTransaction>, Box<dyn std::error::Error + Send + Sync>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .transactions
            .values()
            .find(|t| t.provider_ref.as_deref() == Some(provider_ref))
            .cloned())
    }

    async fn find_active_for_booking(
        &self,
        booking_id: Uuid,
    ) -> Result<Option<PaymentTransaction>, Box<dyn std::error::Error + Send + Sync>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .transactions
            .values()
            .find(|t| t.booking_id == booking_id && t.status.is_active())
            .cloned())
    }

    async fn find_latest_for_booking(
        &self,
        booking_id: Uuid,
    ) -> Result<Option<PaymentTransaction>, Box<dyn std::error::Error + Send + Sync>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .transactions
            .values()
            .filter(|t| t.booking_id == booking_id)
            .max_by_key(|t| t.created_at)
            .cloned())
    }

    async fn mark_dispatched(
        &self,
        transaction_id: Uuid,
        provider_ref: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut inner = self.inner.lock().unwrap();
        let transaction = inner
            .transactions
            .get_mut(&transaction_id)
            .ok_or_else(|| format!("transaction {} not found", transaction_id))?;
        if transaction.status != TransactionStatus::Initiated {
            return Err(format!(
                "transaction {} is {}, cannot dispatch",
                transaction_id, transaction.status
            )
            .into());
        }
        transaction.provider_ref = Some(provider_ref.to_string());
        transaction.status = TransactionStatus::Pending;
        transaction.updated_at = Utc::now();
        Ok(())
    }

    async fn settle(
        &self,
        settlement: &Settlement,
    ) -> Result<SettleOutcome, Box<dyn std::error::Error + Send + Sync>> {
        let mut inner = self.inner.lock().unwrap();

        let transaction = inner
            .transactions
            .get(&settlement.transaction_id)
            .ok_or_else(|| format!("transaction {} not found", settlement.transaction_id))?;
        if transaction.status.is_terminal() {
            return Ok(SettleOutcome::AlreadyTerminal);
        }

        match inner.bookings.get(&settlement.booking_id) {
            Some(b) if b.version == settlement.expected_booking_version => {}
            Some(_) => return Ok(SettleOutcome::Conflict),
            None => return Err(format!("booking {} not found", settlement.booking_id).into()),
        }

        // All guards passed; apply every leg while the lock is held.
        let transaction = inner
            .transactions
            .get_mut(&settlement.transaction_id)
            .expect("checked above");
        transaction.status = settlement.terminal_status;
        transaction.updated_at = Utc::now();

        let booking = inner
            .bookings
            .get_mut(&settlement.booking_id)
            .expect("checked above");
        booking.status = settlement.booking_status;
        booking.seat_count = settlement.seat_count;
        booking.paid_seat_count = settlement.paid_seat_count;
        booking.version += 1;
        booking.touch();

        if settlement.release_seats > 0 {
            self.rides
                .release_sync(settlement.ride_id, settlement.release_seats)?;
        }

        Ok(SettleOutcome::Applied)
    }
}
