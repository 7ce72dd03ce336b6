use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use safiri_core::payment::Provider;
use safiri_shared::pii::Masked;

/// Payment lifecycle of a booking.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    AwaitingPayment,
    PaymentInProgress,
    Completed,
    Failed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            BookingStatus::AwaitingPayment => "AWAITING_PAYMENT",
            BookingStatus::PaymentInProgress => "PAYMENT_IN_PROGRESS",
            BookingStatus::Completed => "COMPLETED",
            BookingStatus::Failed => "FAILED",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "AWAITING_PAYMENT" => Some(BookingStatus::AwaitingPayment),
            "PAYMENT_IN_PROGRESS" => Some(BookingStatus::PaymentInProgress),
            "COMPLETED" => Some(BookingStatus::Completed),
            "FAILED" => Some(BookingStatus::Failed),
            "CANCELLED" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

/// One rider's claim on seats of one ride.
///
/// `paid_seat_count` trails `seat_count` until a payment cycle settles;
/// when status is Completed the two are equal. Exactly one non-cancelled
/// booking exists per (ride, rider) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub rider_id: String,
    pub seat_count: i32,
    pub paid_seat_count: i32,
    pub status: BookingStatus,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn new(ride_id: Uuid, rider_id: String, seat_count: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            ride_id,
            rider_id,
            seat_count,
            paid_seat_count: 0,
            status: BookingStatus::AwaitingPayment,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status != BookingStatus::Cancelled
    }

    /// Seats reserved but not yet settled in this payment cycle.
    pub fn unpaid_seats(&self) -> i32 {
        self.seat_count - self.paid_seat_count
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Status of one settlement attempt against a booking.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Initiated,
    Pending,
    Succeeded,
    Failed,
    Expired,
}

impl TransactionStatus {
    /// Active transactions block a second one from being created for the
    /// same booking.
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionStatus::Initiated | TransactionStatus::Pending)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    pub fn valid_transitions(&self) -> Vec<TransactionStatus> {
        match self {
            TransactionStatus::Initiated => vec![
                TransactionStatus::Pending,
                TransactionStatus::Succeeded,
                TransactionStatus::Failed,
                TransactionStatus::Expired,
            ],
            TransactionStatus::Pending => vec![
                TransactionStatus::Succeeded,
                TransactionStatus::Failed,
                TransactionStatus::Expired,
            ],
            // Terminal states never transition again.
            TransactionStatus::Succeeded
            | TransactionStatus::Failed
            | TransactionStatus::Expired => vec![],
        }
    }

    pub fn as_db_str(&self) -> &'static str {
        match self {
            TransactionStatus::Initiated => "INITIATED",
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Succeeded => "SUCCEEDED",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Expired => "EXPIRED",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "INITIATED" => Some(TransactionStatus::Initiated),
            "PENDING" => Some(TransactionStatus::Pending),
            "SUCCEEDED" => Some(TransactionStatus::Succeeded),
            "FAILED" => Some(TransactionStatus::Failed),
            "EXPIRED" => Some(TransactionStatus::Expired),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

/// One attempt to settle money for a booking. A booking may have several,
/// sequentially, but never two active at once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub provider: Provider,
    pub amount_cents: i64,
    pub currency: String,
    pub phone: Masked<String>,
    pub provider_ref: Option<String>,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentTransaction {
    pub fn new(
        booking_id: Uuid,
        provider: Provider,
        amount_cents: i64,
        currency: String,
        phone: Masked<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            booking_id,
            provider,
            amount_cents,
            currency,
            phone,
            provider_ref: None,
            status: TransactionStatus::Initiated,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_transitions() {
        assert!(TransactionStatus::Initiated
            .valid_transitions()
            .contains(&TransactionStatus::Pending));
        assert!(TransactionStatus::Pending
            .valid_transitions()
            .contains(&TransactionStatus::Expired));
        assert!(TransactionStatus::Succeeded.valid_transitions().is_empty());
        assert!(TransactionStatus::Failed.valid_transitions().is_empty());
    }

    #[test]
    fn test_active_vs_terminal() {
        assert!(TransactionStatus::Initiated.is_active());
        assert!(TransactionStatus::Pending.is_active());
        assert!(TransactionStatus::Succeeded.is_terminal());
        assert!(TransactionStatus::Expired.is_terminal());
    }

    #[test]
    fn test_status_db_round_trip() {
        for status in [
            BookingStatus::AwaitingPayment,
            BookingStatus::PaymentInProgress,
            BookingStatus::Completed,
            BookingStatus::Failed,
            BookingStatus::Cancelled,
        ] {
            assert_eq!(BookingStatus::from_db_str(status.as_db_str()), Some(status));
        }
        assert_eq!(BookingStatus::from_db_str("PAID"), None);
    }

    #[test]
    fn test_unpaid_seats() {
        let mut booking = Booking::new(Uuid::new_v4(), "rider-1".to_string(), 5);
        booking.paid_seat_count = 2;
        assert_eq!(booking.unpaid_seats(), 3);
    }
}
