use uuid::Uuid;

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct BookingCreatedEvent {
    pub booking_id: Uuid,
    pub ride_id: Uuid,
    pub rider_id: String,
    pub seat_count: u32,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct BookingConfirmedEvent {
    pub booking_id: Uuid,
    pub ride_id: Uuid,
    pub rider_id: String,
    pub seat_count: u32,
    pub amount_cents: i64,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct PaymentSettledEvent {
    pub transaction_id: Uuid,
    pub booking_id: Uuid,
    pub provider: String,
    pub amount_cents: i64,
    pub outcome: String,
    pub timestamp: i64,
}
