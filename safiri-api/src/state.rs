use std::sync::Arc;

use safiri_booking::repository::{BookingRepository, TransactionRepository};
use safiri_booking::{BookingOrchestrator, PaymentOrchestrator, StatusPoller};
use safiri_rides::inventory::SeatInventory;
use safiri_store::app_config::BusinessRules;
use safiri_store::{DbClient, EventProducer, PostgresRideRepository, RedisClient};

use crate::middleware::resiliency::CircuitBreaker;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub expiration: u64,
    pub webhook_secret: String,
}

pub struct Resiliency {
    pub payment_cb: CircuitBreaker,
}

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbClient>,
    pub redis: Arc<RedisClient>,
    pub kafka: Arc<EventProducer>,
    pub ride_repo: Arc<PostgresRideRepository>,
    pub inventory: Arc<SeatInventory>,
    pub bookings: Arc<dyn BookingRepository>,
    pub transactions: Arc<dyn TransactionRepository>,
    pub booking_orchestrator: Arc<BookingOrchestrator>,
    pub payment_orchestrator: Arc<PaymentOrchestrator>,
    pub poller: Arc<StatusPoller>,
    pub auth: AuthConfig,
    pub business_rules: BusinessRules,
    pub resiliency: Arc<Resiliency>,
}
