use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{error, info};

use safiri_booking::PaymentOrchestrator;
use safiri_store::app_config::BusinessRules;

/// Background reservation sweeper: bookings stuck unpaid past the TTL get
/// their seats released so capacity held by abandoned flows returns to
/// sale. In-flight transactions are expired through reconcile so the
/// terminal write stays exactly-once.
pub async fn start_reservation_sweeper(
    payments: Arc<PaymentOrchestrator>,
    rules: BusinessRules,
) {
    let mut ticker = interval(Duration::from_secs(rules.sweep_interval_seconds.max(1)));
    info!(
        ttl_minutes = rules.reservation_ttl_minutes,
        every_seconds = rules.sweep_interval_seconds,
        "Reservation sweeper started"
    );

    loop {
        ticker.tick().await;
        match payments
            .sweep_expired(rules.reservation_ttl_minutes as i64)
            .await
        {
            Ok(0) => {}
            Ok(swept) => info!(swept, "Sweeper released expired reservations"),
            Err(e) => error!("Sweeper pass failed: {}", e),
        }
    }
}
