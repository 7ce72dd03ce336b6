use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

use safiri_core::payment::{GatewayError, GatewayStatus};

use crate::models::PaymentTransaction;
use crate::orchestrator::BookingError;
use crate::payments::PaymentOrchestrator;

/// Handle for abandoning an in-flight poll (rider left the flow). The
/// transaction itself still expires server-side via the sweeper. Dropping
/// the handle does NOT cancel the poll; it keeps running to its bound.
pub struct PollHandle {
    cancel: watch::Sender<bool>,
}

/// Resolves only when a cancel was requested. A dropped sender means the
/// poll can never be cancelled, so pend rather than spin.
async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl PollHandle {
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }
}

/// Resolves pending transactions to terminal outcomes: query the provider
/// on a fixed interval, reconcile the first terminal result, and force
/// Expired when the attempt budget runs out. Open-ended polling is a
/// resource leak; every loop here is bounded.
pub struct StatusPoller {
    payments: Arc<PaymentOrchestrator>,
    interval: Duration,
    max_attempts: u32,
}

impl StatusPoller {
    pub fn new(payments: Arc<PaymentOrchestrator>, interval: Duration, max_attempts: u32) -> Self {
        Self {
            payments,
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Spawn a background poll for one dispatched transaction.
    pub fn spawn(self: &Arc<Self>, transaction: &PaymentTransaction) -> PollHandle {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let poller = self.clone();
        let transaction_id = transaction.id;
        let provider = transaction.provider;
        let provider_ref = transaction.provider_ref.clone().unwrap_or_default();

        tokio::spawn(async move {
            if let Err(e) = poller
                .poll(transaction_id, provider, &provider_ref, cancel_rx)
                .await
            {
                warn!(%transaction_id, "Status poll ended with error: {}", e);
            }
        });

        PollHandle { cancel: cancel_tx }
    }

    /// Poll until a terminal status is observed, the attempt budget is
    /// exhausted (forced Expired), or the poll is cancelled.
    pub async fn poll(
        &self,
        transaction_id: Uuid,
        provider: safiri_core::payment::Provider,
        provider_ref: &str,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<(), BookingError> {
        let gateway = self
            .payments
            .gateway(provider)
            .ok_or(BookingError::ProviderNotConfigured(provider))?;

        for attempt in 1..=self.max_attempts {
            tokio::select! {
                _ = wait_cancelled(&mut cancel) => {
                    info!(%transaction_id, attempt, "Status poll cancelled");
                    return Ok(());
                }
                _ = sleep(self.interval) => {}
            }

            match gateway.query_status(provider_ref).await {
                Ok(status) if status.is_terminal() => {
                    self.payments.reconcile(transaction_id, status).await?;
                    return Ok(());
                }
                Ok(_) => {}
                // Transient provider trouble burns an attempt but keeps
                // polling; the budget bounds the total wait either way.
                Err(GatewayError::Timeout) | Err(GatewayError::Unavailable(_)) => {
                    warn!(%transaction_id, attempt, "Provider status query failed, will retry");
                }
                Err(GatewayError::Rejected(reason)) => {
                    warn!(%transaction_id, "Provider rejected status query: {}", reason);
                    self.payments
                        .reconcile(transaction_id, GatewayStatus::Failed)
                        .await?;
                    return Ok(());
                }
            }
        }

        info!(%transaction_id, attempts = self.max_attempts, "Poll budget exhausted, forcing expiry");
        self.payments
            .reconcile(transaction_id, GatewayStatus::Expired)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::models::BookingStatus;
    use crate::orchestrator::BookingOrchestrator;
    use crate::payments::MockGateway;
    use safiri_core::payment::{PaymentGateway, Provider};
    use safiri_rides::inventory::{InMemoryRideRepository, SeatInventory};
    use safiri_rides::models::Ride;
    use safiri_rides::repository::RideRepository;
    use safiri_shared::pii::Masked;
    use chrono::Utc;

    struct Fixture {
        payments: Arc<PaymentOrchestrator>,
        mock: Arc<MockGateway>,
        store: Arc<InMemoryStore>,
        transaction: PaymentTransaction,
        booking_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let rides = Arc::new(InMemoryRideRepository::new());
        let ride = Ride::new(
            "driver-1".to_string(),
            "Thika".to_string(),
            "Nairobi".to_string(),
            Utc::now(),
            50_000,
            4,
        );
        let ride_id = ride.id;
        rides.create_ride(&ride).await.unwrap();

        let store = Arc::new(InMemoryStore::new(rides.clone()));
        let inventory = Arc::new(SeatInventory::new(rides));
        let mock = Arc::new(MockGateway::new(Provider::Mpesa));
        let payments = Arc::new(PaymentOrchestrator::new(
            vec![mock.clone() as Arc<dyn PaymentGateway>],
            store.clone(),
            store.clone(),
            inventory.clone(),
            "KES".to_string(),
            3,
        ));
        let bookings =
            BookingOrchestrator::new(inventory, store.clone(), store.clone(), 3);

        let booking = bookings
            .create_or_update(ride_id, "rider-1", 2)
            .await
            .unwrap();
        let transaction = payments
            .initiate_payment(
                booking.id,
                Provider::Mpesa,
                Masked("254712345678".to_string()),
            )
            .await
            .unwrap();

        Fixture {
            payments,
            mock,
            store,
            transaction,
            booking_id: booking.id,
        }
    }

    fn fast_poller(payments: Arc<PaymentOrchestrator>, max_attempts: u32) -> StatusPoller {
        StatusPoller::new(payments, Duration::from_millis(1), max_attempts)
    }

    #[tokio::test]
    async fn test_poll_reconciles_first_terminal_result() {
        let f = fixture().await;
        f.mock.set_status(GatewayStatus::Succeeded);

        let poller = fast_poller(f.payments.clone(), 5);
        let (_tx, rx) = watch::channel(false);
        poller
            .poll(
                f.transaction.id,
                Provider::Mpesa,
                f.transaction.provider_ref.as_deref().unwrap(),
                rx,
            )
            .await
            .unwrap();

        assert_eq!(
            f.store.get_booking(f.booking_id).unwrap().status,
            BookingStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_poll_exhaustion_forces_expiry() {
        let f = fixture().await;
        // Provider never resolves.
        f.mock.set_status(GatewayStatus::Pending);

        let poller = fast_poller(f.payments.clone(), 3);
        let (_tx, rx) = watch::channel(false);
        poller
            .poll(
                f.transaction.id,
                Provider::Mpesa,
                f.transaction.provider_ref.as_deref().unwrap(),
                rx,
            )
            .await
            .unwrap();

        let transaction = f.store.get_transaction(f.transaction.id).unwrap();
        assert_eq!(transaction.status, crate::models::TransactionStatus::Expired);
        assert_eq!(
            f.store.get_booking(f.booking_id).unwrap().status,
            BookingStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_poll_cancellation_stops_quietly() {
        let f = fixture().await;
        f.mock.set_status(GatewayStatus::Pending);

        let poller = fast_poller(f.payments.clone(), 1000);
        let (cancel_tx, rx) = watch::channel(false);
        cancel_tx.send(true).unwrap();

        poller
            .poll(
                f.transaction.id,
                Provider::Mpesa,
                f.transaction.provider_ref.as_deref().unwrap(),
                rx,
            )
            .await
            .unwrap();

        // Nothing was reconciled; the transaction is still pending.
        let transaction = f.store.get_transaction(f.transaction.id).unwrap();
        assert!(transaction.status.is_active());
    }

    // A webhook landing while the poller is mid-loop must not double-apply:
    // the poller's own reconcile comes back AlreadySettled.
    #[tokio::test]
    async fn test_redundant_resolution_is_safe() {
        let f = fixture().await;
        f.payments
            .reconcile(f.transaction.id, GatewayStatus::Succeeded)
            .await
            .unwrap();

        f.mock.set_status(GatewayStatus::Failed);
        let poller = fast_poller(f.payments.clone(), 2);
        let (_tx, rx) = watch::channel(false);
        poller
            .poll(
                f.transaction.id,
                Provider::Mpesa,
                f.transaction.provider_ref.as_deref().unwrap(),
                rx,
            )
            .await
            .unwrap();

        assert_eq!(
            f.store.get_booking(f.booking_id).unwrap().status,
            BookingStatus::Completed
        );
    }
}
