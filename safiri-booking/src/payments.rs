use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use chrono::{Duration, Utc};
use uuid::Uuid;
use tracing::{error, info, warn};

use safiri_core::payment::{
    ChargeRequest, GatewayError, GatewayStatus, PaymentGateway, Provider,
};
use safiri_rides::fare;
use safiri_rides::inventory::SeatInventory;
use safiri_shared::pii::Masked;

use crate::models::{Booking, BookingStatus, PaymentTransaction, TransactionStatus};
use crate::orchestrator::BookingError;
use crate::repository::{
    BookingRepository, Settlement, SettleOutcome, TransactionRepository,
};

/// What reconciliation did with a terminal report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileResult {
    Settled,
    /// The transaction was already terminal; the report was a duplicate.
    AlreadySettled,
}

/// Drives one booking's payment lifecycle from awaiting-payment to a
/// terminal state, and reconciles external outcomes back into booking and
/// inventory state exactly once.
pub struct PaymentOrchestrator {
    gateways: HashMap<Provider, Arc<dyn PaymentGateway>>,
    bookings: Arc<dyn BookingRepository>,
    transactions: Arc<dyn TransactionRepository>,
    inventory: Arc<SeatInventory>,
    currency: String,
    max_retries: u32,
}

impl PaymentOrchestrator {
    pub fn new(
        gateways: Vec<Arc<dyn PaymentGateway>>,
        bookings: Arc<dyn BookingRepository>,
        transactions: Arc<dyn TransactionRepository>,
        inventory: Arc<SeatInventory>,
        currency: String,
        max_retries: u32,
    ) -> Self {
        Self {
            gateways: gateways.into_iter().map(|g| (g.provider(), g)).collect(),
            bookings,
            transactions,
            inventory,
            currency,
            max_retries: max_retries.max(1),
        }
    }

    pub fn gateway(&self, provider: Provider) -> Option<Arc<dyn PaymentGateway>> {
        self.gateways.get(&provider).cloned()
    }

    /// Start a payment cycle for the booking's unpaid seats.
    ///
    /// The reservation is durably recorded before this is called, so the
    /// slow external initiate holds no booking or inventory lock.
    pub async fn initiate_payment(
        &self,
        booking_id: Uuid,
        provider: Provider,
        phone: Masked<String>,
    ) -> Result<PaymentTransaction, BookingError> {
        // 1. Load booking and enforce the single-active-transaction rule.
        let booking = self
            .bookings
            .get(booking_id)
            .await
            .map_err(|e| BookingError::Storage(e.to_string()))?
            .ok_or(BookingError::BookingNotFound(booking_id))?;

        if booking.status == BookingStatus::Cancelled {
            return Err(BookingError::BookingCancelled(booking_id));
        }

        let active = self
            .transactions
            .find_active_for_booking(booking_id)
            .await
            .map_err(|e| BookingError::Storage(e.to_string()))?;
        if active.is_some() {
            return Err(BookingError::TransactionAlreadyInProgress);
        }

        // 2. Compute the chargeable amount: unpaid seats only.
        let ride = self.inventory.get(booking.ride_id).await?;
        let amount = fare::delta_charge(
            booking.seat_count,
            booking.paid_seat_count,
            ride.price_per_seat_cents,
        );
        if amount <= 0 {
            return Err(BookingError::NothingToCharge);
        }

        // 3. A terminal failure released this cycle's seats; take them back
        //    before charging for them again.
        let booking = if booking.status == BookingStatus::Failed {
            self.rereserve_failed_cycle(booking).await?
        } else {
            booking
        };

        // 4. Claim the active-transaction slot before any network I/O.
        let transaction = PaymentTransaction::new(
            booking_id,
            provider,
            amount,
            self.currency.clone(),
            phone.clone(),
        );
        if let Err(e) = self.transactions.insert(&transaction).await {
            // A concurrent initiate claimed the slot first.
            warn!(%booking_id, "Transaction insert refused: {}", e);
            return Err(BookingError::TransactionAlreadyInProgress);
        }

        let gateway = self
            .gateway(provider)
            .ok_or(BookingError::ProviderNotConfigured(provider))?;

        let request = ChargeRequest {
            booking_id,
            amount_cents: amount,
            currency: self.currency.clone(),
            phone,
        };

        // 5. Push to the provider; no locks are held across this await.
        match gateway.initiate(&request).await {
            Ok(provider_ref) => {
                self.transactions
                    .mark_dispatched(transaction.id, &provider_ref)
                    .await
                    .map_err(|e| BookingError::Storage(e.to_string()))?;
                self.set_booking_status(&booking, BookingStatus::PaymentInProgress)
                    .await;

                info!(
                    transaction_id = %transaction.id,
                    %booking_id,
                    %provider,
                    amount_cents = amount,
                    "Payment initiated"
                );

                let mut dispatched = transaction;
                dispatched.provider_ref = Some(provider_ref);
                dispatched.status = TransactionStatus::Pending;
                Ok(dispatched)
            }
            Err(gateway_err) => {
                // Outright rejection is terminal for this cycle: settle the
                // transaction as failed and hand the delta back.
                if let Err(e) = self
                    .reconcile(transaction.id, GatewayStatus::Failed)
                    .await
                {
                    error!(transaction_id = %transaction.id, "Failed to settle rejected initiation: {}", e);
                }
                Err(match gateway_err {
                    GatewayError::Rejected(reason) => BookingError::PaymentRejected(reason),
                    GatewayError::Timeout => BookingError::PaymentTimeout,
                    GatewayError::Unavailable(reason) => BookingError::PaymentUnknown(reason),
                })
            }
        }
    }

    /// Resolve a transaction to its terminal outcome, exactly once.
    ///
    /// Safe to call redundantly (poller, webhook and client poll may race);
    /// an already-terminal transaction reconciles to a no-op.
    pub async fn reconcile(
        &self,
        transaction_id: Uuid,
        outcome: GatewayStatus,
    ) -> Result<ReconcileResult, BookingError> {
        let terminal = match outcome {
            GatewayStatus::Succeeded => TransactionStatus::Succeeded,
            GatewayStatus::Failed => TransactionStatus::Failed,
            GatewayStatus::Expired => TransactionStatus::Expired,
            GatewayStatus::Pending | GatewayStatus::Unknown => {
                return Err(BookingError::Storage(
                    "reconcile requires a terminal status".to_string(),
                ));
            }
        };

        let transaction = self
            .transactions
            .get(transaction_id)
            .await
            .map_err(|e| BookingError::Storage(e.to_string()))?
            .ok_or(BookingError::TransactionNotFound(transaction_id))?;

        if transaction.status.is_terminal() {
            return Ok(ReconcileResult::AlreadySettled);
        }

        for _ in 0..self.max_retries {
            let booking = self
                .bookings
                .get(transaction.booking_id)
                .await
                .map_err(|e| BookingError::Storage(e.to_string()))?
                .ok_or(BookingError::BookingNotFound(transaction.booking_id))?;

            let settlement = self.plan_settlement(&transaction, &booking, terminal);

            match self
                .transactions
                .settle(&settlement)
                .await
                .map_err(|e| BookingError::Storage(e.to_string()))?
            {
                SettleOutcome::Applied => {
                    info!(
                        %transaction_id,
                        booking_id = %booking.id,
                        status = %terminal,
                        released = settlement.release_seats,
                        "Payment reconciled"
                    );
                    return Ok(ReconcileResult::Settled);
                }
                SettleOutcome::AlreadyTerminal => {
                    return Ok(ReconcileResult::AlreadySettled);
                }
                SettleOutcome::Conflict => continue,
            }
        }

        Err(BookingError::ConcurrentModification)
    }

    /// Expire reservations whose booking sat unpaid past the TTL. Returns
    /// how many bookings were swept.
    pub async fn sweep_expired(&self, ttl_minutes: i64) -> Result<usize, BookingError> {
        let cutoff = Utc::now() - Duration::minutes(ttl_minutes);
        let stale = self
            .bookings
            .list_stale(
                &[
                    BookingStatus::AwaitingPayment,
                    BookingStatus::PaymentInProgress,
                ],
                cutoff,
            )
            .await
            .map_err(|e| BookingError::Storage(e.to_string()))?;

        let mut swept = 0;
        for booking in stale {
            match self
                .transactions
                .find_active_for_booking(booking.id)
                .await
                .map_err(|e| BookingError::Storage(e.to_string()))?
            {
                // An in-flight transaction expires through the normal
                // reconcile path so the terminal write stays exactly-once.
                Some(transaction) => {
                    if self
                        .reconcile(transaction.id, GatewayStatus::Expired)
                        .await
                        .is_ok()
                    {
                        swept += 1;
                    }
                }
                // No transaction was ever dispatched; fail the cycle
                // directly with the same rollback semantics.
                None => {
                    if self.expire_unpaid_booking(&booking).await.is_ok() {
                        swept += 1;
                    }
                }
            }
        }

        if swept > 0 {
            info!(swept, ttl_minutes, "Released expired reservations");
        }
        Ok(swept)
    }

    fn plan_settlement(
        &self,
        transaction: &PaymentTransaction,
        booking: &Booking,
        terminal: TransactionStatus,
    ) -> Settlement {
        match terminal {
            TransactionStatus::Succeeded => Settlement {
                transaction_id: transaction.id,
                terminal_status: terminal,
                booking_id: booking.id,
                expected_booking_version: booking.version,
                booking_status: BookingStatus::Completed,
                seat_count: booking.seat_count,
                paid_seat_count: booking.seat_count,
                ride_id: booking.ride_id,
                // Seats were committed at reservation time.
                release_seats: 0,
            },
            _ => {
                let released = booking.unpaid_seats();
                let (status, seat_count) = if booking.paid_seat_count == 0 {
                    (BookingStatus::Failed, booking.seat_count)
                } else {
                    // A failed top-up: the rider keeps the seats they paid
                    // for and the booking returns to Completed.
                    (BookingStatus::Completed, booking.paid_seat_count)
                };
                Settlement {
                    transaction_id: transaction.id,
                    terminal_status: terminal,
                    booking_id: booking.id,
                    expected_booking_version: booking.version,
                    booking_status: status,
                    seat_count,
                    paid_seat_count: booking.paid_seat_count,
                    ride_id: booking.ride_id,
                    release_seats: released.max(0),
                }
            }
        }
    }

    async fn rereserve_failed_cycle(&self, booking: Booking) -> Result<Booking, BookingError> {
        let delta = booking.unpaid_seats();
        if delta <= 0 {
            return Ok(booking);
        }

        for _ in 0..self.max_retries {
            match self.inventory.reserve(booking.ride_id, delta).await {
                Ok(_) => {
                    let mut updated = booking.clone();
                    updated.status = BookingStatus::AwaitingPayment;
                    updated.version = booking.version + 1;
                    updated.touch();
                    let applied = self
                        .bookings
                        .update(&updated, booking.version)
                        .await
                        .map_err(|e| BookingError::Storage(e.to_string()))?;
                    if !applied {
                        // The booking moved underneath us; undo and bail so
                        // the caller re-reads.
                        self.inventory.release(booking.ride_id, delta).await?;
                        return Err(BookingError::ConcurrentModification);
                    }
                    return Ok(updated);
                }
                Err(safiri_rides::inventory::InventoryError::ConcurrentModification) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(BookingError::ConcurrentModification)
    }

    async fn expire_unpaid_booking(&self, booking: &Booking) -> Result<(), BookingError> {
        let released = booking.unpaid_seats();
        let (status, seat_count) = if booking.paid_seat_count == 0 {
            (BookingStatus::Failed, booking.seat_count)
        } else {
            (BookingStatus::Completed, booking.paid_seat_count)
        };

        let mut updated = booking.clone();
        updated.status = status;
        updated.seat_count = seat_count;
        updated.version = booking.version + 1;
        updated.touch();

        let applied = self
            .bookings
            .update(&updated, booking.version)
            .await
            .map_err(|e| BookingError::Storage(e.to_string()))?;
        if !applied {
            // Someone else acted on the booking; leave it to them.
            return Err(BookingError::ConcurrentModification);
        }
        if released > 0 {
            self.inventory.release(booking.ride_id, released).await?;
        }
        Ok(())
    }

    async fn set_booking_status(&self, booking: &Booking, status: BookingStatus) {
        let mut updated = booking.clone();
        updated.status = status;
        updated.version = booking.version + 1;
        updated.touch();
        // Best effort: the transaction row is the source of truth for the
        // cycle; a lost status write is corrected at reconcile time.
        match self.bookings.update(&updated, booking.version).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(booking_id = %booking.id, %status, "Booking status write lost a version race")
            }
            Err(e) => error!(booking_id = %booking.id, "Booking status write failed: {}", e),
        }
    }
}

/// Scriptable gateway for tests and provider-less local runs.
pub struct MockGateway {
    provider: Provider,
    reject_initiation: AtomicBool,
    status: Mutex<GatewayStatus>,
    counter: AtomicU64,
}

impl MockGateway {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            reject_initiation: AtomicBool::new(false),
            status: Mutex::new(GatewayStatus::Pending),
            counter: AtomicU64::new(0),
        }
    }

    pub fn reject_next_initiation(&self) {
        self.reject_initiation.store(true, Ordering::SeqCst);
    }

    pub fn set_status(&self, status: GatewayStatus) {
        *self.status.lock().unwrap() = status;
    }
}

#[async_trait::async_trait]
impl PaymentGateway for MockGateway {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn initiate(&self, request: &ChargeRequest) -> Result<String, GatewayError> {
        if self.reject_initiation.swap(false, Ordering::SeqCst) {
            return Err(GatewayError::Rejected(
                "Simulated provider decline".to_string(),
            ));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("MOCK-{}-{}", request.booking_id.simple(), n))
    }

    async fn query_status(&self, _provider_ref: &str) -> Result<GatewayStatus, GatewayError> {
        Ok(*self.status.lock().unwrap())
    }
}
