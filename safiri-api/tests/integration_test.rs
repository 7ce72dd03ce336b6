// End-to-end booking and settlement flows over the in-memory stores, so
// the suite runs without Postgres, Redis or a provider account.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use safiri_booking::memory::InMemoryStore;
use safiri_booking::models::{BookingStatus, TransactionStatus};
use safiri_booking::payments::MockGateway;
use safiri_booking::{BookingOrchestrator, PaymentOrchestrator, StatusPoller};
use safiri_core::payment::{GatewayStatus, PaymentGateway, Provider};
use safiri_rides::inventory::{InMemoryRideRepository, SeatInventory};
use safiri_rides::models::Ride;
use safiri_rides::repository::RideRepository;
use safiri_shared::pii::Masked;
use uuid::Uuid;

struct Stack {
    bookings: BookingOrchestrator,
    payments: Arc<PaymentOrchestrator>,
    poller: Arc<StatusPoller>,
    mock: Arc<MockGateway>,
    store: Arc<InMemoryStore>,
    inventory: Arc<SeatInventory>,
    ride_id: Uuid,
}

async fn stack(total_seats: i32, price_cents: i64) -> Stack {
    let rides = Arc::new(InMemoryRideRepository::new());
    let ride = Ride::new(
        "driver-1".to_string(),
        "Nairobi".to_string(),
        "Naivasha".to_string(),
        Utc::now(),
        price_cents,
        total_seats,
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
    let bookings = BookingOrchestrator::new(inventory.clone(), store.clone(), store.clone(), 3);
    let poller = Arc::new(StatusPoller::new(
        payments.clone(),
        Duration::from_millis(1),
        10,
    ));

    Stack {
        bookings,
        payments,
        poller,
        mock,
        store,
        inventory,
        ride_id,
    }
}

fn phone() -> Masked<String> {
    Masked("0712345678".to_string())
}

#[tokio::test]
async fn test_happy_path_book_pay_settle() {
    let s = stack(4, 150_000).await;

    // 1. Book two seats: capacity is held immediately.
    let booking = s
        .bookings
        .create_or_update(s.ride_id, "rider-1", 2)
        .await
        .unwrap();
    assert_eq!(s.inventory.available_seats(s.ride_id).await.unwrap(), 2);

    // 2. Initiate the charge and let the poller observe success.
    let transaction = s
        .payments
        .initiate_payment(booking.id, Provider::Mpesa, phone())
        .await
        .unwrap();
    assert_eq!(transaction.amount_cents, 300_000);

    s.mock.set_status(GatewayStatus::Succeeded);
    let (_cancel, rx) = tokio::sync::watch::channel(false);
    s.poller
        .poll(
            transaction.id,
            Provider::Mpesa,
            transaction.provider_ref.as_deref().unwrap(),
            rx,
        )
        .await
        .unwrap();

    // 3. Booking confirmed; seats stay committed.
    let settled = s.store.get_booking(booking.id).unwrap();
    assert_eq!(settled.status, BookingStatus::Completed);
    assert_eq!(settled.paid_seat_count, 2);
    assert_eq!(s.inventory.available_seats(s.ride_id).await.unwrap(), 2);
}

#[tokio::test]
async fn test_seat_increase_charges_delta_then_settles() {
    let s = stack(8, 100_000).await;

    let booking = s
        .bookings
        .create_or_update(s.ride_id, "rider-1", 2)
        .await
        .unwrap();
    let first = s
        .payments
        .initiate_payment(booking.id, Provider::Mpesa, phone())
        .await
        .unwrap();
    s.payments
        .reconcile(first.id, GatewayStatus::Succeeded)
        .await
        .unwrap();

    // Grow to 5: only the 3-seat delta is charged.
    s.bookings
        .create_or_update(s.ride_id, "rider-1", 5)
        .await
        .unwrap();
    let top_up = s
        .payments
        .initiate_payment(booking.id, Provider::Mpesa, phone())
        .await
        .unwrap();
    assert_eq!(top_up.amount_cents, 300_000);

    s.payments
        .reconcile(top_up.id, GatewayStatus::Succeeded)
        .await
        .unwrap();

    let settled = s.store.get_booking(booking.id).unwrap();
    assert_eq!(settled.seat_count, 5);
    assert_eq!(settled.paid_seat_count, 5);
    assert_eq!(settled.status, BookingStatus::Completed);
    assert_eq!(s.inventory.available_seats(s.ride_id).await.unwrap(), 3);
}

#[tokio::test]
async fn test_failed_top_up_keeps_paid_seats() {
    let s = stack(8, 100_000).await;

    let booking = s
        .bookings
        .create_or_update(s.ride_id, "rider-1", 2)
        .await
        .unwrap();
    let first = s
        .payments
        .initiate_payment(booking.id, Provider::Mpesa, phone())
        .await
        .unwrap();
    s.payments
        .reconcile(first.id, GatewayStatus::Succeeded)
        .await
        .unwrap();

    s.bookings
        .create_or_update(s.ride_id, "rider-1", 5)
        .await
        .unwrap();
    let top_up = s
        .payments
        .initiate_payment(booking.id, Provider::Mpesa, phone())
        .await
        .unwrap();

    // The provider reports the top-up expired.
    s.payments
        .reconcile(top_up.id, GatewayStatus::Expired)
        .await
        .unwrap();

    let settled = s.store.get_booking(booking.id).unwrap();
    assert_eq!(settled.status, BookingStatus::Completed);
    assert_eq!(settled.seat_count, 2);
    assert_eq!(settled.paid_seat_count, 2);
    assert_eq!(s.inventory.available_seats(s.ride_id).await.unwrap(), 6);
}

#[tokio::test]
async fn test_webhook_and_poller_race_settles_once() {
    let s = stack(4, 100_000).await;

    let booking = s
        .bookings
        .create_or_update(s.ride_id, "rider-1", 2)
        .await
        .unwrap();
    let transaction = s
        .payments
        .initiate_payment(booking.id, Provider::Mpesa, phone())
        .await
        .unwrap();

    // "Webhook" lands first.
    s.payments
        .reconcile(transaction.id, GatewayStatus::Succeeded)
        .await
        .unwrap();

    // Poller then observes a conflicting failure; it must not unwind the
    // settled booking.
    s.mock.set_status(GatewayStatus::Failed);
    let (_cancel, rx) = tokio::sync::watch::channel(false);
    s.poller
        .poll(
            transaction.id,
            Provider::Mpesa,
            transaction.provider_ref.as_deref().unwrap(),
            rx,
        )
        .await
        .unwrap();

    let settled = s.store.get_booking(booking.id).unwrap();
    assert_eq!(settled.status, BookingStatus::Completed);
    assert_eq!(settled.paid_seat_count, 2);
    assert_eq!(s.inventory.available_seats(s.ride_id).await.unwrap(), 2);
}

#[tokio::test]
async fn test_abandoned_payment_expires_and_frees_seats() {
    let s = stack(2, 100_000).await;

    let booking = s
        .bookings
        .create_or_update(s.ride_id, "rider-1", 2)
        .await
        .unwrap();
    let transaction = s
        .payments
        .initiate_payment(booking.id, Provider::Mpesa, phone())
        .await
        .unwrap();

    // Rider never approves the prompt; the bounded poll gives up.
    s.mock.set_status(GatewayStatus::Pending);
    let (_cancel, rx) = tokio::sync::watch::channel(false);
    s.poller
        .poll(
            transaction.id,
            Provider::Mpesa,
            transaction.provider_ref.as_deref().unwrap(),
            rx,
        )
        .await
        .unwrap();

    let after = s.store.get_transaction(transaction.id).unwrap();
    assert_eq!(after.status, TransactionStatus::Expired);
    // The whole ride is bookable again.
    assert_eq!(s.inventory.available_seats(s.ride_id).await.unwrap(), 2);

    // And another rider can take the seats.
    let next = s
        .bookings
        .create_or_update(s.ride_id, "rider-2", 2)
        .await
        .unwrap();
    assert_eq!(next.seat_count, 2);
}
