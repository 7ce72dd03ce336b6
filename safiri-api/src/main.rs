use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use safiri_api::{app, state::{AppState, AuthConfig, Resiliency}};
use safiri_api::middleware::resiliency::CircuitBreaker;
use safiri_booking::payments::MockGateway;
use safiri_booking::repository::{BookingRepository, TransactionRepository};
use safiri_booking::{BookingOrchestrator, PaymentOrchestrator, StatusPoller};
use safiri_core::payment::{PaymentGateway, Provider};
use safiri_payment::airtel::{AirtelConfig, AirtelGateway};
use safiri_payment::mpesa::{MpesaConfig, MpesaGateway};
use safiri_rides::inventory::SeatInventory;
use safiri_rides::repository::RideRepository;
use safiri_store::{
    DbClient, EventProducer, PostgresBookingRepository, PostgresRideRepository,
    PostgresTransactionRepository, RedisClient,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "safiri_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = safiri_store::app_config::Config::load().expect("Failed to load config");
    tracing::info!("Starting Safiri API on port {}", config.server.port);

    // Postgres
    let db = DbClient::new(&config.database.url)
        .await
        .expect("Failed to connect to Postgres");
    db.migrate().await.expect("Failed to run migrations");
    let db = Arc::new(db);

    // Redis Connection
    let redis_client = RedisClient::new(&config.redis.url)
        .await
        .expect("Failed to connect to Redis");
    let redis_arc = Arc::new(redis_client.clone());

    // Kafka Connection
    let kafka_producer = EventProducer::new(&config.kafka.brokers)
        .expect("Failed to create Kafka producer");
    let kafka_arc = Arc::new(kafka_producer);

    // Operational overrides for the booking rules live in the DB.
    let rules = match db.fetch_business_rules(config.business_rules.clone()).await {
        Ok(rules) => rules,
        Err(e) => {
            tracing::warn!("Could not load business rules from DB, using config defaults: {}", e);
            config.business_rules.clone()
        }
    };

    // Repositories
    let ride_repo = Arc::new(PostgresRideRepository::new(
        db.pool.clone(),
        redis_client.clone(),
    ));
    let inventory = Arc::new(SeatInventory::new(
        ride_repo.clone() as Arc<dyn RideRepository>,
    ));
    let bookings: Arc<dyn BookingRepository> =
        Arc::new(PostgresBookingRepository::new(db.pool.clone()));
    let transactions: Arc<dyn TransactionRepository> = Arc::new(
        PostgresTransactionRepository::new(db.pool.clone(), redis_client),
    );

    // Mobile-money gateways; missing credentials fall back to the mock so
    // local stacks come up without provider accounts.
    let mut gateways: Vec<Arc<dyn PaymentGateway>> = Vec::new();
    match &config.providers.mpesa {
        Some(settings) => {
            let gateway = MpesaGateway::new(MpesaConfig {
                base_url: settings.base_url.clone(),
                consumer_key: settings.consumer_key.clone(),
                consumer_secret: settings.consumer_secret.clone(),
                shortcode: settings.shortcode.clone(),
                passkey: settings.passkey.clone(),
                callback_url: settings.callback_url.clone(),
            })
            .expect("Failed to build M-Pesa gateway");
            gateways.push(Arc::new(gateway));
        }
        None => {
            tracing::warn!("No M-Pesa credentials configured, using mock gateway");
            gateways.push(Arc::new(MockGateway::new(Provider::Mpesa)));
        }
    }
    match &config.providers.airtel {
        Some(settings) => {
            let gateway = AirtelGateway::new(AirtelConfig {
                base_url: settings.base_url.clone(),
                client_id: settings.client_id.clone(),
                client_secret: settings.client_secret.clone(),
                country: settings.country.clone(),
                currency: settings.currency.clone(),
            })
            .expect("Failed to build Airtel gateway");
            gateways.push(Arc::new(gateway));
        }
        None => {
            tracing::warn!("No Airtel credentials configured, using mock gateway");
            gateways.push(Arc::new(MockGateway::new(Provider::AirtelMoney)));
        }
    }

    // Orchestration
    let payment_orchestrator = Arc::new(PaymentOrchestrator::new(
        gateways,
        bookings.clone(),
        transactions.clone(),
        inventory.clone(),
        rules.currency.clone(),
        rules.booking_max_retries,
    ));
    let booking_orchestrator = Arc::new(BookingOrchestrator::new(
        inventory.clone(),
        bookings.clone(),
        transactions.clone(),
        rules.booking_max_retries,
    ));
    let poller = Arc::new(StatusPoller::new(
        payment_orchestrator.clone(),
        Duration::from_secs(rules.payment_poll_interval_seconds),
        rules.payment_poll_max_attempts,
    ));

    // Reservation sweeper
    tokio::spawn(safiri_api::worker::start_reservation_sweeper(
        payment_orchestrator.clone(),
        rules.clone(),
    ));

    let app_state = AppState {
        db,
        redis: redis_arc,
        kafka: kafka_arc,
        ride_repo,
        inventory,
        bookings,
        transactions,
        booking_orchestrator,
        payment_orchestrator,
        poller,
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
            expiration: config.auth.jwt_expiration_seconds,
            webhook_secret: config.auth.webhook_secret.clone(),
        },
        business_rules: rules,
        resiliency: Arc::new(Resiliency {
            payment_cb: CircuitBreaker::new("payments", 5, Duration::from_secs(30)),
        }),
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>()
    ).await.unwrap();
}
