pub mod app_config;
pub mod database;
pub mod redis_repo;
pub mod events;
pub mod ride_repo;
pub mod booking_repo;
pub mod transaction_repo;

pub use database::DbClient;
pub use redis_repo::RedisClient;
pub use events::EventProducer;
pub use ride_repo::PostgresRideRepository;
pub use booking_repo::PostgresBookingRepository;
pub use transaction_repo::PostgresTransactionRepository;
