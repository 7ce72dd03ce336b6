pub mod models;
pub mod repository;
pub mod orchestrator;
pub mod payments;
pub mod poller;
pub mod memory;

pub use models::{Booking, BookingStatus, PaymentTransaction, TransactionStatus};
pub use orchestrator::{BookingOrchestrator, BookingError};
pub use payments::PaymentOrchestrator;
pub use poller::StatusPoller;
