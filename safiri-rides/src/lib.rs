pub mod models;
pub mod repository;
pub mod inventory;
pub mod fare;

pub use models::Ride;
pub use repository::{RideRepository, ReserveOutcome};
pub use inventory::{SeatInventory, InventoryError, Reservation, InMemoryRideRepository};
