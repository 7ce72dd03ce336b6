pub mod phone;
pub mod mpesa;
pub mod airtel;

pub use phone::Msisdn;
pub use mpesa::MpesaGateway;
pub use airtel::AirtelGateway;
