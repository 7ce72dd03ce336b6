use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use safiri_shared::pii::Masked;

/// Mobile-money networks we can collect from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Provider {
    Mpesa,
    AirtelMoney,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::Mpesa => write!(f, "MPESA"),
            Provider::AirtelMoney => write!(f, "AIRTEL_MONEY"),
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = crate::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "MPESA" | "M-PESA" => Ok(Provider::Mpesa),
            "AIRTEL_MONEY" | "AIRTEL" => Ok(Provider::AirtelMoney),
            other => Err(crate::CoreError::ValidationError(format!(
                "Unknown payment provider: {}",
                other
            ))),
        }
    }
}

/// A request to collect money for one booking payment cycle.
///
/// The gateway knows nothing about seats or rides, only money movement;
/// the booking reference travels as an opaque narration string.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub booking_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub phone: Masked<String>,
}

/// Status of an external transaction as reported by the provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayStatus {
    Pending,
    Succeeded,
    Failed,
    Expired,
    Unknown,
}

impl GatewayStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GatewayStatus::Succeeded | GatewayStatus::Failed | GatewayStatus::Expired
        )
    }
}

/// Provider errors normalized to a small taxonomy. Each adapter owns the
/// mapping from its vendor's codes to these three.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Payment rejected by provider: {0}")]
    Rejected(String),
    #[error("Provider did not respond in time")]
    Timeout,
    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> Provider;

    /// Push a collection request to the subscriber's handset.
    /// Returns the provider's transaction reference on acceptance.
    async fn initiate(&self, request: &ChargeRequest) -> Result<String, GatewayError>;

    /// Query the current status of a previously initiated transaction.
    async fn query_status(&self, provider_ref: &str) -> Result<GatewayStatus, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_provider_round_trip() {
        assert_eq!(Provider::from_str("MPESA").unwrap(), Provider::Mpesa);
        assert_eq!(Provider::from_str("m-pesa").unwrap(), Provider::Mpesa);
        assert_eq!(
            Provider::from_str("airtel").unwrap(),
            Provider::AirtelMoney
        );
        assert!(Provider::from_str("paypal").is_err());
        assert_eq!(Provider::Mpesa.to_string(), "MPESA");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(GatewayStatus::Succeeded.is_terminal());
        assert!(GatewayStatus::Failed.is_terminal());
        assert!(GatewayStatus::Expired.is_terminal());
        assert!(!GatewayStatus::Pending.is_terminal());
        assert!(!GatewayStatus::Unknown.is_terminal());
    }
}
