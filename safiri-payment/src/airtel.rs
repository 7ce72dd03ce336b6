use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use safiri_core::payment::{ChargeRequest, GatewayError, GatewayStatus, PaymentGateway, Provider};

use crate::phone::Msisdn;

// Airtel Money collections floor and cap for KE.
const MIN_AMOUNT_KES: i64 = 10;
const MAX_AMOUNT_KES: i64 = 150_000;

#[derive(Debug, Clone, Deserialize)]
pub struct AirtelConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub country: String,
    pub currency: String,
}

/// Airtel Money collections adapter (USSD push + transaction enquiry).
pub struct AirtelGateway {
    config: AirtelConfig,
    client: reqwest::Client,
    token: Mutex<Option<(String, Instant)>>,
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Serialize)]
struct CollectionRequest {
    reference: String,
    subscriber: Subscriber,
    transaction: CollectionTransaction,
}

#[derive(Debug, Serialize)]
struct Subscriber {
    country: String,
    currency: String,
    msisdn: String,
}

#[derive(Debug, Serialize)]
struct CollectionTransaction {
    amount: i64,
    country: String,
    currency: String,
    id: String,
}

#[derive(Debug, Deserialize)]
struct AirtelEnvelope {
    data: Option<AirtelData>,
    status: Option<AirtelStatus>,
}

#[derive(Debug, Deserialize)]
struct AirtelData {
    transaction: Option<AirtelTransaction>,
}

#[derive(Debug, Deserialize)]
struct AirtelTransaction {
    #[allow(dead_code)]
    id: Option<String>,
    status: Option<String>,
    #[allow(dead_code)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AirtelStatus {
    success: Option<bool>,
    message: Option<String>,
}

impl AirtelGateway {
    pub fn new(config: AirtelConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        Ok(Self {
            config,
            client,
            token: Mutex::new(None),
        })
    }

    fn amount_kes(amount_cents: i64) -> i64 {
        (amount_cents + 99) / 100
    }

    async fn access_token(&self) -> Result<String, GatewayError> {
        {
            let cached = self.token.lock().unwrap();
            if let Some((token, fetched_at)) = cached.as_ref() {
                if fetched_at.elapsed() < Duration::from_secs(150) {
                    return Ok(token.clone());
                }
            }
        }

        let url = format!("{}/auth/oauth2/token", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .json(&TokenRequest {
                client_id: &self.config.client_id,
                client_secret: &self.config.client_secret,
                grant_type: "client_credentials",
            })
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            return Err(GatewayError::Unavailable(format!(
                "OAuth returned {}",
                response.status()
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        let mut cached = self.token.lock().unwrap();
        *cached = Some((body.access_token.clone(), Instant::now()));
        Ok(body.access_token)
    }
}

fn map_transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Unavailable(err.to_string())
    }
}

/// Airtel transaction status codes: TS settled, TF failed, TIP in progress,
/// TA ambiguous, TE expired.
pub fn map_status_code(code: &str) -> GatewayStatus {
    match code {
        "TS" => GatewayStatus::Succeeded,
        "TF" => GatewayStatus::Failed,
        "TIP" => GatewayStatus::Pending,
        "TE" => GatewayStatus::Expired,
        _ => GatewayStatus::Unknown,
    }
}

#[async_trait]
impl PaymentGateway for AirtelGateway {
    fn provider(&self) -> Provider {
        Provider::AirtelMoney
    }

    async fn initiate(&self, request: &ChargeRequest) -> Result<String, GatewayError> {
        let msisdn = Msisdn::parse(&request.phone.0)
            .map_err(|e| GatewayError::Rejected(e.to_string()))?;
        let amount = Self::amount_kes(request.amount_cents);
        if !(MIN_AMOUNT_KES..=MAX_AMOUNT_KES).contains(&amount) {
            return Err(GatewayError::Rejected(format!(
                "amount {} KES outside Airtel Money limits ({}..={})",
                amount, MIN_AMOUNT_KES, MAX_AMOUNT_KES
            )));
        }

        let token = self.access_token().await?;

        // Enquiries are keyed by our transaction id, so that id is the
        // provider reference we hand back.
        let transaction_id = format!("SAFIRI{}", Uuid::new_v4().simple());
        let body = CollectionRequest {
            reference: request.booking_id.simple().to_string(),
            subscriber: Subscriber {
                country: self.config.country.clone(),
                currency: self.config.currency.clone(),
                // Airtel wants the subscriber number without country code.
                msisdn: msisdn.local().to_string(),
            },
            transaction: CollectionTransaction {
                amount,
                country: self.config.country.clone(),
                currency: self.config.currency.clone(),
                id: transaction_id.clone(),
            },
        };

        let url = format!("{}/merchant/v1/payments/", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .header("X-Country", &self.config.country)
            .header("X-Currency", &self.config.currency)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(if status.is_server_error() {
                GatewayError::Unavailable(status.to_string())
            } else {
                GatewayError::Rejected(status.to_string())
            });
        }

        let parsed: AirtelEnvelope = response
            .json()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        match parsed.status.as_ref().and_then(|s| s.success) {
            Some(true) => {
                debug!(%transaction_id, "Airtel collection accepted");
                Ok(transaction_id)
            }
            _ => Err(GatewayError::Rejected(
                parsed
                    .status
                    .and_then(|s| s.message)
                    .unwrap_or_else(|| "collection refused".to_string()),
            )),
        }
    }

    async fn query_status(&self, provider_ref: &str) -> Result<GatewayStatus, GatewayError> {
        let token = self.access_token().await?;

        let url = format!("{}/standard/v1/payments/{}", self.config.base_url, provider_ref);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&token)
            .header("X-Country", &self.config.country)
            .header("X-Currency", &self.config.currency)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            warn!(status = %response.status(), provider_ref, "Airtel enquiry error");
            return Err(GatewayError::Unavailable(response.status().to_string()));
        }

        let parsed: AirtelEnvelope = response
            .json()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        let code = parsed
            .data
            .and_then(|d| d.transaction)
            .and_then(|t| t.status);
        match code {
            Some(code) => Ok(map_status_code(&code)),
            None => Ok(GatewayStatus::Unknown),
        }
    }
}

// ============================================================================
// Webhook callback payload
// ============================================================================

/// Body Airtel posts to the configured callback when a collection resolves.
#[derive(Debug, Deserialize)]
pub struct AirtelCallback {
    pub transaction: AirtelCallbackTransaction,
}

#[derive(Debug, Deserialize)]
pub struct AirtelCallbackTransaction {
    pub id: String,
    pub status_code: String,
    pub message: Option<String>,
}

impl AirtelCallback {
    pub fn outcome(&self) -> GatewayStatus {
        map_status_code(&self.transaction.status_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safiri_shared::pii::Masked;

    fn gateway() -> AirtelGateway {
        AirtelGateway::new(AirtelConfig {
            base_url: "http://localhost:1".to_string(),
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            country: "KE".to_string(),
            currency: "KES".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(map_status_code("TS"), GatewayStatus::Succeeded);
        assert_eq!(map_status_code("TF"), GatewayStatus::Failed);
        assert_eq!(map_status_code("TIP"), GatewayStatus::Pending);
        assert_eq!(map_status_code("TE"), GatewayStatus::Expired);
        assert_eq!(map_status_code("??"), GatewayStatus::Unknown);
    }

    #[tokio::test]
    async fn test_amount_floor_enforced_locally() {
        let gw = gateway();
        let request = ChargeRequest {
            booking_id: Uuid::new_v4(),
            amount_cents: 500, // 5 KES, below the 10 KES floor
            currency: "KES".to_string(),
            phone: Masked("0733123456".to_string()),
        };
        let err = gw.initiate(&request).await.unwrap_err();
        assert!(matches!(err, GatewayError::Rejected(_)));
    }

    #[test]
    fn test_callback_parses() {
        let payload = serde_json::json!({
            "transaction": {
                "id": "SAFIRI0af1c3",
                "status_code": "TS",
                "message": "Success"
            }
        });
        let callback: AirtelCallback = serde_json::from_value(payload).unwrap();
        assert_eq!(callback.outcome(), GatewayStatus::Succeeded);
        assert_eq!(callback.transaction.id, "SAFIRI0af1c3");
    }
}
