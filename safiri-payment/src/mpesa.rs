use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use safiri_core::payment::{ChargeRequest, GatewayError, GatewayStatus, PaymentGateway, Provider};

use crate::phone::Msisdn;

// Daraja caps a single STK push at KES 250,000 and floors it at KES 1.
const MIN_AMOUNT_KES: i64 = 1;
const MAX_AMOUNT_KES: i64 = 250_000;

#[derive(Debug, Clone, Deserialize)]
pub struct MpesaConfig {
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub shortcode: String,
    pub passkey: String,
    pub callback_url: String,
}

/// Safaricom Daraja STK-push adapter. Stateless with respect to bookings:
/// it moves money and reports status, nothing else.
pub struct MpesaGateway {
    config: MpesaConfig,
    client: reqwest::Client,
    // Daraja tokens live ~1 hour; cache to avoid an OAuth round trip per
    // charge.
    token: Mutex<Option<(String, Instant)>>,
}

#[derive(Debug, Deserialize)]
struct OauthResponse {
    access_token: String,
    expires_in: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushRequest {
    business_short_code: String,
    password: String,
    timestamp: String,
    transaction_type: String,
    amount: i64,
    party_a: String,
    party_b: String,
    phone_number: String,
    #[serde(rename = "CallBackURL")]
    call_back_url: String,
    account_reference: String,
    transaction_desc: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushResponse {
    #[allow(dead_code)]
    #[serde(rename = "MerchantRequestID")]
    merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: Option<String>,
    response_code: Option<String>,
    response_description: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkQueryRequest {
    business_short_code: String,
    password: String,
    timestamp: String,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StkQueryResponse {
    result_code: Option<String>,
    result_desc: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DarajaErrorBody {
    #[serde(rename = "errorCode")]
    error_code: Option<String>,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

impl MpesaGateway {
    pub fn new(config: MpesaConfig) -> Result<Self, GatewayError> {
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

    /// Cents to whole shillings, rounding up so we never undercharge.
    fn amount_kes(amount_cents: i64) -> i64 {
        (amount_cents + 99) / 100
    }

    fn password_and_timestamp(&self) -> (String, String) {
        let timestamp = chrono::Utc::now().format("%Y%m%d%H%M%S").to_string();
        let raw = format!("{}{}{}", self.config.shortcode, self.config.passkey, timestamp);
        let password = base64::engine::general_purpose::STANDARD.encode(raw);
        (password, timestamp)
    }

    async fn access_token(&self) -> Result<String, GatewayError> {
        {
            let cached = self.token.lock().unwrap();
            if let Some((token, fetched_at)) = cached.as_ref() {
                if fetched_at.elapsed() < Duration::from_secs(3000) {
                    return Ok(token.clone());
                }
            }
        }

        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.config.base_url
        );
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            return Err(GatewayError::Unavailable(format!(
                "OAuth returned {}",
                response.status()
            )));
        }

        let body: OauthResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        debug!(expires_in = %body.expires_in, "Fetched Daraja token");

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

/// Daraja STK result codes observed in the field.
pub fn map_result_code(code: &str) -> GatewayStatus {
    match code {
        "0" => GatewayStatus::Succeeded,
        // 1032: cancelled on the handset. 1: insufficient funds. 2001: wrong
        // PIN. 1025/9999: push could not be delivered.
        "1" | "1032" | "2001" | "1025" | "9999" => GatewayStatus::Failed,
        // 1037: subscriber unreachable / prompt timed out.
        "1037" => GatewayStatus::Expired,
        _ => GatewayStatus::Unknown,
    }
}

#[async_trait]
impl PaymentGateway for MpesaGateway {
    fn provider(&self) -> Provider {
        Provider::Mpesa
    }

    async fn initiate(&self, request: &ChargeRequest) -> Result<String, GatewayError> {
        // Validate locally before any network I/O.
        let msisdn = Msisdn::parse(&request.phone.0)
            .map_err(|e| GatewayError::Rejected(e.to_string()))?;
        let amount = Self::amount_kes(request.amount_cents);
        if !(MIN_AMOUNT_KES..=MAX_AMOUNT_KES).contains(&amount) {
            return Err(GatewayError::Rejected(format!(
                "amount {} KES outside M-Pesa limits ({}..={})",
                amount, MIN_AMOUNT_KES, MAX_AMOUNT_KES
            )));
        }

        let token = self.access_token().await?;
        let (password, timestamp) = self.password_and_timestamp();

        let body = StkPushRequest {
            business_short_code: self.config.shortcode.clone(),
            password,
            timestamp,
            transaction_type: "CustomerPayBillOnline".to_string(),
            amount,
            party_a: msisdn.international().to_string(),
            party_b: self.config.shortcode.clone(),
            phone_number: msisdn.international().to_string(),
            call_back_url: self.config.callback_url.clone(),
            account_reference: request.booking_id.simple().to_string(),
            transaction_desc: "Safiri ride booking".to_string(),
        };

        let url = format!("{}/mpesa/stkpush/v1/processrequest", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let err: DarajaErrorBody = response.json().await.unwrap_or(DarajaErrorBody {
                error_code: None,
                error_message: None,
            });
            let message = err
                .error_message
                .or(err.error_code)
                .unwrap_or_else(|| status.to_string());
            return Err(if status.is_server_error() {
                GatewayError::Unavailable(message)
            } else {
                GatewayError::Rejected(message)
            });
        }

        let parsed: StkPushResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        match parsed.response_code.as_deref() {
            Some("0") => parsed.checkout_request_id.ok_or_else(|| {
                GatewayError::Unavailable("accepted push without CheckoutRequestID".to_string())
            }),
            _ => Err(GatewayError::Rejected(
                parsed
                    .response_description
                    .unwrap_or_else(|| "STK push refused".to_string()),
            )),
        }
    }

    async fn query_status(&self, provider_ref: &str) -> Result<GatewayStatus, GatewayError> {
        let token = self.access_token().await?;
        let (password, timestamp) = self.password_and_timestamp();

        let body = StkQueryRequest {
            business_short_code: self.config.shortcode.clone(),
            password,
            timestamp,
            checkout_request_id: provider_ref.to_string(),
        };

        let url = format!("{}/mpesa/stkpushquery/v1/query", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let err: DarajaErrorBody = response.json().await.unwrap_or(DarajaErrorBody {
                error_code: None,
                error_message: None,
            });
            // Daraja reports "still processing" as an HTTP error.
            if err.error_code.as_deref() == Some("500.001.1001") {
                return Ok(GatewayStatus::Pending);
            }
            warn!(%status, "STK query error: {:?}", err.error_message);
            return Err(GatewayError::Unavailable(
                err.error_message.unwrap_or_else(|| status.to_string()),
            ));
        }

        let parsed: StkQueryResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        match parsed.result_code.as_deref() {
            Some(code) => Ok(map_result_code(code)),
            None => {
                debug!(desc = ?parsed.result_desc, "STK query without ResultCode, still pending");
                Ok(GatewayStatus::Pending)
            }
        }
    }
}

// ============================================================================
// Webhook callback payload
// ============================================================================

/// Body Daraja posts to the callback URL when the push resolves.
#[derive(Debug, Deserialize)]
pub struct StkCallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: StkCallbackBody,
}

#[derive(Debug, Deserialize)]
pub struct StkCallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
}

impl StkCallback {
    pub fn outcome(&self) -> GatewayStatus {
        map_result_code(&self.result_code.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safiri_shared::pii::Masked;
    use uuid::Uuid;

    fn gateway() -> MpesaGateway {
        MpesaGateway::new(MpesaConfig {
            base_url: "http://localhost:1".to_string(),
            consumer_key: "key".to_string(),
            consumer_secret: "secret".to_string(),
            shortcode: "174379".to_string(),
            passkey: "passkey".to_string(),
            callback_url: "https://api.safiri.example/v1/webhooks/payments/mpesa".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_amount_rounds_cents_up() {
        assert_eq!(MpesaGateway::amount_kes(100), 1);
        assert_eq!(MpesaGateway::amount_kes(101), 2);
        assert_eq!(MpesaGateway::amount_kes(250_000_00), 250_000);
    }

    // Out-of-range amounts and bad numbers are rejected before any HTTP
    // call goes out; the unroutable base_url proves it.
    #[tokio::test]
    async fn test_limits_enforced_locally() {
        let gw = gateway();
        let request = ChargeRequest {
            booking_id: Uuid::new_v4(),
            amount_cents: 300_000_00, // 300k KES, over the cap
            currency: "KES".to_string(),
            phone: Masked("0712345678".to_string()),
        };
        let err = gw.initiate(&request).await.unwrap_err();
        assert!(matches!(err, GatewayError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_bad_phone_rejected_locally() {
        let gw = gateway();
        let request = ChargeRequest {
            booking_id: Uuid::new_v4(),
            amount_cents: 50_000,
            currency: "KES".to_string(),
            phone: Masked("12345".to_string()),
        };
        let err = gw.initiate(&request).await.unwrap_err();
        assert!(matches!(err, GatewayError::Rejected(_)));
    }

    #[test]
    fn test_result_code_mapping() {
        assert_eq!(map_result_code("0"), GatewayStatus::Succeeded);
        assert_eq!(map_result_code("1032"), GatewayStatus::Failed);
        assert_eq!(map_result_code("1"), GatewayStatus::Failed);
        assert_eq!(map_result_code("1037"), GatewayStatus::Expired);
        assert_eq!(map_result_code("4242"), GatewayStatus::Unknown);
    }

    #[test]
    fn test_callback_parses_daraja_shape() {
        let payload = serde_json::json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_191220191020363925",
                    "ResultCode": 1032,
                    "ResultDesc": "Request cancelled by user"
                }
            }
        });
        let envelope: StkCallbackEnvelope = serde_json::from_value(payload).unwrap();
        assert_eq!(
            envelope.body.stk_callback.checkout_request_id,
            "ws_CO_191220191020363925"
        );
        assert_eq!(envelope.body.stk_callback.outcome(), GatewayStatus::Failed);
    }
}
