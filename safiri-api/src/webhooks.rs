use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::Value;

use safiri_booking::payments::ReconcileResult;
use safiri_booking::repository::TransactionRepository;
use safiri_payment::airtel::AirtelCallback;
use safiri_payment::mpesa::StkCallbackEnvelope;
use safiri_booking::repository::BookingRepository;
use safiri_core::payment::GatewayStatus;
use safiri_shared::models::events::{BookingConfirmedEvent, PaymentSettledEvent};

use crate::state::AppState;

/// POST /v1/webhooks/payments/{provider}
/// Provider-initiated terminal status. The shared-secret signature header
/// is checked before anything else; reconcile's idempotency makes replays
/// and poller races harmless.
pub async fn handle_payment_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<StatusCode, StatusCode> {
    // 1. Authenticate the caller.
    let signature = headers
        .get("X-Safiri-Signature")
        .and_then(|h| h.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;
    if signature != state.auth.webhook_secret {
        tracing::warn!(provider, "Webhook with bad signature rejected");
        return Err(StatusCode::UNAUTHORIZED);
    }

    // 2. Map the provider's callback shape to (reference, outcome).
    let (provider_ref, outcome) = match provider.as_str() {
        "mpesa" => {
            let envelope: StkCallbackEnvelope =
                serde_json::from_value(payload).map_err(|_| StatusCode::BAD_REQUEST)?;
            let callback = envelope.body.stk_callback;
            tracing::info!(
                checkout_request_id = %callback.checkout_request_id,
                result_code = callback.result_code,
                "Received M-Pesa callback: {}",
                callback.result_desc
            );
            (callback.checkout_request_id.clone(), callback.outcome())
        }
        "airtel" => {
            let callback: AirtelCallback =
                serde_json::from_value(payload).map_err(|_| StatusCode::BAD_REQUEST)?;
            tracing::info!(
                transaction_id = %callback.transaction.id,
                status_code = %callback.transaction.status_code,
                "Received Airtel callback"
            );
            (callback.transaction.id.clone(), callback.outcome())
        }
        _ => return Err(StatusCode::NOT_FOUND),
    };

    if !outcome.is_terminal() {
        // Interim notification; the poller keeps watching.
        return Ok(StatusCode::OK);
    }

    // 3. Resolve the reference and reconcile.
    let transaction = state
        .transactions
        .find_by_provider_ref(&provider_ref)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let result = state
        .payment_orchestrator
        .reconcile(transaction.id, outcome)
        .await
        .map_err(|e| {
            tracing::error!(transaction_id = %transaction.id, "Webhook reconcile failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    // 4. Publish settlement on first application only.
    if result == ReconcileResult::Settled {
        let event = PaymentSettledEvent {
            transaction_id: transaction.id,
            booking_id: transaction.booking_id,
            provider: transaction.provider.to_string(),
            amount_cents: transaction.amount_cents,
            outcome: format!("{:?}", outcome),
            timestamp: chrono::Utc::now().timestamp(),
        };
        if let Ok(payload) = serde_json::to_string(&event) {
            let _ = state
                .kafka
                .publish("payment.settled", &transaction.id.to_string(), &payload)
                .await;
        }

        if outcome == GatewayStatus::Succeeded {
            if let Ok(Some(booking)) = state.bookings.get(transaction.booking_id).await {
                let event = BookingConfirmedEvent {
                    booking_id: booking.id,
                    ride_id: booking.ride_id,
                    rider_id: booking.rider_id.clone(),
                    seat_count: booking.seat_count as u32,
                    amount_cents: transaction.amount_cents,
                    timestamp: chrono::Utc::now().timestamp(),
                };
                if let Ok(payload) = serde_json::to_string(&event) {
                    let _ = state
                        .kafka
                        .publish("booking.confirmed", &booking.id.to_string(), &payload)
                        .await;
                }
            }
        }
    }

    Ok(StatusCode::OK)
}
