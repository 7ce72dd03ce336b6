use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use safiri_booking::models::{BookingStatus, PaymentTransaction};
use safiri_booking::repository::{BookingRepository, TransactionRepository};
use safiri_core::payment::Provider;
use safiri_shared::pii::Masked;

use crate::error::AppError;
use crate::middleware::auth::Claims;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    pub provider: String,
    pub phone_number: String,
}

#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub provider: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
    pub provider_ref: Option<String>,
}

impl From<PaymentTransaction> for TransactionResponse {
    fn from(transaction: PaymentTransaction) -> Self {
        Self {
            id: transaction.id,
            booking_id: transaction.booking_id,
            provider: transaction.provider.to_string(),
            amount_cents: transaction.amount_cents,
            currency: transaction.currency,
            status: transaction.status.to_string(),
            provider_ref: transaction.provider_ref,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentStatusResponse {
    pub status: String,
    pub message: String,
}

async fn owned_booking(
    state: &AppState,
    claims: &Claims,
    booking_id: Uuid,
) -> Result<safiri_booking::models::Booking, AppError> {
    let booking = state
        .bookings
        .get(booking_id)
        .await
        .map_err(|e| AppError::InternalServerError(e.to_string()))?
        .ok_or_else(|| AppError::NotFoundError(format!("Booking not found: {}", booking_id)))?;

    if booking.rider_id != claims.sub {
        return Err(AppError::AuthorizationError(
            "Booking does not belong to you".to_string(),
        ));
    }
    Ok(booking)
}

/// POST /v1/bookings/{id}/payment
/// Kick off a mobile-money collection for the booking's unpaid seats. The
/// push lands on the rider's handset; callers poll status until terminal.
pub async fn initiate_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(booking_id): Path<Uuid>,
    Json(req): Json<InitiatePaymentRequest>,
) -> Result<(StatusCode, Json<TransactionResponse>), AppError> {
    // 1. Ownership check before touching payment state.
    owned_booking(&state, &claims, booking_id).await?;

    let provider = Provider::from_str(&req.provider)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    // 2. Initiate through the orchestrator.
    let transaction = state
        .payment_orchestrator
        .initiate_payment(booking_id, provider, Masked(req.phone_number))
        .await?;

    // 3. Start the bounded reconciliation poll for this transaction. A
    //    provider webhook may still win the race; reconcile is idempotent.
    state.poller.spawn(&transaction);

    tracing::info!(
        transaction_id = %transaction.id,
        %booking_id,
        "Payment initiated, awaiting settlement"
    );

    Ok((StatusCode::ACCEPTED, Json(transaction.into())))
}

/// GET /v1/bookings/{id}/payment/status
/// Thin read of the current reconciliation state for client polling.
pub async fn payment_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<PaymentStatusResponse>, AppError> {
    let booking = owned_booking(&state, &claims, booking_id).await?;

    let latest = state
        .transactions
        .find_latest_for_booking(booking_id)
        .await
        .map_err(|e| AppError::InternalServerError(e.to_string()))?;

    let response = match latest {
        Some(transaction) => {
            let message = match booking.status {
                BookingStatus::Completed => "Payment received, booking confirmed".to_string(),
                BookingStatus::PaymentInProgress => {
                    "Waiting for you to approve the prompt on your phone".to_string()
                }
                BookingStatus::Failed => "Payment did not complete, you can retry".to_string(),
                _ => format!("Last payment attempt is {}", transaction.status),
            };
            PaymentStatusResponse {
                status: transaction.status.to_string(),
                message,
            }
        }
        None => PaymentStatusResponse {
            status: "NONE".to_string(),
            message: "No payment attempt yet".to_string(),
        },
    };

    Ok(Json(response))
}
