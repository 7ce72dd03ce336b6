use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use safiri_booking::models::Booking;
use safiri_booking::repository::BookingRepository;
use safiri_shared::models::events::BookingCreatedEvent;

use crate::error::AppError;
use crate::middleware::auth::Claims;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub ride_id: Uuid,
    pub seats: i32,
}

#[derive(Debug, Serialize)]
pub struct BookingResponse {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub rider_id: String,
    pub seat_count: i32,
    pub paid_seat_count: i32,
    pub status: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<Booking> for BookingResponse {
    fn from(booking: Booking) -> Self {
        Self {
            id: booking.id,
            ride_id: booking.ride_id,
            rider_id: booking.rider_id,
            seat_count: booking.seat_count,
            paid_seat_count: booking.paid_seat_count,
            status: booking.status.to_string(),
            created_at: booking.created_at,
            updated_at: booking.updated_at,
        }
    }
}

/// POST /v1/bookings
/// Create a booking or grow an existing one; seats are provisionally
/// reserved here, payment settles separately.
pub async fn create_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<BookingResponse>), AppError> {
    let booking = state
        .booking_orchestrator
        .create_or_update(req.ride_id, &claims.sub, req.seats)
        .await?;

    // Publish event; delivery is best-effort, the booking row is the truth.
    let event = BookingCreatedEvent {
        booking_id: booking.id,
        ride_id: booking.ride_id,
        rider_id: booking.rider_id.clone(),
        seat_count: booking.seat_count as u32,
        timestamp: chrono::Utc::now().timestamp(),
    };
    if let Ok(payload) = serde_json::to_string(&event) {
        let _ = state
            .kafka
            .publish("booking.created", &booking.id.to_string(), &payload)
            .await;
    }

    Ok((StatusCode::CREATED, Json(booking.into())))
}

/// GET /v1/bookings/{id}
pub async fn get_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<BookingResponse>, AppError> {
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

    Ok(Json(booking.into()))
}
