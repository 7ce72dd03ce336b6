use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use safiri_rides::models::Ride;
use safiri_rides::repository::RideRepository;

use crate::error::AppError;
use crate::middleware::auth::Claims;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateRideRequest {
    pub origin: String,
    pub destination: String,
    pub departure_time: chrono::DateTime<chrono::Utc>,
    pub price_per_seat_cents: i64,
    pub total_seats: i32,
}

#[derive(Debug, Serialize)]
pub struct RideResponse {
    pub id: Uuid,
    pub driver_id: String,
    pub origin: String,
    pub destination: String,
    pub departure_time: chrono::DateTime<chrono::Utc>,
    pub price_per_seat_cents: i64,
    pub total_seats: i32,
    pub available_seats: i32,
}

impl From<Ride> for RideResponse {
    fn from(ride: Ride) -> Self {
        let available_seats = ride.available_seats();
        Self {
            id: ride.id,
            driver_id: ride.driver_id,
            origin: ride.origin,
            destination: ride.destination,
            departure_time: ride.departure_time,
            price_per_seat_cents: ride.price_per_seat_cents,
            total_seats: ride.total_seats,
            available_seats,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AvailabilityResponse {
    pub ride_id: Uuid,
    pub available_seats: i32,
}

/// POST /v1/rides
/// Driver publishes a trip with fixed capacity and fare.
pub async fn create_ride(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateRideRequest>,
) -> Result<(StatusCode, Json<RideResponse>), AppError> {
    if req.total_seats <= 0 {
        return Err(AppError::ValidationError("total_seats must be positive".to_string()));
    }
    if req.price_per_seat_cents <= 0 {
        return Err(AppError::ValidationError("price_per_seat_cents must be positive".to_string()));
    }

    let ride = Ride::new(
        claims.sub,
        req.origin,
        req.destination,
        req.departure_time,
        req.price_per_seat_cents,
        req.total_seats,
    );

    state
        .ride_repo
        .create_ride(&ride)
        .await
        .map_err(|e| AppError::InternalServerError(e.to_string()))?;

    tracing::info!(ride_id = %ride.id, driver_id = %ride.driver_id, "Ride published");
    Ok((StatusCode::CREATED, Json(ride.into())))
}

/// GET /v1/rides/{id}
pub async fn get_ride(
    State(state): State<AppState>,
    Path(ride_id): Path<Uuid>,
) -> Result<Json<RideResponse>, AppError> {
    let ride = state
        .ride_repo
        .get_ride(ride_id)
        .await
        .map_err(|e| AppError::InternalServerError(e.to_string()))?
        .ok_or_else(|| AppError::NotFoundError(format!("Ride not found: {}", ride_id)))?;

    Ok(Json(ride.into()))
}

/// GET /v1/rides/{id}/availability
/// The live re-read a rider does after a capacity refusal.
pub async fn get_availability(
    State(state): State<AppState>,
    Path(ride_id): Path<Uuid>,
) -> Result<Json<AvailabilityResponse>, AppError> {
    let available = state
        .ride_repo
        .cached_availability(ride_id)
        .await
        .map_err(|e| AppError::InternalServerError(e.to_string()))?
        .ok_or_else(|| AppError::NotFoundError(format!("Ride not found: {}", ride_id)))?;

    Ok(Json(AvailabilityResponse {
        ride_id,
        available_seats: available,
    }))
}
