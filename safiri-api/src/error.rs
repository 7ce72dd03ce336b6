use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use safiri_booking::BookingError;

#[derive(Debug)]
pub enum AppError {
    AuthenticationError(String),
    AuthorizationError(String),
    ValidationError(String),
    NotFoundError(String),
    ConflictError(String),
    UnprocessableError(String),
    PaymentRequired(String),
    InternalServerError(String),
    Anyhow(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::AuthenticationError(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::AuthorizationError(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::ConflictError(msg) => (StatusCode::CONFLICT, msg),
            AppError::UnprocessableError(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            AppError::PaymentRequired(msg) => (StatusCode::PAYMENT_REQUIRED, msg),
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            },
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            },
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Anyhow(err)
    }
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::RideNotFound(_)
            | BookingError::BookingNotFound(_)
            | BookingError::TransactionNotFound(_) => AppError::NotFoundError(err.to_string()),
            BookingError::BookingCancelled(_) => AppError::ConflictError(err.to_string()),
            // Not retryable without a fresh availability read.
            BookingError::InsufficientCapacity { .. } => AppError::ConflictError(err.to_string()),
            BookingError::InvalidSeatCount(_) | BookingError::NothingToCharge => {
                AppError::UnprocessableError(err.to_string())
            }
            // Internal retries already ran; surface a generic try-again.
            BookingError::ConcurrentModification => AppError::ConflictError(err.to_string()),
            BookingError::TransactionAlreadyInProgress => AppError::ConflictError(err.to_string()),
            BookingError::PaymentRejected(_)
            | BookingError::PaymentTimeout
            | BookingError::PaymentUnknown(_) => AppError::PaymentRequired(err.to_string()),
            BookingError::ProviderNotConfigured(_) | BookingError::Storage(_) => {
                AppError::InternalServerError(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;
    use uuid::Uuid;

    fn status_of(err: BookingError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn test_booking_error_status_mapping() {
        assert_eq!(
            status_of(BookingError::InsufficientCapacity { requested: 2, available: 0 }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(BookingError::InvalidSeatCount("bad".to_string())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(BookingError::TransactionAlreadyInProgress),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(BookingError::NothingToCharge),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(BookingError::RideNotFound(Uuid::new_v4())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(BookingError::PaymentRejected("declined".to_string())),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            status_of(BookingError::ConcurrentModification),
            StatusCode::CONFLICT
        );
    }
}
