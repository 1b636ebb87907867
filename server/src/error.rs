//! Unified error handling for the server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bookhold_engine::Error as ReservationError;
use serde::Serialize;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Reservation(#[from] ReservationError),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Reservation(e) => match e {
                ReservationError::InvalidInput(_) | ReservationError::InvalidReservationId(_) => {
                    StatusCode::BAD_REQUEST
                }
                ReservationError::AlreadyReserved(_) => StatusCode::CONFLICT,
                ReservationError::BookNotFound(_) | ReservationError::NotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                ReservationError::NotOwner { .. } => StatusCode::FORBIDDEN,
                ReservationError::PartialCommit { .. }
                | ReservationError::Store(_)
                | ReservationError::Closed => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Database(_)
            | AppError::Migrate(_)
            | AppError::Config(_)
            | AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error_message, details) = match &self {
            AppError::Reservation(e) if e.is_expected() => {
                tracing::debug!("Rejected: {}", e);
                (public_message(e).to_string(), Some(e.to_string()))
            }
            AppError::Reservation(e) => {
                tracing::error!("Reservation error: {:?}", e);
                (public_message(e).to_string(), Some(e.to_string()))
            }
            AppError::BadRequest(msg) => (msg.clone(), None),
            other => {
                tracing::error!("Internal error: {:?}", other);
                ("Internal server error".to_string(), None)
            }
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
        });

        (status, body).into_response()
    }
}

/// Short client-facing message per outcome.
fn public_message(e: &ReservationError) -> &'static str {
    match e {
        ReservationError::InvalidInput(_) => "Invalid user_id.",
        ReservationError::InvalidReservationId(_) => "Invalid reservation_id.",
        ReservationError::AlreadyReserved(_) => "Book already reserved.",
        ReservationError::BookNotFound(_) => "Book not found.",
        ReservationError::NotFound(_) => "Reservation not found.",
        ReservationError::NotOwner { .. } => "Reservation belongs to another user.",
        ReservationError::PartialCommit { .. } => "Reservation left incomplete.",
        ReservationError::Store(_) => "Storage unavailable.",
        ReservationError::Closed => "Service shutting down.",
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use bookhold_engine::{Projection, Step, StoreError};
    use uuid::Uuid;

    fn status_of(e: ReservationError) -> StatusCode {
        AppError::from(e).into_response().status()
    }

    #[test]
    fn reservation_errors_map_to_statuses() {
        assert_eq!(
            status_of(ReservationError::InvalidInput("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ReservationError::AlreadyReserved("b".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(ReservationError::BookNotFound("b".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(ReservationError::NotFound("r".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(ReservationError::NotOwner {
                book_id: "b".into()
            }),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(ReservationError::PartialCommit {
                reservation_id: Uuid::nil(),
                step: Step::Write(Projection::ByBook),
                source: StoreError::Unavailable("timeout".into()),
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(ReservationError::Closed),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn bad_request_is_400() {
        let response = AppError::BadRequest("nope".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
