use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use snatcher_core::{BookingError, ErrorClass};

#[derive(Debug)]
pub enum AppError {
    ValidationError(String),
    NotFoundError(String),
    ConflictError(String),
    InternalServerError(String),
    Anyhow(anyhow::Error),
}

impl AppError {
    /// Booking errors map by class; anything else is internal.
    fn classify(err: anyhow::Error) -> Self {
        match err.downcast::<BookingError>() {
            Ok(booking) => {
                let message = booking.to_string();
                match booking.class() {
                    ErrorClass::Conflict => AppError::ConflictError(message),
                    ErrorClass::BadRequest => AppError::ValidationError(message),
                    ErrorClass::NotFound => AppError::NotFoundError(message),
                    ErrorClass::Internal => AppError::InternalServerError(message),
                }
            }
            Err(err) => AppError::Anyhow(err),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            AppError::ConflictError(msg) => (
                StatusCode::CONFLICT,
                json!({ "error": "Seat already taken", "detail": msg }),
            ),
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal Server Error" }),
                )
            }
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {:#}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal Server Error" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::classify(err.into())
    }
}
