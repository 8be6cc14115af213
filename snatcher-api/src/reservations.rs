use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    routing::get,
    Router,
};
use snatcher_core::{BookingRequest, Reservation};
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/reservations", get(list_reservations).post(create_reservation))
        .route(
            "/reservations/{id}",
            get(get_reservation).delete(cancel_reservation),
        )
}

async fn create_reservation(
    State(state): State<AppState>,
    Json(req): Json<BookingRequest>,
) -> Result<(StatusCode, Json<Reservation>), AppError> {
    info!(
        "Booking request from {} for seats {:?} in {}:{}",
        req.user_id, req.seat_numbers, req.event_id, req.section_id
    );
    let reservation = state.engine.attempt_booking(&req).await?;
    Ok((StatusCode::CREATED, Json(reservation)))
}

async fn list_reservations(
    State(state): State<AppState>,
) -> Result<Json<Vec<Reservation>>, AppError> {
    Ok(Json(state.recorder.list().await?))
}

async fn get_reservation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Reservation>, AppError> {
    Ok(Json(state.recorder.get(id).await?))
}

async fn cancel_reservation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.cancellations.cancel(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
