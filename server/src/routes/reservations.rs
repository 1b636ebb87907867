//! Reservation endpoint routes.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use bookhold_engine::Reservation;

use crate::error::{AppError, Result};
use crate::handlers::{
    handle_make, handle_remove, handle_update, handle_view, MakeReservationRequest,
    MakeReservationResponse, RemoveReservationRequest, ReservationMessage,
    UpdateReservationRequest,
};
use crate::AppState;

/// Create reservation routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/make_reservation", post(make_handler))
        .route("/update_reservation", post(update_handler))
        .route("/remove_reservation", post(remove_handler))
        .route("/view_reservation/{reservation_id}", get(view_handler))
}

/// Malformed bodies get the same error shape as every other failure.
fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(request)| request)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}

/// POST /make_reservation - Claim a book for a user.
async fn make_handler(
    State(state): State<AppState>,
    payload: std::result::Result<Json<MakeReservationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<MakeReservationResponse>)> {
    let response = handle_make(&state.coordinator, body(payload)?).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /update_reservation - Refresh or reassign a reservation.
async fn update_handler(
    State(state): State<AppState>,
    payload: std::result::Result<Json<UpdateReservationRequest>, JsonRejection>,
) -> Result<Json<ReservationMessage>> {
    let response = handle_update(&state.coordinator, body(payload)?).await?;
    Ok(Json(response))
}

/// POST /remove_reservation - Release a user's reservation on a book.
async fn remove_handler(
    State(state): State<AppState>,
    payload: std::result::Result<Json<RemoveReservationRequest>, JsonRejection>,
) -> Result<Json<ReservationMessage>> {
    let response = handle_remove(&state.coordinator, body(payload)?).await?;
    Ok(Json(response))
}

/// GET /view_reservation/{reservation_id} - Primary projection lookup.
async fn view_handler(
    State(state): State<AppState>,
    Path(reservation_id): Path<String>,
) -> Result<Json<Reservation>> {
    let reservation = handle_view(&state.coordinator, &reservation_id).await?;
    Ok(Json(reservation))
}
