//! Listing, projection read and admin routes.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use bookhold_engine::{Book, ReconcileReport, Reservation};

use crate::error::Result;
use crate::handlers::{
    handle_available_books, handle_book_reservation, handle_list_books,
    handle_list_reservations, handle_reconcile, handle_user_reservations, ReconcileQuery,
};
use crate::AppState;

/// Create catalog routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/books", get(books_handler))
        .route("/api/books/available", get(available_handler))
        .route("/api/books/{book_id}/reservation", get(book_reservation_handler))
        .route("/api/reservations", get(reservations_handler))
        .route("/reservations", get(reservations_handler))
        .route(
            "/api/users/{user_id}/reservations",
            get(user_reservations_handler),
        )
        .route("/admin/reconcile", post(reconcile_handler))
}

async fn books_handler(State(state): State<AppState>) -> Result<Json<Vec<Book>>> {
    Ok(Json(handle_list_books(&state.coordinator).await?))
}

async fn available_handler(State(state): State<AppState>) -> Result<Json<Vec<Book>>> {
    Ok(Json(handle_available_books(&state.coordinator).await?))
}

async fn reservations_handler(State(state): State<AppState>) -> Result<Json<Vec<Reservation>>> {
    Ok(Json(handle_list_reservations(&state.coordinator).await?))
}

async fn user_reservations_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Reservation>>> {
    Ok(Json(
        handle_user_reservations(&state.coordinator, &user_id).await?,
    ))
}

async fn book_reservation_handler(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
) -> Result<Json<Reservation>> {
    Ok(Json(
        handle_book_reservation(&state.coordinator, &book_id).await?,
    ))
}

/// POST /admin/reconcile[?dry_run=true] - Repair abandoned claims and rows.
async fn reconcile_handler(
    State(state): State<AppState>,
    Query(query): Query<ReconcileQuery>,
) -> Result<Json<ReconcileReport>> {
    Ok(Json(handle_reconcile(&state.coordinator, query).await?))
}
