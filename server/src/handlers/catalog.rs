//! Read-side and maintenance handlers.

use crate::error::Result;
use bookhold_engine::{Book, Coordinator, ReconcileReport, Reservation};
use serde::Deserialize;

/// Query parameters for the reconcile endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct ReconcileQuery {
    /// Report what would be repaired without writing.
    #[serde(default)]
    pub dry_run: bool,
}

pub async fn handle_list_books(coordinator: &Coordinator) -> Result<Vec<Book>> {
    Ok(coordinator.list_books().await?)
}

pub async fn handle_available_books(coordinator: &Coordinator) -> Result<Vec<Book>> {
    Ok(coordinator.available_books().await?)
}

/// All reservations, newest first.
pub async fn handle_list_reservations(coordinator: &Coordinator) -> Result<Vec<Reservation>> {
    let mut reservations = coordinator.list_reservations().await?;
    reservations.sort_by(|a, b| b.reserved_at.cmp(&a.reserved_at));
    Ok(reservations)
}

pub async fn handle_user_reservations(
    coordinator: &Coordinator,
    user_id: &str,
) -> Result<Vec<Reservation>> {
    Ok(coordinator.reservations_for_user(user_id).await?)
}

pub async fn handle_book_reservation(
    coordinator: &Coordinator,
    book_id: &str,
) -> Result<Reservation> {
    Ok(coordinator.reservation_for_book(book_id).await?)
}

pub async fn handle_reconcile(
    coordinator: &Coordinator,
    query: ReconcileQuery,
) -> Result<ReconcileReport> {
    tracing::info!(dry_run = query.dry_run, "reconcile requested");
    let report = if query.dry_run {
        coordinator.audit().await?
    } else {
        coordinator.reconcile().await?
    };
    Ok(report)
}
