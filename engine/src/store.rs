//! The record store contract consumed by the coordinator.
//!
//! Every method addresses a single row or a single partition. Nothing here
//! promises atomicity across rows; the only linearizable primitive the
//! coordinator relies on is [`RecordStore::insert_lock_if_absent`].

use crate::error::StoreResult;
use crate::{Book, LockMarker, Projection, Reservation, ReservationId, UserId};
use async_trait::async_trait;

/// Outcome of [`RecordStore::update_reservation_if_present`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowUpdate {
    /// The row was overwritten.
    Applied,
    /// The row already carries a newer timestamp and was left alone.
    Superseded,
    /// No row under the key.
    Missing,
    /// The row belongs to a different user and was left alone.
    OwnerChanged,
}

impl RowUpdate {
    /// Classify a row that was not overwritten from its current owner.
    pub fn classify(applied: bool, owner: Option<UserId>, expected_user: Option<UserId>) -> Self {
        match owner {
            _ if applied => RowUpdate::Applied,
            None => RowUpdate::Missing,
            Some(owner) if expected_user.is_some_and(|u| u != owner) => RowUpdate::OwnerChanged,
            Some(_) => RowUpdate::Superseded,
        }
    }

    /// The row exists under the expected owner.
    pub fn is_held(&self) -> bool {
        matches!(self, RowUpdate::Applied | RowUpdate::Superseded)
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Check that the backend is reachable.
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Release backend resources. Further calls may fail.
    async fn close(&self) {}

    // Lock markers

    /// Insert the marker only if no marker exists for its book.
    ///
    /// Must be linearizable per `book_id`: of any number of concurrent
    /// callers, exactly one observes `true`.
    async fn insert_lock_if_absent(&self, marker: &LockMarker) -> StoreResult<bool>;

    async fn get_lock(&self, book_id: &str) -> StoreResult<Option<LockMarker>>;

    /// Delete the marker for `book_id` only while it is held by
    /// `reservation_id`. Returns whether a marker was removed.
    async fn delete_lock_if_held(
        &self,
        book_id: &str,
        reservation_id: ReservationId,
    ) -> StoreResult<bool>;

    async fn list_locks(&self) -> StoreResult<Vec<LockMarker>>;

    // Catalog

    async fn get_book(&self, book_id: &str) -> StoreResult<Option<Book>>;

    async fn list_books(&self) -> StoreResult<Vec<Book>>;

    // Reservation projections

    /// Upsert the reservation row under the projection's key.
    async fn put_reservation(
        &self,
        projection: Projection,
        reservation: &Reservation,
    ) -> StoreResult<()>;

    /// Overwrite the row under the projection's key if it exists, still
    /// belongs to `expected_user` (when given) and is not newer than the
    /// incoming one.
    ///
    /// Never creates a row. The timestamp condition makes concurrent
    /// refreshes converge on the latest value in every projection; the
    /// owner condition keeps a refresh from undoing a reassignment.
    async fn update_reservation_if_present(
        &self,
        projection: Projection,
        reservation: &Reservation,
        expected_user: Option<UserId>,
    ) -> StoreResult<RowUpdate>;

    /// Delete the row under the projection's key. Returns whether a row
    /// was removed.
    async fn delete_reservation(
        &self,
        projection: Projection,
        reservation: &Reservation,
    ) -> StoreResult<bool>;

    /// Point read on the primary projection.
    async fn get_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> StoreResult<Option<Reservation>>;

    /// Partition read on the book projection.
    async fn reservations_for_book(&self, book_id: &str) -> StoreResult<Vec<Reservation>>;

    /// Partition read on the user projection.
    async fn reservations_for_user(&self, user_id: UserId) -> StoreResult<Vec<Reservation>>;

    /// Every row of one projection, unordered.
    async fn scan(&self, projection: Projection) -> StoreResult<Vec<Reservation>>;
}
