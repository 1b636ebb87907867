//! Projection set: the differently-keyed copies of one reservation fact.
//!
//! The same [`Reservation`] is stored under three keys:
//!
//! | projection | key |
//! |---|---|
//! | [`Projection::Primary`] | `reservation_id` |
//! | [`Projection::ByUser`] | `(user_id, reservation_id)` |
//! | [`Projection::ByBook`] | `(book_id, reservation_id)` |
//!
//! alongside a per-book [`LockMarker`]. [`ProjectionSet`] wraps the store with
//! the retry policy and turns every write into a [`StepResult`].

use crate::error::Result;
use crate::saga::{RetryPolicy, Step, StepResult};
use crate::{Book, LockMarker, RecordStore, Reservation, ReservationId, RowUpdate, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// One keyed view of reservation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Projection {
    Primary,
    ByUser,
    ByBook,
}

impl Projection {
    /// Commit order. The primary row goes first so that a reservation is
    /// visible to `view` as soon as any of it is.
    pub const COMMIT_ORDER: [Projection; 3] =
        [Projection::Primary, Projection::ByUser, Projection::ByBook];

    /// Release order. The book row goes first: it is the row removers race on.
    pub const RELEASE_ORDER: [Projection; 3] =
        [Projection::ByBook, Projection::Primary, Projection::ByUser];

    pub fn as_str(&self) -> &'static str {
        match self {
            Projection::Primary => "primary",
            Projection::ByUser => "by-user",
            Projection::ByBook => "by-book",
        }
    }
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Store access with the coordinator's retry discipline applied.
#[derive(Clone)]
pub struct ProjectionSet {
    store: Arc<dyn RecordStore>,
    retry: RetryPolicy,
}

impl ProjectionSet {
    pub fn new(store: Arc<dyn RecordStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    // Lock marker

    /// Single conditional write; never retried. A failed call may or may
    /// not have landed, and repeating it could only report a false loss.
    pub async fn claim(&self, marker: &LockMarker) -> Result<bool> {
        Ok(self.store.insert_lock_if_absent(marker).await?)
    }

    pub async fn release(&self, book_id: &str, reservation_id: ReservationId) -> StepResult<bool> {
        self.retry
            .drive(Step::ReleaseLock, || {
                self.store.delete_lock_if_held(book_id, reservation_id)
            })
            .await
    }

    pub async fn lock(&self, book_id: &str) -> Result<Option<LockMarker>> {
        Ok(self.store.get_lock(book_id).await?)
    }

    pub async fn locks(&self) -> Result<Vec<LockMarker>> {
        Ok(self.store.list_locks().await?)
    }

    // Catalog

    pub async fn book(&self, book_id: &str) -> StepResult<Option<Book>> {
        self.retry
            .drive(Step::CheckBook, || self.store.get_book(book_id))
            .await
    }

    pub async fn books(&self) -> Result<Vec<Book>> {
        Ok(self.store.list_books().await?)
    }

    // Reservation rows

    pub async fn write(&self, projection: Projection, reservation: &Reservation) -> StepResult<()> {
        self.retry
            .drive(Step::Write(projection), || {
                self.store.put_reservation(projection, reservation)
            })
            .await
    }

    /// Conditional overwrite; see [`RecordStore::update_reservation_if_present`].
    pub async fn update(
        &self,
        projection: Projection,
        reservation: &Reservation,
        expected_user: Option<UserId>,
    ) -> StepResult<RowUpdate> {
        self.retry
            .drive(Step::Update(projection), || {
                self.store
                    .update_reservation_if_present(projection, reservation, expected_user)
            })
            .await
    }

    pub async fn delete(
        &self,
        projection: Projection,
        reservation: &Reservation,
    ) -> StepResult<bool> {
        self.retry
            .drive(Step::Delete(projection), || {
                self.store.delete_reservation(projection, reservation)
            })
            .await
    }

    /// Write the reservation into every projection, primary first.
    pub async fn write_all(&self, reservation: &Reservation) -> Result<()> {
        for projection in Projection::COMMIT_ORDER {
            self.write(projection, reservation)
                .await
                .or_partial(reservation.reservation_id)?;
        }
        Ok(())
    }

    /// Write a row on behalf of a repair, then undo it if the primary row
    /// has disappeared in the meantime. Returns whether the row was kept.
    pub async fn write_guarded(
        &self,
        projection: Projection,
        reservation: &Reservation,
    ) -> Result<bool> {
        self.write(projection, reservation)
            .await
            .or_partial(reservation.reservation_id)?;
        if projection == Projection::Primary {
            return Ok(true);
        }
        match self.get(reservation.reservation_id).await? {
            Some(primary) if primary.user_id == reservation.user_id => Ok(true),
            _ => {
                tracing::debug!(
                    reservation_id = %reservation.reservation_id,
                    %projection,
                    "primary row gone or reassigned; undoing write"
                );
                self.delete(projection, reservation)
                    .await
                    .or_partial(reservation.reservation_id)?;
                Ok(false)
            }
        }
    }

    // Reads

    pub async fn get(&self, reservation_id: ReservationId) -> Result<Option<Reservation>> {
        Ok(self.store.get_reservation(reservation_id).await?)
    }

    pub async fn for_book(&self, book_id: &str) -> Result<Vec<Reservation>> {
        Ok(self.store.reservations_for_book(book_id).await?)
    }

    pub async fn for_user(&self, user_id: UserId) -> Result<Vec<Reservation>> {
        Ok(self.store.reservations_for_user(user_id).await?)
    }

    pub async fn scan(&self, projection: Projection) -> Result<Vec<Reservation>> {
        Ok(self.store.scan(projection).await?)
    }
}
