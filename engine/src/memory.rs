//! In-memory [`RecordStore`] for tests, benchmarks and local runs.
//!
//! Each projection is its own `DashMap`, so rows are independent exactly as
//! they would be in a replicated store. The lock map's entry API provides the
//! per-key linearizable insert-if-absent.
//!
//! Faults can be injected per call site to exercise retry and compensation
//! paths, and a fixed latency can be added to widen race windows.

use crate::error::{StoreError, StoreResult};
use crate::{
    Book, BookId, LockMarker, Projection, RecordStore, Reservation, ReservationId, RowUpdate,
    UserId,
};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Call sites where a fault can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    Claim,
    ReleaseLock,
    ReadBook,
    Write(Projection),
    Update(Projection),
    Delete(Projection),
}

#[derive(Debug, Default)]
struct Inner {
    books: DashMap<BookId, Book>,
    locks: DashMap<BookId, LockMarker>,
    primary: DashMap<ReservationId, Reservation>,
    by_user: DashMap<(UserId, ReservationId), Reservation>,
    by_book: DashMap<(BookId, ReservationId), Reservation>,
    faults: DashMap<FaultPoint, u32>,
    mutations: AtomicU64,
    latency: Option<Duration>,
}

/// Shared in-memory store. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that sleeps for `latency` before every call.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                latency: Some(latency),
                ..Inner::default()
            }),
        }
    }

    /// Seed the catalog.
    pub fn with_books(self, books: impl IntoIterator<Item = Book>) -> Self {
        for book in books {
            self.insert_book(book);
        }
        self
    }

    pub fn insert_book(&self, book: Book) {
        self.inner.books.insert(book.book_id.clone(), book);
    }

    /// Fail the next `times` calls at `point` with a transient error.
    pub fn inject_fault(&self, point: FaultPoint, times: u32) {
        self.inner.faults.insert(point, times);
    }

    pub fn clear_faults(&self) {
        self.inner.faults.clear();
    }

    /// Number of mutating calls received, including failed ones.
    pub fn mutation_count(&self) -> u64 {
        self.inner.mutations.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        match self.inner.latency {
            Some(latency) => tokio::time::sleep(latency).await,
            None => tokio::task::yield_now().await,
        }
    }

    fn check_fault(&self, point: FaultPoint) -> StoreResult<()> {
        if let Some(mut remaining) = self.inner.faults.get_mut(&point) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::Unavailable(format!(
                    "injected fault at {point:?}"
                )));
            }
        }
        Ok(())
    }

    async fn mutate(&self, point: FaultPoint) -> StoreResult<()> {
        self.pause().await;
        self.inner.mutations.fetch_add(1, Ordering::SeqCst);
        self.check_fault(point)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert_lock_if_absent(&self, marker: &LockMarker) -> StoreResult<bool> {
        self.mutate(FaultPoint::Claim).await?;
        match self.inner.locks.entry(marker.book_id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(marker.clone());
                Ok(true)
            }
        }
    }

    async fn get_lock(&self, book_id: &str) -> StoreResult<Option<LockMarker>> {
        self.pause().await;
        Ok(self.inner.locks.get(book_id).map(|m| m.clone()))
    }

    async fn delete_lock_if_held(
        &self,
        book_id: &str,
        reservation_id: ReservationId,
    ) -> StoreResult<bool> {
        self.mutate(FaultPoint::ReleaseLock).await?;
        Ok(self
            .inner
            .locks
            .remove_if(book_id, |_, m| m.reservation_id == reservation_id)
            .is_some())
    }

    async fn list_locks(&self) -> StoreResult<Vec<LockMarker>> {
        self.pause().await;
        Ok(self.inner.locks.iter().map(|m| m.value().clone()).collect())
    }

    async fn get_book(&self, book_id: &str) -> StoreResult<Option<Book>> {
        self.pause().await;
        self.check_fault(FaultPoint::ReadBook)?;
        Ok(self.inner.books.get(book_id).map(|b| b.clone()))
    }

    async fn list_books(&self) -> StoreResult<Vec<Book>> {
        self.pause().await;
        let mut books: Vec<Book> = self.inner.books.iter().map(|b| b.value().clone()).collect();
        books.sort_by(|a, b| a.book_id.cmp(&b.book_id));
        Ok(books)
    }

    async fn put_reservation(
        &self,
        projection: Projection,
        reservation: &Reservation,
    ) -> StoreResult<()> {
        self.mutate(FaultPoint::Write(projection)).await?;
        let r = reservation.clone();
        match projection {
            Projection::Primary => {
                self.inner.primary.insert(r.reservation_id, r);
            }
            Projection::ByUser => {
                self.inner.by_user.insert((r.user_id, r.reservation_id), r);
            }
            Projection::ByBook => {
                self.inner
                    .by_book
                    .insert((r.book_id.clone(), r.reservation_id), r);
            }
        }
        Ok(())
    }

    async fn update_reservation_if_present(
        &self,
        projection: Projection,
        reservation: &Reservation,
        expected_user: Option<UserId>,
    ) -> StoreResult<RowUpdate> {
        self.mutate(FaultPoint::Update(projection)).await?;
        let apply = |row: &mut Reservation| {
            if expected_user.is_some_and(|u| u != row.user_id) {
                RowUpdate::OwnerChanged
            } else if row.reserved_at > reservation.reserved_at {
                RowUpdate::Superseded
            } else {
                *row = reservation.clone();
                RowUpdate::Applied
            }
        };
        let outcome = match projection {
            Projection::Primary => self
                .inner
                .primary
                .get_mut(&reservation.reservation_id)
                .map(|mut row| apply(row.value_mut())),
            Projection::ByUser => self
                .inner
                .by_user
                .get_mut(&(reservation.user_id, reservation.reservation_id))
                .map(|mut row| apply(row.value_mut())),
            Projection::ByBook => self
                .inner
                .by_book
                .get_mut(&(reservation.book_id.clone(), reservation.reservation_id))
                .map(|mut row| apply(row.value_mut())),
        };
        Ok(outcome.unwrap_or(RowUpdate::Missing))
    }

    async fn delete_reservation(
        &self,
        projection: Projection,
        reservation: &Reservation,
    ) -> StoreResult<bool> {
        self.mutate(FaultPoint::Delete(projection)).await?;
        let removed = match projection {
            Projection::Primary => self
                .inner
                .primary
                .remove(&reservation.reservation_id)
                .is_some(),
            Projection::ByUser => self
                .inner
                .by_user
                .remove(&(reservation.user_id, reservation.reservation_id))
                .is_some(),
            Projection::ByBook => self
                .inner
                .by_book
                .remove(&(reservation.book_id.clone(), reservation.reservation_id))
                .is_some(),
        };
        Ok(removed)
    }

    async fn get_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> StoreResult<Option<Reservation>> {
        self.pause().await;
        Ok(self.inner.primary.get(&reservation_id).map(|r| r.clone()))
    }

    async fn reservations_for_book(&self, book_id: &str) -> StoreResult<Vec<Reservation>> {
        self.pause().await;
        let mut rows: Vec<Reservation> = self
            .inner
            .by_book
            .iter()
            .filter(|entry| entry.key().0 == book_id)
            .map(|entry| entry.value().clone())
            .collect();
        rows.sort_by_key(|r| r.reserved_at);
        Ok(rows)
    }

    async fn reservations_for_user(&self, user_id: UserId) -> StoreResult<Vec<Reservation>> {
        self.pause().await;
        let mut rows: Vec<Reservation> = self
            .inner
            .by_user
            .iter()
            .filter(|entry| entry.key().0 == user_id)
            .map(|entry| entry.value().clone())
            .collect();
        rows.sort_by_key(|r| r.reserved_at);
        Ok(rows)
    }

    async fn scan(&self, projection: Projection) -> StoreResult<Vec<Reservation>> {
        self.pause().await;
        let rows: Vec<Reservation> = match projection {
            Projection::Primary => self.inner.primary.iter().map(|e| e.value().clone()).collect(),
            Projection::ByUser => self.inner.by_user.iter().map(|e| e.value().clone()).collect(),
            Projection::ByBook => self.inner.by_book.iter().map(|e| e.value().clone()).collect(),
        };
        Ok(rows)
    }
}
