//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bookhold_engine::{
    Book, Coordinator, CoordinatorConfig, LockMarker, MemoryStore, Projection, RecordStore,
    Reservation, ReservationId, RetryPolicy, RowUpdate, StoreResult, UserId,
};
use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn book_ids(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("book-{i:04}")).collect()
}

pub fn config() -> CoordinatorConfig {
    CoordinatorConfig {
        retry: RetryPolicy {
            max_attempts: 5,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        },
        reconcile_grace: Duration::ZERO,
    }
}

/// Catalog of `n` books behind a store with optional latency.
pub async fn seeded(n: usize, latency: Option<Duration>) -> (MemoryStore, Coordinator) {
    let store = match latency {
        Some(latency) => MemoryStore::with_latency(latency),
        None => MemoryStore::new(),
    }
    .with_books(
        book_ids(n)
            .into_iter()
            .map(|id| Book::new(id.clone(), format!("Title of {id}"), "Anon")),
    );
    let coordinator = Coordinator::open(Arc::new(store.clone()), config())
        .await
        .expect("open coordinator");
    (store, coordinator)
}

/// Check the externally observable invariants on a quiescent store.
///
/// - each book has at most one reservation,
/// - a lock exists iff a primary row exists for the book, naming that row,
/// - every primary row appears identically in both secondary projections,
/// - secondary projections hold nothing else.
pub async fn assert_invariants(store: &MemoryStore) {
    let primary = store.scan(Projection::Primary).await.unwrap();
    let by_user = store.scan(Projection::ByUser).await.unwrap();
    let by_book = store.scan(Projection::ByBook).await.unwrap();
    let locks = store.list_locks().await.unwrap();

    let mut per_book: HashMap<&str, usize> = HashMap::new();
    for r in &primary {
        *per_book.entry(r.book_id.as_str()).or_default() += 1;
    }
    for (book, count) in &per_book {
        assert_eq!(*count, 1, "book {book} has {count} reservations");
    }

    let locked: HashMap<&str, _> = locks
        .iter()
        .map(|l| (l.book_id.as_str(), l.reservation_id))
        .collect();
    assert_eq!(locked.len(), primary.len(), "locks and reservations differ");
    for r in &primary {
        assert_eq!(
            locked.get(r.book_id.as_str()),
            Some(&r.reservation_id),
            "lock for {} does not name its reservation",
            r.book_id
        );
    }

    let as_set = |rows: &[bookhold_engine::Reservation]| -> HashSet<String> {
        rows.iter().map(|r| format!("{r:?}")).collect()
    };
    assert_eq!(as_set(&primary), as_set(&by_user), "user projection diverged");
    assert_eq!(as_set(&primary), as_set(&by_book), "book projection diverged");
}

/// Store calls after which an [`InterleavedStore`] can run a hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum After {
    ListLocks,
    ScanPrimary,
    BookRows,
}

/// A [`MemoryStore`] that runs a one-shot hook right after a chosen call
/// returns its result, to pin down a specific interleaving.
pub struct InterleavedStore {
    inner: MemoryStore,
    hooks: Mutex<HashMap<After, BoxFuture<'static, ()>>>,
}

impl InterleavedStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            hooks: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn arm(&self, point: After, hook: impl Future<Output = ()> + Send + 'static) {
        self.hooks.lock().unwrap().insert(point, Box::pin(hook));
    }

    fn take(&self, point: After) -> Option<BoxFuture<'static, ()>> {
        self.hooks.lock().unwrap().remove(&point)
    }

    async fn fire(&self, point: After) {
        if let Some(hook) = self.take(point) {
            hook.await;
        }
    }
}

#[async_trait]
impl RecordStore for InterleavedStore {
    async fn insert_lock_if_absent(&self, marker: &LockMarker) -> StoreResult<bool> {
        self.inner.insert_lock_if_absent(marker).await
    }

    async fn get_lock(&self, book_id: &str) -> StoreResult<Option<LockMarker>> {
        self.inner.get_lock(book_id).await
    }

    async fn delete_lock_if_held(
        &self,
        book_id: &str,
        reservation_id: ReservationId,
    ) -> StoreResult<bool> {
        self.inner.delete_lock_if_held(book_id, reservation_id).await
    }

    async fn list_locks(&self) -> StoreResult<Vec<LockMarker>> {
        let locks = self.inner.list_locks().await;
        self.fire(After::ListLocks).await;
        locks
    }

    async fn get_book(&self, book_id: &str) -> StoreResult<Option<Book>> {
        self.inner.get_book(book_id).await
    }

    async fn list_books(&self) -> StoreResult<Vec<Book>> {
        self.inner.list_books().await
    }

    async fn put_reservation(
        &self,
        projection: Projection,
        reservation: &Reservation,
    ) -> StoreResult<()> {
        self.inner.put_reservation(projection, reservation).await
    }

    async fn update_reservation_if_present(
        &self,
        projection: Projection,
        reservation: &Reservation,
        expected_user: Option<UserId>,
    ) -> StoreResult<RowUpdate> {
        self.inner
            .update_reservation_if_present(projection, reservation, expected_user)
            .await
    }

    async fn delete_reservation(
        &self,
        projection: Projection,
        reservation: &Reservation,
    ) -> StoreResult<bool> {
        self.inner.delete_reservation(projection, reservation).await
    }

    async fn get_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> StoreResult<Option<Reservation>> {
        self.inner.get_reservation(reservation_id).await
    }

    async fn reservations_for_book(&self, book_id: &str) -> StoreResult<Vec<Reservation>> {
        let rows = self.inner.reservations_for_book(book_id).await;
        self.fire(After::BookRows).await;
        rows
    }

    async fn reservations_for_user(&self, user_id: UserId) -> StoreResult<Vec<Reservation>> {
        self.inner.reservations_for_user(user_id).await
    }

    async fn scan(&self, projection: Projection) -> StoreResult<Vec<Reservation>> {
        let rows = self.inner.scan(projection).await;
        if projection == Projection::Primary {
            self.fire(After::ScanPrimary).await;
        }
        rows
    }
}

/// Every primary row has an identical row in each secondary projection
/// and holds its book's lock.
pub async fn assert_reservation_consistent(coordinator: &Coordinator, id: ReservationId) {
    let check = coordinator.check_reservation(id).await.unwrap();
    assert!(check.is_consistent(), "projections diverged: {check:?}");
}
