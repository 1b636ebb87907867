//! Reservation coordinator.
//!
//! Implements make / update / remove / view as ordered sequences of
//! single-row store calls. Mutual exclusion comes from exactly one place: the
//! conditional insert of a book's [`LockMarker`]. Everything else is
//! housekeeping around that claim, driven by [`RetryPolicy`] and reported as
//! [`StepResult`]s.
//!
//! # Acquisition
//!
//! 1. **Claim**: insert the lock marker if absent. Losing means
//!    [`Error::AlreadyReserved`]; nothing else is written.
//! 2. **Validate**: the book must exist. Otherwise the claim is released
//!    before returning [`Error::BookNotFound`].
//! 3. **Commit**: write the reservation into every projection. Exhausting the
//!    retry budget surfaces [`Error::PartialCommit`]; the claim is never
//!    re-attempted.
//!
//! # Update
//!
//! Overwrites are conditional on the owner that was read and on the stored
//! timestamp not being newer. A refresh can therefore never undo a
//! reassignment, and concurrent refreshes converge on the latest value.
//!
//! # Release
//!
//! Projection rows are deleted book row first, then primary, then user row,
//! and the lock marker last, so a book never looks free while a reservation
//! row for it still exists.

use crate::error::Result;
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::record::{now, parse_reservation_id, parse_user_id};
use crate::saga::{RetryPolicy, StepResult};
use crate::{
    Book, Error, LockMarker, Projection, ProjectionSet, RecordStore, Reservation, ReservationId,
    RowUpdate, UserId,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Coordinator tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Budget for every projection write and lock release.
    pub retry: RetryPolicy,
    /// Minimum age before the reconciler treats a claim or row as abandoned.
    pub reconcile_grace: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            reconcile_grace: Duration::from_secs(30),
        }
    }
}

/// The two ways a caller can address an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateRequest {
    /// Refresh the timestamp, optionally handing the reservation to another user.
    ById {
        reservation_id: ReservationId,
        new_user_id: Option<String>,
    },
    /// Refresh the timestamp of the caller's own reservation on a book.
    ByBook { book_id: String, user_id: String },
}

/// Where a reservation is visible, as seen by a single pass of reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionCheck {
    pub reservation_id: ReservationId,
    pub primary: Option<Reservation>,
    pub by_user: bool,
    pub by_book: bool,
    pub lock_held: bool,
}

impl ProjectionCheck {
    /// A reservation is consistent when all projections and the lock agree,
    /// or when it is gone from the primary and holds no lock.
    pub fn is_consistent(&self) -> bool {
        match self.primary {
            Some(_) => self.by_user && self.by_book && self.lock_held,
            None => !self.by_user && !self.by_book && !self.lock_held,
        }
    }
}

/// Entry point for all reservation operations.
///
/// Cheap to clone; clones share the store and the open/closed state.
#[derive(Clone)]
pub struct Coordinator {
    projections: ProjectionSet,
    config: CoordinatorConfig,
    closed: Arc<AtomicBool>,
}

impl Coordinator {
    /// Take ownership of a store client and verify it is reachable.
    pub async fn open(store: Arc<dyn RecordStore>, config: CoordinatorConfig) -> Result<Self> {
        store.ping().await?;
        info!(max_attempts = config.retry.max_attempts, "coordinator opened");
        Ok(Self {
            projections: ProjectionSet::new(store, config.retry),
            config,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Stop accepting operations and close the store. Idempotent.
    pub async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.projections.store().close().await;
            info!("coordinator closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Acquisition
    // ------------------------------------------------------------------

    /// Reserve `book_id` for `user_id`.
    pub async fn make_reservation(&self, book_id: &str, user_id: &str) -> Result<Reservation> {
        self.ensure_open()?;
        let user_id = parse_user_id(user_id)?;

        let reservation_id = Uuid::new_v4();
        let marker = LockMarker::new(book_id, reservation_id, now());

        if !self.projections.claim(&marker).await? {
            debug!(book_id, user_id, "claim lost");
            return Err(Error::AlreadyReserved(book_id.to_string()));
        }

        match self.projections.book(book_id).await {
            StepResult::Done { value: Some(_), .. } => {}
            StepResult::Done { value: None, .. } => {
                self.compensate_claim(&marker).await?;
                return Err(Error::BookNotFound(book_id.to_string()));
            }
            StepResult::Exhausted { error, .. } => {
                warn!(book_id, %error, "catalog unreachable after claim; releasing");
                self.compensate_claim(&marker).await?;
                return Err(Error::Store(error));
            }
        }

        let reservation = Reservation::new(reservation_id, book_id, user_id, marker.claimed_at);
        if let Err(err) = self.projections.write_all(&reservation).await {
            error!(
                %reservation_id,
                book_id,
                %err,
                "commit incomplete; book stays claimed until reconciled"
            );
            return Err(err);
        }

        info!(%reservation_id, book_id, user_id, "reservation made");
        Ok(reservation)
    }

    /// Undo a claim taken by this request.
    async fn compensate_claim(&self, marker: &LockMarker) -> Result<()> {
        match self
            .projections
            .release(&marker.book_id, marker.reservation_id)
            .await
        {
            StepResult::Done { value: true, .. } => Ok(()),
            StepResult::Done { value: false, .. } => {
                warn!(book_id = %marker.book_id, "claim already gone during compensation");
                Ok(())
            }
            StepResult::Exhausted {
                attempts, error, ..
            } => {
                error!(
                    book_id = %marker.book_id,
                    reservation_id = %marker.reservation_id,
                    attempts,
                    %error,
                    "orphaned claim: lock marker could not be released"
                );
                Err(Error::Store(error))
            }
        }
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    pub async fn update_reservation(&self, request: UpdateRequest) -> Result<Reservation> {
        self.ensure_open()?;
        match request {
            UpdateRequest::ById {
                reservation_id,
                new_user_id,
            } => {
                let new_user_id = new_user_id
                    .as_deref()
                    .map(parse_user_id)
                    .transpose()?;
                self.update_by_id(reservation_id, new_user_id).await
            }
            UpdateRequest::ByBook { book_id, user_id } => {
                let user_id = parse_user_id(&user_id)?;
                self.update_by_book(&book_id, user_id).await
            }
        }
    }

    /// Parse a raw reservation id and update it.
    pub async fn update_reservation_by_raw_id(
        &self,
        reservation_id: &str,
        new_user_id: Option<String>,
    ) -> Result<Reservation> {
        let reservation_id = parse_reservation_id(reservation_id)?;
        self.update_reservation(UpdateRequest::ById {
            reservation_id,
            new_user_id,
        })
        .await
    }

    /// Refresh or reassign by id. The primary write is conditional on the
    /// owner that was read, so a concurrent reassignment forces a re-read
    /// instead of being overwritten.
    async fn update_by_id(
        &self,
        reservation_id: ReservationId,
        new_user_id: Option<UserId>,
    ) -> Result<Reservation> {
        let mut book_id = String::new();
        for _ in 0..self.config.retry.max_attempts.max(1) {
            let current = self
                .projections
                .get(reservation_id)
                .await?
                .ok_or_else(|| Error::NotFound(reservation_id.to_string()))?;
            book_id.clone_from(&current.book_id);

            let at = now().max(current.reserved_at);
            let updated = match new_user_id {
                Some(user_id) if user_id != current.user_id => current.reassigned(user_id, at),
                _ => current.refreshed(at),
            };
            let reassigning = updated.user_id != current.user_id;

            match self
                .projections
                .update(Projection::Primary, &updated, Some(current.user_id))
                .await
                .or_partial(reservation_id)?
            {
                RowUpdate::Applied => {}
                RowUpdate::Superseded if !reassigning => {}
                RowUpdate::Missing => return Err(Error::NotFound(reservation_id.to_string())),
                RowUpdate::Superseded | RowUpdate::OwnerChanged => {
                    debug!(%reservation_id, "primary row changed since read; retrying");
                    continue;
                }
            }

            if reassigning {
                self.propagate(Projection::ByBook, &updated, None).await?;
                self.move_user_row(&current, &updated).await?;
            } else {
                let owner = Some(updated.user_id);
                self.propagate(Projection::ByBook, &updated, owner).await?;
                self.propagate(Projection::ByUser, &updated, owner).await?;
            }

            info!(%reservation_id, user_id = updated.user_id, "reservation updated");
            return Ok(updated);
        }

        warn!(%reservation_id, "update kept losing to concurrent changes");
        Err(Error::NotOwner { book_id })
    }

    async fn update_by_book(&self, book_id: &str, user_id: UserId) -> Result<Reservation> {
        let current = self
            .current_for_book(book_id)
            .await?
            .ok_or_else(|| Error::NotFound(book_id.to_string()))?;
        let not_owner = || Error::NotOwner {
            book_id: book_id.to_string(),
        };
        if current.user_id != user_id {
            return Err(not_owner());
        }

        let updated = current.refreshed(now().max(current.reserved_at));
        let reservation_id = updated.reservation_id;
        match self
            .projections
            .update(Projection::Primary, &updated, Some(user_id))
            .await
            .or_partial(reservation_id)?
        {
            RowUpdate::Applied | RowUpdate::Superseded => {}
            RowUpdate::Missing => return Err(Error::NotFound(book_id.to_string())),
            RowUpdate::OwnerChanged => {
                debug!(%reservation_id, book_id, user_id, "reassigned since read");
                return Err(not_owner());
            }
        }
        self.propagate(Projection::ByUser, &updated, Some(user_id))
            .await?;
        self.propagate(Projection::ByBook, &updated, Some(user_id))
            .await?;

        info!(%reservation_id, book_id, user_id, "reservation refreshed");
        Ok(updated)
    }

    /// Apply an update to a secondary projection. A missing or reassigned
    /// row means a concurrent release or reassignment got there first,
    /// which is not an error.
    async fn propagate(
        &self,
        projection: Projection,
        updated: &Reservation,
        expected_user: Option<UserId>,
    ) -> Result<()> {
        let outcome = self
            .projections
            .update(projection, updated, expected_user)
            .await
            .or_partial(updated.reservation_id)?;
        if !outcome.is_held() {
            debug!(
                reservation_id = %updated.reservation_id,
                %projection,
                ?outcome,
                "row gone or reassigned during update"
            );
        }
        Ok(())
    }

    /// Re-key the user projection after a reassignment.
    async fn move_user_row(&self, current: &Reservation, updated: &Reservation) -> Result<()> {
        let reservation_id = updated.reservation_id;
        self.projections
            .write(Projection::ByUser, updated)
            .await
            .or_partial(reservation_id)?;
        self.projections
            .delete(Projection::ByUser, current)
            .await
            .or_partial(reservation_id)?;

        // A release or a later update that read the old owner cannot see
        // the new row, so settle against the primary once more.
        match self.projections.get(reservation_id).await? {
            Some(primary) if primary.user_id == updated.user_id => {
                if primary != *updated {
                    // refreshed by the new owner before its row existed
                    self.propagate(Projection::ByUser, &primary, Some(primary.user_id))
                        .await?;
                    self.propagate(Projection::ByBook, &primary, None).await?;
                }
                Ok(())
            }
            Some(primary) => {
                self.projections
                    .delete(Projection::ByUser, updated)
                    .await
                    .or_partial(reservation_id)?;
                // a later reassignment won; its owner's row may have been
                // caught by the delete above
                let restored = self
                    .projections
                    .update(Projection::ByUser, &primary, Some(primary.user_id))
                    .await
                    .or_partial(reservation_id)?;
                if restored == RowUpdate::Missing {
                    self.projections
                        .write_guarded(Projection::ByUser, &primary)
                        .await?;
                }
                debug!(%reservation_id, "reassignment superseded by a later one");
                Ok(())
            }
            None => {
                self.projections
                    .delete(Projection::ByUser, updated)
                    .await
                    .or_partial(reservation_id)?;
                Err(Error::NotFound(reservation_id.to_string()))
            }
        }
    }

    // ------------------------------------------------------------------
    // Release
    // ------------------------------------------------------------------

    /// Release `user_id`'s reservation on `book_id`.
    pub async fn remove_reservation(&self, book_id: &str, user_id: &str) -> Result<Reservation> {
        self.ensure_open()?;
        let user_id = parse_user_id(user_id)?;

        let current = self
            .current_for_book(book_id)
            .await?
            .ok_or_else(|| Error::NotFound(book_id.to_string()))?;
        if current.user_id != user_id {
            return Err(Error::NotOwner {
                book_id: book_id.to_string(),
            });
        }
        let reservation_id = current.reservation_id;

        // Concurrent removers race on the book row; only the one whose
        // delete removed it carries on.
        let [first, rest @ ..] = Projection::RELEASE_ORDER;
        let step = self.projections.delete(first, &current).await;
        let conclusive = step.first_attempt();
        if !step.or_partial(reservation_id)? && conclusive {
            debug!(%reservation_id, book_id, "lost release race");
            return Err(Error::NotFound(book_id.to_string()));
        }

        for projection in rest {
            self.projections
                .delete(projection, &current)
                .await
                .or_partial(reservation_id)?;
        }

        let released = self
            .projections
            .release(book_id, reservation_id)
            .await
            .or_partial(reservation_id)?;
        if !released {
            warn!(%reservation_id, book_id, "lock marker missing or held elsewhere at release");
        }

        info!(%reservation_id, book_id, user_id, "reservation removed");
        Ok(current)
    }

    // ------------------------------------------------------------------
    // Read side
    // ------------------------------------------------------------------

    pub async fn view_reservation(&self, reservation_id: ReservationId) -> Result<Reservation> {
        self.ensure_open()?;
        self.projections
            .get(reservation_id)
            .await?
            .ok_or_else(|| Error::NotFound(reservation_id.to_string()))
    }

    /// Parse a raw reservation id and view it.
    pub async fn view_reservation_by_raw_id(&self, reservation_id: &str) -> Result<Reservation> {
        self.view_reservation(parse_reservation_id(reservation_id)?)
            .await
    }

    /// The active reservation on a book, read from the book projection.
    pub async fn reservation_for_book(&self, book_id: &str) -> Result<Reservation> {
        self.ensure_open()?;
        self.current_for_book(book_id)
            .await?
            .ok_or_else(|| Error::NotFound(book_id.to_string()))
    }

    /// All reservations held by a user, read from the user projection.
    pub async fn reservations_for_user(&self, user_id: &str) -> Result<Vec<Reservation>> {
        self.ensure_open()?;
        let user_id = parse_user_id(user_id)?;
        self.projections.for_user(user_id).await
    }

    /// Every reservation in the primary projection, unordered.
    pub async fn list_reservations(&self) -> Result<Vec<Reservation>> {
        self.ensure_open()?;
        self.projections.scan(Projection::Primary).await
    }

    pub async fn list_books(&self) -> Result<Vec<Book>> {
        self.ensure_open()?;
        self.projections.books().await
    }

    /// Books without a lock marker.
    pub async fn available_books(&self) -> Result<Vec<Book>> {
        self.ensure_open()?;
        let locked: HashSet<String> = self
            .projections
            .locks()
            .await?
            .into_iter()
            .map(|m| m.book_id)
            .collect();
        let mut books = self.projections.books().await?;
        books.retain(|b| !locked.contains(&b.book_id));
        Ok(books)
    }

    /// Pick the live row for a book. Normally there is at most one; while a
    /// repair is pending the one holding the lock wins, then the newest.
    async fn current_for_book(&self, book_id: &str) -> Result<Option<Reservation>> {
        let mut rows = self.projections.for_book(book_id).await?;
        if rows.len() <= 1 {
            return Ok(rows.pop());
        }
        warn!(book_id, rows = rows.len(), "multiple book rows; consulting lock");
        if let Some(lock) = self.projections.lock(book_id).await? {
            if let Some(pos) = rows
                .iter()
                .position(|r| r.reservation_id == lock.reservation_id)
            {
                return Ok(Some(rows.swap_remove(pos)));
            }
        }
        Ok(rows.into_iter().max_by_key(|r| r.reserved_at))
    }

    /// Read every projection and the lock for one reservation.
    pub async fn check_reservation(&self, reservation_id: ReservationId) -> Result<ProjectionCheck> {
        self.ensure_open()?;
        let primary = self.projections.get(reservation_id).await?;
        let mut check = ProjectionCheck {
            reservation_id,
            primary: primary.clone(),
            by_user: false,
            by_book: false,
            lock_held: false,
        };
        if let Some(r) = primary {
            check.by_user = self.projections.for_user(r.user_id).await?.contains(&r);
            check.by_book = self.projections.for_book(&r.book_id).await?.contains(&r);
            check.lock_held = self
                .projections
                .lock(&r.book_id)
                .await?
                .is_some_and(|l| l.reservation_id == reservation_id);
        } else {
            let orphaned = |rows: Vec<Reservation>| {
                rows.iter().any(|r| r.reservation_id == reservation_id)
            };
            check.by_user = orphaned(self.projections.scan(Projection::ByUser).await?);
            check.by_book = orphaned(self.projections.scan(Projection::ByBook).await?);
            check.lock_held = self
                .projections
                .locks()
                .await?
                .iter()
                .any(|l| l.reservation_id == reservation_id);
        }
        Ok(check)
    }

    // ------------------------------------------------------------------
    // Repair
    // ------------------------------------------------------------------

    /// Repair abandoned claims and diverged projections.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        self.ensure_open()?;
        Reconciler::new(&self.projections, self.config.reconcile_grace)
            .run(now())
            .await
    }

    /// Report what [`Coordinator::reconcile`] would repair, ignoring the
    /// grace period, without writing anything.
    pub async fn audit(&self) -> Result<ReconcileReport> {
        self.ensure_open()?;
        Reconciler::new(&self.projections, Duration::ZERO)
            .dry_run()
            .run(now())
            .await
    }
}
