//! Repair of state left behind by abandoned or exhausted operations.
//!
//! Coordinator operations are multi-row sequences without a transaction, so a
//! crash, a dropped request or a spent retry budget can leave:
//!
//! - a lock marker whose reservation never reached the primary projection,
//! - a primary row missing from (or different in) a secondary projection,
//! - a primary row whose book has no lock marker,
//! - a secondary row with no primary row behind it.
//!
//! # Algorithm
//!
//! 1. Snapshot locks and all three projections
//! 2. Release orphan locks older than the grace period (holder-checked)
//! 3. Rewrite diverged secondary rows from the primary (guarded)
//! 4. Restore missing locks with insert-if-absent, then re-read the primary
//!    row and give the lock back if the reservation was released meanwhile;
//!    report foreign holders
//! 5. Delete stale secondary rows older than the grace period
//!
//! Every repair is a conditional or re-checked single-row write, so running
//! the reconciler next to live traffic never takes a book away from a
//! reservation that holds it.

use crate::error::Result;
use crate::{
    BookId, LockMarker, Projection, ProjectionSet, Reservation, ReservationId, Timestamp, UserId,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// A book whose lock names a different reservation than its primary row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConflict {
    pub book_id: BookId,
    pub reservation_id: ReservationId,
    pub lock_holder: ReservationId,
}

/// Counts of what a pass found (dry run) or repaired.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub dry_run: bool,
    pub orphan_locks_released: usize,
    pub projections_repaired: usize,
    pub locks_restored: usize,
    pub stale_rows_removed: usize,
    pub conflicts: Vec<LockConflict>,
}

impl ReconcileReport {
    /// Nothing to repair and nothing in conflict.
    pub fn is_clean(&self) -> bool {
        self.orphan_locks_released == 0
            && self.projections_repaired == 0
            && self.locks_restored == 0
            && self.stale_rows_removed == 0
            && self.conflicts.is_empty()
    }
}

/// One reconciliation pass over a projection set.
pub struct Reconciler<'a> {
    projections: &'a ProjectionSet,
    grace: chrono::Duration,
    apply: bool,
}

impl<'a> Reconciler<'a> {
    pub fn new(projections: &'a ProjectionSet, grace: Duration) -> Self {
        Self {
            projections,
            grace: chrono::Duration::from_std(grace)
                .unwrap_or_else(|_| chrono::Duration::seconds(30)),
            apply: true,
        }
    }

    /// Count findings without writing.
    pub fn dry_run(mut self) -> Self {
        self.apply = false;
        self
    }

    fn expired(&self, since: Timestamp, now: Timestamp) -> bool {
        now - since >= self.grace
    }

    pub async fn run(&self, now: Timestamp) -> Result<ReconcileReport> {
        let locks = self.projections.locks().await?;
        let primary = self.projections.scan(Projection::Primary).await?;
        let by_user = self.projections.scan(Projection::ByUser).await?;
        let by_book = self.projections.scan(Projection::ByBook).await?;

        let mut report = ReconcileReport {
            dry_run: !self.apply,
            ..ReconcileReport::default()
        };

        let primary_by_id: HashMap<ReservationId, &Reservation> =
            primary.iter().map(|r| (r.reservation_id, r)).collect();
        let released = self
            .release_orphan_locks(&locks, &primary_by_id, now, &mut report)
            .await?;
        self.repair_projections(&primary, &by_user, &by_book, &mut report)
            .await?;
        self.restore_locks(&primary, &locks, &released, now, &mut report)
            .await?;
        self.remove_stale_rows(&by_user, &by_book, &primary_by_id, now, &mut report)
            .await?;

        if report.is_clean() {
            tracing::debug!("reconcile: nothing to repair");
        } else {
            tracing::info!(?report, "reconcile pass finished");
        }
        Ok(report)
    }

    async fn release_orphan_locks(
        &self,
        locks: &[LockMarker],
        primary: &HashMap<ReservationId, &Reservation>,
        now: Timestamp,
        report: &mut ReconcileReport,
    ) -> Result<HashSet<BookId>> {
        let mut released = HashSet::new();
        for lock in locks {
            if primary.contains_key(&lock.reservation_id) || !self.expired(lock.claimed_at, now) {
                continue;
            }
            let freed = if self.apply {
                self.projections
                    .release(&lock.book_id, lock.reservation_id)
                    .await
                    .or_store()?
            } else {
                true
            };
            if freed {
                tracing::warn!(book_id = %lock.book_id, reservation_id = %lock.reservation_id, "released orphan lock");
                report.orphan_locks_released += 1;
                released.insert(lock.book_id.clone());
            }
        }
        Ok(released)
    }

    async fn repair_projections(
        &self,
        primary: &[Reservation],
        by_user: &[Reservation],
        by_book: &[Reservation],
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let user_rows: HashMap<(UserId, ReservationId), &Reservation> = by_user
            .iter()
            .map(|r| ((r.user_id, r.reservation_id), r))
            .collect();
        let book_rows: HashMap<(&str, ReservationId), &Reservation> = by_book
            .iter()
            .map(|r| ((r.book_id.as_str(), r.reservation_id), r))
            .collect();

        for r in primary {
            let secondary = [
                (
                    Projection::ByUser,
                    user_rows.get(&(r.user_id, r.reservation_id)),
                ),
                (
                    Projection::ByBook,
                    book_rows.get(&(r.book_id.as_str(), r.reservation_id)),
                ),
            ];
            for (projection, existing) in secondary {
                if existing.copied() == Some(r) {
                    continue;
                }
                let kept = if self.apply {
                    self.projections.write_guarded(projection, r).await?
                } else {
                    true
                };
                if kept {
                    tracing::warn!(reservation_id = %r.reservation_id, %projection, "repaired projection row");
                    report.projections_repaired += 1;
                }
            }
        }
        Ok(())
    }

    async fn restore_locks(
        &self,
        primary: &[Reservation],
        locks: &[LockMarker],
        released: &HashSet<BookId>,
        now: Timestamp,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let holders: HashMap<&str, ReservationId> = locks
            .iter()
            .filter(|l| !released.contains(&l.book_id))
            .map(|l| (l.book_id.as_str(), l.reservation_id))
            .collect();

        for r in primary {
            let snapshot = holders.get(r.book_id.as_str()).copied();
            if snapshot == Some(r.reservation_id) {
                continue;
            }
            if !self.apply {
                match snapshot {
                    Some(holder) => report.conflicts.push(LockConflict {
                        book_id: r.book_id.clone(),
                        reservation_id: r.reservation_id,
                        lock_holder: holder,
                    }),
                    None => report.locks_restored += 1,
                }
                continue;
            }

            // The snapshots were taken at different times; decide on live reads.
            match self.projections.lock(&r.book_id).await? {
                Some(lock) if lock.reservation_id == r.reservation_id => {}
                Some(lock) => self.report_conflict(r, lock.reservation_id, report).await?,
                None => self.restore_lock(r, now, report).await?,
            }
        }

        for conflict in &report.conflicts {
            tracing::error!(?conflict, "book claimed by a different reservation than its row");
        }
        Ok(())
    }

    async fn restore_lock(
        &self,
        r: &Reservation,
        now: Timestamp,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let marker = LockMarker::new(r.book_id.clone(), r.reservation_id, now);
        if !self.projections.claim(&marker).await? {
            return match self.projections.lock(&r.book_id).await? {
                Some(lock) if lock.reservation_id != r.reservation_id => {
                    self.report_conflict(r, lock.reservation_id, report).await
                }
                _ => Ok(()),
            };
        }

        if self.projections.get(r.reservation_id).await?.is_some() {
            tracing::warn!(book_id = %r.book_id, reservation_id = %r.reservation_id, "restored missing lock");
            report.locks_restored += 1;
        } else {
            // released after the snapshot; its lock was already gone
            self.projections
                .release(&r.book_id, r.reservation_id)
                .await
                .or_store()?;
            tracing::debug!(book_id = %r.book_id, reservation_id = %r.reservation_id, "reservation released during pass; lock not restored");
        }
        Ok(())
    }

    /// Record a foreign lock holder unless the row has gone in the meantime.
    async fn report_conflict(
        &self,
        r: &Reservation,
        lock_holder: ReservationId,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        if self.projections.get(r.reservation_id).await?.is_some() {
            report.conflicts.push(LockConflict {
                book_id: r.book_id.clone(),
                reservation_id: r.reservation_id,
                lock_holder,
            });
        }
        Ok(())
    }

    async fn remove_stale_rows(
        &self,
        by_user: &[Reservation],
        by_book: &[Reservation],
        primary: &HashMap<ReservationId, &Reservation>,
        now: Timestamp,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let stale_user = by_user.iter().filter(|row| match primary.get(&row.reservation_id) {
            Some(p) => p.user_id != row.user_id,
            None => self.expired(row.reserved_at, now),
        });
        let stale_book = by_book.iter().filter(|row| match primary.get(&row.reservation_id) {
            Some(p) => p.book_id != row.book_id,
            None => self.expired(row.reserved_at, now),
        });
        let stale = stale_user
            .map(|row| (Projection::ByUser, row))
            .chain(stale_book.map(|row| (Projection::ByBook, row)));

        for (projection, row) in stale {
            let removed = if self.apply {
                // a reassignment may have moved the primary onto this row
                let live = self.projections.get(row.reservation_id).await?;
                let still_stale = match (live, projection) {
                    (Some(p), Projection::ByUser) => p.user_id != row.user_id,
                    (Some(p), _) => p.book_id != row.book_id,
                    (None, _) => true,
                };
                still_stale
                    && self
                        .projections
                        .delete(projection, row)
                        .await
                        .or_store()?
            } else {
                true
            };
            if removed {
                tracing::warn!(reservation_id = %row.reservation_id, %projection, "removed stale row");
                report.stale_rows_removed += 1;
            }
        }
        Ok(())
    }
}
