//! # Bookhold Engine
//!
//! Reservation coordination for a shared pool of uniquely identified books,
//! on top of a replicated record store that only offers per-row conditional
//! writes.
//!
//! No two reservations may hold the same book at once, regardless of request
//! races. The store has no multi-row transactions, so every operation is a
//! short saga of single-row steps.
//!
//! ## Design Principles
//!
//! - **One mutex**: the conditional insert of a book's [`LockMarker`] is the
//!   only source of exclusion. There are no in-process locks.
//! - **Explicit steps**: every write is a [`Step`] driven by a [`RetryPolicy`]
//!   and reported as a [`StepResult`], never unwound implicitly.
//! - **Pluggable store**: the coordinator owns an injected [`RecordStore`].
//!   [`MemoryStore`] ships with the crate for tests and local runs.
//!
//! ## Core Concepts
//!
//! ### Projections
//!
//! A [`Reservation`] is stored three times, keyed by reservation id, by
//! `(user_id, reservation_id)` and by `(book_id, reservation_id)`. See
//! [`Projection`].
//!
//! ### Coordinator
//!
//! The [`Coordinator`] implements the operations:
//! - [`Coordinator::make_reservation`] - claim, validate, commit
//! - [`Coordinator::update_reservation`] - by id or by `(book_id, user_id)`
//! - [`Coordinator::remove_reservation`] - projections first, lock last
//! - [`Coordinator::view_reservation`] and the listing reads
//!
//! ### Reconciliation
//!
//! [`Coordinator::reconcile`] repairs what abandoned requests leave behind:
//! orphan locks, diverged projections, stale rows.
//!
//! ## Quick Start
//!
//! ```rust
//! use bookhold_engine::{Book, Coordinator, CoordinatorConfig, Error, MemoryStore};
//! use std::sync::Arc;
//!
//! # let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
//! # rt.block_on(async {
//! let store = MemoryStore::new().with_books([Book::new("B1", "Dune", "Frank Herbert")]);
//! let coordinator = Coordinator::open(Arc::new(store), CoordinatorConfig::default())
//!     .await
//!     .unwrap();
//!
//! let r1 = coordinator.make_reservation("B1", "42").await.unwrap();
//! assert_eq!(
//!     coordinator.make_reservation("B1", "43").await,
//!     Err(Error::AlreadyReserved("B1".into()))
//! );
//!
//! coordinator.remove_reservation("B1", "42").await.unwrap();
//! let r2 = coordinator.make_reservation("B1", "43").await.unwrap();
//! assert_ne!(r1.reservation_id, r2.reservation_id);
//! # });
//! ```

pub mod coordinator;
pub mod error;
pub mod memory;
pub mod projection;
pub mod reconcile;
pub mod record;
pub mod saga;
pub mod store;

// Re-export main types at crate root
pub use coordinator::{Coordinator, CoordinatorConfig, ProjectionCheck, UpdateRequest};
pub use error::{Error, Result, StoreError, StoreResult};
pub use memory::{FaultPoint, MemoryStore};
pub use projection::{Projection, ProjectionSet};
pub use reconcile::{LockConflict, ReconcileReport, Reconciler};
pub use record::{now, parse_reservation_id, parse_user_id, Book, LockMarker, Reservation};
pub use saga::{RetryPolicy, Step, StepResult};
pub use store::{RecordStore, RowUpdate};

/// Type aliases for clarity
pub type BookId = String;
pub type ReservationId = uuid::Uuid;
pub type UserId = i64;
pub type Timestamp = chrono::DateTime<chrono::Utc>;
