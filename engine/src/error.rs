//! Error types for the reservation engine.

use crate::saga::Step;
use crate::{BookId, ReservationId};
use thiserror::Error;

/// Failures reported by a [`RecordStore`](crate::RecordStore) backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not be reached or timed out. Safe to retry for
    /// idempotent writes.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected the request.
    #[error("store backend error: {0}")]
    Backend(String),

    /// A row was read but could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether repeating the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Result type for store calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// All possible outcomes of a coordinator operation other than success.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Caller errors, rejected before any write
    #[error("invalid user_id: {0:?}")]
    InvalidInput(String),

    #[error("invalid reservation_id: {0:?}")]
    InvalidReservationId(String),

    // Contention and lookup outcomes
    #[error("book already reserved: {0}")]
    AlreadyReserved(BookId),

    #[error("book not found: {0}")]
    BookNotFound(BookId),

    #[error("reservation not found: {0}")]
    NotFound(String),

    #[error("reservation for book {book_id} is held by another user")]
    NotOwner { book_id: BookId },

    // Internal state errors
    #[error("reservation {reservation_id} left incomplete at {step}: {source}")]
    PartialCommit {
        reservation_id: ReservationId,
        step: Step,
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("coordinator is closed")]
    Closed,
}

impl Error {
    /// True for outcomes that are part of normal operation under contention
    /// rather than faults of the system.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_)
                | Error::InvalidReservationId(_)
                | Error::AlreadyReserved(_)
                | Error::BookNotFound(_)
                | Error::NotFound(_)
                | Error::NotOwner { .. }
        )
    }
}

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, Error>;
