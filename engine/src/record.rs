//! Record types: catalog books, reservations and lock markers.

use crate::{error::Result, BookId, Error, ReservationId, Timestamp, UserId};
use chrono::DurationRound;
use serde::{Deserialize, Serialize};

/// A catalog entry. Books are seeded externally and never mutated here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub book_id: BookId,
    pub title: String,
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_year: Option<i32>,
}

impl Book {
    /// Create a book with only the required fields.
    pub fn new(
        book_id: impl Into<BookId>,
        title: impl Into<String>,
        author: impl Into<String>,
    ) -> Self {
        Self {
            book_id: book_id.into(),
            title: title.into(),
            author: author.into(),
            genre: None,
            published_year: None,
        }
    }
}

/// The reservation fact, stored identically in every projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub reservation_id: ReservationId,
    pub book_id: BookId,
    pub user_id: UserId,
    pub reserved_at: Timestamp,
}

impl Reservation {
    pub fn new(
        reservation_id: ReservationId,
        book_id: impl Into<BookId>,
        user_id: UserId,
        reserved_at: Timestamp,
    ) -> Self {
        Self {
            reservation_id,
            book_id: book_id.into(),
            user_id,
            reserved_at,
        }
    }

    /// Same reservation with a new timestamp.
    pub fn refreshed(&self, at: Timestamp) -> Self {
        Self {
            reserved_at: at,
            ..self.clone()
        }
    }

    /// Same reservation handed to another user.
    pub fn reassigned(&self, user_id: UserId, at: Timestamp) -> Self {
        Self {
            user_id,
            reserved_at: at,
            ..self.clone()
        }
    }
}

/// Exclusivity marker for a book.
///
/// Presence means the book is reserved. The marker names the reservation
/// that claimed it so that only that reservation can release it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMarker {
    pub book_id: BookId,
    pub reservation_id: ReservationId,
    pub claimed_at: Timestamp,
}

impl LockMarker {
    pub fn new(
        book_id: impl Into<BookId>,
        reservation_id: ReservationId,
        claimed_at: Timestamp,
    ) -> Self {
        Self {
            book_id: book_id.into(),
            reservation_id,
            claimed_at,
        }
    }
}

/// Current time truncated to microseconds, the finest precision the
/// record store keeps. Values handed back to callers then compare equal
/// to what a later read returns.
pub fn now() -> Timestamp {
    let now = chrono::Utc::now();
    now.duration_trunc(chrono::Duration::microseconds(1))
        .unwrap_or(now)
}

/// Coerce a caller-supplied user id into an integer.
pub fn parse_user_id(raw: &str) -> Result<UserId> {
    raw.trim()
        .parse::<UserId>()
        .map_err(|_| Error::InvalidInput(raw.to_string()))
}

/// Parse a caller-supplied reservation id.
pub fn parse_reservation_id(raw: &str) -> Result<ReservationId> {
    raw.trim()
        .parse::<ReservationId>()
        .map_err(|_| Error::InvalidReservationId(raw.to_string()))
}
