//! Row types for the catalog, lock and reservation tables.

use bookhold_engine::{Book, LockMarker, Reservation};
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

/// A stored catalog row.
#[derive(Debug)]
pub struct StoredBook {
    pub book_id: String,
    pub title: String,
    pub author: String,
    pub genre: Option<String>,
    pub published_year: Option<i32>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredBook {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredBook {
            book_id: row.try_get("book_id")?,
            title: row.try_get("title")?,
            author: row.try_get("author")?,
            genre: row.try_get("genre")?,
            published_year: row.try_get("published_year")?,
        })
    }
}

impl StoredBook {
    pub fn into_book(self) -> Book {
        Book {
            book_id: self.book_id,
            title: self.title,
            author: self.author,
            genre: self.genre,
            published_year: self.published_year,
        }
    }
}

/// A stored lock marker row.
#[derive(Debug)]
pub struct StoredLock {
    pub book_id: String,
    pub reservation_id: Uuid,
    pub claimed_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredLock {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredLock {
            book_id: row.try_get("book_id")?,
            reservation_id: row.try_get("reservation_id")?,
            claimed_at: row.try_get("claimed_at")?,
        })
    }
}

impl StoredLock {
    pub fn into_marker(self) -> LockMarker {
        LockMarker::new(self.book_id, self.reservation_id, self.claimed_at)
    }
}

/// A reservation row from any of the three projection tables.
///
/// All projection tables carry the same four columns; only their keys differ.
#[derive(Debug)]
pub struct StoredReservation {
    pub reservation_id: Uuid,
    pub book_id: String,
    pub user_id: i64,
    pub reserved_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredReservation {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredReservation {
            reservation_id: row.try_get("reservation_id")?,
            book_id: row.try_get("book_id")?,
            user_id: row.try_get("user_id")?,
            reserved_at: row.try_get("reserved_at")?,
        })
    }
}

impl StoredReservation {
    pub fn into_reservation(self) -> Reservation {
        Reservation::new(
            self.reservation_id,
            self.book_id,
            self.user_id,
            self.reserved_at,
        )
    }
}
