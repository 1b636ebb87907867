//! PostgreSQL implementation of the engine's record store.
//!
//! Each projection lives in its own table and every statement touches one
//! row or one partition. The lock table's primary key gives the conditional
//! insert: `ON CONFLICT DO NOTHING` reports a win only for the single
//! inserting session.

use crate::db::{Pool, StoredBook, StoredLock, StoredReservation};
use async_trait::async_trait;
use bookhold_engine::{
    Book, LockMarker, Projection, RecordStore, Reservation, ReservationId, RowUpdate,
    StoreError, StoreResult, UserId,
};
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::Postgres;

const RESERVATION_COLUMNS: &str = "reservation_id, book_id, user_id, reserved_at";

/// Record store backed by a sqlx connection pool.
#[derive(Debug, Clone)]
pub struct PgRecordStore {
    pool: Pool,
}

impl PgRecordStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

fn table(projection: Projection) -> &'static str {
    match projection {
        Projection::Primary => "reservations",
        Projection::ByUser => "reservations_by_user",
        Projection::ByBook => "reservations_by_book",
    }
}

/// Upsert under the projection's key. Binds `$1..$4` in column order.
fn upsert_sql(projection: Projection) -> &'static str {
    match projection {
        Projection::Primary => {
            r#"
            INSERT INTO reservations (reservation_id, book_id, user_id, reserved_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (reservation_id) DO UPDATE SET
                book_id = EXCLUDED.book_id,
                user_id = EXCLUDED.user_id,
                reserved_at = EXCLUDED.reserved_at
            "#
        }
        Projection::ByUser => {
            r#"
            INSERT INTO reservations_by_user (reservation_id, book_id, user_id, reserved_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, reservation_id) DO UPDATE SET
                book_id = EXCLUDED.book_id,
                reserved_at = EXCLUDED.reserved_at
            "#
        }
        Projection::ByBook => {
            r#"
            INSERT INTO reservations_by_book (reservation_id, book_id, user_id, reserved_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (book_id, reservation_id) DO UPDATE SET
                user_id = EXCLUDED.user_id,
                reserved_at = EXCLUDED.reserved_at
            "#
        }
    }
}

/// Conditional update: owner (when `$5` is not null) and monotone timestamp.
/// Yields whether the row was overwritten and the owner of the keyed row as
/// seen before the statement. Binds `$1..$5`.
fn update_sql(projection: Projection) -> &'static str {
    match projection {
        Projection::Primary => {
            r#"
            WITH current AS (
                SELECT user_id FROM reservations WHERE reservation_id = $1
            ), updated AS (
                UPDATE reservations SET book_id = $2, user_id = $3, reserved_at = $4
                WHERE reservation_id = $1
                    AND ($5::BIGINT IS NULL OR user_id = $5)
                    AND reserved_at <= $4
                RETURNING 1
            )
            SELECT EXISTS (SELECT 1 FROM updated), (SELECT user_id FROM current)
            "#
        }
        Projection::ByUser => {
            r#"
            WITH current AS (
                SELECT user_id FROM reservations_by_user
                WHERE user_id = $3 AND reservation_id = $1
            ), updated AS (
                UPDATE reservations_by_user SET book_id = $2, reserved_at = $4
                WHERE user_id = $3 AND reservation_id = $1
                    AND ($5::BIGINT IS NULL OR user_id = $5)
                    AND reserved_at <= $4
                RETURNING 1
            )
            SELECT EXISTS (SELECT 1 FROM updated), (SELECT user_id FROM current)
            "#
        }
        Projection::ByBook => {
            r#"
            WITH current AS (
                SELECT user_id FROM reservations_by_book
                WHERE book_id = $2 AND reservation_id = $1
            ), updated AS (
                UPDATE reservations_by_book SET user_id = $3, reserved_at = $4
                WHERE book_id = $2 AND reservation_id = $1
                    AND ($5::BIGINT IS NULL OR user_id = $5)
                    AND reserved_at <= $4
                RETURNING 1
            )
            SELECT EXISTS (SELECT 1 FROM updated), (SELECT user_id FROM current)
            "#
        }
    }
}

fn delete_query(projection: Projection, r: &Reservation) -> Query<'_, Postgres, PgArguments> {
    match projection {
        Projection::Primary => {
            sqlx::query("DELETE FROM reservations WHERE reservation_id = $1")
                .bind(r.reservation_id)
        }
        Projection::ByUser => sqlx::query(
            "DELETE FROM reservations_by_user WHERE user_id = $1 AND reservation_id = $2",
        )
        .bind(r.user_id)
        .bind(r.reservation_id),
        Projection::ByBook => sqlx::query(
            "DELETE FROM reservations_by_book WHERE book_id = $1 AND reservation_id = $2",
        )
        .bind(&r.book_id)
        .bind(r.reservation_id),
    }
}

/// Classify a driver error. Connection-level failures and serialization
/// conflicts may succeed on retry; everything else is permanent.
fn store_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
        sqlx::Error::Database(db)
            if matches!(
                db.code().as_deref(),
                Some("40001" | "40P01" | "57P01" | "08006")
            ) =>
        {
            StoreError::Unavailable(err.to_string())
        }
        sqlx::Error::Decode(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_) => StoreError::Corrupt(err.to_string()),
        _ => StoreError::Backend(err.to_string()),
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    async fn insert_lock_if_absent(&self, marker: &LockMarker) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO book_locks (book_id, reservation_id, claimed_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (book_id) DO NOTHING
            "#,
        )
        .bind(&marker.book_id)
        .bind(marker.reservation_id)
        .bind(marker.claimed_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_lock(&self, book_id: &str) -> StoreResult<Option<LockMarker>> {
        let row = sqlx::query_as::<_, StoredLock>(
            "SELECT book_id, reservation_id, claimed_at FROM book_locks WHERE book_id = $1",
        )
        .bind(book_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(row.map(StoredLock::into_marker))
    }

    async fn delete_lock_if_held(
        &self,
        book_id: &str,
        reservation_id: ReservationId,
    ) -> StoreResult<bool> {
        let result =
            sqlx::query("DELETE FROM book_locks WHERE book_id = $1 AND reservation_id = $2")
                .bind(book_id)
                .bind(reservation_id)
                .execute(&self.pool)
                .await
                .map_err(store_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_locks(&self) -> StoreResult<Vec<LockMarker>> {
        let rows = sqlx::query_as::<_, StoredLock>(
            "SELECT book_id, reservation_id, claimed_at FROM book_locks",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(rows.into_iter().map(StoredLock::into_marker).collect())
    }

    async fn get_book(&self, book_id: &str) -> StoreResult<Option<Book>> {
        let row = sqlx::query_as::<_, StoredBook>(
            r#"
            SELECT book_id, title, author, genre, published_year
            FROM books
            WHERE book_id = $1
            "#,
        )
        .bind(book_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(row.map(StoredBook::into_book))
    }

    async fn list_books(&self) -> StoreResult<Vec<Book>> {
        let rows = sqlx::query_as::<_, StoredBook>(
            r#"
            SELECT book_id, title, author, genre, published_year
            FROM books
            ORDER BY book_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(rows.into_iter().map(StoredBook::into_book).collect())
    }

    async fn put_reservation(
        &self,
        projection: Projection,
        reservation: &Reservation,
    ) -> StoreResult<()> {
        sqlx::query(upsert_sql(projection))
            .bind(reservation.reservation_id)
            .bind(&reservation.book_id)
            .bind(reservation.user_id)
            .bind(reservation.reserved_at)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn update_reservation_if_present(
        &self,
        projection: Projection,
        reservation: &Reservation,
        expected_user: Option<UserId>,
    ) -> StoreResult<RowUpdate> {
        let (applied, owner): (bool, Option<UserId>) = sqlx::query_as(update_sql(projection))
            .bind(reservation.reservation_id)
            .bind(&reservation.book_id)
            .bind(reservation.user_id)
            .bind(reservation.reserved_at)
            .bind(expected_user)
            .fetch_one(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(RowUpdate::classify(applied, owner, expected_user))
    }

    async fn delete_reservation(
        &self,
        projection: Projection,
        reservation: &Reservation,
    ) -> StoreResult<bool> {
        let result = delete_query(projection, reservation)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> StoreResult<Option<Reservation>> {
        let row = sqlx::query_as::<_, StoredReservation>(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE reservation_id = $1"
        ))
        .bind(reservation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(row.map(StoredReservation::into_reservation))
    }

    async fn reservations_for_book(&self, book_id: &str) -> StoreResult<Vec<Reservation>> {
        let rows = sqlx::query_as::<_, StoredReservation>(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations_by_book \
             WHERE book_id = $1 ORDER BY reserved_at"
        ))
        .bind(book_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(rows
            .into_iter()
            .map(StoredReservation::into_reservation)
            .collect())
    }

    async fn reservations_for_user(&self, user_id: UserId) -> StoreResult<Vec<Reservation>> {
        let rows = sqlx::query_as::<_, StoredReservation>(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations_by_user \
             WHERE user_id = $1 ORDER BY reserved_at"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(rows
            .into_iter()
            .map(StoredReservation::into_reservation)
            .collect())
    }

    async fn scan(&self, projection: Projection) -> StoreResult<Vec<Reservation>> {
        let rows = sqlx::query_as::<_, StoredReservation>(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM {}",
            table(projection)
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(rows
            .into_iter()
            .map(StoredReservation::into_reservation)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_failures_are_transient() {
        assert!(store_error(sqlx::Error::PoolTimedOut).is_transient());
        assert!(store_error(sqlx::Error::PoolClosed).is_transient());
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(store_error(sqlx::Error::Io(io)).is_transient());
    }

    #[test]
    fn decode_failures_are_corrupt() {
        let err = store_error(sqlx::Error::ColumnNotFound("user_id".into()));
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[test]
    fn other_failures_are_permanent() {
        let err = store_error(sqlx::Error::RowNotFound);
        assert!(matches!(err, StoreError::Backend(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn updates_are_owner_conditional() {
        for projection in Projection::COMMIT_ORDER {
            let sql = update_sql(projection);
            assert!(sql.contains("$5::BIGINT IS NULL OR user_id = $5"));
            assert!(sql.contains("reserved_at <= $4"));
            assert!(sql.contains(table(projection)));
        }
    }

    #[test]
    fn every_projection_has_its_own_table() {
        let tables: Vec<_> = Projection::COMMIT_ORDER.iter().map(|p| table(*p)).collect();
        assert_eq!(
            tables,
            ["reservations", "reservations_by_user", "reservations_by_book"]
        );
    }
}
