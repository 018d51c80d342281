use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Row};

use crate::config::Config;
use crate::engine::conflict::{check_owner_room, check_shape, check_span};
use crate::error::{BookingError, FieldErrors, Result, StorageError};
use crate::model::*;
use crate::observability::{REPO_CALLS_TOTAL, REPO_CALL_DURATION_SECONDS};

use super::{Repository, block_span, verify_password};

/// SQLSTATE raised by the `room_restrictions_no_overlap` exclusion constraint.
const EXCLUSION_VIOLATION: &str = "23P01";

/// SQLSTATE raised by the `start_date < end_date` table checks.
const CHECK_VIOLATION: &str = "23514";

const RESERVATION_SELECT: &str = "SELECT r.id, r.first_name, r.last_name, r.email, r.phone, \
     r.start_date, r.end_date, r.room_id, r.processed, r.created_at, r.updated_at, \
     coalesce(rm.room_name, '') AS room_name \
     FROM reservations r LEFT JOIN rooms rm ON (rm.id = r.room_id)";

const INTERVAL_SELECT: &str =
    "SELECT id, room_id, start_date, end_date, reservation_id, restriction_id FROM room_restrictions";

/// PostgreSQL-backed repository. Every call is bounded by `query_timeout`
/// and never retried.
#[derive(Debug, Clone)]
pub struct PgRepository {
    pool: PgPool,
    query_timeout: Duration,
}

impl PgRepository {
    pub fn new(pool: PgPool, query_timeout: Duration) -> Self {
        Self { pool, query_timeout }
    }

    pub async fn connect(config: &Config) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.query_timeout)
            .connect(&config.database_url)
            .await
            .map_err(StorageError::from)?;
        Ok(Self::new(pool, config.query_timeout))
    }

    /// Apply the bundled schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Database(format!("migration failed: {e}")))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run one repository call under the query timeout, recording its latency.
    async fn timed<T>(&self, op: &'static str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let start = Instant::now();
        let result = match tokio::time::timeout(self.query_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout(self.query_timeout).into()),
        };
        metrics::histogram!(REPO_CALL_DURATION_SECONDS, "op" => op)
            .record(start.elapsed().as_secs_f64());
        let status = match &result {
            Ok(_) => "ok",
            Err(BookingError::Storage(e)) => {
                tracing::error!("{op}: {e}");
                "storage_error"
            }
            Err(_) => "rejected",
        };
        metrics::counter!(REPO_CALLS_TOTAL, "op" => op, "status" => status).increment(1);
        result
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            e @ (sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::Decode(_)
            | sqlx::Error::TypeNotFound { .. }) => StorageError::Decode(e.to_string()),
            e @ (sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)) => StorageError::Unavailable(e.to_string()),
            e => StorageError::Database(e.to_string()),
        }
    }
}

impl From<sqlx::Error> for BookingError {
    fn from(e: sqlx::Error) -> Self {
        BookingError::Storage(e.into())
    }
}

/// Same field error `DateSpan::try_new` reports, so both stores agree.
fn empty_span_error(span: DateSpan) -> BookingError {
    tracing::warn!("{span} rejected by date range check");
    BookingError::Validation(FieldErrors::single("end", "End date must be after start date"))
}

/// Map a failed interval write: the exclusion constraint means the room is
/// taken, a foreign-key failure means the room does not exist.
fn interval_write_error(e: sqlx::Error, room_id: RoomId, span: DateSpan) -> BookingError {
    if let sqlx::Error::Database(db) = &e {
        match db.code().as_deref() {
            Some(EXCLUSION_VIOLATION) => {
                tracing::warn!("room {room_id}: {span} rejected by exclusion constraint");
                return BookingError::Conflict { room_id, span };
            }
            Some(CHECK_VIOLATION) => return empty_span_error(span),
            _ => {}
        }
        if db.is_foreign_key_violation() {
            return BookingError::not_found("room", room_id);
        }
    }
    e.into()
}

fn room_write_error(e: sqlx::Error, room_id: RoomId, span: DateSpan) -> BookingError {
    match &e {
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            BookingError::not_found("room", room_id)
        }
        sqlx::Error::Database(db) if db.code().as_deref() == Some(CHECK_VIOLATION) => {
            empty_span_error(span)
        }
        _ => e.into(),
    }
}

// ── Row decoding ─────────────────────────────────────────────

fn span_from_row(row: &PgRow) -> Result<DateSpan> {
    let start: NaiveDate = row.try_get("start_date")?;
    let end: NaiveDate = row.try_get("end_date")?;
    if start >= end {
        return Err(StorageError::Decode(format!("empty date range {start}..{end}")).into());
    }
    Ok(DateSpan::new(start, end))
}

fn room_from_row(row: &PgRow) -> Result<Room> {
    Ok(Room {
        id: row.try_get("id")?,
        name: row.try_get("room_name")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn reservation_from_row(row: &PgRow) -> Result<Reservation> {
    let processed: i32 = row.try_get("processed")?;
    Ok(Reservation {
        id: row.try_get("id")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        room_id: row.try_get("room_id")?,
        span: span_from_row(row)?,
        processed: processed != 0,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        room_name: row.try_get("room_name")?,
    })
}

fn interval_from_row(row: &PgRow) -> Result<OccupancyInterval> {
    let code: i32 = row.try_get("restriction_id")?;
    let kind = IntervalKind::from_code(code)
        .ok_or_else(|| StorageError::Decode(format!("unknown restriction id {code}")))?;
    Ok(OccupancyInterval {
        id: row.try_get("id")?,
        room_id: row.try_get("room_id")?,
        span: span_from_row(row)?,
        reservation_id: row.try_get("reservation_id")?,
        kind,
    })
}

fn user_from_row(row: &PgRow) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        email: row.try_get("email")?,
        password: row.try_get("password")?,
        access_level: row.try_get("access_level")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

// ── Statements shared by several calls ───────────────────────

async fn insert_reservation(conn: &mut PgConnection, new: &NewReservation) -> Result<ReservationId> {
    let now = Utc::now();
    let row = sqlx::query(
        "INSERT INTO reservations \
         (first_name, last_name, email, phone, start_date, end_date, room_id, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8) RETURNING id",
    )
    .bind(&new.first_name)
    .bind(&new.last_name)
    .bind(&new.email)
    .bind(&new.phone)
    .bind(new.span.start)
    .bind(new.span.end)
    .bind(new.room_id)
    .bind(now)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| room_write_error(e, new.room_id, new.span))?;
    Ok(row.try_get("id")?)
}

async fn insert_interval(conn: &mut PgConnection, interval: &NewInterval) -> Result<IntervalId> {
    let now = Utc::now();
    let row = sqlx::query(
        "INSERT INTO room_restrictions \
         (start_date, end_date, room_id, reservation_id, restriction_id, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $6) RETURNING id",
    )
    .bind(interval.span.start)
    .bind(interval.span.end)
    .bind(interval.room_id)
    .bind(interval.reservation_id)
    .bind(interval.kind.code())
    .bind(now)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| interval_write_error(e, interval.room_id, interval.span))?;
    Ok(row.try_get("id")?)
}

#[async_trait]
impl Repository for PgRepository {
    async fn get_room_by_id(&self, id: RoomId) -> Result<Room> {
        self.timed("get_room_by_id", async {
            let row = sqlx::query("SELECT id, room_name, created_at, updated_at FROM rooms WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| BookingError::not_found("room", id))?;
            room_from_row(&row)
        })
        .await
    }

    async fn list_rooms(&self) -> Result<Vec<Room>> {
        self.timed("list_rooms", async {
            let rows = sqlx::query(
                "SELECT id, room_name, created_at, updated_at FROM rooms ORDER BY room_name, id",
            )
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(room_from_row).collect()
        })
        .await
    }

    // Overlap in SQL is `DateSpan::overlaps`: $start < end_date AND start_date < $end.

    async fn is_room_free(&self, room_id: RoomId, span: DateSpan) -> Result<bool> {
        self.timed("is_room_free", async {
            let row = sqlx::query(
                "SELECT count(id) AS n FROM room_restrictions \
                 WHERE room_id = $1 AND $2 < end_date AND start_date < $3",
            )
            .bind(room_id)
            .bind(span.start)
            .bind(span.end)
            .fetch_one(&self.pool)
            .await?;
            let n: i64 = row.try_get("n")?;
            Ok(n == 0)
        })
        .await
    }

    async fn free_rooms(&self, span: DateSpan) -> Result<Vec<Room>> {
        self.timed("free_rooms", async {
            let rows = sqlx::query(
                "SELECT r.id, r.room_name, r.created_at, r.updated_at FROM rooms r \
                 WHERE r.id NOT IN (\
                     SELECT rr.room_id FROM room_restrictions rr \
                     WHERE $1 < rr.end_date AND rr.start_date < $2) \
                 ORDER BY r.id",
            )
            .bind(span.start)
            .bind(span.end)
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(room_from_row).collect()
        })
        .await
    }

    async fn create_reservation(&self, reservation: &NewReservation) -> Result<ReservationId> {
        check_span(&reservation.span)?;
        self.timed("create_reservation", async {
            let mut conn = self.pool.acquire().await?;
            insert_reservation(&mut conn, reservation).await
        })
        .await
    }

    async fn attach_interval(&self, interval: &NewInterval) -> Result<IntervalId> {
        check_shape(interval)?;
        self.timed("attach_interval", async {
            let mut tx = self.pool.begin().await?;
            if let Some(owner) = interval.reservation_id {
                let row = sqlx::query("SELECT room_id FROM reservations WHERE id = $1 FOR UPDATE")
                    .bind(owner)
                    .fetch_optional(&mut *tx)
                    .await?
                    .ok_or_else(|| BookingError::not_found("reservation", owner))?;
                let room_id: RoomId = row.try_get("room_id")?;
                check_owner_room(owner, room_id, interval)?;
            }
            let id = insert_interval(&mut tx, interval).await?;
            tx.commit().await?;
            Ok(id)
        })
        .await
    }

    async fn create_with_interval(
        &self,
        reservation: &NewReservation,
    ) -> Result<(ReservationId, IntervalId)> {
        check_span(&reservation.span)?;
        self.timed("create_with_interval", async {
            let mut tx = self.pool.begin().await?;
            let reservation_id = insert_reservation(&mut tx, reservation).await?;
            let interval =
                NewInterval::for_reservation(reservation_id, reservation.room_id, reservation.span);
            let interval_id = insert_interval(&mut tx, &interval).await?;
            tx.commit().await?;
            Ok((reservation_id, interval_id))
        })
        .await
    }

    async fn list_reservations(&self) -> Result<Vec<Reservation>> {
        self.timed("list_reservations", async {
            let sql = format!("{RESERVATION_SELECT} ORDER BY r.start_date, r.id");
            let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
            rows.iter().map(reservation_from_row).collect()
        })
        .await
    }

    async fn list_unprocessed(&self) -> Result<Vec<Reservation>> {
        self.timed("list_unprocessed", async {
            let sql = format!("{RESERVATION_SELECT} WHERE r.processed = 0 ORDER BY r.start_date, r.id");
            let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
            rows.iter().map(reservation_from_row).collect()
        })
        .await
    }

    async fn get_reservation(&self, id: ReservationId) -> Result<Reservation> {
        self.timed("get_reservation", async {
            let sql = format!("{RESERVATION_SELECT} WHERE r.id = $1");
            let row = sqlx::query(&sql)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| BookingError::not_found("reservation", id))?;
            reservation_from_row(&row)
        })
        .await
    }

    async fn update_reservation(&self, reservation: &Reservation) -> Result<()> {
        self.timed("update_reservation", async {
            let done = sqlx::query(
                "UPDATE reservations SET first_name = $1, last_name = $2, email = $3, phone = $4, \
                 processed = $5, updated_at = $6 WHERE id = $7",
            )
            .bind(&reservation.first_name)
            .bind(&reservation.last_name)
            .bind(&reservation.email)
            .bind(&reservation.phone)
            .bind(i32::from(reservation.processed))
            .bind(Utc::now())
            .bind(reservation.id)
            .execute(&self.pool)
            .await?;
            if done.rows_affected() == 0 {
                return Err(BookingError::not_found("reservation", reservation.id));
            }
            Ok(())
        })
        .await
    }

    async fn set_processed(&self, id: ReservationId, processed: bool) -> Result<()> {
        self.timed("set_processed", async {
            let done =
                sqlx::query("UPDATE reservations SET processed = $1, updated_at = $2 WHERE id = $3")
                    .bind(i32::from(processed))
                    .bind(Utc::now())
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
            if done.rows_affected() == 0 {
                return Err(BookingError::not_found("reservation", id));
            }
            Ok(())
        })
        .await
    }

    async fn delete_reservation(&self, id: ReservationId) -> Result<()> {
        self.timed("delete_reservation", async {
            let mut tx = self.pool.begin().await?;
            sqlx::query("DELETE FROM room_restrictions WHERE reservation_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            let done = sqlx::query("DELETE FROM reservations WHERE id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            if done.rows_affected() == 0 {
                return Err(BookingError::not_found("reservation", id));
            }
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    async fn block_room(&self, room_id: RoomId, date: NaiveDate) -> Result<IntervalId> {
        let span = block_span(date)?;
        self.timed("block_room", async {
            let mut conn = self.pool.acquire().await?;
            insert_interval(&mut conn, &NewInterval::manual_block(room_id, span)).await
        })
        .await
    }

    async fn unblock(&self, interval_id: IntervalId) -> Result<()> {
        self.timed("unblock", async {
            let done = sqlx::query("DELETE FROM room_restrictions WHERE id = $1 AND restriction_id = $2")
                .bind(interval_id)
                .bind(IntervalKind::ManualBlock.code())
                .execute(&self.pool)
                .await?;
            if done.rows_affected() == 0 {
                return Err(BookingError::not_found("manual block", interval_id));
            }
            Ok(())
        })
        .await
    }

    async fn list_intervals_for_room(
        &self,
        room_id: RoomId,
        span: DateSpan,
    ) -> Result<Vec<OccupancyInterval>> {
        self.timed("list_intervals_for_room", async {
            let sql = format!(
                "{INTERVAL_SELECT} WHERE room_id = $1 AND $2 < end_date AND start_date < $3 \
                 ORDER BY start_date, id"
            );
            let rows = sqlx::query(&sql)
                .bind(room_id)
                .bind(span.start)
                .bind(span.end)
                .fetch_all(&self.pool)
                .await?;
            rows.iter().map(interval_from_row).collect()
        })
        .await
    }

    async fn get_user_by_id(&self, id: UserId) -> Result<User> {
        self.timed("get_user_by_id", async {
            let row = sqlx::query(
                "SELECT id, first_name, last_name, email, password, access_level, created_at, updated_at \
                 FROM users WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| BookingError::not_found("user", id))?;
            user_from_row(&row)
        })
        .await
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        self.timed("update_user", async {
            let done = sqlx::query(
                "UPDATE users SET first_name = $1, last_name = $2, email = $3, access_level = $4, \
                 updated_at = $5 WHERE id = $6",
            )
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(&user.email)
            .bind(user.access_level)
            .bind(Utc::now())
            .bind(user.id)
            .execute(&self.pool)
            .await?;
            if done.rows_affected() == 0 {
                return Err(BookingError::not_found("user", user.id));
            }
            Ok(())
        })
        .await
    }

    async fn authenticate(&self, email: &str, password: &str) -> Result<(UserId, String)> {
        let (id, hash) = self
            .timed("authenticate", async {
                let row = sqlx::query("SELECT id, password FROM users WHERE email = $1")
                    .bind(email)
                    .fetch_optional(&self.pool)
                    .await?
                    .ok_or_else(|| BookingError::not_found("user", email))?;
                let id: UserId = row.try_get("id")?;
                let hash: String = row.try_get("password")?;
                Ok((id, hash))
            })
            .await?;
        if verify_password(password, &hash).await? {
            Ok((id, hash))
        } else {
            Err(BookingError::InvalidCredentials)
        }
    }
}
