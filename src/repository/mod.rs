//! Storage capability the engine is written against.
//!
//! Two implementations share the exact method set and error contract:
//! [`PgRepository`] persists to PostgreSQL, [`MemoryRepository`] keeps
//! everything in process for tests and local runs.

mod memory;
mod postgres;

pub use memory::MemoryRepository;
pub use postgres::PgRepository;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::{Result, StorageError};
use crate::model::*;

#[async_trait]
pub trait Repository: Send + Sync {
    // ── Rooms ────────────────────────────────────────────────

    /// Fails with `NotFound` if the room does not exist.
    async fn get_room_by_id(&self, id: RoomId) -> Result<Room>;

    /// All rooms ordered by name.
    async fn list_rooms(&self) -> Result<Vec<Room>>;

    // ── Availability ─────────────────────────────────────────

    /// True iff no interval of `room_id` overlaps `span`.
    async fn is_room_free(&self, room_id: RoomId, span: DateSpan) -> Result<bool>;

    /// Rooms with no interval overlapping `span`, ordered by room id.
    async fn free_rooms(&self, span: DateSpan) -> Result<Vec<Room>>;

    // ── Reservations ─────────────────────────────────────────

    /// Raw insert. Does not check availability and writes no interval.
    async fn create_reservation(&self, reservation: &NewReservation) -> Result<ReservationId>;

    /// Store an interval. Overlapping an existing interval of the same room
    /// fails with `Conflict`; naming a reservation of another room fails with
    /// `InconsistentState`.
    async fn attach_interval(&self, interval: &NewInterval) -> Result<IntervalId>;

    /// Reservation row and its `Reservation` interval in one atomic write.
    async fn create_with_interval(
        &self,
        reservation: &NewReservation,
    ) -> Result<(ReservationId, IntervalId)>;

    /// Every reservation, by start date.
    async fn list_reservations(&self) -> Result<Vec<Reservation>>;

    /// Reservations not yet processed by staff, by start date.
    async fn list_unprocessed(&self) -> Result<Vec<Reservation>>;

    async fn get_reservation(&self, id: ReservationId) -> Result<Reservation>;

    /// Overwrites names, email, phone and the processed flag.
    async fn update_reservation(&self, reservation: &Reservation) -> Result<()>;

    async fn set_processed(&self, id: ReservationId, processed: bool) -> Result<()>;

    /// Removes the reservation together with its intervals.
    async fn delete_reservation(&self, id: ReservationId) -> Result<()>;

    // ── Intervals ────────────────────────────────────────────

    /// Manual block covering `[date, date + 1)`.
    async fn block_room(&self, room_id: RoomId, date: NaiveDate) -> Result<IntervalId>;

    /// Removes a manual block. Reservation intervals are not touched.
    async fn unblock(&self, interval_id: IntervalId) -> Result<()>;

    /// Intervals of `room_id` overlapping `span`, by start date.
    async fn list_intervals_for_room(
        &self,
        room_id: RoomId,
        span: DateSpan,
    ) -> Result<Vec<OccupancyInterval>>;

    // ── Users ────────────────────────────────────────────────

    async fn get_user_by_id(&self, id: UserId) -> Result<User>;

    /// Overwrites names, email and access level. The password hash is kept.
    async fn update_user(&self, user: &User) -> Result<()>;

    /// Fails with `NotFound` for an unknown email and `InvalidCredentials`
    /// when the password does not match the stored hash.
    async fn authenticate(&self, email: &str, password: &str) -> Result<(UserId, String)>;
}

/// bcrypt comparison off the async workers; the hash compare is constant-time.
pub(crate) async fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let password = password.to_owned();
    let hash = hash.to_owned();
    let verdict = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| StorageError::Unavailable(format!("password check aborted: {e}")))?;
    verdict.map_err(|e| StorageError::Decode(format!("stored password hash: {e}")).into())
}

/// Single-night span for a manual block.
pub(crate) fn block_span(date: NaiveDate) -> Result<DateSpan> {
    DateSpan::single_day(date).ok_or_else(|| {
        crate::error::BookingError::Validation(crate::error::FieldErrors::single(
            "date",
            format!("Cannot block {date}"),
        ))
    })
}
