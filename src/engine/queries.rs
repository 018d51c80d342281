use crate::error::{BookingError, FieldErrors, Result};
use crate::limits::MAX_CALENDAR_DAYS;
use crate::model::*;
use crate::observability::AUTH_FAILURES_TOTAL;
use crate::repository::verify_password;

use super::availability::{RoomCalendar, occupancy_by_day};
use super::Engine;

/// Verified against unknown emails so both failure paths cost one bcrypt check.
const DUMMY_HASH: &str = "$2a$10$N9qo8uLOickgx2ZMRZoMyeIjZAgcfl7p92ldGxad68LJZdL17lhWy";

impl Engine {
    /// Every reservation, by start date.
    pub async fn list_all(&self) -> Result<Vec<Reservation>> {
        self.repo.list_reservations().await
    }

    pub async fn list_unprocessed(&self) -> Result<Vec<Reservation>> {
        self.repo.list_unprocessed().await
    }

    pub async fn get_by_id(&self, id: ReservationId) -> Result<Reservation> {
        self.repo.get_reservation(id).await
    }

    pub async fn list_intervals_for_room(
        &self,
        room_id: RoomId,
        span: DateSpan,
    ) -> Result<Vec<OccupancyInterval>> {
        self.repo.list_intervals_for_room(room_id, span).await
    }

    /// Night-by-night occupancy of one room.
    pub async fn room_calendar(&self, room_id: RoomId, span: DateSpan) -> Result<RoomCalendar> {
        if span.nights() > MAX_CALENDAR_DAYS {
            return Err(BookingError::Validation(FieldErrors::single(
                "end",
                format!("Calendar range is limited to {MAX_CALENDAR_DAYS} days"),
            )));
        }
        let room = self.repo.get_room_by_id(room_id).await?;
        let intervals = self.repo.list_intervals_for_room(room_id, span).await?;
        Ok(RoomCalendar {
            days: occupancy_by_day(&span, &intervals),
            room,
            span,
        })
    }

    pub async fn get_room_by_id(&self, id: RoomId) -> Result<Room> {
        self.repo.get_room_by_id(id).await
    }

    pub async fn list_rooms(&self) -> Result<Vec<Room>> {
        self.repo.list_rooms().await
    }

    pub async fn get_user_by_id(&self, id: UserId) -> Result<User> {
        self.repo.get_user_by_id(id).await
    }

    pub async fn update_user(&self, user: &User) -> Result<()> {
        self.repo.update_user(user).await
    }

    /// Check staff credentials. Unknown email and wrong password both come
    /// back as `InvalidCredentials`.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<(UserId, String)> {
        match self.repo.authenticate(email, password).await {
            Ok(found) => Ok(found),
            Err(BookingError::NotFound { .. }) => {
                let _ = verify_password(password, DUMMY_HASH).await;
                metrics::counter!(AUTH_FAILURES_TOTAL).increment(1);
                Err(BookingError::InvalidCredentials)
            }
            Err(BookingError::InvalidCredentials) => {
                metrics::counter!(AUTH_FAILURES_TOTAL).increment(1);
                Err(BookingError::InvalidCredentials)
            }
            Err(e) => Err(e),
        }
    }
}
