use std::time::Instant;

use chrono::{NaiveDate, Utc};
use tracing::{info, warn};

use crate::error::{BookingError, Result};
use crate::mail::MailData;
use crate::model::*;
use crate::observability::{BLOCKS_TOTAL, BOOKING_DURATION_SECONDS, BOOKINGS_TOTAL};

use super::Engine;

impl Engine {
    /// Store a reservation without checking availability or writing an interval.
    pub async fn create(&self, reservation: &NewReservation) -> Result<ReservationId> {
        let id = self.repo.create_reservation(reservation).await?;
        info!("created reservation {id} for room {}", reservation.room_id);
        Ok(id)
    }

    pub async fn attach_interval(&self, interval: &NewInterval) -> Result<IntervalId> {
        let id = self.repo.attach_interval(interval).await?;
        info!(
            "attached interval {id} ({:?}) to room {} {}",
            interval.kind, interval.room_id, interval.span
        );
        Ok(id)
    }

    /// Book a room: availability check and write under the room's lock, the
    /// reservation and its interval stored atomically, then a confirmation
    /// queued. Once the write commits the booking stands; neither the
    /// read-back nor the mail can fail it.
    pub async fn book(&self, reservation: &NewReservation) -> Result<Reservation> {
        let start = Instant::now();
        let result = self.book_exclusive(reservation).await;
        let outcome = match &result {
            Ok(_) => "booked",
            Err(BookingError::Conflict { .. }) => "conflict",
            Err(_) => "error",
        };
        metrics::counter!(BOOKINGS_TOTAL, "outcome" => outcome).increment(1);
        metrics::histogram!(BOOKING_DURATION_SECONDS).record(start.elapsed().as_secs_f64());

        let booked = result?;
        if let Some(queue) = &self.mail {
            queue.dispatch(MailData::reservation_confirmation(&booked, &self.mail_from));
        }
        Ok(booked)
    }

    async fn book_exclusive(&self, reservation: &NewReservation) -> Result<Reservation> {
        let (room_id, span) = (reservation.room_id, reservation.span);
        let _held = self.lock_room(room_id).await;

        if !self.repo.is_room_free(room_id, span).await? {
            warn!("room {room_id} already taken for {span}");
            return Err(BookingError::Conflict { room_id, span });
        }
        let (id, interval_id) = self.repo.create_with_interval(reservation).await?;
        info!("booked reservation {id} (interval {interval_id}) room {room_id} {span}");
        match self.repo.get_reservation(id).await {
            Ok(stored) => Ok(stored),
            Err(e) => {
                warn!("reservation {id} stored but not read back: {e}");
                Ok(Reservation::from_new(id, reservation, String::new(), Utc::now()))
            }
        }
    }

    pub async fn update(&self, reservation: &Reservation) -> Result<()> {
        self.repo.update_reservation(reservation).await?;
        info!("updated reservation {}", reservation.id);
        Ok(())
    }

    pub async fn set_processed(&self, id: ReservationId, processed: bool) -> Result<()> {
        self.repo.set_processed(id, processed).await?;
        info!("reservation {id} processed={processed}");
        Ok(())
    }

    /// Remove a reservation and every interval it owns.
    pub async fn delete(&self, id: ReservationId) -> Result<()> {
        self.repo.delete_reservation(id).await?;
        info!("deleted reservation {id}");
        Ok(())
    }

    /// Block one night of a room from the admin calendar.
    pub async fn block_room(&self, room_id: RoomId, date: NaiveDate) -> Result<IntervalId> {
        let _held = self.lock_room(room_id).await;
        let id = self.repo.block_room(room_id, date).await?;
        metrics::counter!(BLOCKS_TOTAL, "action" => "block").increment(1);
        info!("blocked room {room_id} on {} (interval {id})", date.format(DATE_FORMAT));
        Ok(id)
    }

    pub async fn unblock(&self, interval_id: IntervalId) -> Result<()> {
        self.repo.unblock(interval_id).await?;
        metrics::counter!(BLOCKS_TOTAL, "action" => "unblock").increment(1);
        info!("removed block {interval_id}");
        Ok(())
    }
}
