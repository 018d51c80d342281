use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use crate::engine::conflict::{check_no_conflict, check_owner_room, check_shape, check_span};
use crate::error::{BookingError, Result, StorageError};
use crate::model::*;

use super::{Repository, block_span, verify_password};

/// In-process repository with the same contract as the PostgreSQL one.
///
/// All tables live behind one mutex so multi-row writes are atomic. Rooms and
/// users are seeded with [`insert_room`](Self::insert_room) and
/// [`insert_user`](Self::insert_user); [`fail_next`](Self::fail_next) makes the
/// next call fail so callers' storage-error paths can be exercised.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    state: Mutex<MemoryState>,
    fault: Mutex<Option<StorageError>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    rooms: BTreeMap<RoomId, Room>,
    occupancy: HashMap<RoomId, RoomOccupancy>,
    reservations: BTreeMap<ReservationId, Reservation>,
    users: BTreeMap<UserId, User>,
    last_reservation_id: ReservationId,
    last_interval_id: IntervalId,
    last_user_id: UserId,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Seeding ──────────────────────────────────────────────

    pub fn insert_room(&self, id: RoomId, name: &str) -> Room {
        let now = Utc::now();
        let room = Room {
            id,
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        };
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.rooms.insert(id, room.clone());
        state.occupancy.entry(id).or_default();
        room
    }

    /// Store a user whose `password_hash` is already a bcrypt hash.
    pub fn insert_user(
        &self,
        first_name: &str,
        last_name: &str,
        email: &str,
        password_hash: &str,
        access_level: i32,
    ) -> UserId {
        let now = Utc::now();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.last_user_id += 1;
        let id = state.last_user_id;
        state.users.insert(
            id,
            User {
                id,
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
                email: email.to_string(),
                password: password_hash.to_string(),
                access_level,
                created_at: now,
                updated_at: now,
            },
        );
        id
    }

    /// Make the next repository call fail with `err`.
    pub fn fail_next(&self, err: StorageError) {
        *self.fault.lock().unwrap_or_else(PoisonError::into_inner) = Some(err);
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        let injected = self.fault.lock().map_err(|_| poisoned())?.take();
        if let Some(err) = injected {
            return Err(err.into());
        }
        self.state.lock().map_err(|_| poisoned().into())
    }
}

fn poisoned() -> StorageError {
    StorageError::Unavailable("memory store lock poisoned".into())
}

impl MemoryState {
    fn room(&self, id: RoomId) -> Result<&Room> {
        self.rooms
            .get(&id)
            .ok_or_else(|| BookingError::not_found("room", id))
    }

    fn reservation(&self, id: ReservationId) -> Result<&Reservation> {
        self.reservations
            .get(&id)
            .ok_or_else(|| BookingError::not_found("reservation", id))
    }

    fn reservation_mut(&mut self, id: ReservationId) -> Result<&mut Reservation> {
        self.reservations
            .get_mut(&id)
            .ok_or_else(|| BookingError::not_found("reservation", id))
    }

    fn insert_reservation(&mut self, new: &NewReservation) -> Result<ReservationId> {
        check_span(&new.span)?;
        let room_name = self.room(new.room_id)?.name.clone();
        self.last_reservation_id += 1;
        let id = self.last_reservation_id;
        self.reservations
            .insert(id, Reservation::from_new(id, new, room_name, Utc::now()));
        Ok(id)
    }

    /// Validates everything before writing, so a failure leaves no trace.
    fn insert_interval(&mut self, interval: &NewInterval) -> Result<IntervalId> {
        check_shape(interval)?;
        self.room(interval.room_id)?;
        if let Some(owner) = interval.reservation_id {
            let room_id = self.reservation(owner)?.room_id;
            check_owner_room(owner, room_id, interval)?;
        }
        let occupancy = self.occupancy.entry(interval.room_id).or_default();
        check_no_conflict(occupancy, interval.room_id, &interval.span)?;

        self.last_interval_id += 1;
        let id = self.last_interval_id;
        occupancy.insert_interval(interval.clone().into_interval(id));
        Ok(id)
    }

    fn is_free(&self, room_id: RoomId, span: &DateSpan) -> bool {
        self.occupancy
            .get(&room_id)
            .is_none_or(|occ| occ.overlapping(span).next().is_none())
    }

    fn sorted_reservations(&self, keep: impl Fn(&Reservation) -> bool) -> Vec<Reservation> {
        let mut out: Vec<Reservation> = self
            .reservations
            .values()
            .filter(|r| keep(r))
            .cloned()
            .collect();
        out.sort_by_key(|r| (r.span.start, r.id));
        out
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn get_room_by_id(&self, id: RoomId) -> Result<Room> {
        self.lock()?.room(id).cloned()
    }

    async fn list_rooms(&self) -> Result<Vec<Room>> {
        let state = self.lock()?;
        let mut rooms: Vec<Room> = state.rooms.values().cloned().collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(rooms)
    }

    async fn is_room_free(&self, room_id: RoomId, span: DateSpan) -> Result<bool> {
        Ok(self.lock()?.is_free(room_id, &span))
    }

    async fn free_rooms(&self, span: DateSpan) -> Result<Vec<Room>> {
        let state = self.lock()?;
        Ok(state
            .rooms
            .values()
            .filter(|room| state.is_free(room.id, &span))
            .cloned()
            .collect())
    }

    async fn create_reservation(&self, reservation: &NewReservation) -> Result<ReservationId> {
        self.lock()?.insert_reservation(reservation)
    }

    async fn attach_interval(&self, interval: &NewInterval) -> Result<IntervalId> {
        self.lock()?.insert_interval(interval)
    }

    async fn create_with_interval(
        &self,
        reservation: &NewReservation,
    ) -> Result<(ReservationId, IntervalId)> {
        check_span(&reservation.span)?;
        let mut state = self.lock()?;
        state.room(reservation.room_id)?;
        if let Some(occ) = state.occupancy.get(&reservation.room_id) {
            check_no_conflict(occ, reservation.room_id, &reservation.span)?;
        }
        let reservation_id = state.insert_reservation(reservation)?;
        let interval = NewInterval::for_reservation(reservation_id, reservation.room_id, reservation.span);
        match state.insert_interval(&interval) {
            Ok(interval_id) => Ok((reservation_id, interval_id)),
            Err(e) => {
                state.reservations.remove(&reservation_id);
                Err(e)
            }
        }
    }

    async fn list_reservations(&self) -> Result<Vec<Reservation>> {
        Ok(self.lock()?.sorted_reservations(|_| true))
    }

    async fn list_unprocessed(&self) -> Result<Vec<Reservation>> {
        Ok(self.lock()?.sorted_reservations(|r| !r.processed))
    }

    async fn get_reservation(&self, id: ReservationId) -> Result<Reservation> {
        self.lock()?.reservation(id).cloned()
    }

    async fn update_reservation(&self, reservation: &Reservation) -> Result<()> {
        let mut state = self.lock()?;
        let stored = state.reservation_mut(reservation.id)?;
        stored.first_name = reservation.first_name.clone();
        stored.last_name = reservation.last_name.clone();
        stored.email = reservation.email.clone();
        stored.phone = reservation.phone.clone();
        stored.processed = reservation.processed;
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn set_processed(&self, id: ReservationId, processed: bool) -> Result<()> {
        let mut state = self.lock()?;
        let stored = state.reservation_mut(id)?;
        stored.processed = processed;
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_reservation(&self, id: ReservationId) -> Result<()> {
        let mut state = self.lock()?;
        let removed = state
            .reservations
            .remove(&id)
            .ok_or_else(|| BookingError::not_found("reservation", id))?;
        if let Some(occ) = state.occupancy.get_mut(&removed.room_id) {
            occ.remove_reservation(id);
        }
        Ok(())
    }

    async fn block_room(&self, room_id: RoomId, date: NaiveDate) -> Result<IntervalId> {
        let span = block_span(date)?;
        self.lock()?
            .insert_interval(&NewInterval::manual_block(room_id, span))
    }

    async fn unblock(&self, interval_id: IntervalId) -> Result<()> {
        let mut state = self.lock()?;
        let room_id = state
            .occupancy
            .iter()
            .find(|(_, occ)| {
                occ.intervals
                    .iter()
                    .any(|i| i.id == interval_id && i.kind == IntervalKind::ManualBlock)
            })
            .map(|(room_id, _)| *room_id)
            .ok_or_else(|| BookingError::not_found("manual block", interval_id))?;
        if let Some(occ) = state.occupancy.get_mut(&room_id) {
            occ.remove_interval(interval_id);
        }
        Ok(())
    }

    async fn list_intervals_for_room(
        &self,
        room_id: RoomId,
        span: DateSpan,
    ) -> Result<Vec<OccupancyInterval>> {
        let state = self.lock()?;
        Ok(state
            .occupancy
            .get(&room_id)
            .map(|occ| occ.overlapping(&span).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_user_by_id(&self, id: UserId) -> Result<User> {
        self.lock()?
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| BookingError::not_found("user", id))
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        let mut state = self.lock()?;
        let stored = state
            .users
            .get_mut(&user.id)
            .ok_or_else(|| BookingError::not_found("user", user.id))?;
        stored.first_name = user.first_name.clone();
        stored.last_name = user.last_name.clone();
        stored.email = user.email.clone();
        stored.access_level = user.access_level;
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn authenticate(&self, email: &str, password: &str) -> Result<(UserId, String)> {
        let (id, hash) = {
            let state = self.lock()?;
            let user = state
                .users
                .values()
                .find(|u| u.email == email)
                .ok_or_else(|| BookingError::not_found("user", email))?;
            (user.id, user.password.clone())
        };
        if verify_password(password, &hash).await? {
            Ok((id, hash))
        } else {
            Err(BookingError::InvalidCredentials)
        }
    }
}
