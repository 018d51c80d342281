mod availability;
pub(crate) mod conflict;
mod mutations;
mod queries;

pub use availability::{DayStatus, RoomCalendar, occupancy_by_day};

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::mail::MailQueue;
use crate::model::RoomId;
use crate::repository::Repository;

pub type RoomLock = Arc<Mutex<()>>;

/// Reservation ledger and availability engine over a [`Repository`].
///
/// Shared between request tasks behind an `Arc`. Bookings for one room are
/// serialised by a per-room lock held across the availability check and the
/// write; different rooms never wait on each other.
pub struct Engine {
    repo: Arc<dyn Repository>,
    mail: Option<MailQueue>,
    mail_from: String,
    room_locks: DashMap<RoomId, RoomLock>,
}

impl Engine {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self {
            repo,
            mail: None,
            mail_from: String::new(),
            room_locks: DashMap::new(),
        }
    }

    /// Send a confirmation through `queue` for every successful booking.
    pub fn with_mail(mut self, queue: MailQueue, from: impl Into<String>) -> Self {
        self.mail = Some(queue);
        self.mail_from = from.into();
        self
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repo
    }

    /// Wait for exclusive use of `room_id` until the returned guard drops.
    pub(super) async fn lock_room(&self, room_id: RoomId) -> HeldRoom<'_> {
        let lock = self.room_locks.entry(room_id).or_default().clone();
        HeldRoom {
            locks: &self.room_locks,
            room_id,
            guard: Some(lock.lock_owned().await),
        }
    }
}

/// Exclusive hold on one room. The map entry is removed on release when no
/// other task holds or waits for it.
pub(super) struct HeldRoom<'a> {
    locks: &'a DashMap<RoomId, RoomLock>,
    room_id: RoomId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for HeldRoom<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.room_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
