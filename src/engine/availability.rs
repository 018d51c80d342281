use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::Result;
use crate::model::*;
use crate::observability::AVAILABILITY_CHECKS_TOTAL;

use super::Engine;

/// What occupies a room on one night.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DayStatus {
    Free,
    Reserved(ReservationId),
    /// Manual block, carrying the interval id needed to remove it.
    Blocked(IntervalId),
}

/// One room's nights over a date range, for the admin calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomCalendar {
    pub room: Room,
    pub span: DateSpan,
    pub days: BTreeMap<NaiveDate, DayStatus>,
}

/// Status of every night in `span`. Intervals must belong to one room and
/// not overlap each other; parts outside `span` are ignored.
pub fn occupancy_by_day(span: &DateSpan, intervals: &[OccupancyInterval]) -> BTreeMap<NaiveDate, DayStatus> {
    let mut days: BTreeMap<NaiveDate, DayStatus> = span.days().map(|d| (d, DayStatus::Free)).collect();
    for interval in intervals.iter().filter(|i| i.span.overlaps(span)) {
        let status = match (interval.kind, interval.reservation_id) {
            (IntervalKind::Reservation, Some(owner)) => DayStatus::Reserved(owner),
            _ => DayStatus::Blocked(interval.id),
        };
        let clipped = DateSpan {
            start: interval.span.start.max(span.start),
            end: interval.span.end.min(span.end),
        };
        for day in clipped.days() {
            days.insert(day, status);
        }
    }
    days
}

impl Engine {
    /// True iff no interval of the room overlaps `span`.
    pub async fn is_room_free(&self, room_id: RoomId, span: DateSpan) -> Result<bool> {
        metrics::counter!(AVAILABILITY_CHECKS_TOTAL, "kind" => "room").increment(1);
        let free = self.repo.is_room_free(room_id, span).await?;
        tracing::debug!("room {room_id} {span}: free={free}");
        Ok(free)
    }

    /// Rooms with nothing booked or blocked in `span`, by room id.
    pub async fn free_rooms(&self, span: DateSpan) -> Result<Vec<Room>> {
        metrics::counter!(AVAILABILITY_CHECKS_TOTAL, "kind" => "search").increment(1);
        let rooms = self.repo.free_rooms(span).await?;
        tracing::debug!("{span}: {} rooms free", rooms.len());
        Ok(rooms)
    }
}
