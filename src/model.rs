use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BookingError, FieldErrors, Result};
use crate::limits::MAX_STAY_NIGHTS;

pub type RoomId = i32;
pub type ReservationId = i32;
pub type IntervalId = i32;
pub type UserId = i32;

/// Wire format of every calendar date the core accepts.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Half-open date range `[start, end)`. The end date is the checkout day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawSpan")]
pub struct DateSpan {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Unchecked wire shape of a [`DateSpan`].
#[derive(Deserialize)]
struct RawSpan {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<RawSpan> for DateSpan {
    type Error = BookingError;

    fn try_from(raw: RawSpan) -> Result<Self> {
        Self::try_new(raw.start, raw.end)
    }
}

impl DateSpan {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start < end, "DateSpan start must be before end");
        Self { start, end }
    }

    /// Checked constructor for caller-supplied ranges.
    pub fn try_new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start >= end {
            return Err(BookingError::Validation(FieldErrors::single(
                "end",
                "End date must be after start date",
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse a `YYYY-MM-DD` pair as submitted by the search form.
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        let mut errors = FieldErrors::new();
        let start = parse_date(start).map_err(|msg| errors.add("start", msg)).ok();
        let end = parse_date(end).map_err(|msg| errors.add("end", msg)).ok();
        let (Some(start), Some(end)) = (start, end) else {
            return Err(BookingError::Validation(errors));
        };
        let span = Self::try_new(start, end)?;
        if span.nights() > MAX_STAY_NIGHTS {
            return Err(BookingError::Validation(FieldErrors::single(
                "end",
                format!("Stays are limited to {MAX_STAY_NIGHTS} nights"),
            )));
        }
        Ok(span)
    }

    /// The one-night span `[date, date + 1)`. `None` at the end of the calendar.
    pub fn single_day(date: NaiveDate) -> Option<Self> {
        date.succ_opt().map(|end| Self { start: date, end })
    }

    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// Half-open intersection test. Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &DateSpan) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }

    /// Every night in the span, checkout day excluded.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d < end)
    }
}

impl fmt::Display for DateSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format(DATE_FORMAT),
            self.end.format(DATE_FORMAT)
        )
    }
}

/// Parse one `YYYY-MM-DD` date, returning a user-facing message on failure.
pub fn parse_date(raw: &str) -> std::result::Result<NaiveDate, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("This field cannot be blank".into());
    }
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|_| format!("Invalid date: {raw}"))
}

/// Why a room is unavailable for an interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntervalKind {
    /// Created together with a confirmed reservation.
    Reservation,
    /// Placed by staff from the admin calendar.
    ManualBlock,
}

impl IntervalKind {
    /// Row id in the `restrictions` reference table.
    pub const fn code(self) -> i32 {
        match self {
            IntervalKind::Reservation => 1,
            IntervalKind::ManualBlock => 2,
        }
    }

    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(IntervalKind::Reservation),
            2 => Some(IntervalKind::ManualBlock),
            _ => None,
        }
    }
}

/// A room-occupancy interval (a "restriction").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupancyInterval {
    pub id: IntervalId,
    pub room_id: RoomId,
    pub span: DateSpan,
    /// `None` for manual blocks.
    pub reservation_id: Option<ReservationId>,
    pub kind: IntervalKind,
}

/// An interval that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInterval {
    pub room_id: RoomId,
    pub span: DateSpan,
    pub reservation_id: Option<ReservationId>,
    pub kind: IntervalKind,
}

impl NewInterval {
    pub fn for_reservation(reservation_id: ReservationId, room_id: RoomId, span: DateSpan) -> Self {
        Self {
            room_id,
            span,
            reservation_id: Some(reservation_id),
            kind: IntervalKind::Reservation,
        }
    }

    pub fn manual_block(room_id: RoomId, span: DateSpan) -> Self {
        Self {
            room_id,
            span,
            reservation_id: None,
            kind: IntervalKind::ManualBlock,
        }
    }

    pub fn into_interval(self, id: IntervalId) -> OccupancyInterval {
        OccupancyInterval {
            id,
            room_id: self.room_id,
            span: self.span,
            reservation_id: self.reservation_id,
            kind: self.kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Guest-supplied fields of a reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReservation {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub room_id: RoomId,
    pub span: DateSpan,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub room_id: RoomId,
    pub span: DateSpan,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Joined from `rooms` on read.
    pub room_name: String,
}

impl Reservation {
    pub fn from_new(id: ReservationId, new: &NewReservation, room_name: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            first_name: new.first_name.clone(),
            last_name: new.last_name.clone(),
            email: new.email.clone(),
            phone: new.phone.clone(),
            room_id: new.room_id,
            span: new.span,
            processed: false,
            created_at: now,
            updated_at: now,
            room_name,
        }
    }

    /// The caller-supplied part, for comparing against what was submitted.
    pub fn details(&self) -> NewReservation {
        NewReservation {
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
            room_id: self.room_id,
            span: self.span,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    /// bcrypt hash, never the plaintext.
    #[serde(skip_serializing, default)]
    pub password: String,
    pub access_level: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// All intervals of one room, kept sorted by `span.start`.
#[derive(Debug, Clone, Default)]
pub struct RoomOccupancy {
    pub intervals: Vec<OccupancyInterval>,
}

impl RoomOccupancy {
    /// Insert interval maintaining sort order by span.start.
    pub fn insert_interval(&mut self, interval: OccupancyInterval) {
        let pos = self
            .intervals
            .binary_search_by_key(&interval.span.start, |i| i.span.start)
            .unwrap_or_else(|e| e);
        self.intervals.insert(pos, interval);
    }

    pub fn remove_interval(&mut self, id: IntervalId) -> Option<OccupancyInterval> {
        let pos = self.intervals.iter().position(|i| i.id == id)?;
        Some(self.intervals.remove(pos))
    }

    /// Drop every interval owned by a reservation. Returns how many were removed.
    pub fn remove_reservation(&mut self, reservation_id: ReservationId) -> usize {
        let before = self.intervals.len();
        self.intervals
            .retain(|i| i.reservation_id != Some(reservation_id));
        before - self.intervals.len()
    }

    /// Intervals overlapping the query window.
    /// Binary search skips intervals starting at or after `query.end`.
    pub fn overlapping(&self, query: &DateSpan) -> impl Iterator<Item = &OccupancyInterval> {
        let right_bound = self
            .intervals
            .partition_point(|i| i.span.start < query.end);
        self.intervals[..right_bound]
            .iter()
            .filter(move |i| i.span.overlaps(query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn span(a: &str, b: &str) -> DateSpan {
        DateSpan::new(d(a), d(b))
    }

    fn interval(id: IntervalId, a: &str, b: &str) -> OccupancyInterval {
        NewInterval::manual_block(1, span(a, b)).into_interval(id)
    }

    #[test]
    fn span_basics() {
        let s = span("2024-06-01", "2024-06-05");
        assert_eq!(s.nights(), 4);
        assert!(s.contains(d("2024-06-01")));
        assert!(s.contains(d("2024-06-04")));
        assert!(!s.contains(d("2024-06-05"))); // checkout day
        assert_eq!(s.days().count(), 4);
        assert_eq!(s.to_string(), "[2024-06-01, 2024-06-05)");
    }

    #[test]
    fn span_overlap() {
        let a = span("2024-06-01", "2024-06-05");
        let b = span("2024-06-03", "2024-06-04");
        let c = span("2024-06-05", "2024-06-06");
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn overlap_laws_hold_over_small_window() {
        let base = d("2024-01-01");
        let day = |n: u64| base.checked_add_days(chrono::Days::new(n)).unwrap();
        let mut spans = Vec::new();
        for s in 0..6 {
            for e in (s + 1)..7 {
                spans.push(DateSpan::new(day(s), day(e)));
            }
        }
        for a in &spans {
            assert!(a.overlaps(a), "{a} must overlap itself");
            for b in &spans {
                assert_eq!(a.overlaps(b), b.overlaps(a), "{a} vs {b}");
                if a.end <= b.start || b.end <= a.start {
                    assert!(!a.overlaps(b), "{a} and {b} are disjoint");
                }
            }
        }
    }

    #[test]
    fn try_new_rejects_empty_and_inverted() {
        let err = DateSpan::try_new(d("2024-06-05"), d("2024-06-05")).unwrap_err();
        assert!(matches!(err, BookingError::Validation(ref f) if f.get("end").is_some()));
        assert!(DateSpan::try_new(d("2024-06-06"), d("2024-06-05")).is_err());
        assert!(DateSpan::try_new(d("2024-06-05"), d("2024-06-06")).is_ok());
    }

    #[test]
    fn deserialize_checks_order() {
        let ok: DateSpan = serde_json::from_str(r#"{"start":"2024-06-01","end":"2024-06-09"}"#).unwrap();
        assert_eq!(ok, span("2024-06-01", "2024-06-09"));

        let inverted = serde_json::from_str::<DateSpan>(r#"{"start":"2024-06-09","end":"2024-06-01"}"#);
        assert!(inverted.unwrap_err().to_string().contains("End date must be after start date"));
        assert!(serde_json::from_str::<DateSpan>(r#"{"start":"2024-06-01","end":"2024-06-01"}"#).is_err());
    }

    #[test]
    fn parse_reports_each_bad_field() {
        let err = DateSpan::parse("2024-13-01", "").unwrap_err();
        let BookingError::Validation(fields) = err else {
            panic!("expected validation error");
        };
        assert!(fields.get("start").unwrap().contains("Invalid date"));
        assert_eq!(fields.get("end"), Some("This field cannot be blank"));

        let ok = DateSpan::parse(" 2024-06-01 ", "2024-06-03").unwrap();
        assert_eq!(ok, span("2024-06-01", "2024-06-03"));
    }

    #[test]
    fn parse_caps_length_of_stay() {
        assert!(DateSpan::parse("2024-01-01", "2026-01-01").is_err());
    }

    #[test]
    fn single_day_is_one_night() {
        let s = DateSpan::single_day(d("2024-02-28")).unwrap();
        assert_eq!(s.end, d("2024-02-29"));
        assert_eq!(s.nights(), 1);
        assert!(DateSpan::single_day(NaiveDate::MAX).is_none());
    }

    #[test]
    fn interval_kind_codes() {
        for kind in [IntervalKind::Reservation, IntervalKind::ManualBlock] {
            assert_eq!(IntervalKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(IntervalKind::from_code(0), None);
    }

    #[test]
    fn interval_ordering() {
        let mut occ = RoomOccupancy::default();
        occ.insert_interval(interval(1, "2024-06-10", "2024-06-12"));
        occ.insert_interval(interval(2, "2024-06-01", "2024-06-02"));
        occ.insert_interval(interval(3, "2024-06-05", "2024-06-07"));
        let starts: Vec<_> = occ.intervals.iter().map(|i| i.id).collect();
        assert_eq!(starts, vec![2, 3, 1]);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut occ = RoomOccupancy::default();
        occ.insert_interval(interval(1, "2024-06-01", "2024-06-03"));
        occ.insert_interval(interval(2, "2024-06-04", "2024-06-08"));
        occ.insert_interval(interval(3, "2024-06-20", "2024-06-21"));

        let hits: Vec<_> = occ.overlapping(&span("2024-06-05", "2024-06-10")).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 2);
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut occ = RoomOccupancy::default();
        occ.insert_interval(interval(1, "2024-06-01", "2024-06-05"));
        assert_eq!(occ.overlapping(&span("2024-06-05", "2024-06-06")).count(), 0);
        assert_eq!(occ.overlapping(&span("2024-05-30", "2024-06-01")).count(), 0);
        assert_eq!(occ.overlapping(&span("2024-06-04", "2024-06-05")).count(), 1);
    }

    #[test]
    fn remove_reservation_keeps_blocks() {
        let mut occ = RoomOccupancy::default();
        occ.insert_interval(NewInterval::for_reservation(7, 1, span("2024-06-01", "2024-06-03")).into_interval(1));
        occ.insert_interval(interval(2, "2024-06-05", "2024-06-06"));
        assert_eq!(occ.remove_reservation(7), 1);
        assert_eq!(occ.intervals.len(), 1);
        assert_eq!(occ.intervals[0].kind, IntervalKind::ManualBlock);
        assert!(occ.remove_interval(99).is_none());
        assert!(occ.remove_interval(2).is_some());
    }

    #[test]
    fn reservation_details_roundtrip() {
        let new = NewReservation {
            first_name: "Jane".into(),
            last_name: "Doe".into(),
            email: "jane@example.com".into(),
            phone: "555-0100".into(),
            room_id: 1,
            span: span("2024-07-01", "2024-07-03"),
        };
        let res = Reservation::from_new(9, &new, "General's Quarters".into(), Utc::now());
        assert_eq!(res.details(), new);
        assert!(!res.processed);
    }
}
