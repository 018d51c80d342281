use crate::error::{BookingError, Result};
use crate::model::*;

/// Reject `span` if any stored interval of the room overlaps it.
pub(crate) fn check_no_conflict(occupancy: &RoomOccupancy, room_id: RoomId, span: &DateSpan) -> Result<()> {
    match occupancy.overlapping(span).next() {
        Some(existing) => {
            tracing::debug!(
                "room {room_id}: {span} collides with interval {} {}",
                existing.id,
                existing.span
            );
            Err(BookingError::Conflict { room_id, span: *span })
        }
        None => Ok(()),
    }
}

/// An interval naming a reservation must be for that reservation's room.
pub(crate) fn check_owner_room(
    reservation_id: ReservationId,
    reservation_room: RoomId,
    interval: &NewInterval,
) -> Result<()> {
    if reservation_room != interval.room_id {
        return Err(BookingError::InconsistentState(format!(
            "reservation {reservation_id} is for room {reservation_room}, interval is for room {}",
            interval.room_id
        )));
    }
    Ok(())
}

/// Stored spans must cover at least one night. The fields are public, so a
/// span built without [`DateSpan::try_new`] is checked again before any write.
pub(crate) fn check_span(span: &DateSpan) -> Result<()> {
    DateSpan::try_new(span.start, span.end).map(|_| ())
}

/// The span must be non-empty, and interval kind and owner must agree:
/// reservation intervals name their reservation, manual blocks name none.
pub(crate) fn check_shape(interval: &NewInterval) -> Result<()> {
    check_span(&interval.span)?;
    match (interval.kind, interval.reservation_id) {
        (IntervalKind::Reservation, None) => Err(BookingError::InconsistentState(
            "reservation interval without a reservation".into(),
        )),
        (IntervalKind::ManualBlock, Some(id)) => Err(BookingError::InconsistentState(format!(
            "manual block cannot belong to reservation {id}"
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn span(a: &str, b: &str) -> DateSpan {
        DateSpan::new(
            NaiveDate::parse_from_str(a, DATE_FORMAT).unwrap(),
            NaiveDate::parse_from_str(b, DATE_FORMAT).unwrap(),
        )
    }

    #[test]
    fn conflict_only_on_real_overlap() {
        let mut occ = RoomOccupancy::default();
        occ.insert_interval(NewInterval::manual_block(101, span("2024-06-01", "2024-06-05")).into_interval(1));

        assert!(check_no_conflict(&occ, 101, &span("2024-06-05", "2024-06-06")).is_ok());
        assert!(check_no_conflict(&occ, 101, &span("2024-05-28", "2024-06-01")).is_ok());
        let err = check_no_conflict(&occ, 101, &span("2024-06-04", "2024-06-06")).unwrap_err();
        assert!(matches!(err, BookingError::Conflict { room_id: 101, .. }));
    }

    #[test]
    fn shape_rules() {
        let s = span("2024-06-01", "2024-06-02");
        assert!(check_shape(&NewInterval::manual_block(1, s)).is_ok());
        assert!(check_shape(&NewInterval::for_reservation(3, 1, s)).is_ok());

        let mut orphan = NewInterval::for_reservation(3, 1, s);
        orphan.reservation_id = None;
        assert!(matches!(check_shape(&orphan), Err(BookingError::InconsistentState(_))));

        let mut owned_block = NewInterval::manual_block(1, s);
        owned_block.reservation_id = Some(3);
        assert!(check_shape(&owned_block).is_err());
    }

    #[test]
    fn shape_rejects_empty_and_inverted_spans() {
        let day = NaiveDate::from_ymd_opt(2024, 6, 9).unwrap();
        let empty = DateSpan { start: day, end: day };
        let inverted = DateSpan { start: day, end: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap() };

        for bad in [empty, inverted] {
            let err = check_shape(&NewInterval::manual_block(1, bad)).unwrap_err();
            assert!(matches!(err, BookingError::Validation(ref f) if f.get("end").is_some()));
            assert!(check_span(&bad).is_err());
        }
    }

    #[test]
    fn owner_room_must_match() {
        let s = span("2024-06-01", "2024-06-02");
        assert!(check_owner_room(3, 1, &NewInterval::for_reservation(3, 1, s)).is_ok());
        let err = check_owner_room(3, 2, &NewInterval::for_reservation(3, 1, s)).unwrap_err();
        assert!(matches!(err, BookingError::InconsistentState(_)));
    }
}
