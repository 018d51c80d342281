//! The guest booking workflow, kept in the session between requests.
//!
//! ```text
//! Empty ──search──▶ RangeSelected ──choose_room──▶ RoomChosen ──fill_details──▶ DetailsFilled ──submit──▶ Submitted
//!   └──────────────────────────for_room───────────────────▲
//! ```
//!
//! A failed step leaves the draft as it was. Nothing is persisted before
//! `submit`.

use serde::{Deserialize, Serialize};

use crate::engine::Engine;
use crate::error::{BookingError, FieldErrors, Result};
use crate::forms::Form;
use crate::limits::{MAX_FIELD_LEN, MIN_FIRST_NAME_LEN};
use crate::model::*;
use crate::session::{self, FlashKind, SessionStore};

/// Session key the draft is stored under.
pub const DRAFT_KEY: &str = "reservation";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftStage {
    Empty,
    RangeSelected,
    RoomChosen,
    DetailsFilled,
    Submitted,
}

impl DraftStage {
    pub const fn as_str(self) -> &'static str {
        match self {
            DraftStage::Empty => "empty",
            DraftStage::RangeSelected => "range_selected",
            DraftStage::RoomChosen => "room_chosen",
            DraftStage::DetailsFilled => "details_filled",
            DraftStage::Submitted => "submitted",
        }
    }
}

/// Contact fields as typed into the reservation form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactForm {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
}

impl ContactForm {
    pub fn validate(&self) -> std::result::Result<(), FieldErrors> {
        let mut form = Form::new([
            ("first_name", self.first_name.as_str()),
            ("last_name", self.last_name.as_str()),
            ("email", self.email.as_str()),
            ("phone", self.phone.as_str()),
        ]);
        form.required(&["first_name", "last_name", "email"])
            .min_length("first_name", MIN_FIRST_NAME_LEN)
            .max_length(&["first_name", "last_name", "email", "phone"], MAX_FIELD_LEN);
        if form.has("email") {
            form.is_email("email");
        }
        form.into_result()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum BookingDraft {
    #[default]
    Empty,
    RangeSelected {
        span: DateSpan,
        candidates: Vec<Room>,
    },
    RoomChosen {
        span: DateSpan,
        room_id: RoomId,
        room_name: String,
    },
    DetailsFilled {
        reservation: NewReservation,
        room_name: String,
    },
    Submitted {
        reservation: Reservation,
    },
}

impl BookingDraft {
    pub fn stage(&self) -> DraftStage {
        match self {
            BookingDraft::Empty => DraftStage::Empty,
            BookingDraft::RangeSelected { .. } => DraftStage::RangeSelected,
            BookingDraft::RoomChosen { .. } => DraftStage::RoomChosen,
            BookingDraft::DetailsFilled { .. } => DraftStage::DetailsFilled,
            BookingDraft::Submitted { .. } => DraftStage::Submitted,
        }
    }

    pub fn span(&self) -> Option<DateSpan> {
        match self {
            BookingDraft::Empty => None,
            BookingDraft::RangeSelected { span, .. } | BookingDraft::RoomChosen { span, .. } => Some(*span),
            BookingDraft::DetailsFilled { reservation, .. } => Some(reservation.span),
            BookingDraft::Submitted { reservation } => Some(reservation.span),
        }
    }

    fn invalid(&self, action: &'static str) -> BookingError {
        BookingError::InvalidTransition {
            from: self.stage().as_str(),
            action,
        }
    }

    /// Start over with a new date range and the rooms free for it.
    pub fn search(&mut self, span: DateSpan, free_rooms: Vec<Room>) -> Result<()> {
        if free_rooms.is_empty() {
            return Err(BookingError::NoAvailability(span));
        }
        *self = BookingDraft::RangeSelected {
            span,
            candidates: free_rooms,
        };
        Ok(())
    }

    pub fn choose_room(&mut self, room_id: RoomId) -> Result<()> {
        let BookingDraft::RangeSelected { span, candidates } = &*self else {
            return Err(self.invalid("choose a room for"));
        };
        let room = candidates
            .iter()
            .find(|r| r.id == room_id)
            .ok_or(BookingError::Conflict {
                room_id,
                span: *span,
            })?;
        let chosen = BookingDraft::RoomChosen {
            span: *span,
            room_id,
            room_name: room.name.clone(),
        };
        *self = chosen;
        Ok(())
    }

    /// Jump straight to a room, as from a "book this room" link.
    pub fn for_room(&mut self, room: &Room, span: DateSpan) -> Result<()> {
        if !matches!(self, BookingDraft::Empty | BookingDraft::RangeSelected { .. }) {
            return Err(self.invalid("pick a room directly for"));
        }
        *self = BookingDraft::RoomChosen {
            span,
            room_id: room.id,
            room_name: room.name.clone(),
        };
        Ok(())
    }

    pub fn fill_details(&mut self, contact: ContactForm) -> Result<()> {
        let (span, room_id, room_name) = match &*self {
            BookingDraft::RoomChosen {
                span,
                room_id,
                room_name,
            } => (*span, *room_id, room_name.clone()),
            BookingDraft::DetailsFilled {
                reservation,
                room_name,
            } => (reservation.span, reservation.room_id, room_name.clone()),
            _ => return Err(self.invalid("fill in details for")),
        };
        contact.validate().map_err(BookingError::Validation)?;
        *self = BookingDraft::DetailsFilled {
            reservation: NewReservation {
                first_name: contact.first_name.trim().to_string(),
                last_name: contact.last_name.trim().to_string(),
                email: contact.email.trim().to_string(),
                phone: contact.phone.trim().to_string(),
                room_id,
                span,
            },
            room_name,
        };
        Ok(())
    }

    /// Book the drafted stay. On failure the draft keeps its details so the
    /// guest can pick other dates or rooms.
    pub async fn submit(&mut self, engine: &Engine) -> Result<Reservation> {
        let BookingDraft::DetailsFilled { reservation, .. } = &*self else {
            return Err(self.invalid("submit"));
        };
        let booked = engine.book(reservation).await?;
        *self = BookingDraft::Submitted {
            reservation: booked.clone(),
        };
        Ok(booked)
    }

    pub fn abandon(&mut self) {
        *self = BookingDraft::Empty;
    }
}

// ── Session helpers ──────────────────────────────────────────

/// The session's draft, or an empty one.
pub async fn load_draft(store: &dyn SessionStore, session_id: &str) -> Result<BookingDraft> {
    Ok(session::get_typed(store, session_id, DRAFT_KEY)
        .await?
        .unwrap_or_default())
}

pub async fn save_draft(store: &dyn SessionStore, session_id: &str, draft: &BookingDraft) -> Result<()> {
    session::put_typed(store, session_id, DRAFT_KEY, draft).await
}

pub async fn clear_draft(store: &dyn SessionStore, session_id: &str) -> Result<()> {
    store.remove(session_id, DRAFT_KEY).await.map(|_| ())
}

/// Submit the session's draft. A booked draft is removed from the session;
/// a rejected one stays, with the reason left as an error flash.
pub async fn submit_draft(store: &dyn SessionStore, session_id: &str, engine: &Engine) -> Result<Reservation> {
    let mut draft = load_draft(store, session_id).await?;
    match draft.submit(engine).await {
        Ok(reservation) => {
            clear_draft(store, session_id).await?;
            session::put_flash(store, session_id, FlashKind::Flash, "Reservation submitted").await?;
            Ok(reservation)
        }
        Err(e) => {
            let message = match &e {
                BookingError::Conflict { .. } => "That room is no longer available for those dates".to_string(),
                e if e.is_client_error() => e.to_string(),
                _ => "Can't save the reservation right now".to_string(),
            };
            session::put_flash(store, session_id, FlashKind::Error, message).await?;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::NaiveDate;
    use tokio_test::assert_ok;

    use crate::repository::MemoryRepository;
    use crate::session::{MemorySessionStore, pop_flash};

    fn span(a: &str, b: &str) -> DateSpan {
        DateSpan::new(
            NaiveDate::parse_from_str(a, DATE_FORMAT).unwrap(),
            NaiveDate::parse_from_str(b, DATE_FORMAT).unwrap(),
        )
    }

    fn engine() -> Engine {
        let repo = Arc::new(MemoryRepository::new());
        repo.insert_room(1, "General's Quarters");
        repo.insert_room(2, "Major's Suite");
        Engine::new(repo)
    }

    fn contact() -> ContactForm {
        ContactForm {
            first_name: "Jane".into(),
            last_name: "Doe".into(),
            email: "jane@example.com".into(),
            phone: "555-0100".into(),
        }
    }

    #[tokio::test]
    async fn tampered_session_span_is_rejected() {
        let store = MemorySessionStore::new();
        let draft = BookingDraft::RoomChosen {
            span: span("2024-06-01", "2024-06-09"),
            room_id: 1,
            room_name: "General's Quarters".into(),
        };
        let mut value = serde_json::to_value(&draft).unwrap();
        value["span"]["end"] = serde_json::json!("2024-05-20");
        store.put("s1", DRAFT_KEY, value).await.unwrap();

        let err = load_draft(&store, "s1").await.unwrap_err();
        assert!(matches!(err, BookingError::Storage(crate::error::StorageError::Decode(_))));
    }

    #[tokio::test]
    async fn full_walk_through() {
        let engine = engine();
        let stay = span("2024-06-01", "2024-06-03");
        let mut draft = BookingDraft::default();

        draft.search(stay, engine.free_rooms(stay).await.unwrap()).unwrap();
        assert_eq!(draft.stage(), DraftStage::RangeSelected);
        draft.choose_room(2).unwrap();
        assert_eq!(draft.stage(), DraftStage::RoomChosen);
        draft.fill_details(contact()).unwrap();
        assert_eq!(draft.stage(), DraftStage::DetailsFilled);

        let booked = draft.submit(&engine).await.unwrap();
        assert_eq!(draft.stage(), DraftStage::Submitted);
        assert_eq!(booked.room_id, 2);
        assert_eq!(booked.room_name, "Major's Suite");
        assert!(!engine.is_room_free(2, stay).await.unwrap());
    }

    #[test]
    fn empty_search_result_keeps_draft() {
        let stay = span("2024-06-01", "2024-06-03");
        let mut draft = BookingDraft::default();
        assert_eq!(draft.search(stay, vec![]), Err(BookingError::NoAvailability(stay)));
        assert_eq!(draft, BookingDraft::Empty);
    }

    #[test]
    fn room_must_be_a_candidate() {
        let stay = span("2024-06-01", "2024-06-03");
        let mut draft = BookingDraft::default();
        assert!(matches!(
            draft.choose_room(1),
            Err(BookingError::InvalidTransition { from: "empty", .. })
        ));

        let room = Room {
            id: 1,
            name: "General's Quarters".into(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        draft.search(stay, vec![room]).unwrap();
        assert!(matches!(draft.choose_room(9), Err(BookingError::Conflict { room_id: 9, .. })));
        assert_eq!(draft.stage(), DraftStage::RangeSelected);
    }

    #[tokio::test]
    async fn invalid_details_leave_room_chosen() {
        let engine = engine();
        let room = engine.get_room_by_id(1).await.unwrap();
        let mut draft = BookingDraft::default();
        draft.for_room(&room, span("2024-06-01", "2024-06-02")).unwrap();

        let bad = ContactForm {
            first_name: "Jo".into(),
            last_name: "".into(),
            email: "not-an-email".into(),
            phone: "".into(),
        };
        let Err(BookingError::Validation(errors)) = draft.fill_details(bad) else {
            panic!("expected field errors");
        };
        assert_eq!(errors.get("first_name"), Some("This field must be at least 3 characters long"));
        assert_eq!(errors.get("last_name"), Some("This field cannot be blank"));
        assert_eq!(errors.get("email"), Some("Invalid email address"));
        assert!(errors.get("phone").is_none());
        assert_eq!(draft.stage(), DraftStage::RoomChosen);
    }

    #[tokio::test]
    async fn submit_before_details_is_rejected() {
        let engine = engine();
        let mut draft = BookingDraft::default();
        let err = draft.submit(&engine).await.unwrap_err();
        assert_eq!(
            err,
            BookingError::InvalidTransition {
                from: "empty",
                action: "submit"
            }
        );
        assert!(engine.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn abandon_persists_nothing() {
        let engine = engine();
        let room = engine.get_room_by_id(1).await.unwrap();
        let mut draft = BookingDraft::default();
        draft.for_room(&room, span("2024-06-01", "2024-06-02")).unwrap();
        draft.fill_details(contact()).unwrap();
        draft.abandon();
        assert_eq!(draft, BookingDraft::Empty);
        assert!(engine.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn draft_survives_the_session_round_trip() {
        let engine = engine();
        let store = MemorySessionStore::new();
        let room = engine.get_room_by_id(2).await.unwrap();

        let mut draft = load_draft(&store, "abc").await.unwrap();
        assert_eq!(draft, BookingDraft::Empty);
        draft.for_room(&room, span("2024-06-01", "2024-06-04")).unwrap();
        draft.fill_details(contact()).unwrap();
        save_draft(&store, "abc", &draft).await.unwrap();
        assert_eq!(load_draft(&store, "abc").await.unwrap(), draft);

        let booked = submit_draft(&store, "abc", &engine).await.unwrap();
        assert_eq!(booked.span, span("2024-06-01", "2024-06-04"));
        assert!(!store.exists("abc", DRAFT_KEY).await.unwrap());
        assert_eq!(
            pop_flash(&store, "abc", FlashKind::Flash).await.unwrap().as_deref(),
            Some("Reservation submitted")
        );
    }

    #[tokio::test]
    async fn lost_race_keeps_draft_and_flashes() {
        let engine = engine();
        let store = MemorySessionStore::new();
        let room = engine.get_room_by_id(1).await.unwrap();
        let stay = span("2024-06-01", "2024-06-04");

        let mut draft = BookingDraft::default();
        draft.for_room(&room, stay).unwrap();
        draft.fill_details(contact()).unwrap();
        save_draft(&store, "abc", &draft).await.unwrap();

        // Someone else takes the room first.
        assert_ok!(engine.block_room(1, NaiveDate::from_ymd_opt(2024, 6, 2).unwrap()).await);

        let err = submit_draft(&store, "abc", &engine).await.unwrap_err();
        assert!(matches!(err, BookingError::Conflict { room_id: 1, .. }));
        assert_eq!(load_draft(&store, "abc").await.unwrap().stage(), DraftStage::DetailsFilled);
        assert!(pop_flash(&store, "abc", FlashKind::Error).await.unwrap().is_some());
    }
}
