use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::model::{DateSpan, RoomId};

pub type Result<T> = std::result::Result<T, BookingError>;

/// Field name → messages, in field order. Returned to the caller for re-display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    /// First message recorded for a field.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0
            .get(field)
            .and_then(|msgs| msgs.first())
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            for msg in messages {
                if !first {
                    f.write_str("; ")?;
                }
                write!(f, "{field}: {msg}")?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Failures of the backing store. Never retried by the core.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage call timed out after {0:?}")]
    Timeout(Duration),

    #[error("database error: {0}")]
    Database(String),

    #[error("unreadable row: {0}")]
    Decode(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BookingError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("validation failed: {0}")]
    Validation(FieldErrors),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A reservation and its occupancy interval disagree.
    #[error("inconsistent state: {0}")]
    InconsistentState(String),

    #[error("room {room_id} is not available for {span}")]
    Conflict { room_id: RoomId, span: DateSpan },

    #[error("no rooms available for {0}")]
    NoAvailability(DateSpan),

    #[error("cannot {action} a booking draft that is {from}")]
    InvalidTransition { from: &'static str, action: &'static str },
}

impl BookingError {
    pub fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        BookingError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether the caller may fix this by changing its input.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            BookingError::Storage(_) | BookingError::InconsistentState(_)
        )
    }
}
