use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Result, StorageError};

/// Per-session key/value storage provided by the web layer.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session: &str, key: &str) -> Result<Option<Value>>;

    async fn put(&self, session: &str, key: &str, value: Value) -> Result<()>;

    /// Returns the removed value, if there was one.
    async fn remove(&self, session: &str, key: &str) -> Result<Option<Value>>;

    async fn exists(&self, session: &str, key: &str) -> Result<bool> {
        Ok(self.get(session, key).await?.is_some())
    }
}

/// Sessions held in process memory. Lost on restart.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, HashMap<String, Value>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every key of a session.
    pub fn destroy(&self, session: &str) {
        self.sessions.remove(session);
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, session: &str, key: &str) -> Result<Option<Value>> {
        Ok(self
            .sessions
            .get(session)
            .and_then(|values| values.get(key).cloned()))
    }

    async fn put(&self, session: &str, key: &str, value: Value) -> Result<()> {
        self.sessions
            .entry(session.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, session: &str, key: &str) -> Result<Option<Value>> {
        Ok(self
            .sessions
            .get_mut(session)
            .and_then(|mut values| values.remove(key)))
    }
}

pub async fn get_typed<T: DeserializeOwned>(
    store: &dyn SessionStore,
    session: &str,
    key: &str,
) -> Result<Option<T>> {
    match store.get(session, key).await? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| StorageError::Decode(format!("session key {key}: {e}")).into()),
        None => Ok(None),
    }
}

pub async fn put_typed<T: Serialize + Sync>(
    store: &dyn SessionStore,
    session: &str,
    key: &str,
    value: &T,
) -> Result<()> {
    let value = serde_json::to_value(value)
        .map_err(|e| StorageError::Decode(format!("session key {key}: {e}")))?;
    store.put(session, key, value).await
}

/// One-shot messages shown on the next page view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashKind {
    Flash,
    Error,
    Warning,
}

impl FlashKind {
    pub const fn key(self) -> &'static str {
        match self {
            FlashKind::Flash => "flash",
            FlashKind::Error => "error",
            FlashKind::Warning => "warning",
        }
    }
}

pub async fn put_flash(
    store: &dyn SessionStore,
    session: &str,
    kind: FlashKind,
    message: impl Into<String>,
) -> Result<()> {
    store
        .put(session, kind.key(), Value::String(message.into()))
        .await
}

/// Take the pending message of `kind`, leaving none behind.
pub async fn pop_flash(store: &dyn SessionStore, session: &str, kind: FlashKind) -> Result<Option<String>> {
    Ok(match store.remove(session, kind.key()).await? {
        Some(Value::String(msg)) => Some(msg),
        Some(other) => Some(other.to_string()),
        None => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BookingError;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Pick {
        room: i32,
    }

    #[tokio::test]
    async fn sessions_do_not_share_keys() {
        let store = MemorySessionStore::new();
        put_typed(&store, "s1", "pick", &Pick { room: 1 }).await.unwrap();

        assert_eq!(get_typed::<Pick>(&store, "s1", "pick").await.unwrap(), Some(Pick { room: 1 }));
        assert_eq!(get_typed::<Pick>(&store, "s2", "pick").await.unwrap(), None);
        assert!(store.exists("s1", "pick").await.unwrap());

        store.destroy("s1");
        assert!(!store.exists("s1", "pick").await.unwrap());
    }

    #[tokio::test]
    async fn wrong_shape_is_a_decode_error() {
        let store = MemorySessionStore::new();
        store.put("s", "pick", Value::from("not a pick")).await.unwrap();
        let err = get_typed::<Pick>(&store, "s", "pick").await.unwrap_err();
        assert!(matches!(err, BookingError::Storage(StorageError::Decode(_))));
    }

    #[tokio::test]
    async fn flash_is_read_once() {
        let store = MemorySessionStore::new();
        put_flash(&store, "s", FlashKind::Error, "Room is no longer available").await.unwrap();
        put_flash(&store, "s", FlashKind::Flash, "Logged in").await.unwrap();

        assert_eq!(
            pop_flash(&store, "s", FlashKind::Error).await.unwrap().as_deref(),
            Some("Room is no longer available")
        );
        assert_eq!(pop_flash(&store, "s", FlashKind::Error).await.unwrap(), None);
        assert_eq!(pop_flash(&store, "s", FlashKind::Warning).await.unwrap(), None);
        assert_eq!(pop_flash(&store, "s", FlashKind::Flash).await.unwrap().as_deref(), Some("Logged in"));
    }
}
