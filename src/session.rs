//! Session record shared between a store and the request handling it

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::codec::{Codec, JsonCodec};
use crate::error::SessionError;
use crate::sid::{self, Alphabet};

/// Reserved key holding the one-shot flash value
pub const FLASH_KEY: &str = "salvo::session::flash";

/// Key/value payload of a session
pub type SessionData = HashMap<String, Value>;

/// Flash value carried over from the previous request.
///
/// Read once by the middleware and removed from the session before the
/// handler runs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Flash(pub Option<Value>);

impl Flash {
    /// Deserialize the flash value, if any
    pub fn get<T: DeserializeOwned>(&self) -> Option<T> {
        self.0.clone().and_then(|v| serde_json::from_value(v).ok())
    }

    /// Check whether a flash was present
    pub fn is_some(&self) -> bool {
        self.0.is_some()
    }
}

struct State {
    id: String,
    previous_id: Option<String>,
    data: SessionData,
}

struct Inner {
    state: RwLock<State>,
    changed: AtomicBool,
    codec: Arc<dyn Codec>,
}

/// A session for the current request.
///
/// Clones share the same underlying record, so a store may keep one handle
/// while the request mutates another.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Create an empty session with the given ID
    pub fn new<S: Into<String>>(id: S, codec: Arc<dyn Codec>) -> Self {
        Self::with_data(id, SessionData::new(), codec)
    }

    /// Create a session with the given ID and initial data
    pub fn with_data<S: Into<String>>(id: S, data: SessionData, codec: Arc<dyn Codec>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(State {
                    id: id.into(),
                    previous_id: None,
                    data,
                }),
                changed: AtomicBool::new(false),
                codec,
            }),
        }
    }

    /// Create an empty session encoded with [`JsonCodec`]
    pub fn detached<S: Into<String>>(id: S) -> Self {
        Self::new(id, Arc::new(JsonCodec))
    }

    /// Get the session ID
    pub fn id(&self) -> String {
        self.inner.state.read().id.clone()
    }

    /// ID this session had before [`Session::regenerate_id`], until the
    /// store has retired it
    pub fn previous_id(&self) -> Option<String> {
        self.inner.state.read().previous_id.clone()
    }

    pub(crate) fn clear_previous_id(&self) {
        self.inner.state.write().previous_id = None;
    }

    /// Get a value from the session
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_value(key)
            .and_then(|v| serde_json::from_value(v).ok())
    }

    /// Get the raw JSON value of a key
    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.inner.state.read().data.get(key).cloned()
    }

    /// Check if a key exists in the session
    pub fn contains(&self, key: &str) -> bool {
        self.inner.state.read().data.contains_key(key)
    }

    /// Set a value in the session
    pub fn set<T: Serialize>(&self, key: &str, value: T) {
        match serde_json::to_value(value) {
            Ok(v) => {
                self.inner.state.write().data.insert(key.to_string(), v);
                self.mark_changed();
            }
            Err(e) => tracing::warn!(key, error = %e, "session value is not serializable"),
        }
    }

    /// Remove a value from the session
    pub fn delete(&self, key: &str) -> Option<Value> {
        let removed = self.inner.state.write().data.remove(key);
        self.mark_changed();
        removed
    }

    /// Wipe out all data in the session
    pub fn flush(&self) {
        self.inner.state.write().data.clear();
        self.mark_changed();
    }

    /// Set the flash value shown on the next request
    pub fn set_flash<T: Serialize>(&self, value: T) {
        self.set(FLASH_KEY, value);
    }

    /// Remove and return the flash value. Only marks the session changed
    /// when a flash was actually present.
    pub fn take_flash(&self) -> Flash {
        let taken = self.inner.state.write().data.remove(FLASH_KEY);
        if taken.is_some() {
            self.mark_changed();
        }
        Flash(taken)
    }

    /// Encode the session data with the session's codec
    pub fn encode(&self) -> Result<Vec<u8>, SessionError> {
        let state = self.inner.state.read();
        self.inner
            .codec
            .encode(&state.data)
            .map_err(|source| SessionError::Encode {
                sid: state.id.clone(),
                source,
            })
    }

    /// Check if the session has changed since it was read
    pub fn has_changed(&self) -> bool {
        self.inner.changed.load(Ordering::SeqCst)
    }

    /// Forget earlier changes; stores call this when handing out a record
    /// they already hold
    pub(crate) fn reset_changed(&self) {
        self.inner.changed.store(false, Ordering::SeqCst);
    }

    /// Replace the session ID with a fresh one of the same length and
    /// alphabet. The old ID stays in [`Session::previous_id`] until the
    /// session is persisted.
    pub fn regenerate_id(&self) -> Result<String, SessionError> {
        let mut state = self.inner.state.write();
        let new_id = sid::generate(state.id.len(), Alphabet::of(&state.id))?;
        let old_id = std::mem::replace(&mut state.id, new_id.clone());
        // Keep the first ID if regenerated twice in one request; it is the
        // one the store knows.
        if state.previous_id.is_none() {
            state.previous_id = Some(old_id);
        }
        drop(state);

        self.mark_changed();
        Ok(new_id)
    }

    /// Get a copy of the session data
    pub fn data(&self) -> SessionData {
        self.inner.state.read().data.clone()
    }

    /// Number of keys in the session
    pub fn len(&self) -> usize {
        self.inner.state.read().data.len()
    }

    /// Check if the session has no data
    pub fn is_empty(&self) -> bool {
        self.inner.state.read().data.is_empty()
    }

    /// True if both handles point to the same record
    pub fn ptr_eq(a: &Session, b: &Session) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    fn mark_changed(&self) {
        self.inner.changed.store(true, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("Session")
            .field("id", &state.id)
            .field("data", &state.data)
            .field("changed", &self.has_changed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_set_delete() {
        let session = Session::detached("abc");
        assert!(!session.has_changed());

        session.set("username", "salvo");
        assert!(session.has_changed());
        assert_eq!(session.get::<String>("username"), Some("salvo".to_string()));

        session.delete("username");
        assert_eq!(session.get::<String>("username"), None);

        session.set("random", "value");
        session.flush();
        assert!(session.is_empty());
    }

    #[test]
    fn test_delete_marks_changed_even_when_missing() {
        let session = Session::detached("abc");
        assert_eq!(session.delete("missing"), None);
        assert!(session.has_changed());
    }

    #[test]
    fn test_clones_share_state() {
        let a = Session::detached("abc");
        let b = a.clone();
        b.set("n", 1);
        assert_eq!(a.get::<i32>("n"), Some(1));
        assert!(Session::ptr_eq(&a, &b));
        assert!(!Session::ptr_eq(&a, &Session::detached("abc")));
    }

    #[test]
    fn test_flash_is_taken_once() {
        let session = Session::with_data(
            "abc",
            SessionData::from([(FLASH_KEY.to_string(), json!("saved!"))]),
            Arc::new(JsonCodec),
        );

        let flash = session.take_flash();
        assert_eq!(flash.get::<String>(), Some("saved!".to_string()));
        assert!(session.has_changed());
        assert!(!session.take_flash().is_some());
    }

    #[test]
    fn test_take_missing_flash_keeps_session_unchanged() {
        let session = Session::detached("abc");
        assert_eq!(session.take_flash(), Flash(None));
        assert!(!session.has_changed());
    }

    #[test]
    fn test_encode_uses_codec() {
        let session = Session::detached("abc");
        session.set("views", 3);
        let bytes = session.encode().unwrap();
        let decoded = JsonCodec.decode(&bytes).unwrap();
        assert_eq!(decoded.get("views"), Some(&json!(3)));
    }

    #[test]
    fn test_encode_failure_names_session() {
        struct Broken;
        impl Codec for Broken {
            fn encode(&self, _: &SessionData) -> Result<Vec<u8>, crate::error::CodecError> {
                Err("no space left".into())
            }
            fn decode(&self, _: &[u8]) -> Result<SessionData, crate::error::CodecError> {
                Err("no space left".into())
            }
        }

        let session = Session::new("abc", Arc::new(Broken));
        match session.encode() {
            Err(SessionError::Encode { sid, .. }) => assert_eq!(sid, "abc"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_regenerate_keeps_shape_and_data() {
        let session = Session::detached("0123456789abcdef");
        session.set("user", "alice");

        let new_id = session.regenerate_id().unwrap();
        assert_ne!(new_id, "0123456789abcdef");
        assert_eq!(session.id(), new_id);
        assert!(sid::is_valid(&new_id, 16, Alphabet::Lowercase));
        assert_eq!(session.previous_id().as_deref(), Some("0123456789abcdef"));
        assert_eq!(session.get::<String>("user"), Some("alice".to_string()));

        session.regenerate_id().unwrap();
        assert_eq!(session.previous_id().as_deref(), Some("0123456789abcdef"));
    }

    #[test]
    fn test_concurrent_writers() {
        let session = Session::detached("abc");
        std::thread::scope(|s| {
            for t in 0..4 {
                let session = session.clone();
                s.spawn(move || {
                    for i in 0..100 {
                        session.set(&format!("{t}-{i}"), i);
                    }
                });
            }
        });
        assert_eq!(session.len(), 400);
    }
}
