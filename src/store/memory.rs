//! In-memory session store
//!
//! Sessions live in an array-backed binary min-heap ordered by last access,
//! with a map from session ID to heap position. Both are guarded by one lock
//! so they always agree on membership. GC only visits the expired prefix of
//! the heap instead of scanning every session.
//!
//! Sessions are lost on restart and are not shared between processes.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{normalize_lifetime, system_clock, Clock, SessionStore, DEFAULT_LIFETIME};
use crate::codec::{Codec, JsonCodec};
use crate::context::Context;
use crate::error::SessionError;
use crate::session::Session;

struct Entry {
    sid: String,
    last_accessed: DateTime<Utc>,
    session: Session,
}

/// Binary min-heap over last access time that knows where each ID sits.
///
/// Every swap rewrites the position of both entries, which is what makes
/// removal from the middle O(log n).
#[derive(Default)]
struct ExpiryHeap {
    entries: Vec<Entry>,
    positions: HashMap<String, usize>,
}

impl ExpiryHeap {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn contains(&self, sid: &str) -> bool {
        self.positions.contains_key(sid)
    }

    fn get(&self, sid: &str) -> Option<&Entry> {
        self.positions.get(sid).map(|&i| &self.entries[i])
    }

    fn peek(&self) -> Option<&Entry> {
        self.entries.first()
    }

    fn push(&mut self, entry: Entry) {
        let i = self.entries.len();
        self.positions.insert(entry.sid.clone(), i);
        self.entries.push(entry);
        self.sift_up(i);
    }

    fn remove(&mut self, sid: &str) -> Option<Entry> {
        let i = *self.positions.get(sid)?;
        let last = self.entries.len() - 1;
        if i != last {
            self.swap(i, last);
        }
        let entry = self.entries.pop()?;
        self.positions.remove(&entry.sid);
        if i < self.entries.len() {
            self.fix(i);
        }
        Some(entry)
    }

    /// Set the last access time of `sid` and restore heap order
    fn touch(&mut self, sid: &str, at: DateTime<Utc>) -> bool {
        match self.positions.get(sid) {
            Some(&i) => {
                self.entries[i].last_accessed = at;
                self.fix(i);
                true
            }
            None => false,
        }
    }

    fn fix(&mut self, i: usize) {
        if !self.sift_down(i) {
            self.sift_up(i);
        }
    }

    fn less(&self, i: usize, j: usize) -> bool {
        self.entries[i].last_accessed < self.entries[j].last_accessed
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.entries.swap(i, j);
        if let Some(p) = self.positions.get_mut(&self.entries[i].sid) {
            *p = i;
        }
        if let Some(p) = self.positions.get_mut(&self.entries[j].sid) {
            *p = j;
        }
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if !self.less(i, parent) {
                break;
            }
            self.swap(i, parent);
            i = parent;
        }
    }

    /// Returns true if the entry moved
    fn sift_down(&mut self, start: usize) -> bool {
        let n = self.entries.len();
        let mut i = start;
        loop {
            let left = 2 * i + 1;
            if left >= n {
                break;
            }
            let mut child = left;
            if left + 1 < n && self.less(left + 1, left) {
                child = left + 1;
            }
            if !self.less(child, i) {
                break;
            }
            self.swap(i, child);
            i = child;
        }
        i > start
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        assert_eq!(self.entries.len(), self.positions.len());
        for (i, entry) in self.entries.iter().enumerate() {
            assert_eq!(self.positions.get(&entry.sid), Some(&i), "position of {}", entry.sid);
            if i > 0 {
                let parent = &self.entries[(i - 1) / 2];
                assert!(parent.last_accessed <= entry.last_accessed, "heap order at {i}");
            }
        }
    }
}

/// Options for [`MemoryStore`]
#[derive(Clone)]
pub struct MemoryConfig {
    /// Time without access before a session is recycled (default: 3600s,
    /// anything under one second falls back to the default)
    pub lifetime: Duration,
    /// Codec used by [`Session::encode`] (default: [`JsonCodec`])
    pub codec: Arc<dyn Codec>,
    clock: Clock,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            lifetime: DEFAULT_LIFETIME,
            codec: Arc::new(JsonCodec),
            clock: system_clock(),
        }
    }
}

impl MemoryConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the session lifetime
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Set the codec handed to new sessions
    pub fn with_codec<C: Codec>(mut self, codec: C) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Replace the clock used for access times
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

/// In-memory session store
pub struct MemoryStore {
    heap: Arc<RwLock<ExpiryHeap>>,
    lifetime: TimeDelta,
    clock: Clock,
    codec: Arc<dyn Codec>,
}

impl MemoryStore {
    /// Create a new memory store with a one hour lifetime
    pub fn new() -> Self {
        Self::from_parts(
            TimeDelta::seconds(DEFAULT_LIFETIME.as_secs() as i64),
            system_clock(),
            Arc::new(JsonCodec),
        )
    }

    /// Create a memory store from a configuration
    pub fn with_config(config: MemoryConfig) -> Result<Self, SessionError> {
        let lifetime = normalize_lifetime(config.lifetime);
        let lifetime = TimeDelta::from_std(lifetime)
            .map_err(|e| SessionError::Config(format!("lifetime {lifetime:?}: {e}")))?;
        Ok(Self::from_parts(lifetime, config.clock, config.codec))
    }

    fn from_parts(lifetime: TimeDelta, clock: Clock, codec: Arc<dyn Codec>) -> Self {
        Self {
            heap: Arc::new(RwLock::new(ExpiryHeap::default())),
            lifetime,
            clock,
            codec,
        }
    }

    /// Number of sessions held, expired or not
    pub fn len(&self) -> usize {
        self.heap.read().len()
    }

    /// Check if the store holds no sessions
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_expired(&self, last_accessed: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match last_accessed.checked_add_signed(self.lifetime) {
            Some(horizon) => now >= horizon,
            None => false,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MemoryStore {
    fn clone(&self) -> Self {
        Self {
            heap: Arc::clone(&self.heap),
            lifetime: self.lifetime,
            clock: Arc::clone(&self.clock),
            codec: Arc::clone(&self.codec),
        }
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn exist(&self, _ctx: &Context, sid: &str) -> bool {
        self.heap.read().contains(sid)
    }

    async fn read(&self, _ctx: &Context, sid: &str) -> Result<Session, SessionError> {
        let now = (self.clock)();
        let mut heap = self.heap.write();

        if let Some(entry) = heap.get(sid) {
            // GC may not have caught up yet
            if !self.is_expired(entry.last_accessed, now) {
                let session = entry.session.clone();
                heap.touch(sid, now);
                // Earlier changes already live in the heap
                session.reset_changed();
                return Ok(session);
            }
            heap.remove(sid);
        }

        let session = Session::new(sid, Arc::clone(&self.codec));
        heap.push(Entry {
            sid: sid.to_string(),
            last_accessed: now,
            session: session.clone(),
        });
        Ok(session)
    }

    async fn destroy(&self, _ctx: &Context, sid: &str) -> Result<(), SessionError> {
        self.heap.write().remove(sid);
        Ok(())
    }

    async fn touch(&self, _ctx: &Context, sid: &str) -> Result<(), SessionError> {
        let now = (self.clock)();
        self.heap.write().touch(sid, now);
        Ok(())
    }

    /// The heap already holds the live session, so there is nothing to write
    /// back. Only a regenerated session needs to move to its new ID.
    async fn save(&self, _ctx: &Context, session: &Session) -> Result<(), SessionError> {
        let Some(previous) = session.previous_id() else {
            return Ok(());
        };

        let sid = session.id();
        let now = (self.clock)();
        let mut heap = self.heap.write();
        heap.remove(&previous);
        heap.remove(&sid);
        heap.push(Entry {
            sid,
            last_accessed: now,
            session: session.clone(),
        });
        Ok(())
    }

    async fn gc(&self, ctx: &Context) -> Result<(), SessionError> {
        let now = (self.clock)();
        let mut evicted = 0usize;

        while !ctx.is_done() {
            let mut heap = self.heap.write();
            let sid = match heap.peek() {
                Some(oldest) if self.is_expired(oldest.last_accessed, now) => oldest.sid.clone(),
                _ => break,
            };
            heap.remove(&sid);
            evicted += 1;
        }

        if evicted > 0 {
            tracing::debug!(evicted, "memory store gc finished");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CodecError;
    use crate::session::SessionData;
    use crate::store::testing::TestClock;
    use rand::Rng;

    fn store_with(clock: &TestClock, lifetime: Duration) -> MemoryStore {
        MemoryStore::with_config(
            MemoryConfig::new()
                .with_lifetime(lifetime)
                .with_clock(clock.clock()),
        )
        .unwrap()
    }

    fn heap_ids(store: &MemoryStore) -> Vec<String> {
        store.heap.read().entries.iter().map(|e| e.sid.clone()).collect()
    }

    #[tokio::test]
    async fn test_read_creates_once() {
        let ctx = Context::new();
        let store = MemoryStore::new();

        assert!(!store.exist(&ctx, "a").await);
        let first = store.read(&ctx, "a").await.unwrap();
        let second = store.read(&ctx, "a").await.unwrap();

        assert!(Session::ptr_eq(&first, &second));
        assert_eq!(first.id(), "a");
        assert!(store.exist(&ctx, "a").await);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_lifetime_gc_scenario() {
        let ctx = Context::new();
        let clock = TestClock::new();
        let store = store_with(&clock, Duration::from_secs(1));

        let first = store.read(&ctx, "a").await.unwrap();

        clock.advance_ms(500);
        store.gc(&ctx).await.unwrap();
        assert!(store.exist(&ctx, "a").await);

        clock.advance_ms(1000);
        store.gc(&ctx).await.unwrap();
        assert!(!store.exist(&ctx, "a").await);
        assert!(store.is_empty());

        clock.advance_ms(100);
        let fresh = store.read(&ctx, "a").await.unwrap();
        assert_eq!(fresh.id(), "a");
        assert!(fresh.is_empty());
        assert!(!Session::ptr_eq(&first, &fresh));
    }

    #[tokio::test]
    async fn test_expired_read_discards_data() {
        let ctx = Context::new();
        let clock = TestClock::new();
        let store = store_with(&clock, Duration::from_secs(1));

        let session = store.read(&ctx, "b").await.unwrap();
        session.set("name", "x");
        store.save(&ctx, &session).await.unwrap();

        clock.advance_ms(2000);
        // Still physically present until GC
        assert!(store.exist(&ctx, "b").await);

        let reread = store.read(&ctx, "b").await.unwrap();
        assert_eq!(reread.id(), "b");
        assert_eq!(reread.get::<String>("name"), None);
        assert!(store.exist(&ctx, "b").await);
        store.heap.read().assert_consistent();
    }

    #[tokio::test]
    async fn test_gc_removes_expired_prefix() {
        let ctx = Context::new();
        let clock = TestClock::new();
        let store = store_with(&clock, Duration::from_secs(1));

        store.read(&ctx, "1").await.unwrap();
        clock.advance_ms(400);
        store.read(&ctx, "2").await.unwrap();
        clock.advance_ms(400);
        store.read(&ctx, "3").await.unwrap();

        // t = 1.5s: "1" (t=0) and "2" (t=0.4) are out, "3" (t=0.8) stays
        clock.advance_ms(700);
        store.gc(&ctx).await.unwrap();

        assert_eq!(heap_ids(&store), vec!["3".to_string()]);
        store.heap.read().assert_consistent();
    }

    #[tokio::test]
    async fn test_gc_keeps_reordered_sessions() {
        let ctx = Context::new();
        let clock = TestClock::new();
        let store = store_with(&clock, Duration::from_secs(1));

        store.read(&ctx, "1").await.unwrap();
        store.read(&ctx, "2").await.unwrap();
        store.read(&ctx, "3").await.unwrap();

        // Re-reading "1" moves it behind the others
        clock.advance_ms(600);
        store.read(&ctx, "1").await.unwrap();

        clock.advance_ms(600);
        store.gc(&ctx).await.unwrap();

        assert_eq!(heap_ids(&store), vec!["1".to_string()]);
        store.heap.read().assert_consistent();
    }

    #[tokio::test]
    async fn test_touch_extends_life() {
        let ctx = Context::new();
        let clock = TestClock::new();
        let store = store_with(&clock, Duration::from_secs(1));

        let session = store.read(&ctx, "1").await.unwrap();

        clock.advance_ms(2000);
        store.touch(&ctx, &session.id()).await.unwrap();
        store.gc(&ctx).await.unwrap();

        assert!(store.exist(&ctx, "1").await);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_touch_and_destroy_unknown_are_noops() {
        let ctx = Context::new();
        let store = MemoryStore::new();

        store.touch(&ctx, "ghost").await.unwrap();
        store.destroy(&ctx, "ghost").await.unwrap();
        assert!(store.is_empty());

        store.read(&ctx, "real").await.unwrap();
        store.destroy(&ctx, "real").await.unwrap();
        store.destroy(&ctx, "real").await.unwrap();
        assert!(!store.exist(&ctx, "real").await);
    }

    #[tokio::test]
    async fn test_gc_stops_when_cancelled() {
        let clock = TestClock::new();
        let store = store_with(&clock, Duration::from_secs(1));
        let live = Context::new();

        for sid in ["1", "2", "3"] {
            store.read(&live, sid).await.unwrap();
        }
        clock.advance_ms(5000);

        let cancelled = Context::new();
        cancelled.cancel();
        store.gc(&cancelled).await.unwrap();
        assert_eq!(store.len(), 3);

        store.gc(&live).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_save_moves_regenerated_session() {
        let ctx = Context::new();
        let store = MemoryStore::new();

        let session = store.read(&ctx, "0123456789abcdef").await.unwrap();
        session.set("user", "alice");
        let new_id = session.regenerate_id().unwrap();
        store.save(&ctx, &session).await.unwrap();

        assert!(!store.exist(&ctx, "0123456789abcdef").await);
        let reread = store.read(&ctx, &new_id).await.unwrap();
        assert!(Session::ptr_eq(&session, &reread));
        assert_eq!(reread.get::<String>("user"), Some("alice".to_string()));
        store.heap.read().assert_consistent();
    }

    #[tokio::test]
    async fn test_old_id_destroy_after_regenerated_save() {
        let ctx = Context::new();
        let store = MemoryStore::new();

        let session = store.read(&ctx, "0123456789abcdef").await.unwrap();
        let new_id = session.regenerate_id().unwrap();
        store.save(&ctx, &session).await.unwrap();
        store.destroy(&ctx, "0123456789abcdef").await.unwrap();

        assert!(store.exist(&ctx, &new_id).await);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_changes_do_not_carry_into_next_read() {
        let ctx = Context::new();
        let store = MemoryStore::new();

        let session = store.read(&ctx, "a1b").await.unwrap();
        session.set("user", "alice");
        assert!(session.has_changed());
        store.save(&ctx, &session).await.unwrap();

        let next = store.read(&ctx, "a1b").await.unwrap();
        assert!(!next.has_changed());
        assert_eq!(next.get::<String>("user"), Some("alice".to_string()));
    }

    #[tokio::test]
    async fn test_sessions_use_configured_codec() {
        struct Fixed;
        impl Codec for Fixed {
            fn encode(&self, _: &SessionData) -> Result<Vec<u8>, CodecError> {
                Ok(b"fixed".to_vec())
            }
            fn decode(&self, _: &[u8]) -> Result<SessionData, CodecError> {
                Ok(SessionData::new())
            }
        }

        let store = MemoryStore::with_config(MemoryConfig::new().with_codec(Fixed)).unwrap();
        let session = store.read(&Context::new(), "a1b").await.unwrap();
        session.set("user", "alice");
        assert_eq!(session.encode().unwrap(), b"fixed".to_vec());

        let session = MemoryStore::new().read(&Context::new(), "a1b").await.unwrap();
        assert_eq!(session.encode().unwrap(), b"{}".to_vec());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reads_share_one_session() {
        let store = MemoryStore::new();
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.read(&Context::new(), "shared").await.unwrap()
            }));
        }

        let mut sessions = Vec::new();
        for task in tasks {
            sessions.push(task.await.unwrap());
        }
        assert!(sessions.windows(2).all(|w| Session::ptr_eq(&w[0], &w[1])));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_heap_stays_consistent_under_churn() {
        let ctx = Context::new();
        let clock = TestClock::new();
        let store = store_with(&clock, Duration::from_secs(10));
        let mut rng = rand::rng();

        for _ in 0..2000 {
            let sid = format!("s{}", rng.random_range(0..64));
            clock.advance_ms(rng.random_range(0..400));
            match rng.random_range(0..4) {
                0 => store.destroy(&ctx, &sid).await.unwrap(),
                1 => store.touch(&ctx, &sid).await.unwrap(),
                2 => store.gc(&ctx).await.unwrap(),
                _ => {
                    store.read(&ctx, &sid).await.unwrap();
                }
            }
            store.heap.read().assert_consistent();
        }
    }

    #[test]
    fn test_short_lifetime_falls_back_to_default() {
        let store = MemoryStore::with_config(
            MemoryConfig::new().with_lifetime(Duration::from_millis(10)),
        )
        .unwrap();
        assert_eq!(store.lifetime, TimeDelta::seconds(3600));
    }
}
