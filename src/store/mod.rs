//! Session store implementations

mod file;
mod memory;
mod traits;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

pub use file::{FileConfig, FileStore};
pub use memory::{MemoryConfig, MemoryStore};
pub use traits::SessionStore;

#[cfg(feature = "redis-store")]
mod redis_store;

#[cfg(feature = "redis-store")]
pub use redis_store::{RedisConfig, RedisStore};

/// Source of the current time for expiry decisions
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Default time a session survives without access
pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(3600);

/// The wall clock
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Use `lifetime`, or the default when it is under one second
pub(crate) fn normalize_lifetime(lifetime: Duration) -> Duration {
    if lifetime < Duration::from_secs(1) {
        DEFAULT_LIFETIME
    } else {
        lifetime
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Clock;
    use chrono::{DateTime, TimeDelta, Utc};
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Clock that only moves when told to
    pub(crate) struct TestClock(Arc<Mutex<DateTime<Utc>>>);

    impl TestClock {
        pub(crate) fn new() -> Self {
            Self(Arc::new(Mutex::new(Utc::now())))
        }

        pub(crate) fn clock(&self) -> Clock {
            let now = Arc::clone(&self.0);
            Arc::new(move || *now.lock())
        }

        pub(crate) fn advance_ms(&self, ms: i64) {
            *self.0.lock() += TimeDelta::milliseconds(ms);
        }
    }
}
