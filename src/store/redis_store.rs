//! Redis session store
//!
//! - Key: `key_prefix + session_id` (default prefix: "session:")
//! - Value: session data encoded by the configured codec
//! - TTL: the store lifetime, reset on every save and touch
//!
//! Redis expires keys on its own, so `gc` has nothing to do and an expired
//! session simply reads as a missing key.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;

use super::{normalize_lifetime, SessionStore, DEFAULT_LIFETIME};
use crate::codec::{Codec, JsonCodec};
use crate::context::Context;
use crate::error::SessionError;
use crate::session::Session;

/// Options for [`RedisStore`]. Either `url` or `client` is required.
#[derive(Clone)]
pub struct RedisConfig {
    /// Connection URL, used when no client is given
    pub url: Option<String>,
    /// Existing client
    pub client: Option<redis::Client>,
    /// Prefix for keys (default: "session:")
    pub key_prefix: String,
    /// Time without access before a session is recycled (default: 3600s)
    pub lifetime: Duration,
    /// Codec for stored values (default: [`JsonCodec`])
    pub codec: Arc<dyn Codec>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            client: None,
            key_prefix: "session:".to_string(),
            lifetime: DEFAULT_LIFETIME,
            codec: Arc::new(JsonCodec),
        }
    }
}

impl RedisConfig {
    /// Configuration connecting to `url`
    pub fn from_url<S: Into<String>>(url: S) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Configuration using an existing client
    pub fn from_client(client: redis::Client) -> Self {
        Self {
            client: Some(client),
            ..Default::default()
        }
    }

    /// Set the key prefix
    pub fn with_key_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the session lifetime
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Set the codec
    pub fn with_codec<C: Codec>(mut self, codec: C) -> Self {
        self.codec = Arc::new(codec);
        self
    }
}

/// Redis session store
///
/// # Example
///
/// ```rust,ignore
/// use salvo_lazy_session::{RedisConfig, RedisStore};
///
/// let store = RedisStore::new(RedisConfig::from_url("redis://127.0.0.1/")).await?;
/// ```
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    key_prefix: String,
    ttl_secs: u64,
    codec: Arc<dyn Codec>,
}

impl RedisStore {
    /// Connect and create a new Redis store
    pub async fn new(config: RedisConfig) -> Result<Self, SessionError> {
        let client = match (config.client, config.url) {
            (Some(client), _) => client,
            (None, Some(url)) => redis::Client::open(url.as_str())
                .map_err(|e| SessionError::Config(format!("redis url {url:?}: {e}")))?,
            (None, None) => {
                return Err(SessionError::Config(
                    "redis store needs either a url or a client".into(),
                ))
            }
        };
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::from_connection_manager(
            conn,
            config.key_prefix,
            config.lifetime,
            config.codec,
        ))
    }

    /// Create a store from an existing connection manager
    pub fn from_connection_manager(
        conn: ConnectionManager,
        key_prefix: String,
        lifetime: Duration,
        codec: Arc<dyn Codec>,
    ) -> Self {
        Self {
            conn,
            key_prefix,
            ttl_secs: normalize_lifetime(lifetime).as_secs(),
            codec,
        }
    }

    /// Make a storage key from session ID
    fn make_key(&self, sid: &str) -> String {
        format!("{}{}", self.key_prefix, sid)
    }
}

#[async_trait]
impl SessionStore for RedisStore {
    async fn exist(&self, ctx: &Context, sid: &str) -> bool {
        let key = self.make_key(sid);
        let mut conn = self.conn.clone();

        ctx.run(async { Ok::<_, SessionError>(conn.exists::<_, bool>(&key).await?) })
            .await
            .unwrap_or(false)
    }

    async fn read(&self, ctx: &Context, sid: &str) -> Result<Session, SessionError> {
        let key = self.make_key(sid);
        let mut conn = self.conn.clone();

        let binary: Option<Vec<u8>> = ctx
            .run(async { Ok::<_, SessionError>(conn.get(&key).await?) })
            .await?;
        let Some(binary) = binary else {
            return Ok(Session::new(sid, Arc::clone(&self.codec)));
        };

        let data = self
            .codec
            .decode(&binary)
            .map_err(|source| SessionError::Decode {
                sid: sid.to_string(),
                source,
            })?;
        Ok(Session::with_data(sid, data, Arc::clone(&self.codec)))
    }

    async fn destroy(&self, ctx: &Context, sid: &str) -> Result<(), SessionError> {
        let key = self.make_key(sid);
        let mut conn = self.conn.clone();

        ctx.run(async { Ok::<_, SessionError>(conn.del::<_, ()>(&key).await?) })
            .await
    }

    async fn touch(&self, ctx: &Context, sid: &str) -> Result<(), SessionError> {
        let key = self.make_key(sid);
        let mut conn = self.conn.clone();

        // EXPIRE on a missing key returns false, which is fine
        ctx.run(async {
            let _: bool = conn.expire(&key, self.ttl_secs as i64).await?;
            Ok::<_, SessionError>(())
        })
        .await
    }

    async fn save(&self, ctx: &Context, session: &Session) -> Result<(), SessionError> {
        let binary = session.encode()?;
        let key = self.make_key(&session.id());
        let mut conn = self.conn.clone();

        ctx.run(async {
            Ok::<_, SessionError>(conn.set_ex::<_, _, ()>(&key, binary, self.ttl_secs).await?)
        })
        .await
    }

    async fn gc(&self, _ctx: &Context) -> Result<(), SessionError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_connection_settings() {
        let err = RedisStore::new(RedisConfig::default()).await.err();
        assert!(matches!(err, Some(SessionError::Config(_))));
    }

    // Requires a running Redis instance
    // Run with: cargo test --features redis-store -- --ignored
    #[tokio::test]
    #[ignore]
    async fn test_redis_store_basic() {
        let store = RedisStore::new(
            RedisConfig::from_url("redis://127.0.0.1/").with_key_prefix("session-test:"),
        )
        .await
        .unwrap();
        let ctx = Context::new();

        store.destroy(&ctx, "test-id").await.unwrap();
        assert!(!store.exist(&ctx, "test-id").await);

        let session = store.read(&ctx, "test-id").await.unwrap();
        assert!(session.is_empty());
        session.set("user", "alice");
        store.save(&ctx, &session).await.unwrap();
        assert!(store.exist(&ctx, "test-id").await);

        let retrieved = store.read(&ctx, "test-id").await.unwrap();
        assert_eq!(retrieved.get::<String>("user"), Some("alice".to_string()));

        store.touch(&ctx, "test-id").await.unwrap();
        store.touch(&ctx, "missing-id").await.unwrap();

        store.destroy(&ctx, "test-id").await.unwrap();
        let retrieved = store.read(&ctx, "test-id").await.unwrap();
        assert!(retrieved.is_empty());
    }
}
