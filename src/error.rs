//! Session error types

use thiserror::Error;

/// Boxed error produced by a pluggable [`Codec`](crate::codec::Codec).
pub type CodecError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur during session operations
#[derive(Debug, Error)]
pub enum SessionError {
    /// Filesystem failure, tagged with the operation that failed
    #[error("{op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Error from a session store backend
    #[error("session store error: {0}")]
    Store(String),

    /// Failed to encode the data of a session
    #[error("encode session {sid}: {source}")]
    Encode {
        sid: String,
        #[source]
        source: CodecError,
    },

    /// Failed to decode stored session data
    #[error("decode session {sid}: {source}")]
    Decode {
        sid: String,
        #[source]
        source: CodecError,
    },

    /// The request context was cancelled
    #[error("context cancelled")]
    Cancelled,

    /// The request context deadline passed
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// Store configuration is missing or invalid
    #[error("invalid store configuration: {0}")]
    Config(String),

    /// The secure random source failed
    #[error("random source failure: {0}")]
    RandomSource(String),

    /// Session ID not usable by the store
    #[error("invalid session ID: {0:?}")]
    InvalidSessionId(String),

    /// Redis error (when redis-store feature is enabled)
    #[cfg(feature = "redis-store")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl SessionError {
    pub(crate) fn io(op: &'static str, source: std::io::Error) -> Self {
        SessionError::Io { op, source }
    }

    /// Returns true if the operation stopped because its context was
    /// cancelled or ran out of time, rather than because the backend failed.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SessionError::Cancelled | SessionError::DeadlineExceeded)
    }
}
