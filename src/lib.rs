//! # salvo-lazy-session
//!
//! Server-side session middleware for the Salvo web framework.
//!
//! Sessions are named by opaque random IDs and kept in a pluggable store.
//! Expired sessions are discarded lazily when read, and swept in bulk by a
//! background GC task.
//!
//! ## Features
//!
//! - **Heap-ordered memory store**: GC only visits sessions that actually expired
//! - **Pluggable storage backends**: Memory, file system, Redis, or custom stores
//! - **Flash values**: one-shot values handed to the next request
//! - **ID regeneration**: new session ID without losing data, against fixation
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use salvo::prelude::*;
//! use salvo_lazy_session::{MemoryStore, SessionConfig, SessionDepotExt, SessionHandler};
//!
//! #[tokio::main]
//! async fn main() {
//!     let session_handler = SessionHandler::new(
//!         MemoryStore::new(),
//!         SessionConfig::new().with_cookie_name("sid"),
//!     );
//!
//!     let router = Router::new()
//!         .hoop(session_handler)
//!         .get(index);
//!
//!     let acceptor = TcpListener::new("127.0.0.1:5800").bind().await;
//!     Server::new(acceptor).serve(router).await;
//! }
//!
//! #[handler]
//! async fn index(depot: &mut Depot) -> String {
//!     let session = depot.session().unwrap();
//!     let views: i32 = session.get("views").unwrap_or(0);
//!     session.set("views", views + 1);
//!     format!("{} views", views + 1)
//! }
//! ```

pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod handler;
pub mod manager;
pub mod session;
pub mod sid;
pub mod store;

pub use codec::{Codec, JsonCodec};
pub use config::{CookieConfig, SameSite, SessionConfig};
pub use context::Context;
pub use error::SessionError;
pub use handler::SessionHandler;
pub use manager::{GcHandle, Manager};
pub use session::{Flash, Session, SessionData};
pub use sid::Alphabet;
pub use store::{FileConfig, FileStore, MemoryConfig, MemoryStore, SessionStore};

#[cfg(feature = "redis-store")]
pub use store::{RedisConfig, RedisStore};

/// Extension trait for Depot to easily access session
pub mod depot_ext;
pub use depot_ext::SessionDepotExt;
