//! Session store trait

use async_trait::async_trait;

use crate::context::Context;
use crate::error::SessionError;
use crate::session::Session;

/// Trait for session storage backends
///
/// Every backend must behave the same way from the outside:
///
/// - An entry lives for `lifetime` after its last read, touch or save.
/// - `read` of an unknown or expired ID returns an empty session bound to
///   that ID. Expired data is discarded on read even if `gc` has not run yet.
/// - `destroy` and `touch` of an unknown ID succeed and do nothing.
/// - `save` encodes before doing any I/O, and fails if encoding fails.
/// - `gc` stops quietly when the context is done.
///
/// A session whose ID was regenerated carries the old ID in
/// [`Session::previous_id`]; `save` stores it under the new ID. A backend
/// may retire the old entry itself, so a later `destroy` of the old ID must
/// still succeed.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Check whether an entry exists for `sid`, fresh or not.
    ///
    /// Backend errors count as "does not exist".
    async fn exist(&self, ctx: &Context, sid: &str) -> bool;

    /// Read the session with the given ID, or create an empty one
    async fn read(&self, ctx: &Context, sid: &str) -> Result<Session, SessionError>;

    /// Destroy/delete a session
    async fn destroy(&self, ctx: &Context, sid: &str) -> Result<(), SessionError>;

    /// Touch a session - reset its expiry without modifying data
    async fn touch(&self, ctx: &Context, sid: &str) -> Result<(), SessionError>;

    /// Persist the session data and reset its expiry
    async fn save(&self, ctx: &Context, session: &Session) -> Result<(), SessionError>;

    /// Remove every expired entry
    async fn gc(&self, ctx: &Context) -> Result<(), SessionError>;
}
