//! Extension trait for Depot to easily access sessions

use salvo_core::Depot;
use std::sync::Arc;

use crate::session::{Flash, Session};
use crate::store::SessionStore;

pub(crate) const SESSION_KEY: &str = "salvo.lazy_session.session";
pub(crate) const FLASH_KEY: &str = "salvo.lazy_session.flash";
pub(crate) const STORE_KEY: &str = "salvo.lazy_session.store";

/// Extension trait for Salvo's Depot to provide easy session access
pub trait SessionDepotExt {
    /// Get the session of the current request
    fn session(&self) -> Option<&Session>;

    /// Get the flash value carried over from the previous request
    fn flash(&self) -> Option<&Flash>;

    /// Get the session store, e.g. to destroy a session
    fn session_store(&self) -> Option<&Arc<dyn SessionStore>>;
}

impl SessionDepotExt for Depot {
    fn session(&self) -> Option<&Session> {
        self.get::<Session>(SESSION_KEY).ok()
    }

    fn flash(&self) -> Option<&Flash> {
        self.get::<Flash>(FLASH_KEY).ok()
    }

    fn session_store(&self) -> Option<&Arc<dyn SessionStore>> {
        self.get::<Arc<dyn SessionStore>>(STORE_KEY).ok()
    }
}
