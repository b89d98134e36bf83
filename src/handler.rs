//! Session middleware handler for Salvo

use async_trait::async_trait;
use salvo_core::http::{StatusCode, StatusError};
use salvo_core::{Depot, FlowCtrl, Handler, Request, Response};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{IdReader, IdWriter, SessionConfig};
use crate::context::Context;
use crate::depot_ext::{FLASH_KEY, SESSION_KEY, STORE_KEY};
use crate::manager::{GcHandle, Manager};
use crate::store::SessionStore;

/// Session middleware for Salvo
///
/// Per request it loads or creates the session, hands it to downstream
/// handlers through the [`Depot`](crate::SessionDepotExt), and persists it
/// once they are done. It also owns the background GC task of the store.
pub struct SessionHandler<S: SessionStore> {
    manager: Manager<S>,
    read_id: IdReader,
    write_id: IdWriter,
    resave: bool,
    store_timeout: Option<Duration>,
    _gc: Arc<GcHandle>,
}

impl<S: SessionStore> SessionHandler<S> {
    /// Create a new session handler and start GC for `store`.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(store: S, config: SessionConfig) -> Self {
        let config = config.normalized();
        let manager = Manager::new(store)
            .with_id_length(config.id_length)
            .with_alphabet(config.id_alphabet);
        let gc = manager.start_gc(config.gc_interval, Arc::clone(&config.on_gc_error));

        Self {
            read_id: config.id_reader(),
            write_id: config.id_writer(),
            resave: config.resave,
            store_timeout: config.store_timeout,
            manager,
            _gc: Arc::new(gc),
        }
    }

    /// The session manager behind this handler
    pub fn manager(&self) -> &Manager<S> {
        &self.manager
    }

    fn context(&self) -> Context {
        match self.store_timeout {
            Some(timeout) => Context::with_timeout(timeout),
            None => Context::new(),
        }
    }
}

impl<S: SessionStore> Clone for SessionHandler<S> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            read_id: Arc::clone(&self.read_id),
            write_id: Arc::clone(&self.write_id),
            resave: self.resave,
            store_timeout: self.store_timeout,
            _gc: Arc::clone(&self._gc),
        }
    }
}

#[async_trait]
impl<S: SessionStore> Handler for SessionHandler<S> {
    async fn handle(
        &self,
        req: &mut Request,
        depot: &mut Depot,
        res: &mut Response,
        ctrl: &mut FlowCtrl,
    ) {
        let candidate = (self.read_id)(req).unwrap_or_default();

        let (session, created) = match self.manager.load(&self.context(), &candidate).await {
            Ok(loaded) => loaded,
            Err(e) if e.is_cancelled() => {
                tracing::debug!(error = %e, "session load aborted");
                res.status_code(StatusCode::UNPROCESSABLE_ENTITY);
                ctrl.skip_rest();
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to load session");
                res.render(StatusError::internal_server_error());
                ctrl.skip_rest();
                return;
            }
        };

        (self.write_id)(res, &session.id(), created);

        let flash = session.take_flash();
        depot.insert(SESSION_KEY, session.clone());
        depot.insert(FLASH_KEY, flash);
        depot.insert(
            STORE_KEY,
            Arc::clone(self.manager.store()) as Arc<dyn SessionStore>,
        );

        ctrl.call_next(req, depot, res).await;

        // The client must learn the new ID before the old one is retired
        if session.previous_id().is_some() {
            (self.write_id)(res, &session.id(), true);
        }

        if let Err(e) = self
            .manager
            .persist(&self.context(), &session, created || self.resave)
            .await
        {
            if e.is_cancelled() {
                tracing::debug!(error = %e, "session save aborted");
            } else {
                tracing::error!(error = %e, "failed to save session");
            }
        }
    }
}
