//! Session manager: ID validation, load-or-create and background GC

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::{normalize_gc_interval, normalize_id_length, GcErrorHandler};
use crate::context::Context;
use crate::error::SessionError;
use crate::session::Session;
use crate::sid::{self, Alphabet, DEFAULT_ID_LENGTH};
use crate::store::SessionStore;

/// Wires a session store to request handling
pub struct Manager<S: SessionStore> {
    store: Arc<S>,
    id_length: usize,
    alphabet: Alphabet,
}

impl<S: SessionStore> Manager<S> {
    /// Create a manager issuing 16 character lowercase IDs
    pub fn new(store: S) -> Self {
        Self::from_arc(Arc::new(store))
    }

    /// Create a manager over a shared store
    pub fn from_arc(store: Arc<S>) -> Self {
        Self {
            store,
            id_length: DEFAULT_ID_LENGTH,
            alphabet: Alphabet::Lowercase,
        }
    }

    /// Set the ID length. Lengths under 3 fall back to 16.
    pub fn with_id_length(mut self, len: usize) -> Self {
        self.id_length = normalize_id_length(len);
        self
    }

    /// Set the ID alphabet
    pub fn with_alphabet(mut self, alphabet: Alphabet) -> Self {
        self.alphabet = alphabet;
        self
    }

    /// The managed store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Load the session named by `candidate`.
    ///
    /// The candidate is only used when it is well formed and already known
    /// to the store; otherwise a fresh ID is generated. Returns the session
    /// and whether it was newly created, in which case the caller must send
    /// the new ID to the client.
    pub async fn load(&self, ctx: &Context, candidate: &str) -> Result<(Session, bool), SessionError> {
        if sid::is_valid(candidate, self.id_length, self.alphabet)
            && self.store.exist(ctx, candidate).await
        {
            let session = self.store.read(ctx, candidate).await?;
            return Ok((session, false));
        }

        let fresh = sid::generate(self.id_length, self.alphabet)?;
        let session = self.store.read(ctx, &fresh).await?;
        Ok((session, true))
    }

    /// Persist the session at the end of a request.
    ///
    /// A regenerated session is saved under its new ID before the old ID is
    /// destroyed. Otherwise changed sessions, or all sessions when
    /// `force_save` is set, are saved, and the rest are only touched.
    pub async fn persist(
        &self,
        ctx: &Context,
        session: &Session,
        force_save: bool,
    ) -> Result<(), SessionError> {
        if let Some(previous) = session.previous_id() {
            self.store.save(ctx, session).await?;
            self.store.destroy(ctx, &previous).await?;
            session.clear_previous_id();
            tracing::debug!("session id regenerated");
            return Ok(());
        }

        if force_save || session.has_changed() {
            self.store.save(ctx, session).await
        } else {
            self.store.touch(ctx, &session.id()).await
        }
    }

    /// Start the background GC task.
    ///
    /// The store is swept immediately and then once per `interval` (under one
    /// second falls back to five minutes). Sweep errors go to `on_error` and
    /// never stop the task. Must be called within a Tokio runtime.
    pub fn start_gc(&self, interval: Duration, on_error: GcErrorHandler) -> GcHandle {
        let interval = normalize_gc_interval(interval);
        let store = Arc::clone(&self.store);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tracing::trace!("session gc sweep");
                if let Err(e) = store.gc(&Context::new()).await {
                    on_error(e);
                }

                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {}
                }
            }
            tracing::debug!("session gc stopped");
        });

        GcHandle {
            stop: Some(stop_tx),
            task,
        }
    }
}

impl<S: SessionStore> Clone for Manager<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            id_length: self.id_length,
            alphabet: self.alphabet,
        }
    }
}

/// Control handle for the background GC task.
///
/// A sweep in progress is never interrupted; the task exits before the next
/// one. Dropping the handle stops the task as well.
#[derive(Debug)]
pub struct GcHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl GcHandle {
    /// Signal the task to stop and wait for it to exit
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = (&mut self.task).await;
    }

    /// Check whether the task has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
