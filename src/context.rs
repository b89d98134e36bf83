//! Request-scoped cancellation and deadlines for store operations

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::SessionError;

/// Cancellation signal and optional deadline handed to every store call.
///
/// Cloning a context shares its cancellation state.
#[derive(Clone, Debug, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never done until [`Context::cancel`] is called
    pub fn new() -> Self {
        Self::default()
    }

    /// A context that expires after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// A context cancelled together with this one, but which can also be
    /// cancelled on its own
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Cancel this context and all its children
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// True once cancelled or past the deadline
    pub fn is_done(&self) -> bool {
        self.check().is_err()
    }

    /// Err with the reason the context is done, Ok otherwise
    pub fn check(&self) -> Result<(), SessionError> {
        if self.token.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        match self.deadline {
            Some(d) if Instant::now() >= d => Err(SessionError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Drive `fut` unless the context finishes first. Cancellation wins ties.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, SessionError>
    where
        F: Future<Output = Result<T, SessionError>>,
    {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(SessionError::Cancelled),
            _ = deadline_elapsed(self.deadline) => Err(SessionError::DeadlineExceeded),
            res = fut => res,
        }
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}
