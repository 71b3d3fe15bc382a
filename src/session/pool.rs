//! Bounded pool of browser sessions.
//!
//! Each job leases one session for its whole lifetime. The pool caps how many
//! browser contexts are open at once; jobs beyond the cap wait for a slot.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, instrument};

use super::{BrowserDriver, Session, SessionError};

/// Minimum allowed session limit.
pub const MIN_SESSIONS: usize = 1;

/// Maximum allowed session limit.
pub const MAX_SESSIONS: usize = 32;

/// Errors from the session pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Session limit outside the allowed range.
    #[error("session limit must be between {MIN_SESSIONS} and {MAX_SESSIONS}, got {value}")]
    InvalidLimit {
        /// Requested limit.
        value: usize,
    },

    /// The pool was shut down.
    #[error("session pool is closed")]
    Closed,

    /// The driver failed to open a session.
    #[error(transparent)]
    Open(#[from] SessionError),
}

/// Caps concurrently open browser sessions.
pub struct SessionPool {
    driver: Arc<dyn BrowserDriver>,
    permits: Arc<Semaphore>,
    max_sessions: usize,
    op_timeout: Duration,
    next_id: AtomicU64,
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("driver", &self.driver.name())
            .field("max_sessions", &self.max_sessions)
            .field("available", &self.available())
            .finish_non_exhaustive()
    }
}

impl SessionPool {
    /// Creates a pool over `driver` with at most `max_sessions` open sessions.
    ///
    /// # Errors
    ///
    /// [`PoolError::InvalidLimit`] when the limit is outside 1..=32.
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        max_sessions: usize,
        op_timeout: Duration,
    ) -> Result<Self, PoolError> {
        if !(MIN_SESSIONS..=MAX_SESSIONS).contains(&max_sessions) {
            return Err(PoolError::InvalidLimit {
                value: max_sessions,
            });
        }
        Ok(Self {
            driver,
            permits: Arc::new(Semaphore::new(max_sessions)),
            max_sessions,
            op_timeout,
            next_id: AtomicU64::new(1),
        })
    }

    /// Configured session limit.
    #[must_use]
    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Free slots right now.
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Waits for a free slot and opens a session in it.
    ///
    /// # Errors
    ///
    /// [`PoolError::Open`] if the browser cannot be launched in time; the slot is released.
    #[instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn acquire(&self) -> Result<PooledSession, PoolError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;

        let browser = match tokio::time::timeout(self.op_timeout, self.driver.open()).await {
            Ok(Ok(browser)) => browser,
            Ok(Err(error)) => return Err(PoolError::Open(error)),
            Err(_) => {
                return Err(PoolError::Open(SessionError::timeout(
                    "browser launch",
                    self.op_timeout,
                )));
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        info!(session_id = id, "browser session opened");
        Ok(PooledSession {
            session: Session::new(id, browser, self.op_timeout),
            _permit: permit,
        })
    }

    /// Stops handing out sessions; waiting and future acquires fail with [`PoolError::Closed`].
    pub fn close(&self) {
        self.permits.close();
    }
}

/// A session leased from the pool, released together with its slot.
///
/// Prefer [`PooledSession::release`]; dropping schedules the close in the background.
#[derive(Debug)]
pub struct PooledSession {
    session: Session,
    _permit: OwnedSemaphorePermit,
}

impl PooledSession {
    /// Closes the browser context, then frees the pool slot.
    pub async fn release(mut self) {
        debug!(session_id = self.session.id(), "releasing session");
        self.session.close().await;
    }
}

impl Deref for PooledSession {
    type Target = Session;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

impl DerefMut for PooledSession {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.session
    }
}
