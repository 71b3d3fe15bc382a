//! Job-level retrieval errors.
//!
//! These abort a whole job. Per-document problems are
//! [`FetchFailure`](crate::fetch::FetchFailure)s and never abort anything.

use thiserror::Error;

use crate::paginator::PaginationError;
use crate::query::QueryError;
use crate::retry::FailureType;
use crate::session::{PoolError, SessionError};

/// Failures of the navigation and pagination stages.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The query failed validation before any browser work.
    #[error("invalid query: {0}")]
    InvalidQuery(#[from] QueryError),

    /// The portal refused the search parameters.
    #[error("portal rejected the search: {reason}")]
    RejectedInput {
        /// Portal message or the unmatched option.
        reason: String,
    },

    /// A page did not become ready in time.
    #[error("timed out during {stage}: {source}")]
    Timeout {
        /// Stage that was waiting.
        stage: &'static str,
        /// The underlying session timeout.
        #[source]
        source: SessionError,
    },

    /// The portal demanded a CAPTCHA answer.
    #[error("portal presented a CAPTCHA challenge; automated retrieval cannot continue")]
    ChallengeRequired,

    /// Walking the result pages failed; earlier pages were processed.
    #[error(transparent)]
    Pagination(#[from] PaginationError),

    /// Browser failure or markup breakage.
    #[error(transparent)]
    Session(SessionError),

    /// No session could be obtained.
    #[error("could not obtain a browser session: {0}")]
    Pool(#[from] PoolError),
}

impl RetrievalError {
    /// Creates a rejected-input error.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::RejectedInput {
            reason: reason.into(),
        }
    }

    /// Wraps a session error, separating timeouts by stage.
    #[must_use]
    pub fn from_session(stage: &'static str, error: SessionError) -> Self {
        if error.is_retryable() {
            Self::Timeout {
                stage,
                source: error,
            }
        } else {
            Self::Session(error)
        }
    }

    /// Classification for the retry policy. Only timeouts are retried.
    #[must_use]
    pub fn failure_type(&self) -> FailureType {
        match self {
            Self::Timeout { .. } => FailureType::Transient,
            _ => FailureType::Permanent,
        }
    }
}
