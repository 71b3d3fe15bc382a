//! Job stages and the transitions between them.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Stage of a retrieval job.
///
/// ```text
/// Init -> SessionOpen -> SearchSubmitted -> Paginating <-> Fetching
///              ^               |                |
///              +---------------+----------------+      (next search)
/// SessionOpen -> Finalized
/// any non-terminal -> Aborted | Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    /// Query accepted, nothing started.
    Init,
    /// A browser session is open and idle on the portal.
    SessionOpen,
    /// The search form was submitted.
    SearchSubmitted,
    /// Walking result pages.
    Paginating,
    /// Handing a document to the fetcher.
    Fetching,
    /// Every search completed.
    Finalized,
    /// Stopped on a non-retryable failure.
    Aborted,
    /// Stopped on request.
    Cancelled,
}

impl JobStage {
    /// Whether no further transition is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finalized | Self::Aborted | Self::Cancelled)
    }

    /// Whether `self -> next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: JobStage) -> bool {
        use JobStage::{
            Aborted, Cancelled, Fetching, Finalized, Init, Paginating, SearchSubmitted,
            SessionOpen,
        };

        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (_, Aborted | Cancelled)
                | (Init, SessionOpen)
                | (SessionOpen, SearchSubmitted | Finalized)
                | (SearchSubmitted, Paginating | SessionOpen)
                | (Paginating, Fetching | SessionOpen)
                | (Fetching, Paginating)
        )
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::SessionOpen => "session_open",
            Self::SearchSubmitted => "search_submitted",
            Self::Paginating => "paginating",
            Self::Fetching => "fetching",
            Self::Finalized => "finalized",
            Self::Aborted => "aborted",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// A transition the state machine does not allow.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("illegal job transition {from} -> {to}")]
pub struct IllegalTransition {
    /// Stage the job was in.
    pub from: JobStage,
    /// Requested stage.
    pub to: JobStage,
}

/// Tracks the current stage of one job.
#[derive(Debug)]
pub(crate) struct JobMachine {
    job_id: u64,
    stage: JobStage,
}

impl JobMachine {
    pub(crate) fn new(job_id: u64) -> Self {
        Self {
            job_id,
            stage: JobStage::Init,
        }
    }

    pub(crate) fn stage(&self) -> JobStage {
        self.stage
    }

    pub(crate) fn advance(&mut self, next: JobStage) -> Result<(), IllegalTransition> {
        if !self.stage.can_transition_to(next) {
            return Err(IllegalTransition {
                from: self.stage,
                to: next,
            });
        }
        debug!(job_id = self.job_id, from = %self.stage, to = %next, "job transition");
        self.stage = next;
        Ok(())
    }
}
