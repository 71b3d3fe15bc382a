//! Progress events broadcast while a job runs.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::{JobStage, JobStatus};
use crate::query::CaseType;

/// One step of progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum RetrievalEvent {
    /// The job began.
    JobStarted {
        /// Job identifier.
        job_id: u64,
        /// Human-readable query.
        query: String,
    },
    /// The job moved to a new stage.
    StageChanged {
        /// Job identifier.
        job_id: u64,
        /// New stage.
        stage: JobStage,
    },
    /// A search is about to be submitted.
    SearchStarted {
        /// Job identifier.
        job_id: u64,
        /// Court label.
        court: String,
        /// Cause-list date.
        date: NaiveDate,
        /// Case type.
        case_type: CaseType,
    },
    /// A document was stored.
    DocumentSaved {
        /// Job identifier.
        job_id: u64,
        /// Document identifier.
        identifier: String,
        /// Where it was stored.
        location: String,
        /// Size in bytes.
        bytes: u64,
    },
    /// A document could not be stored.
    DocumentFailed {
        /// Job identifier.
        job_id: u64,
        /// Document identifier.
        identifier: String,
        /// Failure description.
        reason: String,
    },
    /// A listing repeated an identifier already handled by the job.
    DuplicateSkipped {
        /// Job identifier.
        job_id: u64,
        /// Document identifier.
        identifier: String,
    },
    /// The job ended. Always the last event.
    JobFinished {
        /// Job identifier.
        job_id: u64,
        /// Final status.
        status: JobStatus,
        /// Documents stored.
        succeeded: usize,
        /// Documents failed.
        failed: usize,
    },
}

impl RetrievalEvent {
    /// Whether this is the last event of a job.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::JobFinished { .. })
    }
}

/// Optional event publisher handed through a job. Sending never blocks or fails.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventEmitter {
    sender: Option<broadcast::Sender<RetrievalEvent>>,
}

impl EventEmitter {
    pub(crate) fn new(sender: Option<broadcast::Sender<RetrievalEvent>>) -> Self {
        Self { sender }
    }

    pub(crate) fn emit(&self, event: RetrievalEvent) {
        if let Some(sender) = &self.sender {
            // No subscribers is fine.
            let _ = sender.send(event);
        }
    }
}
