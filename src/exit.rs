//! Exit code logic for the causelist process.
//!
//! Maps a job outcome to the process exit status.

use std::process::ExitCode;

use causelist_core::{JobStatus, RetrievalOutcome};

/// Process exit outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// Everything listed was saved.
    Success,
    /// Nothing was saved and something failed.
    Failure,
    /// Some documents were saved, some were not.
    Partial,
    /// Interrupted by the user.
    Cancelled,
}

impl ProcessExit {
    pub(crate) fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::Partial => 2,
            Self::Cancelled => 130,
        }
    }
}

impl From<ProcessExit> for ExitCode {
    fn from(exit: ProcessExit) -> Self {
        ExitCode::from(exit.code())
    }
}

/// Determines the exit outcome from saved and failed document counts.
pub(crate) fn determine_exit_outcome(completed: usize, failed: usize) -> ProcessExit {
    if failed == 0 {
        ProcessExit::Success
    } else if completed > 0 {
        ProcessExit::Partial
    } else {
        ProcessExit::Failure
    }
}

/// Exit outcome of a finished job. An abort counts as a failure of its own.
pub(crate) fn outcome_exit(outcome: &RetrievalOutcome) -> ProcessExit {
    let completed = outcome.succeeded().len();
    match outcome.status() {
        JobStatus::Cancelled => ProcessExit::Cancelled,
        JobStatus::Aborted { .. } => determine_exit_outcome(completed, outcome.failed().len() + 1),
        JobStatus::Completed => determine_exit_outcome(completed, outcome.failed().len()),
    }
}
