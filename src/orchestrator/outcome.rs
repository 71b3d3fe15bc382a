//! Job results.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::JobStage;
use crate::fetch::{FetchFailure, FetchSuccess};
use crate::paginator::DocumentDescriptor;
use crate::query::{CaseType, Query};

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum JobStatus {
    /// Every search was processed. Individual documents may still have failed.
    Completed,
    /// Stopped on request.
    Cancelled,
    /// Stopped on a failure that retrying could not fix.
    Aborted {
        /// Stage the failure occurred in.
        stage: JobStage,
        /// What went wrong.
        reason: String,
    },
}

/// A document that reached the sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    /// Job-wide key: court, date, case type and identifier.
    pub key: String,
    /// Row identifier, unique within its search.
    pub identifier: String,
    /// Display title.
    pub title: String,
    /// Court label.
    pub court: String,
    /// Cause-list date.
    pub date: NaiveDate,
    /// Case type of the list.
    pub case_type: CaseType,
    /// Where the sink stored it.
    pub location: String,
    /// Size in bytes.
    pub bytes: u64,
    /// Lowercase hex SHA-256.
    pub sha256: String,
    /// Stored file extension.
    pub extension: String,
    /// Result page the document was listed on.
    pub page_index: usize,
    /// Fetch attempts used.
    pub attempts: u32,
}

/// A document that could not be stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedDocument {
    /// Job-wide key: court, date, case type and identifier.
    pub key: String,
    /// Row identifier, unique within its search.
    pub identifier: String,
    /// Display title.
    pub title: String,
    /// Court label.
    pub court: String,
    /// Cause-list date.
    pub date: NaiveDate,
    /// Last failure seen.
    pub failure: FetchFailure,
    /// Fetch attempts used.
    pub attempts: u32,
}

/// Final report of a retrieval job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalOutcome {
    job_id: u64,
    query: Query,
    status: JobStatus,
    succeeded: Vec<RetrievedDocument>,
    failed: Vec<FailedDocument>,
    duplicates_skipped: usize,
    pages_visited: usize,
    searches_run: usize,
}

impl RetrievalOutcome {
    /// Job identifier.
    #[must_use]
    pub fn job_id(&self) -> u64 {
        self.job_id
    }

    /// The query that was run.
    #[must_use]
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// How the job ended.
    #[must_use]
    pub fn status(&self) -> &JobStatus {
        &self.status
    }

    /// Stored documents, in completion order.
    #[must_use]
    pub fn succeeded(&self) -> &[RetrievedDocument] {
        &self.succeeded
    }

    /// Documents that could not be stored.
    #[must_use]
    pub fn failed(&self) -> &[FailedDocument] {
        &self.failed
    }

    /// Listings skipped because the identifier was already seen.
    #[must_use]
    pub fn duplicates_skipped(&self) -> usize {
        self.duplicates_skipped
    }

    /// Result pages read across all searches.
    #[must_use]
    pub fn pages_visited(&self) -> usize {
        self.pages_visited
    }

    /// Searches submitted to the portal.
    #[must_use]
    pub fn searches_run(&self) -> usize {
        self.searches_run
    }

    /// Stored document by identifier.
    #[must_use]
    pub fn document(&self, identifier: &str) -> Option<&RetrievedDocument> {
        self.succeeded.iter().find(|doc| doc.identifier == identifier)
    }

    /// Completed with no failed documents.
    #[must_use]
    pub fn is_complete_success(&self) -> bool {
        self.status == JobStatus::Completed && self.failed.is_empty()
    }
}

/// Accumulates results while a job runs; [`OutcomeBuilder::finish`] seals them.
#[derive(Debug)]
pub struct OutcomeBuilder {
    job_id: u64,
    query: Query,
    succeeded: Vec<RetrievedDocument>,
    failed: Vec<FailedDocument>,
    duplicates_skipped: usize,
    pages_visited: usize,
    searches_run: usize,
}

impl OutcomeBuilder {
    /// Starts an empty outcome.
    #[must_use]
    pub fn new(job_id: u64, query: Query) -> Self {
        Self {
            job_id,
            query,
            succeeded: Vec::new(),
            failed: Vec::new(),
            duplicates_skipped: 0,
            pages_visited: 0,
            searches_run: 0,
        }
    }

    /// Records a stored document.
    pub fn record_success(
        &mut self,
        descriptor: &DocumentDescriptor,
        success: FetchSuccess,
        attempts: u32,
    ) {
        self.succeeded.push(RetrievedDocument {
            key: descriptor.key(),
            identifier: descriptor.identifier().to_string(),
            title: descriptor.title().to_string(),
            court: descriptor.court().to_string(),
            date: descriptor.date(),
            case_type: descriptor.case_type(),
            location: success.location,
            bytes: success.bytes,
            sha256: success.sha256,
            extension: success.extension,
            page_index: descriptor.page_index(),
            attempts,
        });
    }

    /// Records a document that could not be stored.
    pub fn record_failure(
        &mut self,
        descriptor: &DocumentDescriptor,
        failure: FetchFailure,
        attempts: u32,
    ) {
        self.failed.push(FailedDocument {
            key: descriptor.key(),
            identifier: descriptor.identifier().to_string(),
            title: descriptor.title().to_string(),
            court: descriptor.court().to_string(),
            date: descriptor.date(),
            failure,
            attempts,
        });
    }

    /// Adds skipped duplicate listings.
    pub fn add_duplicates(&mut self, count: usize) {
        self.duplicates_skipped += count;
    }

    /// Adds result pages read.
    pub fn add_pages(&mut self, count: usize) {
        self.pages_visited += count;
    }

    /// Counts one submitted search.
    pub fn search_run(&mut self) {
        self.searches_run += 1;
    }

    /// Documents stored so far.
    #[must_use]
    pub fn succeeded_count(&self) -> usize {
        self.succeeded.len()
    }

    /// Documents failed so far.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    /// Seals the outcome.
    #[must_use]
    pub fn finish(self, status: JobStatus) -> RetrievalOutcome {
        RetrievalOutcome {
            job_id: self.job_id,
            query: self.query,
            status,
            succeeded: self.succeeded,
            failed: self.failed,
            duplicates_skipped: self.duplicates_skipped,
            pages_visited: self.pages_visited,
            searches_run: self.searches_run,
        }
    }
}
