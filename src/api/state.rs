//! Shared state handed to every route handler.

use std::sync::Arc;

use super::jobs::JobRegistry;
use crate::orchestrator::RetrievalOrchestrator;

/// Orchestrator and job registry shared by all handlers. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Runs the jobs.
    pub orchestrator: Arc<RetrievalOrchestrator>,
    /// Jobs submitted to this service.
    pub jobs: Arc<JobRegistry>,
}

impl AppState {
    /// Wraps an orchestrator with an empty registry.
    #[must_use]
    pub fn new(orchestrator: Arc<RetrievalOrchestrator>) -> Self {
        Self {
            orchestrator,
            jobs: Arc::new(JobRegistry::new()),
        }
    }

    /// Wraps an orchestrator with a registry keeping `keep_finished` finished jobs.
    #[must_use]
    pub fn with_job_retention(orchestrator: Arc<RetrievalOrchestrator>, keep_finished: usize) -> Self {
        Self {
            orchestrator,
            jobs: Arc::new(JobRegistry::with_retention(keep_finished)),
        }
    }
}
