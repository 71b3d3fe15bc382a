//! Jobs submitted over HTTP.
//!
//! Each job runs on its own task with a [`MemorySink`], so stored documents
//! can be served back through the API. Finished jobs stay in the registry
//! until more than the retention limit have finished; the oldest are then
//! dropped together with their documents.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::orchestrator::{JobStage, RetrievalEvent, RetrievalOrchestrator, RetrievalOutcome};
use crate::query::{Query, QueryError};
use crate::sink::{DocumentSink, MemorySink};

/// Events buffered per job for slow subscribers.
const EVENT_CAPACITY: usize = 256;

/// Finished jobs kept by default.
pub const DEFAULT_KEEP_FINISHED: usize = 100;

/// Lifecycle of a submitted job as seen by API callers.
#[derive(Debug, Clone)]
pub enum JobPhase {
    /// Waiting for a browser session.
    Queued,
    /// Holding a session and working.
    Running,
    /// Ended; the outcome is final.
    Finished(Box<RetrievalOutcome>),
}

impl JobPhase {
    /// Short name used in responses.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Finished(_) => "finished",
        }
    }
}

/// Summary of a job for listings.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    /// Job id.
    pub job_id: u64,
    /// Human-readable query.
    pub query: String,
    /// `queued`, `running` or `finished`.
    pub state: &'static str,
    /// Submission time.
    pub created_at: DateTime<Utc>,
}

/// One submitted job.
#[derive(Debug)]
pub struct JobEntry {
    id: u64,
    query: Query,
    created_at: DateTime<Utc>,
    phase: RwLock<JobPhase>,
    cancel: CancellationToken,
    sink: MemorySink,
    events: broadcast::Sender<RetrievalEvent>,
}

impl JobEntry {
    fn new(id: u64, query: Query) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            id,
            query,
            created_at: Utc::now(),
            phase: RwLock::new(JobPhase::Queued),
            cancel: CancellationToken::new(),
            sink: MemorySink::new(),
            events,
        }
    }

    /// Job id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The submitted query.
    #[must_use]
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Submission time.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Snapshot of the current phase.
    #[must_use]
    pub fn phase(&self) -> JobPhase {
        self.phase
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the job has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(
            *self.phase.read().unwrap_or_else(PoisonError::into_inner),
            JobPhase::Finished(_)
        )
    }

    /// Documents stored so far.
    #[must_use]
    pub fn sink(&self) -> &MemorySink {
        &self.sink
    }

    /// Live progress events. Subscribe before checking the phase to miss nothing.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RetrievalEvent> {
        self.events.subscribe()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        info!(job_id = self.id, "cancellation requested");
        self.cancel.cancel();
    }

    /// Listing row for this job.
    #[must_use]
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.id,
            query: self.query.to_string(),
            state: self.phase().name(),
            created_at: self.created_at,
        }
    }

    fn set_phase(&self, phase: JobPhase) {
        *self.phase.write().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    fn observe(&self, event: RetrievalEvent) {
        if matches!(
            event,
            RetrievalEvent::StageChanged {
                stage: JobStage::SessionOpen,
                ..
            }
        ) {
            self.mark_running();
        }
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn mark_running(&self) {
        let mut phase = self.phase.write().unwrap_or_else(PoisonError::into_inner);
        if matches!(*phase, JobPhase::Queued) {
            *phase = JobPhase::Running;
        }
    }
}

/// All jobs known to the service, by id.
#[derive(Debug)]
pub struct JobRegistry {
    jobs: DashMap<u64, Arc<JobEntry>>,
    keep_finished: usize,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::with_retention(DEFAULT_KEEP_FINISHED)
    }
}

impl JobRegistry {
    /// Creates an empty registry keeping [`DEFAULT_KEEP_FINISHED`] finished jobs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry keeping at most `keep_finished` finished jobs.
    #[must_use]
    pub fn with_retention(keep_finished: usize) -> Self {
        Self {
            jobs: DashMap::new(),
            keep_finished,
        }
    }

    /// Job by id.
    #[must_use]
    pub fn get(&self, id: u64) -> Option<Arc<JobEntry>> {
        self.jobs.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Every job, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<JobEntry>> {
        let mut jobs: Vec<Arc<JobEntry>> =
            self.jobs.iter().map(|e| Arc::clone(e.value())).collect();
        jobs.sort_by_key(|job| job.id);
        jobs
    }

    /// Number of jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether no job was submitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Validates `query` and starts it in the background.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// The [`QueryError`] if the query is outside what the orchestrator accepts.
    pub fn submit(
        &self,
        orchestrator: &Arc<RetrievalOrchestrator>,
        query: Query,
    ) -> Result<Arc<JobEntry>, QueryError> {
        orchestrator.validate_query(&query)?;

        self.prune();
        let id = orchestrator.allocate_job_id();
        let entry = Arc::new(JobEntry::new(id, query));
        self.jobs.insert(id, Arc::clone(&entry));
        info!(job_id = id, query = %entry.query, "job submitted");

        tokio::spawn(drive(Arc::clone(orchestrator), Arc::clone(&entry)));
        Ok(entry)
    }

    /// Drops the oldest finished jobs beyond the retention limit.
    fn prune(&self) {
        let mut finished: Vec<u64> = self
            .jobs
            .iter()
            .filter(|e| e.value().is_finished())
            .map(|e| *e.key())
            .collect();
        if finished.len() <= self.keep_finished {
            return;
        }
        finished.sort_unstable();
        let excess = finished.len() - self.keep_finished;
        for id in finished.into_iter().take(excess) {
            self.jobs.remove(&id);
            debug!(job_id = id, "dropped finished job");
        }
    }
}

/// Runs a job to completion, tracking its phase from its own events.
///
/// Events are relayed to subscribers through the entry's channel. The phase
/// becomes `Finished` before the final event is relayed, so a subscriber that
/// sees an unfinished phase is guaranteed to receive `job_finished`.
async fn drive(orchestrator: Arc<RetrievalOrchestrator>, entry: Arc<JobEntry>) {
    let (relay, mut events) = broadcast::channel(EVENT_CAPACITY);
    let sink: Arc<dyn DocumentSink> = Arc::new(entry.sink.clone());
    let run = orchestrator.run_job(
        entry.id,
        entry.query.clone(),
        sink,
        &entry.cancel,
        Some(relay),
    );
    tokio::pin!(run);

    let mut listening = true;
    let outcome = loop {
        tokio::select! {
            outcome = &mut run => break outcome,
            event = events.recv(), if listening => match event {
                Ok(event) => entry.observe(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(job_id = entry.id, skipped, "job events lagged");
                }
                Err(broadcast::error::RecvError::Closed) => listening = false,
            },
        }
    };

    debug!(job_id = entry.id, status = ?outcome.status(), "job finished");
    entry.set_phase(JobPhase::Finished(Box::new(outcome)));
    loop {
        match events.try_recv() {
            Ok(event) => entry.observe(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => {}
            Err(_) => break,
        }
    }
}
