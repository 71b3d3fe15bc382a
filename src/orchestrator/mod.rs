//! Retrieval jobs.
//!
//! [`RetrievalOrchestrator::run`] takes a [`Query`] through the whole
//! pipeline on one leased browser session:
//!
//! 1. validate the query and lease a session from the pool
//! 2. for "all courts", list the courts the portal offers
//! 3. per court, day and case type: submit the search, walk the result pages
//!    and fetch every new document
//! 4. release the session and seal the [`RetrievalOutcome`]
//!
//! Progress is tracked by an explicit state machine (see [`JobStage`]).
//! Retryable failures are retried in place with backoff; anything else ends
//! the job as `Aborted` while keeping what was already stored. Failures of
//! single documents are recorded and never end the job. Cancellation is
//! checked between stages; fetches already in flight are allowed to finish.
//!
//! Documents with a direct link are downloaded by a small worker pool using
//! a cookie snapshot, so pagination continues while they download.
//! Documents that need the portal's viewer are fetched inline on the session.

mod events;
mod outcome;
mod state;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{Local, NaiveDate};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, broadcast};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

pub use events::RetrievalEvent;
pub use outcome::{FailedDocument, JobStatus, OutcomeBuilder, RetrievalOutcome, RetrievedDocument};
pub use state::{IllegalTransition, JobStage};

use self::events::EventEmitter;
use self::state::JobMachine;
use crate::config::{ConfigError, EngineConfig};
use crate::error::RetrievalError;
use crate::fetch::{DocumentFetcher, FetchResult, HttpClient};
use crate::navigator::{FormNavigator, SubmissionResult};
use crate::paginator::{DocumentDescriptor, DocumentPages, DownloadRef, ResultPaginator};
use crate::query::{CourtLocation, CourtSelection, DateWindow, Query, QueryError, Search};
use crate::rate_limiter::RateLimiter;
use crate::retry::{FailureType, RetryDecision, RetryPolicy};
use crate::session::{BrowserDriver, PoolError, Session, SessionCookie, SessionPool};
use crate::sink::DocumentSink;

/// Errors building an orchestrator.
#[derive(Debug, Error)]
pub enum SetupError {
    /// The configuration failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The session pool could not be created.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// The HTTP client could not be built.
    #[error("could not build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Why a job stopped early.
#[derive(Debug)]
enum Halt {
    Cancelled,
    Aborted { stage: JobStage, reason: String },
}

impl Halt {
    fn aborted(stage: JobStage, reason: impl ToString) -> Self {
        Self::Aborted {
            stage,
            reason: reason.to_string(),
        }
    }
}

async fn pause(cancel: &CancellationToken, delay: Duration) -> Result<(), Halt> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Halt::Cancelled),
        () = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Logs a finished fetch and publishes it.
fn report_fetch(
    job_id: u64,
    events: &EventEmitter,
    descriptor: &DocumentDescriptor,
    result: &FetchResult,
    attempts: u32,
) {
    let identifier = descriptor.identifier().to_string();
    match result {
        Ok(success) => {
            info!(
                job_id,
                identifier = %identifier,
                location = %success.location,
                bytes = success.bytes,
                attempts,
                "document saved"
            );
            events.emit(RetrievalEvent::DocumentSaved {
                job_id,
                identifier,
                location: success.location.clone(),
                bytes: success.bytes,
            });
        }
        Err(failure) => {
            warn!(job_id, identifier = %identifier, attempts, error = %failure, "document failed");
            events.emit(RetrievalEvent::DocumentFailed {
                job_id,
                identifier,
                reason: failure.to_string(),
            });
        }
    }
}

/// Mutable state of one running job.
struct Job<'a> {
    id: u64,
    machine: JobMachine,
    outcome: OutcomeBuilder,
    events: EventEmitter,
    seen: HashSet<String>,
    sink: Arc<dyn DocumentSink>,
    cancel: &'a CancellationToken,
}

impl Job<'_> {
    fn transition(&mut self, next: JobStage) -> Result<(), Halt> {
        if let Err(illegal) = self.machine.advance(next) {
            error!(job_id = self.id, %illegal, "job state machine violated");
            return Err(Halt::aborted(
                self.machine.stage(),
                format!("internal error: {illegal}"),
            ));
        }
        self.events.emit(RetrievalEvent::StageChanged {
            job_id: self.id,
            stage: next,
        });
        Ok(())
    }

    fn check_cancelled(&self) -> Result<(), Halt> {
        if self.cancel.is_cancelled() {
            Err(Halt::Cancelled)
        } else {
            Ok(())
        }
    }

    fn record(&mut self, descriptor: &DocumentDescriptor, result: FetchResult, attempts: u32) {
        match result {
            Ok(success) => self.outcome.record_success(descriptor, success, attempts),
            Err(failure) => self.outcome.record_failure(descriptor, failure, attempts),
        }
    }

    fn finish(mut self, result: Result<(), Halt>) -> RetrievalOutcome {
        let (status, terminal) = match result {
            Ok(()) => (JobStatus::Completed, JobStage::Finalized),
            Err(Halt::Cancelled) => (JobStatus::Cancelled, JobStage::Cancelled),
            Err(Halt::Aborted { stage, reason }) => {
                (JobStatus::Aborted { stage, reason }, JobStage::Aborted)
            }
        };
        if self.machine.stage() != terminal {
            if let Err(illegal) = self.machine.advance(terminal) {
                debug!(job_id = self.id, %illegal, "terminal transition skipped");
            }
        }

        let succeeded = self.outcome.succeeded_count();
        let failed = self.outcome.failed_count();
        match &status {
            JobStatus::Completed => info!(job_id = self.id, succeeded, failed, "job completed"),
            JobStatus::Cancelled => info!(job_id = self.id, succeeded, failed, "job cancelled"),
            JobStatus::Aborted { stage, reason } => {
                warn!(job_id = self.id, %stage, %reason, succeeded, failed, "job aborted");
            }
        }
        self.events.emit(RetrievalEvent::JobFinished {
            job_id: self.id,
            status: status.clone(),
            succeeded,
            failed,
        });
        self.outcome.finish(status)
    }
}

struct WorkerReport {
    descriptor: DocumentDescriptor,
    result: FetchResult,
    attempts: u32,
}

/// Bounded pool of direct-link downloads for one job.
struct FetchWorkers {
    tasks: JoinSet<WorkerReport>,
    permits: Arc<Semaphore>,
}

impl FetchWorkers {
    fn new(limit: usize) -> Self {
        Self {
            tasks: JoinSet::new(),
            permits: Arc::new(Semaphore::new(limit.max(1))),
        }
    }

    /// Waits for a free worker, then starts the download in the background.
    async fn dispatch(
        &mut self,
        job: &Job<'_>,
        fetcher: &DocumentFetcher,
        url: String,
        cookies: Arc<Vec<SessionCookie>>,
        descriptor: DocumentDescriptor,
    ) {
        let permit: Option<OwnedSemaphorePermit> =
            Arc::clone(&self.permits).acquire_owned().await.ok();
        let fetcher = fetcher.clone();
        let sink = Arc::clone(&job.sink);
        let events = job.events.clone();
        let job_id = job.id;
        debug!(job_id, identifier = descriptor.identifier(), "dispatching download");

        self.tasks.spawn(async move {
            let _permit = permit;
            let (result, attempts) = fetcher
                .fetch_direct_with_retry(&url, &cookies, &descriptor, sink.as_ref())
                .await;
            report_fetch(job_id, &events, &descriptor, &result, attempts);
            WorkerReport {
                descriptor,
                result,
                attempts,
            }
        });
    }

    /// Waits for every download and records the results.
    async fn drain(&mut self, job: &mut Job<'_>) {
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(report) => job.record(&report.descriptor, report.result, report.attempts),
                Err(join_error) => {
                    error!(job_id = job.id, %join_error, "download worker panicked");
                }
            }
        }
    }
}

/// Runs retrieval jobs against one portal.
pub struct RetrievalOrchestrator {
    pool: SessionPool,
    navigator: FormNavigator,
    paginator: ResultPaginator,
    fetcher: DocumentFetcher,
    policy: RetryPolicy,
    dates: DateWindow,
    download_workers: usize,
    today: Option<NaiveDate>,
    next_job_id: AtomicU64,
}

impl std::fmt::Debug for RetrievalOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalOrchestrator")
            .field("pool", &self.pool)
            .field("download_workers", &self.download_workers)
            .finish_non_exhaustive()
    }
}

impl RetrievalOrchestrator {
    /// Builds the pipeline from configuration over a browser driver.
    ///
    /// # Errors
    ///
    /// [`SetupError`] if the configuration is invalid or the HTTP client cannot be built.
    pub fn new(config: &EngineConfig, driver: Arc<dyn BrowserDriver>) -> Result<Self, SetupError> {
        config.validate()?;

        let layout = Arc::new(config.portal.clone());
        let rate_limiter = Arc::new(RateLimiter::new(Duration::from_millis(
            config.limits.rate_limit_ms,
        )));
        let policy = config.retry.policy();
        let ready_timeout = config.timeouts.ready();

        let pool = SessionPool::new(driver, config.limits.max_sessions, config.timeouts.command())?;
        let client = HttpClient::new(
            config.timeouts.http_connect_secs,
            config.timeouts.http_read_secs,
        )?;

        Ok(Self {
            pool,
            navigator: FormNavigator::new(
                Arc::clone(&layout),
                ready_timeout,
                Arc::clone(&rate_limiter),
            ),
            paginator: ResultPaginator::new(
                Arc::clone(&layout),
                policy.clone(),
                ready_timeout,
                config.limits.max_pages,
            ),
            fetcher: DocumentFetcher::new(
                client,
                layout,
                rate_limiter,
                policy.clone(),
                ready_timeout,
                config.limits.min_document_bytes,
            ),
            policy,
            dates: config.dates.clone(),
            download_workers: config.limits.download_workers,
            today: None,
            next_job_id: AtomicU64::new(1),
        })
    }

    /// Pins the date queries are validated against. Defaults to the local date.
    #[must_use]
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    /// The session pool shared by all jobs.
    #[must_use]
    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    /// Checks a query against the configured date window without running it.
    ///
    /// # Errors
    ///
    /// The first [`QueryError`] found.
    pub fn validate_query(&self, query: &Query) -> Result<(), QueryError> {
        query.validate(&self.dates, self.today())
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Local::now().date_naive())
    }

    /// Reserves a job identifier for [`RetrievalOrchestrator::run_job`].
    pub fn allocate_job_id(&self) -> u64 {
        self.next_job_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Runs a query to completion, storing documents in `sink`.
    ///
    /// Never fails: every problem is reported in the outcome's status or
    /// failed list.
    pub async fn run(
        &self,
        query: Query,
        sink: Arc<dyn DocumentSink>,
        cancel: &CancellationToken,
    ) -> RetrievalOutcome {
        let job_id = self.allocate_job_id();
        self.run_job(job_id, query, sink, cancel, None).await
    }

    /// [`RetrievalOrchestrator::run`] with a caller-chosen id and an optional event channel.
    #[instrument(skip_all, fields(job_id = job_id))]
    pub async fn run_job(
        &self,
        job_id: u64,
        query: Query,
        sink: Arc<dyn DocumentSink>,
        cancel: &CancellationToken,
        events: Option<broadcast::Sender<RetrievalEvent>>,
    ) -> RetrievalOutcome {
        let mut job = Job {
            id: job_id,
            machine: JobMachine::new(job_id),
            outcome: OutcomeBuilder::new(job_id, query.clone()),
            events: EventEmitter::new(events),
            seen: HashSet::new(),
            sink,
            cancel,
        };
        info!(%query, "retrieval job started");
        job.events.emit(RetrievalEvent::JobStarted {
            job_id,
            query: query.to_string(),
        });

        let result = self.execute(&mut job, &query, self.today()).await;
        job.finish(result)
    }

    async fn execute(&self, job: &mut Job<'_>, query: &Query, today: NaiveDate) -> Result<(), Halt> {
        query
            .validate(&self.dates, today)
            .map_err(|e| Halt::aborted(JobStage::Init, RetrievalError::from(e)))?;
        job.check_cancelled()?;

        let leased = tokio::select! {
            biased;
            () = job.cancel.cancelled() => return Err(Halt::Cancelled),
            leased = self.pool.acquire() => leased,
        };
        let mut session = leased
            .map_err(|e| Halt::aborted(JobStage::SessionOpen, RetrievalError::from(e)))?;

        let mut workers = FetchWorkers::new(self.download_workers);
        let result = match job.transition(JobStage::SessionOpen) {
            Ok(()) => self.run_searches(job, &mut session, query, &mut workers).await,
            Err(halt) => Err(halt),
        };
        workers.drain(job).await;
        session.release().await;

        result?;
        job.transition(JobStage::Finalized)
    }

    async fn run_searches(
        &self,
        job: &mut Job<'_>,
        session: &mut Session,
        query: &Query,
        workers: &mut FetchWorkers,
    ) -> Result<(), Halt> {
        let courts = match query.court() {
            CourtSelection::Named(name) => vec![name.trim().to_string()],
            CourtSelection::All => {
                self.list_courts_with_retry(job.cancel, session, query.location())
                    .await?
            }
        };

        for search in query.searches(&courts) {
            job.check_cancelled()?;
            self.run_search(job, session, &search, workers).await?;
        }
        Ok(())
    }

    #[instrument(skip_all, fields(court = %search.court, date = %search.date, case_type = %search.case_type))]
    async fn run_search(
        &self,
        job: &mut Job<'_>,
        session: &mut Session,
        search: &Search,
        workers: &mut FetchWorkers,
    ) -> Result<(), Halt> {
        job.events.emit(RetrievalEvent::SearchStarted {
            job_id: job.id,
            court: search.court.clone(),
            date: search.date,
            case_type: search.case_type,
        });

        let submission = self.submit_with_retry(job.cancel, session, search).await?;
        job.outcome.search_run();
        job.transition(JobStage::SearchSubmitted)?;
        match submission {
            SubmissionResult::ResultsReady => {}
            SubmissionResult::NoResults => return job.transition(JobStage::SessionOpen),
            SubmissionResult::RejectedInput(reason) => {
                return Err(Halt::aborted(
                    JobStage::SearchSubmitted,
                    RetrievalError::rejected(reason),
                ));
            }
        }

        job.transition(JobStage::Paginating)?;
        let cookies = session.cookies().await.map_err(|e| {
            Halt::aborted(
                JobStage::Paginating,
                RetrievalError::from_session("cookie snapshot", e),
            )
        })?;
        let cookies = Arc::new(cookies);

        let mut pages = self.paginator.list_documents(search);
        let walked = self
            .walk_pages(job, session, &mut pages, &cookies, workers)
            .await;
        job.outcome.add_pages(pages.pages_read());
        job.outcome.add_duplicates(pages.duplicates_skipped());
        walked?;

        job.transition(JobStage::SessionOpen)
    }

    async fn walk_pages(
        &self,
        job: &mut Job<'_>,
        session: &mut Session,
        pages: &mut DocumentPages,
        cookies: &Arc<Vec<SessionCookie>>,
        workers: &mut FetchWorkers,
    ) -> Result<(), Halt> {
        loop {
            job.check_cancelled()?;
            let descriptor = match pages.next(session).await {
                None => return Ok(()),
                Some(Ok(descriptor)) => descriptor,
                Some(Err(error)) => {
                    return Err(Halt::aborted(
                        JobStage::Paginating,
                        RetrievalError::from(error),
                    ));
                }
            };

            if !job.seen.insert(descriptor.key()) {
                debug!(key = %descriptor.key(), "already retrieved by this job");
                job.outcome.add_duplicates(1);
                job.events.emit(RetrievalEvent::DuplicateSkipped {
                    job_id: job.id,
                    identifier: descriptor.identifier().to_string(),
                });
                continue;
            }

            job.check_cancelled()?;
            job.transition(JobStage::Fetching)?;
            match descriptor.reference() {
                DownloadRef::Direct { url } => {
                    let url = url.clone();
                    workers
                        .dispatch(job, &self.fetcher, url, Arc::clone(cookies), descriptor)
                        .await;
                }
                DownloadRef::Interactive { .. } => {
                    let (result, attempts) = self
                        .fetcher
                        .fetch_with_retry(session, &descriptor, job.sink.as_ref())
                        .await;
                    report_fetch(job.id, &job.events, &descriptor, &result, attempts);
                    let lost = match &result {
                        Err(failure) if failure.is_results_lost() => Some(failure.to_string()),
                        _ => None,
                    };
                    job.record(&descriptor, result, attempts);
                    if let Some(reason) = lost {
                        return Err(Halt::aborted(JobStage::Fetching, reason));
                    }
                }
            }
            job.transition(JobStage::Paginating)?;
        }
    }

    /// Backoff before the next attempt, or the reason to stop.
    fn retry_delay(&self, error: &RetrievalError, attempt: u32) -> Result<Duration, String> {
        match self.policy.should_retry(error.failure_type(), attempt) {
            RetryDecision::Retry { delay, .. } => Ok(delay),
            RetryDecision::DoNotRetry { .. } if error.failure_type() == FailureType::Permanent => {
                Err(error.to_string())
            }
            RetryDecision::DoNotRetry { reason } => Err(format!("{error} ({reason})")),
        }
    }

    async fn submit_with_retry(
        &self,
        cancel: &CancellationToken,
        session: &mut Session,
        search: &Search,
    ) -> Result<SubmissionResult, Halt> {
        let mut attempt = 1;
        loop {
            match self.navigator.submit_search(session, search).await {
                Ok(submission) => return Ok(submission),
                Err(error) => match self.retry_delay(&error, attempt) {
                    Ok(delay) => {
                        warn!(attempt, delay_ms = delay.as_millis(), %error, "search failed, retrying");
                        pause(cancel, delay).await?;
                        attempt += 1;
                    }
                    Err(reason) => return Err(Halt::aborted(JobStage::SearchSubmitted, reason)),
                },
            }
        }
    }

    async fn list_courts_with_retry(
        &self,
        cancel: &CancellationToken,
        session: &mut Session,
        location: &CourtLocation,
    ) -> Result<Vec<String>, Halt> {
        let mut attempt = 1;
        loop {
            match self.navigator.list_courts(session, location).await {
                Ok(courts) => return Ok(courts),
                Err(error) => match self.retry_delay(&error, attempt) {
                    Ok(delay) => {
                        warn!(attempt, delay_ms = delay.as_millis(), %error, "court listing failed, retrying");
                        pause(cancel, delay).await?;
                        attempt += 1;
                    }
                    Err(reason) => return Err(Halt::aborted(JobStage::SessionOpen, reason)),
                },
            }
        }
    }
}
