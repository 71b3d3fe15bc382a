//! Cause-list retrieval engine.
//!
//! This library drives a browser session through a court portal's cause-list
//! search, walks the paginated results and stores every listed document in a
//! caller-provided sink.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`session`] - Browser session driver, WebDriver backend and session pool
//! - [`navigator`] - Search form submission and result classification
//! - [`paginator`] - Lazy walk over result pages producing document descriptors
//! - [`fetch`] - Document download with completeness checks
//! - [`sink`] - Storage destinations for downloaded documents
//! - [`orchestrator`] - End-to-end retrieval jobs with retry and cancellation
//! - [`api`] - HTTP job service built on the orchestrator
//! - [`config`] - Engine configuration loaded from TOML

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod config;
pub mod error;
pub mod fetch;
pub mod navigator;
pub mod orchestrator;
pub mod paginator;
pub mod portal;
pub mod query;
pub mod rate_limiter;
pub mod retry;
pub mod session;
pub mod sink;

mod user_agent;

// Re-export commonly used types
pub use config::{ConfigError, EngineConfig};
pub use error::RetrievalError;
pub use fetch::{DocumentFetcher, FetchFailure, FetchResult, FetchSuccess, HttpClient};
pub use navigator::{FormNavigator, SubmissionResult};
pub use orchestrator::{
    FailedDocument, JobStage, JobStatus, RetrievalEvent, RetrievalOrchestrator, RetrievalOutcome,
    RetrievedDocument, SetupError,
};
pub use paginator::{DocumentDescriptor, DocumentPages, DownloadRef, PaginationError, ResultPaginator};
pub use portal::PortalLayout;
pub use query::{
    CaseType, CourtLocation, CourtSelection, DateRange, DateWindow, Query, QueryError,
    QueryRequest, Search,
};
pub use rate_limiter::RateLimiter;
pub use retry::{DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy};
pub use session::{
    BrowserDriver, BrowserSession, PoolError, ReadyCondition, RowSnapshot, RowSpec, Session,
    SessionCookie, SessionError, SessionPool,
};
pub use sink::{DirectorySink, DocumentSink, MemorySink, SinkEntry, SinkError, SinkWriter};
