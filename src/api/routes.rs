//! Route handlers.

use std::convert::Infallible;

use axum::Json;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use futures_util::stream::{self, BoxStream};
use futures_util::{StreamExt, future};
use serde::Serialize;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::warn;
use url::Url;

use super::error_response::ApiError;
use super::jobs::{JobEntry, JobPhase, JobSummary};
use super::state::AppState;
use crate::orchestrator::{RetrievalEvent, RetrievalOutcome};
use crate::query::{Query, QueryRequest};
use crate::sink::content_type_for_extension;

/// Response to a job submission.
#[derive(Debug, Serialize)]
pub struct JobAccepted {
    /// Id of the new job.
    pub job_id: u64,
    /// Always `queued`.
    pub state: &'static str,
    /// Path of the job resource.
    pub href: String,
    /// Path of the job's event stream.
    pub events: String,
}

/// Link to a stored document.
#[derive(Debug, Serialize)]
pub struct DocumentLink {
    /// Job-wide document key.
    pub key: String,
    /// Row identifier.
    pub identifier: String,
    /// Path serving the document bytes.
    pub href: String,
}

/// Full view of one job.
#[derive(Debug, Serialize)]
pub struct JobView {
    /// Job id.
    pub job_id: u64,
    /// `queued`, `running` or `finished`.
    pub state: &'static str,
    /// Submitted query.
    pub query: Query,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Documents stored so far.
    pub documents_stored: usize,
    /// Final outcome once finished.
    pub outcome: Option<RetrievalOutcome>,
    /// Links to stored documents once finished.
    pub documents: Vec<DocumentLink>,
}

/// Service health.
#[derive(Debug, Serialize)]
pub struct Health {
    /// Always `ok`.
    pub status: &'static str,
    /// Sessions that can be opened right now.
    pub sessions_available: usize,
    /// Session pool size.
    pub max_sessions: usize,
    /// Jobs held by the registry.
    pub jobs: usize,
}

/// URL path of a document, with the key percent-encoded as one segment.
fn document_path(job_id: u64, key: &str) -> String {
    let Ok(mut url) = Url::parse("http://localhost/") else {
        return String::new();
    };
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.extend(["jobs", &job_id.to_string(), "documents", key]);
    }
    url.path().to_string()
}

fn job_view(entry: &JobEntry) -> JobView {
    let phase = entry.phase();
    let state = phase.name();
    let (outcome, documents) = match phase {
        JobPhase::Finished(outcome) => {
            let documents = outcome
                .succeeded()
                .iter()
                .map(|doc| DocumentLink {
                    key: doc.key.clone(),
                    identifier: doc.identifier.clone(),
                    href: document_path(entry.id(), &doc.key),
                })
                .collect();
            (Some(*outcome), documents)
        }
        JobPhase::Queued | JobPhase::Running => (None, Vec::new()),
    };
    JobView {
        job_id: entry.id(),
        state,
        query: entry.query().clone(),
        created_at: entry.created_at(),
        documents_stored: entry.sink().len(),
        outcome,
        documents,
    }
}

fn lookup(state: &AppState, id: u64) -> Result<std::sync::Arc<JobEntry>, ApiError> {
    state.jobs.get(id).ok_or(ApiError::JobNotFound(id))
}

/// `POST /jobs`
pub async fn submit_job(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::InvalidRequest(rejection.body_text()))?;
    let query = request.into_query()?;
    let entry = state.jobs.submit(&state.orchestrator, query)?;
    let href = format!("/jobs/{}", entry.id());
    Ok((
        StatusCode::ACCEPTED,
        Json(JobAccepted {
            job_id: entry.id(),
            state: "queued",
            events: format!("{href}/events"),
            href,
        }),
    ))
}

/// `GET /jobs`
pub async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobSummary>> {
    Json(state.jobs.list().iter().map(|job| job.summary()).collect())
}

/// `GET /jobs/:id`
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<JobView>, ApiError> {
    let entry = lookup(&state, id)?;
    Ok(Json(job_view(&entry)))
}

/// `DELETE /jobs/:id`
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<(StatusCode, Json<JobSummary>), ApiError> {
    let entry = lookup(&state, id)?;
    if entry.is_finished() {
        return Err(ApiError::JobFinished(id));
    }
    entry.cancel();
    Ok((StatusCode::ACCEPTED, Json(entry.summary())))
}

/// `GET /jobs/:id/documents/:key`
pub async fn get_document(
    State(state): State<AppState>,
    Path((id, key)): Path<(u64, String)>,
) -> Result<Response, ApiError> {
    let entry = lookup(&state, id)?;
    let document = entry
        .sink()
        .get(&key)
        .ok_or(ApiError::DocumentNotFound { job_id: id, key })?;
    Ok((
        [(
            header::CONTENT_TYPE,
            content_type_for_extension(&document.extension),
        )],
        Body::from(document.bytes),
    )
        .into_response())
}

fn to_sse(event: &RetrievalEvent) -> SseEvent {
    match serde_json::to_value(event) {
        Ok(json) => {
            let name = json
                .get("event")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("message")
                .to_string();
            SseEvent::default().event(name).data(json.to_string())
        }
        Err(error) => {
            warn!(%error, "could not serialize job event");
            SseEvent::default().event("error").data(error.to_string())
        }
    }
}

/// `GET /jobs/:id/events`
///
/// Streams progress as server-sent events named after the event kind. The
/// stream ends after `job_finished`; a finished job yields just that event.
pub async fn job_events(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Sse<BoxStream<'static, Result<SseEvent, Infallible>>>, ApiError> {
    let entry = lookup(&state, id)?;
    let receiver = entry.subscribe();

    let stream = if let JobPhase::Finished(outcome) = entry.phase() {
        let last = RetrievalEvent::JobFinished {
            job_id: id,
            status: outcome.status().clone(),
            succeeded: outcome.succeeded().len(),
            failed: outcome.failed().len(),
        };
        stream::once(future::ready(Ok(to_sse(&last)))).boxed()
    } else {
        BroadcastStream::new(receiver)
            .scan(false, |finished, item| {
                if *finished {
                    return future::ready(None);
                }
                if let Ok(event) = &item {
                    *finished = event.is_terminal();
                }
                future::ready(Some(item))
            })
            .map(|item| {
                Ok(match item {
                    Ok(event) => to_sse(&event),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => SseEvent::default()
                        .event("error")
                        .data(format!("{skipped} events dropped")),
                })
            })
            .boxed()
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<Health> {
    let pool = state.orchestrator.pool();
    Json(Health {
        status: "ok",
        sessions_available: pool.available(),
        max_sessions: pool.max_sessions(),
        jobs: state.jobs.len(),
    })
}
