//! HTTP job service.
//!
//! | Method   | Path                               | Purpose                         |
//! |----------|------------------------------------|---------------------------------|
//! | `POST`   | `/jobs`                            | submit a query, returns 202     |
//! | `GET`    | `/jobs`                            | list jobs                       |
//! | `GET`    | `/jobs/:id`                        | job state and final outcome     |
//! | `DELETE` | `/jobs/:id`                        | cancel a running job            |
//! | `GET`    | `/jobs/:id/documents/:key`         | bytes of a stored document      |
//! | `GET`    | `/jobs/:id/events`                 | progress as server-sent events  |
//! | `GET`    | `/health`                          | pool capacity and job count     |

mod error_response;
mod jobs;
mod routes;
mod state;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

pub use error_response::{ApiError, ErrorBody, ErrorDetail};
pub use jobs::{DEFAULT_KEEP_FINISHED, JobEntry, JobPhase, JobRegistry, JobSummary};
pub use routes::{DocumentLink, Health, JobAccepted, JobView};
pub use state::AppState;

/// Builds the service router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/jobs", post(routes::submit_job).get(routes::list_jobs))
        .route(
            "/jobs/:id",
            get(routes::get_job).delete(routes::cancel_job),
        )
        .route(
            "/jobs/:id/documents/:key",
            get(routes::get_document),
        )
        .route("/jobs/:id/events", get(routes::job_events))
        .route("/health", get(routes::health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
