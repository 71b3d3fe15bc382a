//! Per-document fetch failures.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::FailureType;
use crate::session::SessionError;
use crate::sink::SinkError;

/// Why one document could not be stored.
///
/// Failures are recorded against the document and never abort a job, with
/// the exception of [`FetchFailure::ResultsLost`].
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FetchFailure {
    /// The document is gone (404/410).
    #[error("HTTP {status}: document not found at {url}")]
    NotFound {
        /// Requested URL.
        url: String,
        /// Status returned.
        status: u16,
    },

    /// Fewer bytes arrived than expected.
    #[error(
        "incomplete document: got {actual} bytes{}",
        .expected.map(|bytes| format!(", expected {bytes}")).unwrap_or_default()
    )]
    Incomplete {
        /// Advertised size, when known.
        expected: Option<u64>,
        /// Bytes received.
        actual: u64,
    },

    /// Timeout, connection failure or server error.
    #[error("transient network failure: {message}")]
    TransientNetwork {
        /// What failed.
        message: String,
    },

    /// The portal throttled us (429).
    #[error(
        "rate limited{}",
        .retry_after.as_deref().map(|v| format!(" (Retry-After: {v})")).unwrap_or_default()
    )]
    RateLimited {
        /// Raw `Retry-After` header value.
        retry_after: Option<String>,
    },

    /// The server refused the request (other 4xx).
    #[error("HTTP {status}: request rejected for {url}")]
    Rejected {
        /// Requested URL.
        url: String,
        /// Status returned.
        status: u16,
    },

    /// The sink could not store the bytes.
    #[error("storage failed: {message}")]
    Sink {
        /// Sink error text.
        message: String,
    },

    /// The document viewer misbehaved.
    #[error("document viewer failed: {message}")]
    Session {
        /// Session error text.
        message: String,
    },

    /// The browser could not return to the results page after the viewer.
    #[error("lost the results page: {message}")]
    ResultsLost {
        /// Session error text.
        message: String,
    },
}

impl FetchFailure {
    /// Maps an unsuccessful HTTP status.
    #[must_use]
    pub fn from_status(url: &str, status: u16, retry_after: Option<String>) -> Self {
        match status {
            404 | 410 => Self::NotFound {
                url: url.to_string(),
                status,
            },
            429 => Self::RateLimited { retry_after },
            408 | 500..=599 => Self::TransientNetwork {
                message: format!("HTTP {status} from {url}"),
            },
            _ => Self::Rejected {
                url: url.to_string(),
                status,
            },
        }
    }

    /// Maps a transport error from the HTTP client.
    #[must_use]
    pub fn network(url: &str, error: &reqwest::Error) -> Self {
        let kind = if error.is_timeout() {
            "timeout"
        } else if error.is_connect() {
            "connection failed"
        } else {
            "request failed"
        };
        Self::TransientNetwork {
            message: format!("{kind} for {url}: {error}"),
        }
    }

    /// Wraps a sink error.
    #[must_use]
    pub fn sink(error: &SinkError) -> Self {
        Self::Sink {
            message: error.to_string(),
        }
    }

    /// Wraps a viewer-side session error. Timeouts count as transient.
    #[must_use]
    pub fn session(error: &SessionError) -> Self {
        if error.is_retryable() {
            Self::TransientNetwork {
                message: error.to_string(),
            }
        } else {
            Self::Session {
                message: error.to_string(),
            }
        }
    }

    /// Classification for the retry policy.
    #[must_use]
    pub fn failure_type(&self) -> FailureType {
        match self {
            Self::TransientNetwork { .. } => FailureType::Transient,
            Self::RateLimited { .. } => FailureType::RateLimited,
            _ => FailureType::Permanent,
        }
    }

    /// Whether the job can no longer use its session.
    #[must_use]
    pub fn is_results_lost(&self) -> bool {
        matches!(self, Self::ResultsLost { .. })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            FetchFailure::from_status("http://x/a.pdf", 404, None),
            FetchFailure::NotFound { status: 404, .. }
        ));
        assert!(matches!(
            FetchFailure::from_status("http://x/a.pdf", 410, None),
            FetchFailure::NotFound { status: 410, .. }
        ));
        assert!(matches!(
            FetchFailure::from_status("http://x/a.pdf", 429, Some("5".into())),
            FetchFailure::RateLimited { retry_after: Some(ref v) } if v == "5"
        ));
        assert!(matches!(
            FetchFailure::from_status("http://x/a.pdf", 503, None),
            FetchFailure::TransientNetwork { .. }
        ));
        assert!(matches!(
            FetchFailure::from_status("http://x/a.pdf", 408, None),
            FetchFailure::TransientNetwork { .. }
        ));
        assert!(matches!(
            FetchFailure::from_status("http://x/a.pdf", 403, None),
            FetchFailure::Rejected { status: 403, .. }
        ));
    }

    #[test]
    fn test_only_network_and_rate_limits_are_retryable() {
        let transient = FetchFailure::TransientNetwork {
            message: "reset".into(),
        };
        assert_eq!(transient.failure_type(), FailureType::Transient);
        assert_eq!(
            FetchFailure::RateLimited { retry_after: None }.failure_type(),
            FailureType::RateLimited
        );
        let incomplete = FetchFailure::Incomplete {
            expected: Some(100),
            actual: 10,
        };
        assert_eq!(incomplete.failure_type(), FailureType::Permanent);
    }

    #[test]
    fn test_session_timeouts_become_transient() {
        let timeout = SessionError::timeout("viewer", Duration::from_secs(1));
        assert_eq!(
            FetchFailure::session(&timeout).failure_type(),
            FailureType::Transient
        );
        let missing = SessionError::missing_element("#viewer");
        assert!(matches!(FetchFailure::session(&missing), FetchFailure::Session { .. }));
    }

    #[test]
    fn test_incomplete_message_mentions_sizes() {
        let failure = FetchFailure::Incomplete {
            expected: Some(2048),
            actual: 12,
        };
        assert_eq!(
            failure.to_string(),
            "incomplete document: got 12 bytes, expected 2048"
        );
    }

    #[test]
    fn test_serializes_with_kind_tag() {
        let json = serde_json::to_value(FetchFailure::NotFound {
            url: "http://x".into(),
            status: 404,
        })
        .unwrap_or_default();
        assert_eq!(json["kind"], "not_found");
        assert_eq!(json["status"], 404);
    }
}
