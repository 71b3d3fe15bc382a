//! HTTP client for direct document links.

use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, COOKIE, REFERER, RETRY_AFTER};
use reqwest::{Client, ClientBuilder};
use tracing::debug;

use super::FetchFailure;
use crate::session::{SessionCookie, cookie_header};
use crate::user_agent;

/// Thin wrapper over `reqwest` that replays browser cookies.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

/// A successful response, ready to stream.
#[derive(Debug)]
pub struct DocumentResponse {
    /// The response being streamed.
    pub response: reqwest::Response,
    /// `Content-Length`, when the server sent one.
    pub content_length: Option<u64>,
    /// `Content-Type` header value.
    pub content_type: Option<String>,
}

impl HttpClient {
    /// Builds a client with the given connect and read timeouts.
    ///
    /// # Errors
    ///
    /// Returns the builder error if TLS or proxy setup fails.
    pub fn new(connect_timeout_secs: u64, read_timeout_secs: u64) -> Result<Self, reqwest::Error> {
        let client = base_client_builder(connect_timeout_secs, read_timeout_secs).build()?;
        Ok(Self { client })
    }

    /// Issues a GET carrying the session's cookies.
    ///
    /// # Errors
    ///
    /// A [`FetchFailure`] for transport errors and non-success statuses.
    pub async fn get(
        &self,
        url: &str,
        cookies: &[SessionCookie],
        referer: Option<&str>,
    ) -> Result<DocumentResponse, FetchFailure> {
        let mut request = self.client.get(url);
        if let Some(header) = cookie_header(cookies) {
            request = request.header(COOKIE, header);
        }
        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchFailure::network(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(std::string::ToString::to_string);
            debug!(url, status = status.as_u16(), "document request failed");
            return Err(FetchFailure::from_status(url, status.as_u16(), retry_after));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(std::string::ToString::to_string);
        Ok(DocumentResponse {
            content_length: response.content_length(),
            content_type,
            response,
        })
    }
}

fn base_client_builder(connect_timeout_secs: u64, read_timeout_secs: u64) -> ClientBuilder {
    Client::builder()
        .connect_timeout(Duration::from_secs(connect_timeout_secs))
        .timeout(Duration::from_secs(read_timeout_secs))
        .gzip(true)
        .user_agent(user_agent::default_download_user_agent())
}
