//! Document fetching.
//!
//! [`DocumentFetcher`] turns a [`DocumentDescriptor`] into stored bytes:
//!
//! - `Direct` references are downloaded over HTTP with the browser's
//!   cookies and streamed straight into the sink.
//! - `Interactive` references are opened through the portal's document
//!   viewer; the viewer's document link is downloaded, or the rendered page
//!   is printed to PDF when there is no link. The browser is then returned
//!   to the results page if the viewer opened.
//!
//! Every write is checked for completeness before it is committed. A
//! zero-byte, truncated or implausibly small body is aborted in the sink and
//! reported as [`FetchFailure::Incomplete`].

mod client;
mod error;

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

pub use client::{DocumentResponse, HttpClient};
pub use error::FetchFailure;

use crate::paginator::{DocumentDescriptor, DownloadRef, resolve_href};
use crate::portal::PortalLayout;
use crate::rate_limiter::{RateLimiter, parse_retry_after};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::session::{ReadyCondition, Session, SessionCookie, SessionError};
use crate::sink::{DocumentSink, SinkEntry, extension_from_content_type};

/// A stored document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchSuccess {
    /// Where the sink put it.
    pub location: String,
    /// Bytes written.
    pub bytes: u64,
    /// Lowercase hex SHA-256 of the bytes.
    pub sha256: String,
    /// File extension the document was stored with.
    pub extension: String,
}

/// Outcome of fetching one document.
pub type FetchResult = Result<FetchSuccess, FetchFailure>;

/// What the document viewer offered.
enum ViewerContent {
    Link {
        url: String,
        cookies: Vec<SessionCookie>,
    },
    Page(Vec<u8>),
}

/// Downloads documents listed by the paginator.
///
/// Cheap to clone; fetch workers each hold a clone.
#[derive(Debug, Clone)]
pub struct DocumentFetcher {
    client: HttpClient,
    layout: Arc<PortalLayout>,
    rate_limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    ready_timeout: Duration,
    min_document_bytes: u64,
}

impl DocumentFetcher {
    /// Creates a fetcher.
    #[must_use]
    pub fn new(
        client: HttpClient,
        layout: Arc<PortalLayout>,
        rate_limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
        ready_timeout: Duration,
        min_document_bytes: u64,
    ) -> Self {
        Self {
            client,
            layout,
            rate_limiter,
            policy,
            ready_timeout,
            min_document_bytes,
        }
    }

    /// Fetches one document once, using the session for cookies or the viewer.
    #[instrument(skip_all, fields(identifier = descriptor.identifier()))]
    pub async fn fetch(
        &self,
        session: &mut Session,
        descriptor: &DocumentDescriptor,
        sink: &dyn DocumentSink,
    ) -> FetchResult {
        match descriptor.reference() {
            DownloadRef::Direct { url } => {
                let cookies = session
                    .cookies()
                    .await
                    .map_err(|e| FetchFailure::session(&e))?;
                self.fetch_direct(url, &cookies, descriptor, sink).await
            }
            DownloadRef::Interactive { row } => {
                self.fetch_interactive(session, *row, descriptor, sink)
                    .await
            }
        }
    }

    /// Fetches with the retry policy. Returns the result and the attempts made.
    ///
    /// [`FetchFailure::ResultsLost`] is never retried.
    pub async fn fetch_with_retry(
        &self,
        session: &mut Session,
        descriptor: &DocumentDescriptor,
        sink: &dyn DocumentSink,
    ) -> (FetchResult, u32) {
        let mut attempt = 1;
        loop {
            let result = self.fetch(session, descriptor, sink).await;
            match result {
                Ok(success) => return (Ok(success), attempt),
                Err(failure) => match self.backoff(descriptor, &failure, attempt) {
                    Some(delay) => {
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => return (Err(failure), attempt),
                },
            }
        }
    }

    /// Downloads a direct link with a cookie snapshot; never touches the session.
    #[instrument(skip_all, fields(identifier = descriptor.identifier(), url = %url))]
    pub async fn fetch_direct(
        &self,
        url: &str,
        cookies: &[SessionCookie],
        descriptor: &DocumentDescriptor,
        sink: &dyn DocumentSink,
    ) -> FetchResult {
        self.rate_limiter.acquire(url).await;
        let document = self
            .client
            .get(url, cookies, Some(&self.layout.search_url))
            .await?;

        let extension = extension_for(document.content_type.as_deref(), url);
        let expected = document.content_length.or(descriptor.size_hint());
        let chunks = document
            .response
            .bytes_stream()
            .map(move |chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| FetchFailure::network(url, &e))
            })
            .boxed();

        let entry = SinkEntry::for_document(descriptor, &extension);
        self.store(sink, &entry, chunks, expected).await
    }

    /// [`DocumentFetcher::fetch_direct`] under the retry policy, honoring `Retry-After`.
    pub async fn fetch_direct_with_retry(
        &self,
        url: &str,
        cookies: &[SessionCookie],
        descriptor: &DocumentDescriptor,
        sink: &dyn DocumentSink,
    ) -> (FetchResult, u32) {
        let mut attempt = 1;
        loop {
            match self.fetch_direct(url, cookies, descriptor, sink).await {
                Ok(success) => return (Ok(success), attempt),
                Err(failure) => {
                    if let FetchFailure::RateLimited {
                        retry_after: Some(value),
                    } = &failure
                    {
                        if let Some(delay) = parse_retry_after(value) {
                            self.rate_limiter.record_rate_limit(url, delay);
                        }
                    }
                    match self.backoff(descriptor, &failure, attempt) {
                        Some(delay) => {
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        None => return (Err(failure), attempt),
                    }
                }
            }
        }
    }

    /// Delay before the next attempt, or `None` to give up.
    fn backoff(
        &self,
        descriptor: &DocumentDescriptor,
        failure: &FetchFailure,
        attempt: u32,
    ) -> Option<Duration> {
        if failure.is_results_lost() {
            return None;
        }
        match self.policy.should_retry(failure.failure_type(), attempt) {
            RetryDecision::Retry { delay, .. } => {
                let server_delay = match failure {
                    FetchFailure::RateLimited {
                        retry_after: Some(value),
                    } => parse_retry_after(value).unwrap_or_default(),
                    _ => Duration::ZERO,
                };
                let delay = delay.max(server_delay);
                warn!(
                    identifier = descriptor.identifier(),
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %failure,
                    "fetch failed, retrying"
                );
                Some(delay)
            }
            RetryDecision::DoNotRetry { reason } => {
                debug!(identifier = descriptor.identifier(), %reason, "not retrying fetch");
                None
            }
        }
    }

    async fn fetch_interactive(
        &self,
        session: &mut Session,
        row: usize,
        descriptor: &DocumentDescriptor,
        sink: &dyn DocumentSink,
    ) -> FetchResult {
        let content = self.open_viewer(session, row).await;
        if let Err(error) = self.return_to_results(session).await {
            warn!(identifier = descriptor.identifier(), %error, "could not return to results");
            return Err(FetchFailure::ResultsLost {
                message: error.to_string(),
            });
        }

        match content? {
            ViewerContent::Link { url, cookies } => {
                self.fetch_direct(&url, &cookies, descriptor, sink).await
            }
            ViewerContent::Page(bytes) => {
                let entry = SinkEntry::for_document(descriptor, "pdf");
                let chunks = stream::iter([Ok(bytes)]).boxed();
                self.store(sink, &entry, chunks, descriptor.size_hint())
                    .await
            }
        }
    }

    async fn open_viewer(
        &self,
        session: &mut Session,
        row: usize,
    ) -> Result<ViewerContent, FetchFailure> {
        let layout = &self.layout;
        session
            .click(&layout.row_link, row)
            .await
            .map_err(|e| FetchFailure::session(&e))?;
        session
            .wait_for_ready(
                &ReadyCondition::element(layout.viewer_ready.clone()),
                self.ready_timeout,
            )
            .await
            .map_err(|e| FetchFailure::session(&e))?;

        if let Some(link) = &layout.viewer_link {
            let href = session
                .attribute(link, "href")
                .await
                .map_err(|e| FetchFailure::session(&e))?;
            if let Some(href) = href {
                let page_url = session
                    .current_url()
                    .await
                    .map_err(|e| FetchFailure::session(&e))?;
                if let Some(url) = resolve_href(&href, &page_url) {
                    let cookies = session
                        .cookies()
                        .await
                        .map_err(|e| FetchFailure::session(&e))?;
                    debug!(%url, "viewer offers a document link");
                    return Ok(ViewerContent::Link { url, cookies });
                }
            }
        }

        let bytes = session
            .capture_page()
            .await
            .map_err(|e| FetchFailure::session(&e))?;
        debug!(bytes = bytes.len(), "captured viewer page");
        Ok(ViewerContent::Page(bytes))
    }

    /// Leaves the viewer for the results page it was opened from.
    async fn return_to_results(
        &self,
        session: &mut Session,
    ) -> Result<(), SessionError> {
        let layout = &self.layout;
        // The viewer never opened: going back would leave the results page.
        if !session.is_present(&layout.viewer_ready).await?
            && session.is_present(&layout.results_ready).await?
        {
            debug!("still on the results page");
            return Ok(());
        }
        let mut clicked = false;
        if let Some(back) = &layout.back_button {
            if session.is_present(back).await? {
                session.click(back, 0).await?;
                clicked = true;
            }
        }
        if !clicked {
            session.go_back().await?;
        }
        session
            .wait_for_ready(
                &ReadyCondition::element(layout.results_ready.clone()),
                self.ready_timeout,
            )
            .await?;
        Ok(())
    }

    /// Streams `chunks` into the sink, committing only complete documents.
    async fn store(
        &self,
        sink: &dyn DocumentSink,
        entry: &SinkEntry<'_>,
        mut chunks: BoxStream<'_, Result<Vec<u8>, FetchFailure>>,
        expected: Option<u64>,
    ) -> FetchResult {
        let mut writer = sink.open(entry).await.map_err(|e| FetchFailure::sink(&e))?;
        let mut hasher = Sha256::new();
        let mut written: u64 = 0;

        while let Some(chunk) = chunks.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(failure) => {
                    writer.abort().await;
                    return Err(failure);
                }
            };
            if let Err(error) = writer.write_chunk(&chunk).await {
                writer.abort().await;
                return Err(FetchFailure::sink(&error));
            }
            hasher.update(&chunk);
            written += chunk.len() as u64;
        }

        let floor = expected.unwrap_or(0).max(self.min_document_bytes).max(1);
        if written < floor {
            writer.abort().await;
            warn!(
                identifier = entry.identifier,
                written,
                expected = floor,
                "discarding incomplete document"
            );
            return Err(FetchFailure::Incomplete {
                expected,
                actual: written,
            });
        }

        let location = writer.commit().await.map_err(|e| FetchFailure::sink(&e))?;
        Ok(FetchSuccess {
            location,
            bytes: written,
            sha256: format!("{:x}", hasher.finalize()),
            extension: entry.extension.to_string(),
        })
    }
}

/// Extension from `Content-Type`, falling back to the URL path.
fn extension_for(content_type: Option<&str>, url: &str) -> String {
    let from_type = content_type.map_or("bin", extension_from_content_type);
    if from_type != "bin" {
        return from_type.to_string();
    }
    url::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            let path = parsed.path().to_string();
            let (_, ext) = path.rsplit_once('.')?;
            let ext = ext.to_ascii_lowercase();
            (!ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
                .then_some(ext)
        })
        .unwrap_or_else(|| from_type.to_string())
}
