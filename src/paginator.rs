//! Lazy walk over cause-list result pages.
//!
//! [`ResultPaginator::list_documents`] returns a [`DocumentPages`] sequence.
//! Each call to [`DocumentPages::next`] yields one descriptor; a page is read
//! only when the previous one is drained, and the "next page" control is
//! clicked only then. The session is passed per call so the consumer can use
//! it between items (interactive fetches), while `&mut` keeps one operation
//! in flight at a time.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::portal::PortalLayout;
use crate::query::{CaseType, Search};
use crate::retry::{FailureType, RetryDecision, RetryPolicy};
use crate::session::{RowSnapshot, Session, SessionError};

const TURN_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// How a document is obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DownloadRef {
    /// Plain HTTP resource.
    Direct {
        /// Absolute URL.
        url: String,
    },
    /// Opened by clicking the row's view control on the results page.
    Interactive {
        /// Row position on its page.
        row: usize,
    },
}

/// One entry of a cause-list result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentDescriptor {
    identifier: String,
    title: String,
    reference: DownloadRef,
    page_index: usize,
    size_hint: Option<u64>,
    court: String,
    date: NaiveDate,
    case_type: CaseType,
}

impl DocumentDescriptor {
    /// Stable identifier, unique within one search's results.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Display title.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Download reference.
    #[must_use]
    pub fn reference(&self) -> &DownloadRef {
        &self.reference
    }

    /// Page the entry was listed on (0-based).
    #[must_use]
    pub fn page_index(&self) -> usize {
        self.page_index
    }

    /// Size the portal advertises, if any.
    #[must_use]
    pub fn size_hint(&self) -> Option<u64> {
        self.size_hint
    }

    /// Court label of the search that listed the entry.
    #[must_use]
    pub fn court(&self) -> &str {
        &self.court
    }

    /// Cause-list date.
    #[must_use]
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Case type of the search that listed the entry.
    #[must_use]
    pub fn case_type(&self) -> CaseType {
        self.case_type
    }

    /// Key that is unique across a whole job. See [`document_key`].
    #[must_use]
    pub fn key(&self) -> String {
        document_key(&self.court, self.date, self.case_type, &self.identifier)
    }
}

/// Job-wide document key: `<court>/<date>/<case type>/<identifier>`.
///
/// Row identifiers are only unique within one search; portals number rows
/// from 1 again for every court.
#[must_use]
pub fn document_key(court: &str, date: NaiveDate, case_type: CaseType, identifier: &str) -> String {
    format!("{court}/{date}/{}/{identifier}", case_type.as_str())
}

/// Pagination stopped early. Descriptors yielded before stay valid.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("pagination failed after page {last_page_index}: {reason}")]
pub struct PaginationError {
    /// Last page that was read successfully.
    pub last_page_index: usize,
    /// What went wrong.
    pub reason: String,
}

impl PaginationError {
    fn new(last_page_index: usize, reason: impl Into<String>) -> Self {
        Self {
            last_page_index,
            reason: reason.into(),
        }
    }
}

/// Produces [`DocumentPages`] for submitted searches.
#[derive(Debug, Clone)]
pub struct ResultPaginator {
    layout: Arc<PortalLayout>,
    policy: RetryPolicy,
    ready_timeout: Duration,
    max_pages: usize,
}

impl ResultPaginator {
    /// Creates a paginator.
    #[must_use]
    pub fn new(
        layout: Arc<PortalLayout>,
        policy: RetryPolicy,
        ready_timeout: Duration,
        max_pages: usize,
    ) -> Self {
        Self {
            layout,
            policy,
            ready_timeout,
            max_pages: max_pages.max(1),
        }
    }

    /// Starts a walk over the results currently shown for `search`.
    #[must_use]
    pub fn list_documents(&self, search: &Search) -> DocumentPages {
        DocumentPages {
            layout: Arc::clone(&self.layout),
            policy: self.policy.clone(),
            ready_timeout: self.ready_timeout,
            max_pages: self.max_pages,
            court: search.court.clone(),
            date: search.date,
            case_type: search.case_type,
            page_index: 0,
            pages_read: 0,
            buffer: VecDeque::new(),
            seen: HashSet::new(),
            duplicates: 0,
            state: PageState::Unread,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageState {
    Unread,
    Draining,
    Finished,
}

/// Finite, non-restartable sequence of descriptors across result pages.
#[derive(Debug)]
pub struct DocumentPages {
    layout: Arc<PortalLayout>,
    policy: RetryPolicy,
    ready_timeout: Duration,
    max_pages: usize,
    court: String,
    date: NaiveDate,
    case_type: CaseType,
    page_index: usize,
    pages_read: usize,
    buffer: VecDeque<DocumentDescriptor>,
    seen: HashSet<String>,
    duplicates: usize,
    state: PageState,
}

impl DocumentPages {
    /// Yields the next descriptor, reading or turning pages as needed.
    ///
    /// Returns `None` when the results are exhausted. After an error the
    /// sequence is finished and keeps returning `None`.
    #[instrument(skip_all, fields(court = %self.court, page_index = self.page_index))]
    pub async fn next(
        &mut self,
        session: &mut Session,
    ) -> Option<Result<DocumentDescriptor, PaginationError>> {
        loop {
            if let Some(descriptor) = self.buffer.pop_front() {
                return Some(Ok(descriptor));
            }
            match self.state {
                PageState::Finished => return None,
                PageState::Unread => {
                    if let Err(error) = self.read_page(session).await {
                        self.state = PageState::Finished;
                        return Some(Err(error));
                    }
                    self.state = PageState::Draining;
                }
                PageState::Draining => match self.advance(session).await {
                    Ok(true) => self.state = PageState::Unread,
                    Ok(false) => {
                        info!(pages = self.pages_read, "results exhausted");
                        self.state = PageState::Finished;
                    }
                    Err(error) => {
                        self.state = PageState::Finished;
                        return Some(Err(error));
                    }
                },
            }
        }
    }

    /// Pages read so far.
    #[must_use]
    pub fn pages_read(&self) -> usize {
        self.pages_read
    }

    /// Entries skipped because an earlier page listed them.
    #[must_use]
    pub fn duplicates_skipped(&self) -> usize {
        self.duplicates
    }

    /// Whether the sequence has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state == PageState::Finished && self.buffer.is_empty()
    }

    async fn read_page(&mut self, session: &mut Session) -> Result<(), PaginationError> {
        let fail = |page: usize, error: SessionError| PaginationError::new(page, error.to_string());
        // The page being read is not yet good.
        let last_good = self.page_index.saturating_sub(1);

        let rows = session
            .read_rows(&self.layout.row_spec())
            .await
            .map_err(|e| fail(last_good, e))?;
        let page_url = session
            .current_url()
            .await
            .map_err(|e| fail(last_good, e))?;

        let page = rows
            .into_iter()
            .enumerate()
            .map(|(row, snapshot)| self.describe(row, snapshot, &page_url))
            .collect::<Result<Vec<_>, _>>()?;

        let mut fresh = 0usize;
        for descriptor in page {
            if self.seen.insert(descriptor.identifier.clone()) {
                fresh += 1;
                self.buffer.push_back(descriptor);
            } else {
                debug!(identifier = %descriptor.identifier, "duplicate entry on later page");
                self.duplicates += 1;
            }
        }
        self.pages_read += 1;
        debug!(page_index = self.page_index, fresh, "read result page");
        Ok(())
    }

    fn describe(
        &self,
        row: usize,
        snapshot: RowSnapshot,
        page_url: &str,
    ) -> Result<DocumentDescriptor, PaginationError> {
        let RowSnapshot {
            key,
            title,
            href,
            size_hint,
        } = snapshot;

        let direct = href.as_deref().and_then(|h| resolve_href(h, page_url));
        let identifier = key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .or_else(|| direct.clone())
            .ok_or_else(|| {
                PaginationError::new(
                    self.page_index.saturating_sub(1),
                    format!(
                        "portal markup changed: row {row} on page {} has no identifier",
                        self.page_index
                    ),
                )
            })?;

        let reference = match direct {
            Some(url) => DownloadRef::Direct { url },
            None => DownloadRef::Interactive { row },
        };

        Ok(DocumentDescriptor {
            title: title
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| identifier.clone()),
            identifier,
            reference,
            page_index: self.page_index,
            size_hint,
            court: self.court.clone(),
            date: self.date,
            case_type: self.case_type,
        })
    }

    /// Moves to the next page. `Ok(false)` when there is none.
    ///
    /// The results table of the old page stays up until the portal swaps it,
    /// so the turn is confirmed by the page marker changing, not by the
    /// results table being present. A click that landed is never repeated.
    async fn advance(&mut self, session: &mut Session) -> Result<bool, PaginationError> {
        let Some(next_control) = self.layout.next_page.clone() else {
            return Ok(false);
        };

        let present = session
            .is_present(&next_control)
            .await
            .map_err(|e| PaginationError::new(self.page_index, e.to_string()))?;
        if !present {
            return Ok(false);
        }
        if self.page_index + 1 >= self.max_pages {
            warn!(max_pages = self.max_pages, "page bound reached; stopping");
            return Ok(false);
        }

        let before = self
            .page_marker(session)
            .await
            .map_err(|e| PaginationError::new(self.page_index, e.to_string()))?;
        let mut clicked = false;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let outcome = if clicked {
                self.wait_for_turn(session, &before).await
            } else if attempt > 1 && self.turned(session, &before).await.unwrap_or(false) {
                Ok(())
            } else {
                match session.click(&next_control, 0).await {
                    Ok(()) => {
                        clicked = true;
                        self.wait_for_turn(session, &before).await
                    }
                    Err(error) => Err(error),
                }
            };
            let error = match outcome {
                Ok(()) => break,
                Err(error) => error,
            };

            let failure = if error.is_retryable() {
                FailureType::Transient
            } else {
                FailureType::Permanent
            };
            match self.policy.should_retry(failure, attempt) {
                RetryDecision::Retry { delay, attempt: next } => {
                    info!(
                        page_index = self.page_index,
                        attempt = next,
                        clicked,
                        delay_ms = delay.as_millis(),
                        %error,
                        "retrying page transition"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::DoNotRetry { reason } => {
                    warn!(page_index = self.page_index, %error, %reason, "page transition failed");
                    return Err(PaginationError::new(
                        self.page_index,
                        format!("next page did not load: {error} ({reason})"),
                    ));
                }
            }
        }

        self.page_index += 1;
        Ok(true)
    }

    async fn page_marker(&self, session: &mut Session) -> Result<PageMarker, SessionError> {
        let rows = session.read_rows(&self.layout.row_spec()).await?;
        let url = session.current_url().await?;
        Ok(PageMarker {
            url,
            rows: rows.into_iter().map(|row| (row.key, row.title)).collect(),
        })
    }

    /// Whether a results page other than `before` is on screen.
    async fn turned(&self, session: &mut Session, before: &PageMarker) -> Result<bool, SessionError> {
        if !session.is_present(&self.layout.results_ready).await? {
            return Ok(false);
        }
        Ok(self.page_marker(session).await? != *before)
    }

    async fn wait_for_turn(
        &self,
        session: &mut Session,
        before: &PageMarker,
    ) -> Result<(), SessionError> {
        let deadline = Instant::now() + self.ready_timeout;
        loop {
            if self.turned(session, before).await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(SessionError::timeout("next result page", self.ready_timeout));
            }
            tokio::time::sleep(TURN_POLL_INTERVAL).await;
        }
    }
}

/// What tells two result pages apart.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PageMarker {
    url: String,
    rows: Vec<(Option<String>, Option<String>)>,
}

/// Resolves a row link against the page URL. Script and fragment links yield `None`.
#[must_use]
pub fn resolve_href(href: &str, page_url: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.to_ascii_lowercase().starts_with("javascript:")
    {
        return None;
    }
    let resolved = match Url::parse(href) {
        Ok(url) => url,
        Err(_) => Url::parse(page_url).ok()?.join(href).ok()?,
    };
    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const PAGE: &str = "https://portal.example/ecourtindia_v6/?p=cause_list/";

    #[test]
    fn test_resolve_absolute_href() {
        assert_eq!(
            resolve_href("https://cdn.example/list.pdf", PAGE).as_deref(),
            Some("https://cdn.example/list.pdf")
        );
    }

    #[test]
    fn test_resolve_relative_href() {
        assert_eq!(
            resolve_href("files/list.pdf", PAGE).as_deref(),
            Some("https://portal.example/ecourtindia_v6/files/list.pdf")
        );
        assert_eq!(
            resolve_href("/static/a.pdf", PAGE).as_deref(),
            Some("https://portal.example/static/a.pdf")
        );
    }

    #[test]
    fn test_script_and_fragment_links_are_interactive() {
        assert!(resolve_href("javascript:viewBusiness('1')", PAGE).is_none());
        assert!(resolve_href("JavaScript:void(0)", PAGE).is_none());
        assert!(resolve_href("#", PAGE).is_none());
        assert!(resolve_href("  ", PAGE).is_none());
        assert!(resolve_href("mailto:registry@court.example", PAGE).is_none());
    }

    #[test]
    fn test_download_ref_serializes_with_kind_tag() {
        let json = serde_json::to_value(DownloadRef::Interactive { row: 2 }).unwrap();
        assert_eq!(json["kind"], "interactive");
        assert_eq!(json["row"], 2);
    }
}
