//! Browser session driver.
//!
//! A [`BrowserDriver`] opens [`BrowserSession`]s: live browser contexts that
//! expose the handful of interaction primitives the retrieval stages need.
//! The production driver speaks WebDriver (see [`webdriver`]); tests plug in
//! an in-memory portal.
//!
//! Upper layers never hold a raw `BrowserSession`. They get a [`Session`],
//! which bounds every command with a per-operation timeout, maps a closed
//! handle to [`SessionError::Closed`] and guarantees the browser context is
//! torn down on every exit path (explicit [`Session::close`] or drop).

mod error;
mod pool;
pub mod webdriver;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

pub use error::SessionError;
pub use pool::{PoolError, PooledSession, SessionPool};

/// Interval between readiness probes.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Condition a page must meet before the caller proceeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyCondition {
    /// The element matching this selector is present.
    Element(String),
    /// Any one of these selectors is present. The index of the first match is reported.
    AnyOf(Vec<String>),
    /// The document has finished loading.
    DocumentLoaded,
}

impl ReadyCondition {
    /// Shorthand for [`ReadyCondition::Element`].
    pub fn element(selector: impl Into<String>) -> Self {
        Self::Element(selector.into())
    }

    fn describe(&self) -> String {
        match self {
            Self::Element(selector) => format!("element `{selector}`"),
            Self::AnyOf(selectors) => format!("any of `{}`", selectors.join("`, `")),
            Self::DocumentLoaded => "document load".to_string(),
        }
    }
}

/// Where to find result rows and their cells.
///
/// `key`, `title` and `link` are resolved relative to each row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowSpec {
    /// Selector matching one element per result row.
    pub row: String,
    /// Cell holding the stable identifier (case number, list number).
    pub key: String,
    /// Cell holding the display title.
    pub title: String,
    /// Anchor or button that opens the document.
    pub link: String,
    /// Row attribute carrying the expected document size in bytes.
    pub size_attribute: Option<String>,
}

/// Raw contents of one result row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowSnapshot {
    /// Text of the key cell.
    pub key: Option<String>,
    /// Text of the title cell.
    pub title: Option<String>,
    /// `href` of the link element, unresolved.
    pub href: Option<String>,
    /// Expected size in bytes, when the portal advertises it.
    pub size_hint: Option<u64>,
}

/// A cookie held by the browser context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCookie {
    /// Cookie name
    pub name: String,
    /// Cookie value
    pub value: String,
}

impl SessionCookie {
    /// Creates a cookie.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Formats cookies as a `Cookie` request header value.
#[must_use]
pub fn cookie_header(cookies: &[SessionCookie]) -> Option<String> {
    if cookies.is_empty() {
        return None;
    }
    Some(
        cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; "),
    )
}

/// Opens browser sessions.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Launches a fresh browser context.
    async fn open(&self) -> Result<Box<dyn BrowserSession>, SessionError>;
}

/// One live browser context.
///
/// Implementations report absent elements as [`SessionError::MissingElement`]
/// and transport failures as [`SessionError::Browser`].
#[async_trait]
pub trait BrowserSession: Send {
    /// Loads `url` in the current tab.
    async fn navigate_to(&mut self, url: &str) -> Result<(), SessionError>;

    /// Whether an element matching `selector` is currently present.
    async fn is_present(&mut self, selector: &str) -> Result<bool, SessionError>;

    /// Whether the document has finished loading.
    async fn document_ready(&mut self) -> Result<bool, SessionError>;

    /// Clicks the `nth` (0-based) element matching `selector`.
    async fn click(&mut self, selector: &str, nth: usize) -> Result<(), SessionError>;

    /// Replaces the value of an input.
    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), SessionError>;

    /// Selects the first usable option whose label matches `label`; returns the chosen label.
    ///
    /// Usable options have a non-empty value and are not disabled.
    async fn select_option(&mut self, selector: &str, label: &Regex)
    -> Result<String, SessionError>;

    /// Labels of the usable options of a drop-down.
    async fn option_labels(&mut self, selector: &str) -> Result<Vec<String>, SessionError>;

    /// Trimmed text of the first element matching `selector`, if present.
    async fn text(&mut self, selector: &str) -> Result<Option<String>, SessionError>;

    /// Attribute of the first element matching `selector`, if both exist.
    async fn attribute(&mut self, selector: &str, name: &str)
    -> Result<Option<String>, SessionError>;

    /// Reads every result row on the page.
    async fn read_rows(&mut self, spec: &RowSpec) -> Result<Vec<RowSnapshot>, SessionError>;

    /// Prints the rendered page to PDF. Needs a headless browser.
    async fn capture_page(&mut self) -> Result<Vec<u8>, SessionError>;

    /// Goes back one step in history.
    async fn go_back(&mut self) -> Result<(), SessionError>;

    /// URL of the current page.
    async fn current_url(&mut self) -> Result<String, SessionError>;

    /// Cookies of the browser context.
    async fn cookies(&mut self) -> Result<Vec<SessionCookie>, SessionError>;

    /// Tears down the browser context. Must be idempotent.
    async fn close(&mut self) -> Result<(), SessionError>;

    /// Polls until `condition` holds; returns the index of the matched alternative.
    ///
    /// # Errors
    ///
    /// [`SessionError::Timeout`] when the condition does not hold within `timeout`.
    async fn wait_for_ready(
        &mut self,
        condition: &ReadyCondition,
        timeout: Duration,
    ) -> Result<usize, SessionError> {
        let deadline = Instant::now() + timeout;
        loop {
            let matched = match condition {
                ReadyCondition::Element(selector) => {
                    self.is_present(selector).await?.then_some(0)
                }
                ReadyCondition::AnyOf(selectors) => {
                    let mut found = None;
                    for (index, selector) in selectors.iter().enumerate() {
                        if self.is_present(selector).await? {
                            found = Some(index);
                            break;
                        }
                    }
                    found
                }
                ReadyCondition::DocumentLoaded => self.document_ready().await?.then_some(0),
            };
            if let Some(index) = matched {
                return Ok(index);
            }
            if Instant::now() >= deadline {
                return Err(SessionError::timeout(condition.describe(), timeout));
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }
}

async fn bounded<T>(
    limit: Duration,
    operation: &str,
    fut: impl Future<Output = Result<T, SessionError>>,
) -> Result<T, SessionError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(SessionError::timeout(operation, limit)),
    }
}

/// Exclusive handle to one browser context for the duration of a job.
///
/// Every command is bounded by the per-operation timeout given at
/// construction. After [`Session::close`] all commands fail with
/// [`SessionError::Closed`].
pub struct Session {
    id: u64,
    inner: Option<Box<dyn BrowserSession>>,
    op_timeout: Duration,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .field("op_timeout", &self.op_timeout)
            .finish()
    }
}

impl Session {
    /// Wraps an opened browser context.
    #[must_use]
    pub fn new(id: u64, inner: Box<dyn BrowserSession>, op_timeout: Duration) -> Self {
        Self {
            id,
            inner: Some(inner),
            op_timeout,
        }
    }

    /// Session identifier, unique per pool.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the browser context is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    fn browser(&mut self) -> Result<&mut Box<dyn BrowserSession>, SessionError> {
        self.inner.as_mut().ok_or(SessionError::Closed)
    }

    /// Navigates to `url`.
    ///
    /// # Errors
    ///
    /// Propagates driver failures; [`SessionError::Timeout`] if the command hangs.
    pub async fn navigate_to(&mut self, url: &str) -> Result<(), SessionError> {
        let limit = self.op_timeout;
        bounded(limit, "navigation", self.browser()?.navigate_to(url)).await
    }

    /// Waits until `condition` holds, up to `timeout`.
    ///
    /// # Errors
    ///
    /// [`SessionError::Timeout`] when the page does not become ready.
    pub async fn wait_for_ready(
        &mut self,
        condition: &ReadyCondition,
        timeout: Duration,
    ) -> Result<usize, SessionError> {
        // Probes are individual commands; allow one command's worth of slack on top.
        let limit = timeout + self.op_timeout;
        let description = condition.describe();
        bounded(
            limit,
            &description,
            self.browser()?.wait_for_ready(condition, timeout),
        )
        .await
    }

    /// See [`BrowserSession::is_present`].
    ///
    /// # Errors
    ///
    /// Propagates driver failures.
    pub async fn is_present(&mut self, selector: &str) -> Result<bool, SessionError> {
        let limit = self.op_timeout;
        bounded(limit, "element lookup", self.browser()?.is_present(selector)).await
    }

    /// See [`BrowserSession::click`].
    ///
    /// # Errors
    ///
    /// [`SessionError::MissingElement`] if nothing matches.
    pub async fn click(&mut self, selector: &str, nth: usize) -> Result<(), SessionError> {
        let limit = self.op_timeout;
        bounded(limit, "click", self.browser()?.click(selector, nth)).await
    }

    /// See [`BrowserSession::fill`].
    ///
    /// # Errors
    ///
    /// [`SessionError::MissingElement`] if the input is absent.
    pub async fn fill(&mut self, selector: &str, value: &str) -> Result<(), SessionError> {
        let limit = self.op_timeout;
        bounded(limit, "fill", self.browser()?.fill(selector, value)).await
    }

    /// See [`BrowserSession::select_option`].
    ///
    /// # Errors
    ///
    /// [`SessionError::OptionNotFound`] if no usable option matches.
    pub async fn select_option(
        &mut self,
        selector: &str,
        label: &Regex,
    ) -> Result<String, SessionError> {
        let limit = self.op_timeout;
        bounded(limit, "select", self.browser()?.select_option(selector, label)).await
    }

    /// See [`BrowserSession::option_labels`].
    ///
    /// # Errors
    ///
    /// [`SessionError::MissingElement`] if the drop-down is absent.
    pub async fn option_labels(&mut self, selector: &str) -> Result<Vec<String>, SessionError> {
        let limit = self.op_timeout;
        bounded(limit, "option listing", self.browser()?.option_labels(selector)).await
    }

    /// See [`BrowserSession::text`].
    ///
    /// # Errors
    ///
    /// Propagates driver failures.
    pub async fn text(&mut self, selector: &str) -> Result<Option<String>, SessionError> {
        let limit = self.op_timeout;
        bounded(limit, "text read", self.browser()?.text(selector)).await
    }

    /// See [`BrowserSession::attribute`].
    ///
    /// # Errors
    ///
    /// Propagates driver failures.
    pub async fn attribute(
        &mut self,
        selector: &str,
        name: &str,
    ) -> Result<Option<String>, SessionError> {
        let limit = self.op_timeout;
        bounded(limit, "attribute read", self.browser()?.attribute(selector, name)).await
    }

    /// See [`BrowserSession::read_rows`].
    ///
    /// # Errors
    ///
    /// Propagates driver failures.
    pub async fn read_rows(&mut self, spec: &RowSpec) -> Result<Vec<RowSnapshot>, SessionError> {
        let limit = self.op_timeout;
        bounded(limit, "row read", self.browser()?.read_rows(spec)).await
    }

    /// See [`BrowserSession::capture_page`].
    ///
    /// # Errors
    ///
    /// Propagates driver failures.
    pub async fn capture_page(&mut self) -> Result<Vec<u8>, SessionError> {
        let limit = self.op_timeout;
        bounded(limit, "page capture", self.browser()?.capture_page()).await
    }

    /// See [`BrowserSession::go_back`].
    ///
    /// # Errors
    ///
    /// Propagates driver failures.
    pub async fn go_back(&mut self) -> Result<(), SessionError> {
        let limit = self.op_timeout;
        bounded(limit, "history back", self.browser()?.go_back()).await
    }

    /// See [`BrowserSession::current_url`].
    ///
    /// # Errors
    ///
    /// Propagates driver failures.
    pub async fn current_url(&mut self) -> Result<String, SessionError> {
        let limit = self.op_timeout;
        bounded(limit, "url read", self.browser()?.current_url()).await
    }

    /// See [`BrowserSession::cookies`].
    ///
    /// # Errors
    ///
    /// Propagates driver failures.
    pub async fn cookies(&mut self) -> Result<Vec<SessionCookie>, SessionError> {
        let limit = self.op_timeout;
        bounded(limit, "cookie read", self.browser()?.cookies()).await
    }

    /// Tears down the browser context. Idempotent and infallible; failures are logged.
    pub async fn close(&mut self) {
        let Some(mut browser) = self.inner.take() else {
            return;
        };
        match tokio::time::timeout(self.op_timeout, browser.close()).await {
            Ok(Ok(())) => debug!(session_id = self.id, "session closed"),
            Ok(Err(error)) => warn!(session_id = self.id, %error, "session close failed"),
            Err(_) => warn!(session_id = self.id, "session close timed out"),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let Some(mut browser) = self.inner.take() else {
            return;
        };
        let id = self.id;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            debug!(session_id = id, "closing dropped session");
            handle.spawn(async move {
                if let Err(error) = browser.close().await {
                    warn!(session_id = id, %error, "close of dropped session failed");
                }
            });
        } else {
            warn!(session_id = id, "session dropped outside a runtime; browser left open");
        }
    }
}
