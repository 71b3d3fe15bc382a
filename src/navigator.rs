//! Search form navigation.
//!
//! Opens the portal's cause-list page, fills the location drop-downs, court
//! and date, presses the case-type button and classifies what the portal
//! shows next.

use std::sync::Arc;
use std::time::Duration;

use regex::{Regex, RegexBuilder};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::error::RetrievalError;
use crate::portal::PortalLayout;
use crate::query::{CourtLocation, Search};
use crate::rate_limiter::RateLimiter;
use crate::session::{ReadyCondition, Session, SessionError};

/// Interval between drop-down option reads while options load.
const OPTION_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// What the portal showed after a search was submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionResult {
    /// Results are rendered and can be paginated.
    ResultsReady,
    /// The portal reported no cause list for the search.
    NoResults,
    /// The portal refused the input.
    RejectedInput(String),
}

/// Drives the cause-list search form.
#[derive(Debug, Clone)]
pub struct FormNavigator {
    layout: Arc<PortalLayout>,
    ready_timeout: Duration,
    rate_limiter: Arc<RateLimiter>,
}

fn label_pattern(label: &str, anchored: bool) -> Result<Regex, RetrievalError> {
    let escaped = regex::escape(label.trim());
    let pattern = if anchored {
        format!(r"^\s*{escaped}\s*$")
    } else {
        escaped
    };
    RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| RetrievalError::rejected(format!("unusable label '{label}': {e}")))
}

impl FormNavigator {
    /// Creates a navigator for a portal layout.
    #[must_use]
    pub fn new(
        layout: Arc<PortalLayout>,
        ready_timeout: Duration,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            layout,
            ready_timeout,
            rate_limiter,
        }
    }

    /// Fills and submits the search form for one court, day and case type.
    ///
    /// # Errors
    ///
    /// - [`RetrievalError::Timeout`] when no outcome appears in time (retryable)
    /// - [`RetrievalError::ChallengeRequired`] when the portal shows a CAPTCHA
    /// - [`RetrievalError::Session`] for markup breakage or browser failure
    #[instrument(skip_all, fields(court = %search.court, date = %search.date, case_type = %search.case_type))]
    pub async fn submit_search(
        &self,
        session: &mut Session,
        search: &Search,
    ) -> Result<SubmissionResult, RetrievalError> {
        let layout = Arc::clone(&self.layout);
        self.open_form(session).await?;

        if let Some(rejection) = self.select_location(session, &search.location).await? {
            return Ok(rejection);
        }
        if let Some(rejection) = self
            .choose(session, &layout.court_select, &search.court, "court")
            .await?
        {
            return Ok(rejection);
        }

        let date = search.date.format(&layout.date_format).to_string();
        session
            .fill(&layout.date_input, &date)
            .await
            .map_err(|e| RetrievalError::from_session("search form", e))?;
        session
            .click(layout.case_button(search.case_type), 0)
            .await
            .map_err(|e| RetrievalError::from_session("search form", e))?;

        let signals = ReadyCondition::AnyOf(layout.submission_signals());
        let matched = session
            .wait_for_ready(&signals, self.ready_timeout)
            .await
            .map_err(|e| RetrievalError::from_session("search submission", e))?;

        match matched {
            0 => {
                info!("results ready");
                Ok(SubmissionResult::ResultsReady)
            }
            1 => {
                info!("no cause list published");
                Ok(SubmissionResult::NoResults)
            }
            2 => {
                let reason = session
                    .text(&layout.invalid_input)
                    .await
                    .ok()
                    .flatten()
                    .filter(|text| !text.is_empty())
                    .unwrap_or_else(|| "portal reported invalid input".to_string());
                warn!(%reason, "search rejected");
                Ok(SubmissionResult::RejectedInput(reason))
            }
            _ => {
                warn!("CAPTCHA challenge presented");
                Err(RetrievalError::ChallengeRequired)
            }
        }
    }

    /// Lists the court labels offered for a location.
    ///
    /// # Errors
    ///
    /// [`RetrievalError::RejectedInput`] when a location label is not offered;
    /// otherwise as for [`FormNavigator::submit_search`].
    #[instrument(skip_all)]
    pub async fn list_courts(
        &self,
        session: &mut Session,
        location: &CourtLocation,
    ) -> Result<Vec<String>, RetrievalError> {
        self.open_form(session).await?;
        if let Some(SubmissionResult::RejectedInput(reason)) =
            self.select_location(session, location).await?
        {
            return Err(RetrievalError::rejected(reason));
        }

        let labels = self.settled_options(session, &self.layout.court_select).await?;
        info!(courts = labels.len(), "listed courts");
        Ok(labels)
    }

    async fn open_form(&self, session: &mut Session) -> Result<(), RetrievalError> {
        let layout = &self.layout;
        self.rate_limiter.acquire(&layout.search_url).await;
        session
            .navigate_to(&layout.search_url)
            .await
            .map_err(|e| RetrievalError::from_session("portal navigation", e))?;
        session
            .wait_for_ready(&ReadyCondition::DocumentLoaded, self.ready_timeout)
            .await
            .map_err(|e| RetrievalError::from_session("portal navigation", e))?;
        session
            .wait_for_ready(
                &ReadyCondition::element(layout.court_select.clone()),
                self.ready_timeout,
            )
            .await
            .map_err(|e| RetrievalError::from_session("search form", e))?;

        if let Some(close) = &layout.modal_close {
            let present = session
                .is_present(close)
                .await
                .map_err(|e| RetrievalError::from_session("search form", e))?;
            if present {
                match session.click(close, 0).await {
                    Ok(()) => debug!("dismissed modal"),
                    Err(error) => warn!(%error, "could not dismiss modal"),
                }
            }
        }
        Ok(())
    }

    async fn select_location(
        &self,
        session: &mut Session,
        location: &CourtLocation,
    ) -> Result<Option<SubmissionResult>, RetrievalError> {
        for (level, label) in location.levels() {
            let Some(selector) = self.layout.location_select(level) else {
                debug!(%level, "portal has no drop-down for level; skipping");
                continue;
            };
            let what = level.to_string();
            if let Some(rejection) = self.choose(session, selector, label, &what).await? {
                return Ok(Some(rejection));
            }
        }
        Ok(None)
    }

    /// Waits for the drop-down's options, then selects `label`.
    ///
    /// Exact (case-insensitive) matches win over substring matches.
    async fn choose(
        &self,
        session: &mut Session,
        selector: &str,
        label: &str,
        what: &str,
    ) -> Result<Option<SubmissionResult>, RetrievalError> {
        let exact = label_pattern(label, true)?;
        let partial = label_pattern(label, false)?;

        let options = self.settled_options(session, selector).await?;
        let picked = options
            .iter()
            .find(|option| exact.is_match(option))
            .or_else(|| options.iter().find(|option| partial.is_match(option)));

        let Some(picked) = picked else {
            warn!(what, label, offered = options.len(), "option not offered");
            return Ok(Some(SubmissionResult::RejectedInput(format!(
                "{what} '{label}' is not offered by the portal"
            ))));
        };

        let chosen = session
            .select_option(selector, &label_pattern(picked, true)?)
            .await
            .map_err(|e| RetrievalError::from_session("search form", e))?;
        debug!(what, chosen = %chosen, "selected option");
        Ok(None)
    }

    /// Polls a drop-down until it offers options.
    ///
    /// A list still empty at the ready timeout has not loaded yet, which is
    /// a [`RetrievalError::Timeout`], never a rejection of the label.
    async fn settled_options(
        &self,
        session: &mut Session,
        selector: &str,
    ) -> Result<Vec<String>, RetrievalError> {
        let deadline = Instant::now() + self.ready_timeout;
        loop {
            let options = session
                .option_labels(selector)
                .await
                .map_err(|e| RetrievalError::from_session("search form", e))?;
            if !options.is_empty() {
                return Ok(options);
            }
            if Instant::now() >= deadline {
                warn!(selector, "drop-down offered no options in time");
                return Err(RetrievalError::from_session(
                    "search form",
                    SessionError::timeout(format!("options of `{selector}`"), self.ready_timeout),
                ));
            }
            tokio::time::sleep(OPTION_POLL_INTERVAL).await;
        }
    }
}
