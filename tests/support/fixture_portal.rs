//! In-memory court portal implementing the browser traits.
//!
//! Sessions share one scripted [`PortalState`]: which courts exist, what each
//! search returns and which failures to inject. Counters record how many
//! sessions were opened, are open now and were open at peak.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use causelist_core::{
    BrowserDriver, BrowserSession, CaseType, PortalLayout, RowSnapshot, RowSpec, SessionCookie,
    SessionError,
};
use regex::Regex;
use tokio_util::sync::CancellationToken;

pub const SEARCH_URL: &str = "https://portal.test/causelist";

/// Layout matching the fixture's markup.
pub fn fixture_layout(search_url: &str) -> PortalLayout {
    PortalLayout {
        search_url: search_url.to_string(),
        modal_close: None,
        state_select: Some("#state".to_string()),
        district_select: None,
        complex_select: None,
        court_select: "#court".to_string(),
        date_input: "#date".to_string(),
        date_format: "%d-%m-%Y".to_string(),
        civil_button: "#civil".to_string(),
        criminal_button: "#criminal".to_string(),
        results_ready: "#results".to_string(),
        no_results: "#no-results".to_string(),
        invalid_input: "#invalid".to_string(),
        captcha_challenge: Some("#captcha".to_string()),
        result_row: "tr.row".to_string(),
        row_key: ".key".to_string(),
        row_title: ".title".to_string(),
        row_link: "a.view".to_string(),
        row_size_attribute: None,
        next_page: Some("#next".to_string()),
        viewer_ready: "#viewer".to_string(),
        viewer_link: None,
        back_button: Some("#back".to_string()),
    }
}

/// One result row.
#[derive(Debug, Clone)]
pub struct FixtureRow {
    pub key: Option<String>,
    pub title: Option<String>,
    pub href: Option<String>,
    /// Page captured by the viewer; `None` makes the capture fail.
    pub body: Option<Vec<u8>>,
    /// Whether clicking the row's view control opens the viewer.
    pub opens: bool,
}

impl FixtureRow {
    /// Row opened through the viewer, whose page is a plausible document.
    pub fn interactive(key: &str) -> Self {
        Self {
            key: Some(key.to_string()),
            title: Some(format!("Cause list {key}")),
            href: None,
            body: Some(format!("%PDF-1.4\n% Cause list {key}\n%%EOF\n").into_bytes()),
            opens: true,
        }
    }

    /// Row with a link to a downloadable document.
    pub fn direct(key: &str, href: &str) -> Self {
        Self {
            key: Some(key.to_string()),
            title: Some(format!("Cause list {key}")),
            href: Some(href.to_string()),
            body: None,
            opens: true,
        }
    }

    /// Row whose viewer page is too small to be a real document.
    pub fn truncated(key: &str) -> Self {
        Self {
            body: Some(b"%PDF".to_vec()),
            ..Self::interactive(key)
        }
    }

    /// Row whose view control does not respond, so the viewer never opens.
    pub fn unclickable(key: &str) -> Self {
        Self {
            opens: false,
            ..Self::interactive(key)
        }
    }

    /// Row with neither identifier nor link.
    pub fn broken() -> Self {
        Self {
            key: None,
            title: Some("???".to_string()),
            href: None,
            body: None,
            opens: true,
        }
    }
}

/// What a search shows.
#[derive(Debug, Clone)]
pub enum SearchBehaviour {
    Results(Vec<Vec<FixtureRow>>),
    NoResults,
    Invalid(String),
    Captcha,
}

/// Scripted portal contents and counters shared by all sessions.
#[derive(Debug)]
pub struct PortalState {
    pub search_url: String,
    pub states: Vec<String>,
    pub courts: Vec<String>,
    pub searches: HashMap<(String, CaseType), SearchBehaviour>,
    /// Submissions that hang before the next one succeeds.
    pub submit_timeouts: usize,
    /// Clicks on "next" that fail before one succeeds.
    pub next_failures: usize,
    /// Cancels this token when the given page index is shown.
    pub cancel_on_page: Option<(usize, CancellationToken)>,
    /// Sleep after pressing a case button.
    pub submit_delay: Duration,
    /// How long the form stays on screen after a case button is pressed.
    pub render_delay: Duration,
    /// How long the old results stay on screen after "next" is clicked.
    pub stale_after_next: Duration,
    /// Court options stay empty until this instant.
    pub courts_visible_at: Option<Instant>,
    pub fail_open: bool,
    pub opened: usize,
    pub open_now: usize,
    pub peak_open: usize,
    pub submissions: usize,
    pub viewer_opens: usize,
}

impl PortalState {
    fn new(search_url: &str) -> Self {
        Self {
            search_url: search_url.to_string(),
            states: vec!["Delhi".to_string(), "Karnataka".to_string()],
            courts: Vec::new(),
            searches: HashMap::new(),
            submit_timeouts: 0,
            next_failures: 0,
            cancel_on_page: None,
            submit_delay: Duration::ZERO,
            render_delay: Duration::ZERO,
            stale_after_next: Duration::ZERO,
            courts_visible_at: None,
            fail_open: false,
            opened: 0,
            open_now: 0,
            peak_open: 0,
            submissions: 0,
            viewer_opens: 0,
        }
    }
}

/// Handle to the fixture portal. Clones share state.
#[derive(Debug, Clone)]
pub struct FixturePortal {
    state: Arc<Mutex<PortalState>>,
}

impl FixturePortal {
    pub fn new() -> Self {
        Self::with_search_url(SEARCH_URL)
    }

    pub fn with_search_url(search_url: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(PortalState::new(search_url))),
        }
    }

    /// Adds a court whose civil list shows `behaviour`.
    pub fn court(self, name: &str, behaviour: SearchBehaviour) -> Self {
        self.court_case(name, CaseType::Civil, behaviour)
    }

    /// Adds a court whose list of `case_type` shows `behaviour`.
    pub fn court_case(self, name: &str, case_type: CaseType, behaviour: SearchBehaviour) -> Self {
        {
            let mut state = self.lock();
            if !state.courts.iter().any(|c| c == name) {
                state.courts.push(name.to_string());
            }
            state.searches.insert((name.to_string(), case_type), behaviour);
        }
        self
    }

    pub fn update(&self, f: impl FnOnce(&mut PortalState)) {
        f(&mut self.lock());
    }

    pub fn lock(&self) -> std::sync::MutexGuard<'_, PortalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn opened(&self) -> usize {
        self.lock().opened
    }

    pub fn open_now(&self) -> usize {
        self.lock().open_now
    }

    pub fn peak_open(&self) -> usize {
        self.lock().peak_open
    }

    pub fn submissions(&self) -> usize {
        self.lock().submissions
    }

    pub fn driver(&self) -> Arc<dyn BrowserDriver> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl BrowserDriver for FixturePortal {
    fn name(&self) -> &str {
        "fixture"
    }

    async fn open(&self) -> Result<Box<dyn BrowserSession>, SessionError> {
        let id = {
            let mut state = self.lock();
            if state.fail_open {
                return Err(SessionError::launch("fixture browser unavailable"));
            }
            state.opened += 1;
            state.open_now += 1;
            state.peak_open = state.peak_open.max(state.open_now);
            state.opened
        };
        Ok(Box::new(FixtureSession {
            portal: self.clone(),
            id,
            view: View::Blank,
            pending: None,
            court: None,
            date: None,
            closed: false,
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum View {
    Blank,
    Form,
    Hang,
    Results { case_type: CaseType, page: usize },
    NoResults,
    Invalid(String),
    Captcha,
    Viewer { case_type: CaseType, page: usize, row: usize },
}

struct FixtureSession {
    portal: FixturePortal,
    id: usize,
    view: View,
    /// View that replaces `view` once the instant passes.
    pending: Option<(View, Instant)>,
    court: Option<String>,
    date: Option<String>,
    closed: bool,
}

impl FixtureSession {
    fn pages(&self, case_type: CaseType) -> Vec<Vec<FixtureRow>> {
        let Some(court) = &self.court else {
            return Vec::new();
        };
        match self.portal.lock().searches.get(&(court.clone(), case_type)) {
            Some(SearchBehaviour::Results(pages)) => pages.clone(),
            _ => Vec::new(),
        }
    }

    fn row(&self, case_type: CaseType, page: usize, row: usize) -> Option<FixtureRow> {
        self.pages(case_type).get(page)?.get(row).cloned()
    }

    fn options(&self, selector: &str) -> Result<Vec<String>, SessionError> {
        let state = self.portal.lock();
        match selector {
            "#court" => match state.courts_visible_at {
                Some(at) if Instant::now() < at => Ok(Vec::new()),
                _ => Ok(state.courts.clone()),
            },
            "#state" => Ok(state.states.clone()),
            other => Err(SessionError::missing_element(other)),
        }
    }

    async fn submit(&mut self, case_type: CaseType) {
        let (delay, render_delay, hang, behaviour) = {
            let mut state = self.portal.lock();
            state.submissions += 1;
            let hang = state.submit_timeouts > 0;
            if hang {
                state.submit_timeouts -= 1;
            }
            let behaviour = self
                .court
                .as_ref()
                .and_then(|court| state.searches.get(&(court.clone(), case_type)).cloned())
                .unwrap_or(SearchBehaviour::NoResults);
            (state.submit_delay, state.render_delay, hang, behaviour)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if hang {
            self.view = View::Hang;
            return;
        }
        let rendered = match behaviour {
            SearchBehaviour::Results(pages) if !pages.is_empty() => {
                View::Results { case_type, page: 0 }
            }
            SearchBehaviour::Results(_) | SearchBehaviour::NoResults => View::NoResults,
            SearchBehaviour::Invalid(message) => View::Invalid(message),
            SearchBehaviour::Captcha => View::Captcha,
        };
        if render_delay.is_zero() {
            self.view = rendered;
        } else {
            self.pending = Some((rendered, Instant::now() + render_delay));
        }
    }

    /// Applies a pending view change whose time has come.
    fn settle(&mut self) {
        if self.pending.as_ref().is_some_and(|(_, at)| Instant::now() >= *at) {
            if let Some((view, _)) = self.pending.take() {
                self.view = view;
            }
        }
    }

    fn turn_page(&mut self, case_type: CaseType, page: usize) -> Result<(), SessionError> {
        let total = self.pages(case_type).len();
        let mut state = self.portal.lock();
        if state.next_failures > 0 {
            state.next_failures -= 1;
            return Err(SessionError::timeout("click", Duration::from_millis(1)));
        }
        // A click on a page still being replaced advances past the pending one.
        let from = match &self.pending {
            Some((View::Results { page, .. }, _)) => *page,
            _ => page,
        };
        let next = from + 1;
        if next >= total {
            return Err(SessionError::missing_element("#next"));
        }
        if let Some((at, token)) = &state.cancel_on_page {
            if *at == next {
                token.cancel();
            }
        }
        let stale = state.stale_after_next;
        drop(state);
        let target = View::Results {
            case_type,
            page: next,
        };
        if stale.is_zero() {
            self.view = target;
        } else {
            self.pending = Some((target, Instant::now() + stale));
        }
        Ok(())
    }
}

#[async_trait]
impl BrowserSession for FixtureSession {
    async fn navigate_to(&mut self, url: &str) -> Result<(), SessionError> {
        let search_url = self.portal.lock().search_url.clone();
        if url != search_url {
            return Err(SessionError::browser(format!("unknown page {url}")));
        }
        self.view = View::Form;
        self.pending = None;
        self.court = None;
        self.date = None;
        Ok(())
    }

    async fn is_present(&mut self, selector: &str) -> Result<bool, SessionError> {
        self.settle();
        let present = match &self.view {
            View::Blank | View::Hang => false,
            View::Form => matches!(
                selector,
                "#court" | "#state" | "#date" | "#civil" | "#criminal" | "img#captcha_image"
            ),
            View::Results { case_type, page } => match selector {
                "#results" | "a.view" => true,
                "tr.row" => self
                    .pages(*case_type)
                    .get(*page)
                    .is_some_and(|rows| !rows.is_empty()),
                "#next" => *page + 1 < self.pages(*case_type).len(),
                _ => false,
            },
            View::NoResults => selector == "#no-results",
            View::Invalid(_) => selector == "#invalid",
            View::Captcha => selector == "#captcha",
            View::Viewer { .. } => matches!(selector, "#viewer" | "#back"),
        };
        Ok(present)
    }

    async fn document_ready(&mut self) -> Result<bool, SessionError> {
        Ok(self.view != View::Blank)
    }

    async fn click(&mut self, selector: &str, nth: usize) -> Result<(), SessionError> {
        self.settle();
        match (self.view.clone(), selector) {
            (View::Form, "#civil") => {
                self.submit(CaseType::Civil).await;
                Ok(())
            }
            (View::Form, "#criminal") => {
                self.submit(CaseType::Criminal).await;
                Ok(())
            }
            (View::Results { case_type, page }, "#next") => self.turn_page(case_type, page),
            (View::Results { case_type, page }, "a.view") => {
                let Some(row) = self.row(case_type, page, nth) else {
                    return Err(SessionError::missing_element(selector));
                };
                if !row.opens {
                    return Err(SessionError::browser("element click intercepted"));
                }
                self.portal.lock().viewer_opens += 1;
                self.view = View::Viewer {
                    case_type,
                    page,
                    row: nth,
                };
                Ok(())
            }
            (View::Viewer { case_type, page, .. }, "#back") => {
                self.view = View::Results { case_type, page };
                Ok(())
            }
            _ => Err(SessionError::missing_element(selector)),
        }
    }

    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), SessionError> {
        if self.view == View::Form && selector == "#date" {
            self.date = Some(value.to_string());
            Ok(())
        } else {
            Err(SessionError::missing_element(selector))
        }
    }

    async fn select_option(&mut self, selector: &str, label: &Regex) -> Result<String, SessionError> {
        let chosen = self
            .options(selector)?
            .into_iter()
            .find(|option| label.is_match(option))
            .ok_or_else(|| SessionError::option_not_found(selector, label.as_str()))?;
        if selector == "#court" {
            self.court = Some(chosen.clone());
        }
        Ok(chosen)
    }

    async fn option_labels(&mut self, selector: &str) -> Result<Vec<String>, SessionError> {
        self.options(selector)
    }

    async fn text(&mut self, selector: &str) -> Result<Option<String>, SessionError> {
        self.settle();
        match (&self.view, selector) {
            (View::Invalid(message), "#invalid") => Ok(Some(message.clone())),
            _ => Ok(None),
        }
    }

    async fn attribute(
        &mut self,
        _selector: &str,
        _name: &str,
    ) -> Result<Option<String>, SessionError> {
        Ok(None)
    }

    async fn read_rows(&mut self, _spec: &RowSpec) -> Result<Vec<RowSnapshot>, SessionError> {
        self.settle();
        let View::Results { case_type, page } = self.view else {
            return Ok(Vec::new());
        };
        let rows = self.pages(case_type).get(page).cloned().unwrap_or_default();
        Ok(rows
            .into_iter()
            .map(|row| RowSnapshot {
                key: row.key,
                title: row.title,
                href: row.href,
                size_hint: None,
            })
            .collect())
    }

    async fn capture_page(&mut self) -> Result<Vec<u8>, SessionError> {
        let View::Viewer {
            case_type,
            page,
            row,
        } = self.view
        else {
            return Err(SessionError::browser("nothing to capture"));
        };
        self.row(case_type, page, row)
            .and_then(|row| row.body)
            .ok_or_else(|| SessionError::browser("viewer crashed"))
    }

    /// Browser history: from the viewer back to its results page, from
    /// anywhere else off the portal.
    async fn go_back(&mut self) -> Result<(), SessionError> {
        self.settle();
        self.view = match self.view {
            View::Viewer {
                case_type, page, ..
            } => View::Results { case_type, page },
            _ => View::Blank,
        };
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String, SessionError> {
        self.settle();
        let search_url = self.portal.lock().search_url.clone();
        Ok(match &self.view {
            View::Results { page, .. } => format!("{search_url}/results?page={page}"),
            _ => search_url,
        })
    }

    async fn cookies(&mut self) -> Result<Vec<SessionCookie>, SessionError> {
        Ok(vec![SessionCookie::new(
            "JSESSIONID",
            format!("fixture-{}", self.id),
        )])
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        if !self.closed {
            self.closed = true;
            let mut state = self.portal.lock();
            state.open_now = state.open_now.saturating_sub(1);
        }
        Ok(())
    }
}
