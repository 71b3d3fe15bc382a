//! WebDriver-backed browser sessions.
//!
//! Talks to a running WebDriver server (chromedriver, geckodriver or a
//! Selenium grid) through `fantoccini`. One [`WebDriverBrowser`] opens a new
//! WebDriver session per job; the browser runs headless unless configured
//! otherwise.

use async_trait::async_trait;
use fantoccini::elements::Element;
use fantoccini::error::CmdError;
use fantoccini::wd::PrintConfiguration;
use fantoccini::{Client, ClientBuilder, Locator};
use regex::Regex;
use serde_json::{Map, Value, json};
use tracing::{debug, instrument};

use super::{BrowserDriver, BrowserSession, RowSnapshot, RowSpec, SessionCookie, SessionError};
use crate::config::{BrowserConfig, BrowserKind};

/// Opens sessions on a WebDriver server.
#[derive(Debug, Clone)]
pub struct WebDriverBrowser {
    config: BrowserConfig,
}

impl WebDriverBrowser {
    /// Creates a driver from browser settings.
    #[must_use]
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }
}

/// Builds the WebDriver capabilities for the configured browser.
#[must_use]
pub fn capabilities(config: &BrowserConfig) -> Map<String, Value> {
    let window = format!("--window-size={},{}", config.window_width, config.window_height);
    let mut caps = Map::new();
    match config.kind {
        BrowserKind::Chrome => {
            let mut args = vec![window, "--disable-gpu".to_string()];
            if config.headless {
                args.push("--headless=new".to_string());
            }
            caps.insert("browserName".to_string(), json!("chrome"));
            caps.insert("goog:chromeOptions".to_string(), json!({ "args": args }));
        }
        BrowserKind::Firefox => {
            let mut args = vec![
                format!("--width={}", config.window_width),
                format!("--height={}", config.window_height),
            ];
            if config.headless {
                args.push("-headless".to_string());
            }
            caps.insert("browserName".to_string(), json!("firefox"));
            caps.insert("moz:firefoxOptions".to_string(), json!({ "args": args }));
        }
    }
    caps
}

#[async_trait]
impl BrowserDriver for WebDriverBrowser {
    fn name(&self) -> &str {
        "webdriver"
    }

    #[instrument(skip(self), fields(url = %self.config.webdriver_url))]
    async fn open(&self) -> Result<Box<dyn BrowserSession>, SessionError> {
        let client = ClientBuilder::native()
            .capabilities(capabilities(&self.config))
            .connect(&self.config.webdriver_url)
            .await
            .map_err(SessionError::launch)?;
        debug!("webdriver session established");
        Ok(Box::new(WebDriverSession {
            client: Some(client),
        }))
    }
}

struct WebDriverSession {
    client: Option<Client>,
}

fn command_error(selector: &str, error: &CmdError) -> SessionError {
    if error.is_no_such_element() {
        SessionError::missing_element(selector)
    } else {
        SessionError::browser(error)
    }
}

async fn optional_text(parent: &Element, selector: &str) -> Result<Option<String>, SessionError> {
    match parent.find(Locator::Css(selector)).await {
        Ok(element) => {
            let text = element
                .text()
                .await
                .map_err(|e| command_error(selector, &e))?;
            let text = text.trim();
            Ok((!text.is_empty()).then(|| text.to_string()))
        }
        Err(e) if e.is_no_such_element() => Ok(None),
        Err(e) => Err(SessionError::browser(e)),
    }
}

async fn optional_attr(
    parent: &Element,
    selector: &str,
    name: &str,
) -> Result<Option<String>, SessionError> {
    match parent.find(Locator::Css(selector)).await {
        Ok(element) => element
            .attr(name)
            .await
            .map_err(|e| command_error(selector, &e)),
        Err(e) if e.is_no_such_element() => Ok(None),
        Err(e) => Err(SessionError::browser(e)),
    }
}

/// A usable `<option>`: label, value.
async fn usable_options(select: &Element, selector: &str) -> Result<Vec<(String, String)>, SessionError> {
    let options = select
        .find_all(Locator::Css("option"))
        .await
        .map_err(|e| command_error(selector, &e))?;
    let mut usable = Vec::with_capacity(options.len());
    for option in options {
        let value = option
            .attr("value")
            .await
            .map_err(|e| command_error(selector, &e))?
            .unwrap_or_default();
        let disabled = option
            .attr("disabled")
            .await
            .map_err(|e| command_error(selector, &e))?
            .is_some();
        if value.trim().is_empty() || disabled {
            continue;
        }
        let label = option
            .text()
            .await
            .map_err(|e| command_error(selector, &e))?;
        usable.push((label.trim().to_string(), value));
    }
    Ok(usable)
}

impl WebDriverSession {
    fn client(&self) -> Result<&Client, SessionError> {
        self.client.as_ref().ok_or(SessionError::Closed)
    }

    async fn element(&self, selector: &str) -> Result<Element, SessionError> {
        self.client()?
            .find(Locator::Css(selector))
            .await
            .map_err(|e| command_error(selector, &e))
    }
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn navigate_to(&mut self, url: &str) -> Result<(), SessionError> {
        self.client()?
            .goto(url)
            .await
            .map_err(SessionError::browser)
    }

    async fn is_present(&mut self, selector: &str) -> Result<bool, SessionError> {
        match self.client()?.find(Locator::Css(selector)).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_no_such_element() => Ok(false),
            Err(e) => Err(SessionError::browser(e)),
        }
    }

    async fn document_ready(&mut self) -> Result<bool, SessionError> {
        let state = self
            .client()?
            .execute("return document.readyState", Vec::new())
            .await
            .map_err(SessionError::browser)?;
        Ok(state.as_str() == Some("complete"))
    }

    async fn click(&mut self, selector: &str, nth: usize) -> Result<(), SessionError> {
        let elements = self
            .client()?
            .find_all(Locator::Css(selector))
            .await
            .map_err(|e| command_error(selector, &e))?;
        let element = elements
            .get(nth)
            .ok_or_else(|| SessionError::missing_element(format!("{selector} (match #{nth})")))?;
        element.click().await.map_err(|e| command_error(selector, &e))
    }

    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), SessionError> {
        let input = self.element(selector).await?;
        input.clear().await.map_err(|e| command_error(selector, &e))?;
        input
            .send_keys(value)
            .await
            .map_err(|e| command_error(selector, &e))
    }

    async fn select_option(
        &mut self,
        selector: &str,
        label: &Regex,
    ) -> Result<String, SessionError> {
        let select = self.element(selector).await?;
        let options = usable_options(&select, selector).await?;
        let (chosen, value) = options
            .into_iter()
            .find(|(text, _)| label.is_match(text))
            .ok_or_else(|| SessionError::option_not_found(selector, label.as_str()))?;
        select
            .select_by_value(&value)
            .await
            .map_err(|e| command_error(selector, &e))?;
        Ok(chosen)
    }

    async fn option_labels(&mut self, selector: &str) -> Result<Vec<String>, SessionError> {
        let select = self.element(selector).await?;
        Ok(usable_options(&select, selector)
            .await?
            .into_iter()
            .map(|(label, _)| label)
            .collect())
    }

    async fn text(&mut self, selector: &str) -> Result<Option<String>, SessionError> {
        match self.client()?.find(Locator::Css(selector)).await {
            Ok(element) => {
                let text = element.text().await.map_err(|e| command_error(selector, &e))?;
                Ok(Some(text.trim().to_string()))
            }
            Err(e) if e.is_no_such_element() => Ok(None),
            Err(e) => Err(SessionError::browser(e)),
        }
    }

    async fn attribute(
        &mut self,
        selector: &str,
        name: &str,
    ) -> Result<Option<String>, SessionError> {
        match self.client()?.find(Locator::Css(selector)).await {
            Ok(element) => element.attr(name).await.map_err(|e| command_error(selector, &e)),
            Err(e) if e.is_no_such_element() => Ok(None),
            Err(e) => Err(SessionError::browser(e)),
        }
    }

    async fn read_rows(&mut self, spec: &RowSpec) -> Result<Vec<RowSnapshot>, SessionError> {
        let rows = self
            .client()?
            .find_all(Locator::Css(&spec.row))
            .await
            .map_err(|e| command_error(&spec.row, &e))?;
        let mut snapshots = Vec::with_capacity(rows.len());
        for row in &rows {
            let size_hint = match &spec.size_attribute {
                Some(attribute) => row
                    .attr(attribute)
                    .await
                    .map_err(|e| command_error(&spec.row, &e))?
                    .and_then(|raw| raw.trim().parse::<u64>().ok()),
                None => None,
            };
            snapshots.push(RowSnapshot {
                key: optional_text(row, &spec.key).await?,
                title: optional_text(row, &spec.title).await?,
                href: optional_attr(row, &spec.link, "href").await?,
                size_hint,
            });
        }
        Ok(snapshots)
    }

    async fn capture_page(&mut self) -> Result<Vec<u8>, SessionError> {
        self.client()?
            .print(PrintConfiguration::default())
            .await
            .map_err(SessionError::browser)
    }

    async fn go_back(&mut self) -> Result<(), SessionError> {
        self.client()?.back().await.map_err(SessionError::browser)
    }

    async fn current_url(&mut self) -> Result<String, SessionError> {
        let url = self
            .client()?
            .current_url()
            .await
            .map_err(SessionError::browser)?;
        Ok(url.to_string())
    }

    async fn cookies(&mut self) -> Result<Vec<SessionCookie>, SessionError> {
        let cookies = self
            .client()?
            .get_all_cookies()
            .await
            .map_err(SessionError::browser)?;
        Ok(cookies
            .iter()
            .map(|cookie| SessionCookie::new(cookie.name(), cookie.value()))
            .collect())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        match self.client.take() {
            Some(client) => client.close().await.map_err(SessionError::browser),
            None => Ok(()),
        }
    }
}
