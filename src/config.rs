//! Engine configuration.
//!
//! Every field has a default, so an empty or missing config file yields a
//! working engine pointed at the eCourts portal. Files are TOML:
//!
//! ```toml
//! [browser]
//! webdriver_url = "http://localhost:9515"
//! headless = true
//!
//! [retry]
//! max_attempts = 5
//!
//! [limits]
//! max_sessions = 2
//! download_workers = 4
//! ```
//!
//! Lookup order: an explicit path, then
//! `$XDG_CONFIG_HOME/causelist/config.toml`, then
//! `$HOME/.config/causelist/config.toml`, then built-in defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::portal::PortalLayout;
use crate::query::DateWindow;
use crate::retry::{DEFAULT_MAX_RETRIES, RetryPolicy};

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Read {
        /// File path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        /// File path
        path: PathBuf,
        /// Underlying parse error
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of range.
    #[error("invalid config value for `{field}`: {value}. Expected range: {expected}")]
    Invalid {
        /// Dotted field name
        field: &'static str,
        /// Rejected value
        value: String,
        /// Accepted range
        expected: &'static str,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, value: impl ToString, expected: &'static str) -> Self {
        Self::Invalid {
            field,
            value: value.to_string(),
            expected,
        }
    }
}

/// Browser family behind the WebDriver server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    /// Chrome / Chromium via chromedriver.
    #[default]
    Chrome,
    /// Firefox via geckodriver.
    Firefox,
}

/// `[browser]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// WebDriver server endpoint.
    pub webdriver_url: String,
    /// Browser family.
    pub kind: BrowserKind,
    /// Run without a visible window.
    pub headless: bool,
    /// Viewport width.
    pub window_width: u32,
    /// Viewport height.
    pub window_height: u32,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:4444".to_string(),
            kind: BrowserKind::Chrome,
            headless: true,
            window_width: 1920,
            window_height: 1080,
        }
    }
}

/// `[retry]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per stage operation, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay_ms: u64,
    /// Cap on any single delay.
    pub max_delay_ms: u64,
    /// Growth factor between retries.
    pub backoff_multiplier: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            base_delay_ms: 1_000,
            max_delay_ms: 32_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Builds the retry policy.
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.backoff_multiplier,
        )
    }
}

/// `[limits]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Browser sessions open at once across all jobs.
    pub max_sessions: usize,
    /// Concurrent direct downloads within a job.
    pub download_workers: usize,
    /// Documents smaller than this are treated as truncated.
    pub min_document_bytes: u64,
    /// Page bound per search.
    pub max_pages: usize,
    /// Minimum gap between requests to one host; 0 disables pacing.
    pub rate_limit_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_sessions: 2,
            download_workers: 4,
            min_document_bytes: 64,
            max_pages: 200,
            rate_limit_ms: 1_000,
        }
    }
}

/// `[timeouts]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Bound on any single browser command.
    pub command_ms: u64,
    /// Bound on waiting for a page to become ready.
    pub ready_ms: u64,
    /// HTTP connect timeout for direct downloads.
    pub http_connect_secs: u64,
    /// HTTP read timeout for direct downloads.
    pub http_read_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            command_ms: 30_000,
            ready_ms: 20_000,
            http_connect_secs: 30,
            http_read_secs: 300,
        }
    }
}

impl TimeoutConfig {
    /// Per-command bound.
    #[must_use]
    pub fn command(&self) -> Duration {
        Duration::from_millis(self.command_ms)
    }

    /// Readiness bound.
    #[must_use]
    pub fn ready(&self) -> Duration {
        Duration::from_millis(self.ready_ms)
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Portal selectors.
    pub portal: PortalLayout,
    /// Browser settings.
    pub browser: BrowserConfig,
    /// Retry policy.
    pub retry: RetryConfig,
    /// Concurrency and size limits.
    pub limits: LimitsConfig,
    /// Timeouts.
    pub timeouts: TimeoutConfig,
    /// Supported date window.
    pub dates: DateWindow,
}

/// A configuration together with where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// File the config was read from, when one was found.
    pub path: Option<PathBuf>,
    /// The configuration.
    pub config: EngineConfig,
}

impl EngineConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] or [`ConfigError::Invalid`].
    pub fn from_toml_str(raw: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from `explicit` or the default location.
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    ///
    /// # Errors
    ///
    /// Read, parse or validation failures.
    pub fn load(explicit: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
        let (path, required) = match explicit {
            Some(path) => (Some(path.to_path_buf()), true),
            None => (resolve_default_config_path(), false),
        };

        let Some(path) = path else {
            debug!("no config location; using defaults");
            return Ok(LoadedConfig {
                path: None,
                config: Self::default(),
            });
        };

        if !required && !path.exists() {
            debug!(path = %path.display(), "no config file; using defaults");
            return Ok(LoadedConfig {
                path: None,
                config: Self::default(),
            });
        }

        let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config = Self::from_toml_str(&raw, &path)?;
        debug!(path = %path.display(), "loaded config file");
        Ok(LoadedConfig {
            path: Some(path),
            config,
        })
    }

    /// Range-checks every numeric setting.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] for the first value out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = &self.limits;
        if !(1..=32).contains(&limits.max_sessions) {
            return Err(ConfigError::invalid(
                "limits.max_sessions",
                limits.max_sessions,
                "1..=32",
            ));
        }
        if !(1..=32).contains(&limits.download_workers) {
            return Err(ConfigError::invalid(
                "limits.download_workers",
                limits.download_workers,
                "1..=32",
            ));
        }
        if !(1..=10_000).contains(&limits.max_pages) {
            return Err(ConfigError::invalid(
                "limits.max_pages",
                limits.max_pages,
                "1..=10000",
            ));
        }
        if limits.rate_limit_ms > 60_000 {
            return Err(ConfigError::invalid(
                "limits.rate_limit_ms",
                limits.rate_limit_ms,
                "0..=60000",
            ));
        }

        let retry = &self.retry;
        if !(1..=10).contains(&retry.max_attempts) {
            return Err(ConfigError::invalid(
                "retry.max_attempts",
                retry.max_attempts,
                "1..=10",
            ));
        }
        if retry.base_delay_ms > retry.max_delay_ms {
            return Err(ConfigError::invalid(
                "retry.base_delay_ms",
                retry.base_delay_ms,
                "at most retry.max_delay_ms",
            ));
        }
        if !(1.0..=10.0).contains(&retry.backoff_multiplier) {
            return Err(ConfigError::invalid(
                "retry.backoff_multiplier",
                retry.backoff_multiplier,
                "1.0..=10.0",
            ));
        }

        let timeouts = &self.timeouts;
        if !(1..=600_000).contains(&timeouts.command_ms) {
            return Err(ConfigError::invalid(
                "timeouts.command_ms",
                timeouts.command_ms,
                "1..=600000",
            ));
        }
        if !(1..=600_000).contains(&timeouts.ready_ms) {
            return Err(ConfigError::invalid(
                "timeouts.ready_ms",
                timeouts.ready_ms,
                "1..=600000",
            ));
        }
        for (field, value) in [
            ("timeouts.http_connect_secs", timeouts.http_connect_secs),
            ("timeouts.http_read_secs", timeouts.http_read_secs),
        ] {
            if !(1..=3600).contains(&value) {
                return Err(ConfigError::invalid(field, value, "1..=3600"));
            }
        }

        if self.dates.max_range_days == 0 {
            return Err(ConfigError::invalid(
                "dates.max_range_days",
                self.dates.max_range_days,
                "at least 1",
            ));
        }
        Ok(())
    }
}

/// Default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/causelist/config.toml`
/// 2. `$HOME/.config/causelist/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("causelist")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("causelist")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}
