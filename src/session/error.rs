//! Errors raised by browser sessions.

use std::time::Duration;

use thiserror::Error;

/// Failures of a browser session command.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// A readiness condition or command did not complete in time.
    #[error("timed out after {timeout:?} waiting for {operation}")]
    Timeout {
        /// What was being waited on.
        operation: String,
        /// The bound that expired.
        timeout: Duration,
    },

    /// An element the portal should render is absent; the markup has changed.
    #[error("portal markup changed: no element matches `{selector}`")]
    MissingElement {
        /// Selector that matched nothing.
        selector: String,
    },

    /// A drop-down offers no usable option matching the requested label.
    #[error("drop-down `{selector}` has no option matching '{label}'")]
    OptionNotFound {
        /// Drop-down selector.
        selector: String,
        /// Requested label pattern.
        label: String,
    },

    /// The browser could not be launched or reached.
    #[error("failed to open browser session: {message}")]
    Launch {
        /// Driver message.
        message: String,
    },

    /// WebDriver transport or protocol failure.
    #[error("browser error: {message}")]
    Browser {
        /// Driver message.
        message: String,
    },

    /// The session was already closed.
    #[error("session is closed")]
    Closed,
}

impl SessionError {
    /// Creates a timeout error.
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout,
        }
    }

    /// Creates a missing-element error.
    pub fn missing_element(selector: impl Into<String>) -> Self {
        Self::MissingElement {
            selector: selector.into(),
        }
    }

    /// Creates an option-not-found error.
    pub fn option_not_found(selector: impl Into<String>, label: impl Into<String>) -> Self {
        Self::OptionNotFound {
            selector: selector.into(),
            label: label.into(),
        }
    }

    /// Creates a launch error.
    pub fn launch(message: impl ToString) -> Self {
        Self::Launch {
            message: message.to_string(),
        }
    }

    /// Creates a browser error.
    pub fn browser(message: impl ToString) -> Self {
        Self::Browser {
            message: message.to_string(),
        }
    }

    /// Only timeouts are worth retrying; everything else means the page or browser is unusable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
