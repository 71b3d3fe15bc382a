//! Shared User-Agent string for document downloads.

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/fierce/causelist";

/// Default User-Agent for download requests (identifies the tool).
#[must_use]
pub(crate) fn default_download_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("causelist/{version} (cause-list-retrieval; +{PROJECT_UA_URL})")
}
