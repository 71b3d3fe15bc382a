//! Per-host pacing of requests made against court portals.
//!
//! Portals are shared public infrastructure and throttle aggressively. The
//! [`RateLimiter`] keeps a minimum gap between requests to the same host,
//! whether the request is a page navigation or a document download.
//! Different hosts proceed independently.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Cumulative delay per host after which a warning is logged.
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Cap applied to server-provided Retry-After values.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Per-host rate limiter, shared behind an `Arc` by the navigator and fetch workers.
#[derive(Debug)]
pub struct RateLimiter {
    min_gap: Duration,
    hosts: DashMap<String, Arc<HostState>>,
}

#[derive(Debug)]
struct HostState {
    // None until the first request to the host.
    last_request: Mutex<Option<Instant>>,
    cumulative_delay_ms: AtomicU64,
}

impl HostState {
    fn new() -> Self {
        Self {
            last_request: Mutex::new(None),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(total)
    }
}

impl RateLimiter {
    /// Creates a limiter enforcing `min_gap` between requests to one host.
    /// A zero gap disables pacing.
    #[must_use]
    pub fn new(min_gap: Duration) -> Self {
        debug!(gap_ms = min_gap.as_millis(), "creating rate limiter");
        Self {
            min_gap,
            hosts: DashMap::new(),
        }
    }

    /// Creates a limiter that never delays.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Returns whether pacing is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.min_gap.is_zero()
    }

    /// Waits until a request to `url`'s host is allowed, then records it.
    ///
    /// The first request to a host proceeds immediately.
    #[instrument(skip(self), fields(host))]
    pub async fn acquire(&self, url: &str) {
        if self.is_disabled() {
            return;
        }

        let host = extract_host(url);
        tracing::Span::current().record("host", &host);

        // Clone the Arc so the map shard is not held across the await below.
        let state = self
            .hosts
            .entry(host.clone())
            .or_insert_with(|| Arc::new(HostState::new()))
            .clone();

        let mut last_request = state.last_request.lock().await;
        if let Some(previous) = *last_request {
            let elapsed = previous.elapsed();
            if elapsed < self.min_gap {
                let delay = self.min_gap.saturating_sub(elapsed);
                let cumulative = state.add_cumulative_delay(delay);
                debug!(
                    host = %host,
                    delay_ms = delay.as_millis(),
                    cumulative_ms = cumulative.as_millis(),
                    "pacing request"
                );
                if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                    warn!(
                        host = %host,
                        cumulative_delay_secs = cumulative.as_secs(),
                        "heavy pacing against portal host"
                    );
                }
                tokio::time::sleep(delay).await;
            }
        }
        *last_request = Some(Instant::now());
    }

    /// Records a server-mandated delay (from a Retry-After header).
    #[instrument(skip(self), fields(host))]
    pub fn record_rate_limit(&self, url: &str, delay: Duration) {
        let host = extract_host(url);
        tracing::Span::current().record("host", &host);

        let state = self
            .hosts
            .entry(host.clone())
            .or_insert_with(|| Arc::new(HostState::new()));
        let cumulative = state.add_cumulative_delay(delay);
        debug!(
            host = %host,
            delay_ms = delay.as_millis(),
            cumulative_ms = cumulative.as_millis(),
            "recorded server rate limit"
        );
        if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
            warn!(
                host = %host,
                cumulative_delay_secs = cumulative.as_secs(),
                "portal is rate limiting heavily"
            );
        }
    }
}

/// Extracts the lower-cased host from a URL, or `"unknown"` if it has none.
#[must_use]
pub fn extract_host(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Parses a Retry-After header value (integer seconds or HTTP-date).
///
/// Returns `None` for unparseable or negative values. Values are capped at one hour;
/// dates in the past yield zero.
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        let seconds = u64::try_from(seconds).ok()?;
        return Some(Duration::from_secs(seconds).min(MAX_RETRY_AFTER));
    }

    let when = httpdate::parse_http_date(header_value).ok()?;
    match when.duration_since(std::time::SystemTime::now()) {
        Ok(duration) => Some(duration.min(MAX_RETRY_AFTER)),
        Err(_) => Some(Duration::ZERO),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== RateLimiter Tests ====================

    #[tokio::test]
    async fn test_first_request_to_host_is_immediate() {
        let limiter = RateLimiter::new(Duration::from_secs(5));
        let start = Instant::now();
        limiter.acquire("https://portal.example/a").await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_second_request_to_same_host_waits() {
        let limiter = RateLimiter::new(Duration::from_millis(150));
        limiter.acquire("https://portal.example/a").await;
        let start = Instant::now();
        limiter.acquire("https://portal.example/b").await;
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_different_hosts_are_independent() {
        let limiter = RateLimiter::new(Duration::from_secs(10));
        limiter.acquire("https://one.example/a").await;
        let start = Instant::now();
        limiter.acquire("https://two.example/a").await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_disabled_limiter_never_waits() {
        let limiter = RateLimiter::disabled();
        assert!(limiter.is_disabled());
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire("https://portal.example/a").await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_record_rate_limit_accumulates() {
        let limiter = RateLimiter::new(Duration::from_millis(10));
        limiter.record_rate_limit("https://portal.example/a", Duration::from_secs(2));
        limiter.record_rate_limit("https://portal.example/b", Duration::from_secs(3));
        let state = limiter.hosts.get("portal.example").unwrap();
        assert_eq!(state.cumulative_delay_ms.load(Ordering::SeqCst), 5000);
    }

    // ==================== Helper Tests ====================

    #[test]
    fn test_extract_host() {
        assert_eq!(
            extract_host("https://Services.eCourts.gov.in/ecourtindia_v6/"),
            "services.ecourts.gov.in"
        );
        assert_eq!(extract_host("http://localhost:8080/x"), "localhost");
        assert_eq!(extract_host("not a url"), "unknown");
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after(" 0 "), Some(Duration::ZERO));
        assert_eq!(parse_retry_after("-5"), None);
        assert_eq!(parse_retry_after("99999"), Some(MAX_RETRY_AFTER));
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after("soon"), None);
    }
}
