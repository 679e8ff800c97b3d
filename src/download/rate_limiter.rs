//! Per-domain and process-wide rate limiting for outbound requests.
//!
//! Three gates: a per-domain gate (configurable requests/second with
//! per-domain overrides), a process-wide gate shared by all traffic, and a
//! slower "sensitive" gate for token-issuing endpoints. Acquisition is FIFO -
//! waiters queue on a `tokio::sync::Mutex`, which wakes in request order - so
//! no crawler instance can starve another. A gate never rejects; it only
//! delays.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::config::RateLimitOptions;

/// Warning threshold for cumulative delay per domain (30 seconds).
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Maximum Retry-After value (1 hour) to prevent excessive delays.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Minimum spacing between two acquisitions of one gate.
#[derive(Debug)]
struct Gate {
    interval: Duration,
    /// Time of the last acquisition. Mutex gives atomic read-update and FIFO
    /// wake order. `None` means never acquired (first caller is immediate).
    last: Mutex<Option<Instant>>,
    /// Total delay applied through this gate, for excess warnings.
    cumulative_delay_ms: AtomicU64,
}

impl Gate {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
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

    async fn acquire(&self, label: &str) {
        if self.interval.is_zero() {
            return;
        }

        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.interval {
                let delay = self.interval.saturating_sub(elapsed);
                let cumulative = self.add_cumulative_delay(delay);

                debug!(
                    gate = %label,
                    delay_ms = delay.as_millis(),
                    cumulative_ms = cumulative.as_millis(),
                    "applying rate limit delay"
                );

                if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                    warn!(
                        gate = %label,
                        cumulative_delay_secs = cumulative.as_secs(),
                        "excessive rate limiting - consider reducing request volume"
                    );
                }

                tokio::time::sleep(delay).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Rate limiter shared by all scrape and download traffic in a run.
#[derive(Debug)]
pub struct RateLimiter {
    default_interval: Duration,
    overrides: HashMap<String, Duration>,
    global: Gate,
    sensitive: Gate,
    domains: DashMap<String, Arc<Gate>>,
}

impl RateLimiter {
    /// Builds a limiter from configuration. A rate of zero disables the
    /// corresponding gate.
    #[must_use]
    pub fn new(options: &RateLimitOptions) -> Self {
        let overrides = options
            .domain_overrides
            .iter()
            .map(|(domain, rate)| (domain.to_lowercase(), interval_from_rate(*rate)))
            .collect();

        Self {
            default_interval: interval_from_rate(options.requests_per_second),
            overrides,
            global: Gate::new(interval_from_rate(options.global_requests_per_second)),
            sensitive: Gate::new(Duration::from_millis(options.sensitive_interval_ms)),
            domains: DashMap::new(),
        }
    }

    /// Creates a limiter that applies no delays.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            default_interval: Duration::ZERO,
            overrides: HashMap::new(),
            global: Gate::new(Duration::ZERO),
            sensitive: Gate::new(Duration::ZERO),
            domains: DashMap::new(),
        }
    }

    /// Spacing applied between requests to `domain`.
    #[must_use]
    pub fn interval_for(&self, domain: &str) -> Duration {
        self.overrides
            .get(&domain.to_lowercase())
            .copied()
            .unwrap_or(self.default_interval)
    }

    /// Waits until a request to `domain` is allowed.
    ///
    /// Passes the process-wide gate first, then the domain gate. Every call
    /// eventually returns; there is no failure mode.
    #[instrument(skip(self))]
    pub async fn acquire(&self, domain: &str) {
        self.global.acquire("global").await;

        let domain = domain.to_lowercase();
        // Clone the Arc so the DashMap shard lock is released before awaiting.
        let gate = self
            .domains
            .entry(domain.clone())
            .or_insert_with(|| Arc::new(Gate::new(self.interval_for(&domain))))
            .clone();
        gate.acquire(&domain).await;
    }

    /// Waits until a request to `url`'s domain is allowed.
    pub async fn acquire_url(&self, url: &str) {
        let domain = extract_domain(url);
        self.acquire(&domain).await;
    }

    /// Waits on the slower gate reserved for sensitive endpoints (token
    /// issuing, login).
    #[instrument(skip(self))]
    pub async fn acquire_sensitive(&self) {
        self.sensitive.acquire("sensitive").await;
    }

    /// Records a server-mandated delay (from a Retry-After header) against a
    /// domain's cumulative total.
    #[instrument(skip(self))]
    pub fn record_rate_limit(&self, domain: &str, delay: Duration) {
        let domain = domain.to_lowercase();
        let gate = self
            .domains
            .entry(domain.clone())
            .or_insert_with(|| Arc::new(Gate::new(self.interval_for(&domain))))
            .clone();
        let cumulative = gate.add_cumulative_delay(delay);

        debug!(
            domain = %domain,
            delay_ms = delay.as_millis(),
            cumulative_ms = cumulative.as_millis(),
            "recorded server rate limit"
        );

        if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
            warn!(
                domain = %domain,
                cumulative_delay_secs = cumulative.as_secs(),
                "excessive server rate limiting - site may be under heavy load"
            );
        }
    }
}

fn interval_from_rate(requests_per_second: u32) -> Duration {
    if requests_per_second == 0 {
        Duration::ZERO
    } else {
        Duration::from_secs(1) / requests_per_second
    }
}

/// Extracts the domain from a URL.
///
/// Returns "unknown" for malformed URLs, so even unparseable requests are
/// still rate limited together.
#[must_use]
pub fn extract_domain(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports both RFC 7231 forms (integer seconds and HTTP-date). Returns
/// `None` for unparseable values; caps excessive values at one hour.
#[must_use]
#[instrument]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }

        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);

        if duration > MAX_RETRY_AFTER {
            warn!(
                seconds,
                max_seconds = MAX_RETRY_AFTER.as_secs(),
                "Retry-After exceeds maximum, capping at 1 hour"
            );
            return Some(MAX_RETRY_AFTER);
        }

        return Some(duration);
    }

    if let Ok(datetime) = httpdate::parse_http_date(header_value) {
        let now = std::time::SystemTime::now();

        if let Ok(duration) = datetime.duration_since(now) {
            if duration > MAX_RETRY_AFTER {
                warn!(
                    delay_secs = duration.as_secs(),
                    max_secs = MAX_RETRY_AFTER.as_secs(),
                    "Retry-After date exceeds maximum, capping at 1 hour"
                );
                return Some(MAX_RETRY_AFTER);
            }
            Some(duration)
        } else {
            debug!(header_value, "Retry-After date is in the past, returning zero");
            Some(Duration::ZERO)
        }
    } else {
        debug!(header_value, "unparseable Retry-After value");
        None
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn limiter_with_rate(requests_per_second: u32) -> RateLimiter {
        RateLimiter::new(&RateLimitOptions {
            requests_per_second,
            domain_overrides: HashMap::new(),
            global_requests_per_second: 0,
            sensitive_interval_ms: 0,
        })
    }

    #[tokio::test]
    async fn test_disabled_limiter_applies_no_delay() {
        tokio::time::pause();

        let limiter = RateLimiter::disabled();
        let start = Instant::now();
        limiter.acquire("example.com").await;
        limiter.acquire("example.com").await;
        limiter.acquire("example.com").await;

        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_first_request_is_immediate() {
        tokio::time::pause();

        let limiter = limiter_with_rate(1);
        let start = Instant::now();
        limiter.acquire("example.com").await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_same_domain_requests_are_spaced() {
        tokio::time::pause();

        let limiter = limiter_with_rate(1);
        let start = Instant::now();

        limiter.acquire("example.com").await;
        limiter.acquire("example.com").await;
        assert!(start.elapsed() >= Duration::from_secs(1));

        limiter.acquire("example.com").await;
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_different_domains_are_independent() {
        tokio::time::pause();

        let limiter = limiter_with_rate(1);
        limiter.acquire("a.example").await;

        let start = Instant::now();
        limiter.acquire("b.example").await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_fifty_concurrent_acquires_at_ten_per_second() {
        tokio::time::pause();

        let limiter = Arc::new(limiter_with_rate(10));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.acquire("example.com").await;
            }));
        }
        for handle in handles {
            // Every acquire succeeds; none is rejected.
            handle.await.unwrap();
        }

        // 49 gaps of 100ms behind the first request.
        assert!(
            start.elapsed() >= Duration::from_millis(4900),
            "last acquire completed too early: {:?}",
            start.elapsed()
        );
    }

    #[tokio::test]
    async fn test_domain_override_changes_spacing() {
        tokio::time::pause();

        let mut overrides = HashMap::new();
        overrides.insert("slow.example".to_string(), 1);
        let limiter = RateLimiter::new(&RateLimitOptions {
            requests_per_second: 10,
            domain_overrides: overrides,
            global_requests_per_second: 0,
            sensitive_interval_ms: 0,
        });

        assert_eq!(limiter.interval_for("slow.example"), Duration::from_secs(1));
        assert_eq!(
            limiter.interval_for("fast.example"),
            Duration::from_millis(100)
        );
    }

    #[tokio::test]
    async fn test_sensitive_gate_is_slower() {
        tokio::time::pause();

        let limiter = RateLimiter::new(&RateLimitOptions {
            requests_per_second: 0,
            domain_overrides: HashMap::new(),
            global_requests_per_second: 0,
            sensitive_interval_ms: 2000,
        });

        let start = Instant::now();
        limiter.acquire_sensitive().await;
        limiter.acquire_sensitive().await;
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[test]
    fn test_record_rate_limit_accumulates() {
        let limiter = limiter_with_rate(1);
        limiter.record_rate_limit("example.com", Duration::from_secs(5));
        limiter.record_rate_limit("example.com", Duration::from_secs(10));

        let gate = limiter.domains.get("example.com").unwrap();
        assert_eq!(gate.cumulative_delay_ms.load(Ordering::SeqCst), 15_000);
    }

    // --- extract_domain ---

    #[test]
    fn test_extract_domain_variants() {
        assert_eq!(extract_domain("https://example.com/path"), "example.com");
        assert_eq!(extract_domain("http://Example.COM/Path"), "example.com");
        assert_eq!(extract_domain("https://192.168.1.1/file"), "192.168.1.1");
        assert_eq!(extract_domain("https://localhost:8080/x"), "localhost");
        assert_eq!(extract_domain("not a url"), "unknown");
        assert_eq!(extract_domain(""), "unknown");
    }

    // --- parse_retry_after ---

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
        assert_eq!(parse_retry_after("  120  "), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_parse_retry_after_invalid() {
        assert_eq!(parse_retry_after("-5"), None);
        assert_eq!(parse_retry_after("soon"), None);
        assert_eq!(parse_retry_after(""), None);
    }

    #[test]
    fn test_parse_retry_after_caps_at_one_hour() {
        assert_eq!(parse_retry_after("7200"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_retry_after("3600"), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_parse_retry_after_http_date_past_is_zero() {
        assert_eq!(
            parse_retry_after("Wed, 01 Jan 2020 00:00:00 GMT"),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_parse_retry_after_http_date_future() {
        let future_time = std::time::SystemTime::now() + Duration::from_secs(60);
        let future_date = httpdate::fmt_http_date(future_time);

        let duration = parse_retry_after(&future_date).unwrap();
        assert!(
            duration >= Duration::from_secs(55) && duration <= Duration::from_secs(65),
            "duration should be ~60s, got {duration:?}"
        );
    }
}
