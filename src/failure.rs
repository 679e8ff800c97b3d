//! Failure classification and the per-run failure log.
//!
//! Every error a crawler or download task produces maps to exactly one
//! [`ErrorKind`] from a closed taxonomy. The kind drives retry policy
//! (transient vs permanent) and which progress counter is incremented, and
//! permanent outcomes land in the [`FailureLog`] keyed by URL with a
//! human-readable reason.

use std::fmt;
use std::sync::Mutex;

use tracing::{error, warn};

use crate::download::DownloadError;
use crate::scrape::ScrapeError;

/// Closed failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Filename had no usable extension.
    NoExtension,
    /// Resource requires a password the run does not have.
    PasswordProtected,
    /// Site login was attempted and rejected.
    FailedLogin,
    /// Response body type did not match the expected content.
    InvalidContentType,
    /// Request timed out.
    Timeout,
    /// Server returned a non-success HTTP status.
    HttpStatus(u16),
    /// Anything that did not match a known category.
    Unknown,
}

impl ErrorKind {
    /// Counter/label string for this category.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::NoExtension => "No File Extension".to_string(),
            Self::PasswordProtected => "Password Protected".to_string(),
            Self::FailedLogin => "Failed Login".to_string(),
            Self::InvalidContentType => "Invalid Content Type".to_string(),
            Self::Timeout => "Timeout".to_string(),
            Self::HttpStatus(status) => format!("HTTP {status}"),
            Self::Unknown => "Unknown".to_string(),
        }
    }

    /// Whether this category is worth a bounded retry.
    ///
    /// Timeouts, server-side errors (5xx, which covers 521), and rate
    /// limiting (429) may clear up; everything else will fail the same way
    /// again.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::HttpStatus(429) | Self::HttpStatus(500..=599)
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Classifies a scrape error into the closed taxonomy.
#[must_use]
pub fn classify(error: &ScrapeError) -> ErrorKind {
    match error {
        ScrapeError::NoExtension { .. } => ErrorKind::NoExtension,
        ScrapeError::PasswordProtected { .. } => ErrorKind::PasswordProtected,
        ScrapeError::FailedLogin { .. } => ErrorKind::FailedLogin,
        ScrapeError::InvalidContentType { .. } => ErrorKind::InvalidContentType,
        ScrapeError::Timeout { .. } => ErrorKind::Timeout,
        ScrapeError::HttpStatus { status, .. } => ErrorKind::HttpStatus(*status),
        ScrapeError::Network { source, .. } => {
            if source.is_timeout() {
                ErrorKind::Timeout
            } else {
                ErrorKind::Unknown
            }
        }
        ScrapeError::Io { .. } | ScrapeError::Unknown { .. } => ErrorKind::Unknown,
    }
}

/// Classifies a download error into the closed taxonomy.
#[must_use]
pub fn classify_download(error: &DownloadError) -> ErrorKind {
    match error {
        DownloadError::Timeout { .. } => ErrorKind::Timeout,
        DownloadError::HttpStatus { status, .. } => ErrorKind::HttpStatus(*status),
        DownloadError::InvalidContentType { .. } => ErrorKind::InvalidContentType,
        DownloadError::Network { source, .. } => {
            if source.is_timeout() {
                ErrorKind::Timeout
            } else {
                ErrorKind::Unknown
            }
        }
        DownloadError::Io { .. }
        | DownloadError::InvalidUrl { .. }
        | DownloadError::Integrity { .. }
        | DownloadError::Cancelled => ErrorKind::Unknown,
    }
}

/// One permanently failed URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    /// The URL that failed.
    pub url: String,
    /// Category label at classification time.
    pub category: String,
    /// Human-readable reason.
    pub reason: String,
}

/// Per-run structured log of permanent failures, keyed by URL.
///
/// Transient failures only land here once retries are exhausted.
#[derive(Debug, Default)]
pub struct FailureLog {
    records: Mutex<Vec<FailureRecord>>,
}

impl FailureLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failed URL and emits the matching tracing event.
    ///
    /// `Unknown` failures log at error level with the full diagnostic detail
    /// in `reason`; classified failures log at warn level.
    pub fn record(&self, url: &str, kind: ErrorKind, reason: &str) {
        match kind {
            ErrorKind::Unknown => {
                error!(url = %url, reason = %reason, "unclassified failure");
            }
            _ => {
                warn!(url = %url, category = %kind, reason = %reason, "failure");
            }
        }

        if let Ok(mut records) = self.records.lock() {
            records.push(FailureRecord {
                url: url.to_string(),
                category: kind.label(),
                reason: reason.to_string(),
            });
        }
    }

    /// Returns a copy of all recorded failures.
    #[must_use]
    pub fn records(&self) -> Vec<FailureRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Number of recorded failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().map(|records| records.len()).unwrap_or(0)
    }

    /// True when nothing has failed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_match_counter_keys() {
        assert_eq!(ErrorKind::NoExtension.label(), "No File Extension");
        assert_eq!(ErrorKind::PasswordProtected.label(), "Password Protected");
        assert_eq!(ErrorKind::FailedLogin.label(), "Failed Login");
        assert_eq!(ErrorKind::InvalidContentType.label(), "Invalid Content Type");
        assert_eq!(ErrorKind::Timeout.label(), "Timeout");
        assert_eq!(ErrorKind::HttpStatus(429).label(), "HTTP 429");
        assert_eq!(ErrorKind::Unknown.label(), "Unknown");
    }

    #[test]
    fn test_transient_set_is_timeout_5xx_and_429() {
        assert!(ErrorKind::Timeout.is_transient());
        assert!(ErrorKind::HttpStatus(429).is_transient());
        assert!(ErrorKind::HttpStatus(500).is_transient());
        assert!(ErrorKind::HttpStatus(503).is_transient());
        assert!(ErrorKind::HttpStatus(521).is_transient());

        assert!(!ErrorKind::HttpStatus(404).is_transient());
        assert!(!ErrorKind::HttpStatus(403).is_transient());
        assert!(!ErrorKind::NoExtension.is_transient());
        assert!(!ErrorKind::PasswordProtected.is_transient());
        assert!(!ErrorKind::FailedLogin.is_transient());
        assert!(!ErrorKind::InvalidContentType.is_transient());
        assert!(!ErrorKind::Unknown.is_transient());
    }

    #[test]
    fn test_classify_scrape_errors() {
        assert_eq!(
            classify(&ScrapeError::no_extension("video")),
            ErrorKind::NoExtension
        );
        assert_eq!(
            classify(&ScrapeError::password_protected("https://example.com/a/x")),
            ErrorKind::PasswordProtected
        );
        assert_eq!(
            classify(&ScrapeError::failed_login("example.com")),
            ErrorKind::FailedLogin
        );
        assert_eq!(
            classify(&ScrapeError::timeout("https://example.com")),
            ErrorKind::Timeout
        );
        assert_eq!(
            classify(&ScrapeError::http_status("https://example.com", 521)),
            ErrorKind::HttpStatus(521)
        );
        assert_eq!(
            classify(&ScrapeError::unknown("adapter blew up")),
            ErrorKind::Unknown
        );
    }

    #[test]
    fn test_classify_download_errors() {
        assert_eq!(
            classify_download(&DownloadError::timeout("https://example.com/f.jpg")),
            ErrorKind::Timeout
        );
        assert_eq!(
            classify_download(&DownloadError::http_status("https://example.com/f.jpg", 503)),
            ErrorKind::HttpStatus(503)
        );
        assert_eq!(
            classify_download(&DownloadError::invalid_content_type(
                "https://example.com/f.jpg",
                "text/html"
            )),
            ErrorKind::InvalidContentType
        );
        assert_eq!(
            classify_download(&DownloadError::invalid_url("not-a-url")),
            ErrorKind::Unknown
        );
        assert_eq!(
            classify_download(&DownloadError::integrity("/tmp/f.jpg.part", 100, 50)),
            ErrorKind::Unknown
        );
    }

    #[test]
    fn test_failure_log_records_url_and_reason() {
        let log = FailureLog::new();
        assert!(log.is_empty());

        log.record(
            "https://example.com/a/1",
            ErrorKind::PasswordProtected,
            "Password Protected",
        );
        log.record("https://example.com/a/2", ErrorKind::Unknown, "panic: boom");

        let records = log.records();
        assert_eq!(log.len(), 2);
        assert_eq!(records[0].url, "https://example.com/a/1");
        assert_eq!(records[0].category, "Password Protected");
        assert_eq!(records[1].reason, "panic: boom");
    }
}
