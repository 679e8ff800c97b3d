//! Error types for scrape operations.
//!
//! Crawler adapters must surface failures only through these variants (with
//! [`ScrapeError::Unknown`] as the catch-all) so the dispatcher can classify
//! every outcome. Helper constructors carry the context the bare source
//! errors lack; no blanket `From` impls.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while scraping a page or resolving media links.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// A filename had no usable extension.
    #[error("no file extension in {filename}")]
    NoExtension {
        /// The offending filename.
        filename: String,
    },

    /// The resource is behind a password.
    #[error("password protected: {url}")]
    PasswordProtected {
        /// The protected URL.
        url: String,
    },

    /// A site login attempt was rejected.
    #[error("failed login for {domain}")]
    FailedLogin {
        /// The domain that refused the credentials.
        domain: String,
    },

    /// The response body type did not match what the crawler expected.
    #[error("invalid content type from {url}: received {received}, was expecting {expected}")]
    InvalidContentType {
        /// The fetched URL.
        url: String,
        /// Content-Type actually received.
        received: String,
        /// What was expected (e.g. "text").
        expected: &'static str,
    },

    /// Request timed out before completion.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present.
        retry_after: Option<String>,
    },

    /// Network-level error (DNS, connection refused, TLS, ...).
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Local file system error.
    #[error("IO error at {path}: {source}")]
    Io {
        /// The path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Anything a crawler could not express in the taxonomy above.
    #[error("unexpected scrape failure: {message}")]
    Unknown {
        /// Diagnostic detail.
        message: String,
    },
}

impl ScrapeError {
    /// Creates a missing-extension error.
    pub fn no_extension(filename: impl Into<String>) -> Self {
        Self::NoExtension {
            filename: filename.into(),
        }
    }

    /// Creates a password-protected error.
    pub fn password_protected(url: impl Into<String>) -> Self {
        Self::PasswordProtected { url: url.into() }
    }

    /// Creates a failed-login error.
    pub fn failed_login(domain: impl Into<String>) -> Self {
        Self::FailedLogin {
            domain: domain.into(),
        }
    }

    /// Creates an invalid-content-type error.
    pub fn invalid_content_type(
        url: impl Into<String>,
        received: impl Into<String>,
        expected: &'static str,
    ) -> Self {
        Self::InvalidContentType {
            url: url.into(),
            received: received.into(),
            expected,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an unknown error.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown {
            message: message.into(),
        }
    }
}
