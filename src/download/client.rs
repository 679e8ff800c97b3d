//! HTTP client wrapper for page fetches and streaming media downloads.
//!
//! One client is created per run and shared everywhere, keeping connection
//! pooling and the cookie jar consistent between scrape and download traffic.
//! Crawlers use [`HttpClient::fetch_text`]; the download executor streams
//! through [`HttpClient::stream_to_partial`], which appends to a `.part` file
//! and leaves verification and the final rename to the caller.

use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{CONTENT_TYPE, RANGE, REFERER, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::scrape::ScrapeError;
use crate::shutdown::Shutdown;
use crate::user_agent::default_user_agent;

use super::error::DownloadError;
use super::filename::is_text_extension;

/// Default connect timeout in seconds.
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default read timeout in seconds.
const READ_TIMEOUT_SECS: u64 = 300;

/// HTTP client for scrape fetches and streaming downloads.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

/// Result of streaming one response body into a partial file.
#[derive(Debug, Clone)]
pub struct StreamResult {
    /// Bytes written by this attempt.
    pub bytes_written: u64,
    /// Size of the partial file after this attempt.
    pub total_bytes: u64,
    /// Expected total size when the server declared one.
    pub content_length: Option<u64>,
    /// Whether an HTTP Range resume was honored.
    pub resumed: bool,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a client with default timeouts, gzip decompression, and a
    /// cookie jar.
    ///
    /// # Panics
    ///
    /// Panics if the client builder fails with the static configuration,
    /// which does not happen in practice.
    #[must_use]
    pub fn new() -> Self {
        Self::with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a client with explicit timeout values.
    ///
    /// # Panics
    ///
    /// Panics if the client builder fails with the supplied configuration.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn with_timeouts(connect_timeout_secs: u64, read_timeout_secs: u64) -> Self {
        let client = Client::builder()
            .user_agent(default_user_agent())
            .cookie_store(true)
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .read_timeout(Duration::from_secs(read_timeout_secs))
            .build()
            .expect("failed to build HTTP client with static configuration");
        Self { client }
    }

    /// Fetches a page body as text for crawler parsing.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError::HttpStatus`] for non-success responses,
    /// [`ScrapeError::InvalidContentType`] when the body is not html/text,
    /// and [`ScrapeError::Timeout`]/[`ScrapeError::Network`] for transport
    /// failures.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch_text(
        &self,
        url: &Url,
        referer: Option<&Url>,
    ) -> Result<String, ScrapeError> {
        let mut request = self.client.get(url.clone());
        if let Some(referer) = referer {
            request = request.header(REFERER, referer.as_str());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ScrapeError::timeout(url.as_str())
            } else {
                ScrapeError::network(url.as_str(), e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = header_string(&response, RETRY_AFTER.as_str());
            return Err(ScrapeError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
                retry_after,
            });
        }

        let content_type = header_string(&response, CONTENT_TYPE.as_str()).unwrap_or_default();
        if !content_type_is_text(&content_type) {
            return Err(ScrapeError::invalid_content_type(
                url.as_str(),
                content_type,
                "text",
            ));
        }

        response.text().await.map_err(|e| {
            if e.is_timeout() {
                ScrapeError::timeout(url.as_str())
            } else {
                ScrapeError::network(url.as_str(), e)
            }
        })
    }

    /// Streams a media URL into `partial`, resuming from `resume_from` bytes
    /// when the server honors Range requests.
    ///
    /// A 416 response means the partial no longer matches the resource; the
    /// partial is deleted and the download restarts from zero. A 200 response
    /// to a Range request truncates and starts over. The partial file is left
    /// in place on errors so a later attempt (or run) can resume it.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError`] variants for transport, status,
    /// content-type, and IO failures, and [`DownloadError::Cancelled`] when
    /// the run shuts down mid-stream.
    #[instrument(skip(self, shutdown), fields(url = %url, resume_from))]
    pub async fn stream_to_partial(
        &self,
        url: &Url,
        referer: &Url,
        partial: &Path,
        expected_ext: &str,
        resume_from: u64,
        shutdown: &Shutdown,
    ) -> Result<StreamResult, DownloadError> {
        let mut request = self
            .client
            .get(url.clone())
            .header(REFERER, referer.as_str());
        if resume_from > 0 {
            request = request.header(RANGE, format!("bytes={resume_from}-"));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DownloadError::timeout(url.as_str())
            } else {
                DownloadError::network(url.as_str(), e)
            }
        })?;

        let status = response.status();

        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            // The partial no longer matches the remote resource.
            debug!(path = %partial.display(), "range not satisfiable, restarting from zero");
            let _ = tokio::fs::remove_file(partial).await;
            return Box::pin(self.stream_to_partial(
                url,
                referer,
                partial,
                expected_ext,
                0,
                shutdown,
            ))
            .await;
        }

        if !status.is_success() {
            let retry_after = header_string(&response, RETRY_AFTER.as_str());
            return Err(DownloadError::http_status_with_retry_after(
                url.as_str(),
                status.as_u16(),
                retry_after,
            ));
        }

        let content_type = header_string(&response, CONTENT_TYPE.as_str()).unwrap_or_default();
        if content_type_is_text(&content_type) && !is_text_extension(expected_ext) {
            return Err(DownloadError::invalid_content_type(
                url.as_str(),
                content_type,
            ));
        }

        let resumed = status == StatusCode::PARTIAL_CONTENT && resume_from > 0;
        let content_length = response.content_length().map(|remaining| {
            if resumed {
                resume_from + remaining
            } else {
                remaining
            }
        });

        let mut file = if resumed {
            tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(partial)
                .await
                .map_err(|e| DownloadError::io(partial, e))?
        } else {
            // Server ignored (or was not sent) the Range header; start clean.
            tokio::fs::File::create(partial)
                .await
                .map_err(|e| DownloadError::io(partial, e))?
        };

        let mut bytes_written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            if shutdown.is_requested() {
                debug!(path = %partial.display(), "stream cancelled, keeping partial");
                return Err(DownloadError::Cancelled);
            }

            let chunk = chunk.map_err(|e| {
                if e.is_timeout() {
                    DownloadError::timeout(url.as_str())
                } else {
                    DownloadError::network(url.as_str(), e)
                }
            })?;

            file.write_all(&chunk)
                .await
                .map_err(|e| DownloadError::io(partial, e))?;
            bytes_written += chunk.len() as u64;
        }

        file.flush()
            .await
            .map_err(|e| DownloadError::io(partial, e))?;

        let total_bytes = if resumed {
            resume_from + bytes_written
        } else {
            bytes_written
        };

        // A zero-byte body with no resume is a dead link dressed as success.
        if total_bytes == 0 {
            warn!(url = %url, "server returned an empty body");
            let _ = tokio::fs::remove_file(partial).await;
            return Err(DownloadError::integrity(
                partial,
                content_length.unwrap_or(0),
                0,
            ));
        }

        debug!(
            path = %partial.display(),
            bytes = bytes_written,
            total = total_bytes,
            resumed,
            "stream complete"
        );

        Ok(StreamResult {
            bytes_written,
            total_bytes,
            content_length,
            resumed,
        })
    }

    /// Returns a reference to the underlying reqwest client for operations
    /// this wrapper does not cover.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

fn header_string(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn content_type_is_text(content_type: &str) -> bool {
    let lowered = content_type.to_lowercase();
    lowered.contains("html") || lowered.contains("text")
}
