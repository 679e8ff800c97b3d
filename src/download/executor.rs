//! Download executor: moves one resolved media item onto disk.
//!
//! The pipeline per item: completion-store short-circuit, skip policy,
//! semaphore permit, rate-limiter acquisition, streaming into `<final>.part`,
//! byte-count verification against the declared content length, rename to
//! the final path, and a completion-store mark. Transient failures back off
//! and retry within the configured bound; the partial file survives failed
//! attempts so a later attempt or run can resume it.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::failure::{ErrorKind, classify_download};
use crate::run::RunContext;
use crate::scrape::{MediaItem, ScrapeJob};

use super::error::DownloadError;
use super::filename::download_path;
use super::rate_limiter::{extract_domain, parse_retry_after};
use super::retry::{RetryDecision, RetryPolicy};

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
const MAX_CONCURRENCY: usize = 100;

/// How one media item left the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Freshly streamed to disk and recorded.
    Downloaded {
        /// Final file path.
        path: PathBuf,
        /// Bytes streamed by this run.
        bytes: u64,
    },
    /// The file is on disk but another task (or a previous run) recorded it
    /// first; counts as previously completed.
    AlreadyRecorded {
        /// Final file path.
        path: PathBuf,
    },
    /// The completion store already had this resource.
    PreviouslyCompleted,
    /// Recorded without fetching, per configuration.
    Skipped,
}

/// Streams media items to disk under concurrency, rate, and retry limits.
#[derive(Debug)]
pub struct DownloadExecutor {
    ctx: Arc<RunContext>,
    semaphore: Arc<Semaphore>,
    retry_policy: RetryPolicy,
}

impl DownloadExecutor {
    /// Creates an executor over a run's shared services.
    ///
    /// Concurrency comes from `max_simultaneous_downloads`, clamped into
    /// `1..=100`; the retry bound comes from `max_attempts`.
    #[must_use]
    pub fn new(ctx: Arc<RunContext>) -> Self {
        let configured = ctx.settings().runtime.max_simultaneous_downloads;
        let concurrency = configured.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY);
        if concurrency != configured {
            warn!(
                configured,
                clamped = concurrency,
                "max_simultaneous_downloads out of range, clamping"
            );
        }

        let retry_policy = RetryPolicy::with_max_attempts(ctx.settings().runtime.max_attempts);

        Self {
            ctx,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            retry_policy,
        }
    }

    /// The configured retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Downloads one media item discovered by `job`.
    ///
    /// # Errors
    ///
    /// Returns the final [`DownloadError`] once the item is permanently
    /// failed or retries are exhausted, or [`DownloadError::Cancelled`] when
    /// the run shuts down. Individual attempt failures inside the retry loop
    /// do not surface.
    #[instrument(skip(self, item, job), fields(site = %site, url = %item.url))]
    pub async fn process(
        &self,
        site: &str,
        item: &MediaItem,
        job: &ScrapeJob,
    ) -> Result<DownloadOutcome, DownloadError> {
        let ctx = &self.ctx;

        if item.completed || self.recorded_complete(site, item).await {
            debug!("previously completed, skipping download");
            return Ok(DownloadOutcome::PreviouslyCompleted);
        }

        if ctx.settings().download.skip_download_mark_completed {
            debug!("skip_download_mark_completed set, recording without fetch");
            self.mark_complete_best_effort(site, item).await;
            return Ok(DownloadOutcome::Skipped);
        }

        let dest_dir = download_path(
            ctx.download_dir(),
            job,
            site,
            ctx.settings().download.block_download_sub_folders,
        );
        tokio::fs::create_dir_all(&dest_dir)
            .await
            .map_err(|e| DownloadError::io(&dest_dir, e))?;

        let final_path = dest_dir.join(&item.filename);
        let partial_path = dest_dir.join(format!("{}.part", item.filename));

        // A finished file without a store record (wiped DB, copied folder)
        // still counts as previously completed once re-recorded.
        if tokio::fs::try_exists(&final_path).await.unwrap_or(false) {
            debug!(path = %final_path.display(), "final file already on disk, recording");
            self.mark_complete_best_effort(site, item).await;
            return Ok(DownloadOutcome::AlreadyRecorded { path: final_path });
        }

        if ctx.settings().runtime.partial_file_policy == crate::config::PartialFilePolicy::DeletePartials {
            let _ = tokio::fs::remove_file(&partial_path).await;
        }

        if let Err(error) = ctx
            .history()
            .mark_incomplete(
                site,
                &item.url,
                Some(&item.referer),
                &format!("{}.part", item.filename),
            )
            .await
        {
            warn!(error = %error, "failed to record in-flight download");
        }

        // Permit is dropped when this function returns (RAII).
        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DownloadError::Cancelled)?;

        let domain = extract_domain(item.url.as_str());
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if ctx.shutdown().is_requested() {
                return Err(DownloadError::Cancelled);
            }

            debug!(attempt, "attempting download");
            ctx.rate_limiter().acquire(&domain).await;

            let resume_from = self.partial_size(&partial_path).await;
            let result = ctx
                .client()
                .stream_to_partial(
                    &item.url,
                    &item.referer,
                    &partial_path,
                    &item.ext,
                    resume_from,
                    ctx.shutdown(),
                )
                .await;

            let error = match result {
                Ok(stream) => {
                    if let Some(expected) = stream.content_length
                        && expected != stream.total_bytes
                    {
                        DownloadError::integrity(&partial_path, expected, stream.total_bytes)
                    } else {
                        tokio::fs::rename(&partial_path, &final_path)
                            .await
                            .map_err(|e| DownloadError::io(&final_path, e))?;

                        ctx.progress().download().add_bytes(stream.bytes_written);
                        let newly = self.mark_complete_best_effort(site, item).await;

                        info!(
                            path = %final_path.display(),
                            bytes = stream.total_bytes,
                            resumed = stream.resumed,
                            "download complete"
                        );

                        return Ok(if newly {
                            DownloadOutcome::Downloaded {
                                path: final_path,
                                bytes: stream.total_bytes,
                            }
                        } else {
                            DownloadOutcome::AlreadyRecorded { path: final_path }
                        });
                    }
                }
                Err(DownloadError::Cancelled) => return Err(DownloadError::Cancelled),
                Err(error) => error,
            };

            let kind = classify_download(&error);
            let retry_after_delay = if kind == ErrorKind::HttpStatus(429) {
                self.extract_retry_after(&error, &domain)
            } else {
                None
            };

            match self.retry_policy.should_retry(kind, attempt) {
                RetryDecision::Retry {
                    delay: backoff_delay,
                    attempt: next_attempt,
                } => {
                    // Prefer the server-mandated delay over our own backoff.
                    let delay = retry_after_delay.unwrap_or(backoff_delay);
                    info!(
                        attempt = next_attempt,
                        max_attempts = self.retry_policy.max_attempts(),
                        delay_ms = delay.as_millis(),
                        using_retry_after = retry_after_delay.is_some(),
                        error = %error,
                        "retrying download"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(%reason, "not retrying download");
                    return Err(error);
                }
            }
        }
    }

    /// Size of an existing partial file under the keep-for-resume policy.
    async fn partial_size(&self, partial_path: &std::path::Path) -> u64 {
        if self.ctx.settings().runtime.partial_file_policy
            != crate::config::PartialFilePolicy::KeepForResume
        {
            return 0;
        }
        tokio::fs::metadata(partial_path)
            .await
            .map(|meta| meta.len())
            .unwrap_or(0)
    }

    async fn recorded_complete(&self, site: &str, item: &MediaItem) -> bool {
        match self.ctx.history().is_complete(site, &item.url).await {
            Ok(complete) => complete,
            Err(error) => {
                warn!(error = %error, "completion check failed, assuming not complete");
                false
            }
        }
    }

    /// Marks the item complete, returning whether this call made the
    /// transition. Store errors are logged and reported as a fresh completion
    /// so the file is still counted.
    async fn mark_complete_best_effort(&self, site: &str, item: &MediaItem) -> bool {
        match self
            .ctx
            .history()
            .mark_complete(site, &item.url, Some(&item.referer), &item.filename)
            .await
        {
            Ok(newly) => newly,
            Err(error) => {
                warn!(error = %error, "failed to mark item complete");
                true
            }
        }
    }

    /// Parses and records the Retry-After delay from a rate-limited error.
    fn extract_retry_after(
        &self,
        error: &DownloadError,
        domain: &str,
    ) -> Option<std::time::Duration> {
        let DownloadError::HttpStatus {
            retry_after: Some(header),
            ..
        } = error
        else {
            return None;
        };

        let delay = parse_retry_after(header)?;
        self.ctx.rate_limiter().record_rate_limit(domain, delay);
        debug!(
            domain = %domain,
            retry_after = %header,
            delay_ms = delay.as_millis(),
            "using Retry-After header delay"
        );
        Some(delay)
    }
}
