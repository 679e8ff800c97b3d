//! Per-run context owning all shared services.
//!
//! One [`RunContext`] exists per run and is handed to every component as an
//! `Arc`. Multiple runs in one process never share state: progress counters,
//! the completion store handle, the rate limiter, the HTTP client, and the
//! failure log all live here rather than in globals.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};
use url::Url;

use crate::config::{PartialFilePolicy, Settings};
use crate::db::Database;
use crate::download::{HttpClient, RateLimiter, extract_domain};
use crate::failure::FailureLog;
use crate::history::HistoryStore;
use crate::progress::ProgressStats;
use crate::scrape::ScrapeError;
use crate::shutdown::Shutdown;

/// Shared services for one run.
#[derive(Debug)]
pub struct RunContext {
    settings: Settings,
    progress: ProgressStats,
    history: HistoryStore,
    rate_limiter: RateLimiter,
    client: HttpClient,
    shutdown: Shutdown,
    failures: FailureLog,
    download_dir: PathBuf,
}

impl RunContext {
    /// Builds a run context over an opened database.
    #[must_use]
    pub fn new(settings: Settings, db: Database, download_dir: impl Into<PathBuf>) -> Arc<Self> {
        let history = HistoryStore::new(
            db,
            settings.download.remove_generated_id_from_filenames,
        );
        let rate_limiter = RateLimiter::new(&settings.rate_limits);
        let client = HttpClient::with_timeouts(
            settings.runtime.connect_timeout_secs,
            settings.runtime.read_timeout_secs,
        );

        Arc::new(Self {
            settings,
            progress: ProgressStats::new(),
            history,
            rate_limiter,
            client,
            shutdown: Shutdown::new(),
            failures: FailureLog::new(),
            download_dir: download_dir.into(),
        })
    }

    /// Run configuration.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run statistics.
    #[must_use]
    pub fn progress(&self) -> &ProgressStats {
        &self.progress
    }

    /// Completion store.
    #[must_use]
    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Shared rate limiter.
    #[must_use]
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Shared HTTP client.
    #[must_use]
    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    /// Cancellation handle for this run.
    #[must_use]
    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Per-run failure log.
    #[must_use]
    pub fn failures(&self) -> &FailureLog {
        &self.failures
    }

    /// Root download directory.
    #[must_use]
    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Fetches a page for crawler parsing, under the rate limiter.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`HttpClient::fetch_text`].
    pub async fn fetch_page(
        &self,
        url: &Url,
        referer: Option<&Url>,
    ) -> Result<String, ScrapeError> {
        self.rate_limiter.acquire(&extract_domain(url.as_str())).await;
        self.client.fetch_text(url, referer).await
    }

    /// Finds `.part` files left under the download directory.
    #[must_use]
    pub fn scan_partials(&self) -> Vec<PathBuf> {
        let mut found = Vec::new();
        collect_partials(&self.download_dir, &mut found);
        found.sort();
        found
    }

    /// Applies the configured partial-file policy to leftovers from previous
    /// runs. Returns the partials still present afterwards.
    #[must_use]
    pub fn handle_leftover_partials(&self) -> Vec<PathBuf> {
        let partials = self.scan_partials();
        if partials.is_empty() {
            return partials;
        }

        match self.settings.runtime.partial_file_policy {
            PartialFilePolicy::DeletePartials => {
                info!(count = partials.len(), "deleting leftover partial downloads");
                for path in &partials {
                    if let Err(error) = std::fs::remove_file(path) {
                        warn!(path = %path.display(), error = %error, "failed to delete partial");
                    }
                }
                self.scan_partials()
            }
            PartialFilePolicy::KeepForResume => {
                info!(
                    count = partials.len(),
                    "keeping leftover partial downloads for resume"
                );
                partials
            }
        }
    }
}

fn collect_partials(dir: &Path, found: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_partials(&path, found);
        } else if path.extension().is_some_and(|ext| ext == "part") {
            found.push(path);
        }
    }
}
