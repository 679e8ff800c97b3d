//! Run configuration for the orchestration core.
//!
//! [`Settings`] is the contract between this crate and whatever loads
//! configuration (file, UI, hard-coded test fixtures). Loading itself is out
//! of scope; every field has a sensible default so `Settings::default()` is a
//! working configuration.

use std::collections::HashMap;

use serde::Deserialize;

/// Default per-domain request rate (requests per second).
const DEFAULT_DOMAIN_RATE: u32 = 10;

/// Default process-wide request rate (requests per second).
const DEFAULT_GLOBAL_RATE: u32 = 50;

/// Default spacing for the sensitive-endpoint gate (milliseconds).
const DEFAULT_SENSITIVE_INTERVAL_MS: u64 = 1000;

/// Default maximum concurrent downloads.
const DEFAULT_MAX_SIMULTANEOUS_DOWNLOADS: usize = 10;

/// Default maximum download attempts (including the first).
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default connect timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default read timeout in seconds (large files stream for a while).
const DEFAULT_READ_TIMEOUT_SECS: u64 = 300;

/// What to do with `.part` files left behind by an interrupted run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PartialFilePolicy {
    /// Keep partial files and resume them with HTTP Range requests.
    #[default]
    KeepForResume,
    /// Delete partial files before starting a fresh download.
    DeletePartials,
}

/// Options controlling how downloaded files are named and placed.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadOptions {
    /// Strip host-generated ID suffixes (e.g. `file-ab12.jpg` -> `file.jpg`)
    /// from filenames and dedup keys.
    pub remove_generated_id_from_filenames: bool,
    /// Record discovered media as complete without fetching any bytes.
    pub skip_download_mark_completed: bool,
    /// Collapse album sub-folders so every file lands one level below the
    /// download directory.
    pub block_download_sub_folders: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            remove_generated_id_from_filenames: true,
            skip_download_mark_completed: false,
            block_download_sub_folders: false,
        }
    }
}

/// Options controlling run execution.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    /// Partial-file handling across runs.
    pub partial_file_policy: PartialFilePolicy,
    /// Maximum number of downloads streaming at once.
    pub max_simultaneous_downloads: usize,
    /// Maximum attempts per download, including the first.
    pub max_attempts: u32,
    /// HTTP connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// HTTP read timeout in seconds.
    pub read_timeout_secs: u64,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            partial_file_policy: PartialFilePolicy::default(),
            max_simultaneous_downloads: DEFAULT_MAX_SIMULTANEOUS_DOWNLOADS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
        }
    }
}

/// Outbound request rate limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitOptions {
    /// Default per-domain rate in requests per second.
    pub requests_per_second: u32,
    /// Per-domain overrides, keyed by lowercase domain.
    pub domain_overrides: HashMap<String, u32>,
    /// Process-wide rate in requests per second.
    pub global_requests_per_second: u32,
    /// Minimum spacing between requests to sensitive endpoints (token
    /// issuing, login) in milliseconds.
    pub sensitive_interval_ms: u64,
}

impl Default for RateLimitOptions {
    fn default() -> Self {
        Self {
            requests_per_second: DEFAULT_DOMAIN_RATE,
            domain_overrides: HashMap::new(),
            global_requests_per_second: DEFAULT_GLOBAL_RATE,
            sensitive_interval_ms: DEFAULT_SENSITIVE_INTERVAL_MS,
        }
    }
}

/// Complete configuration for one run.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// File naming and placement options.
    pub download: DownloadOptions,
    /// Execution options.
    pub runtime: RuntimeOptions,
    /// Outbound rate limits.
    pub rate_limits: RateLimitOptions,
}
