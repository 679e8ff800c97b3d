//! Run statistics for scrape and download stages.
//!
//! Counters are updated from an unbounded number of concurrent tasks, so
//! everything is atomic; per-category failure counts live in a `DashMap`.
//! [`ProgressStats::snapshot`] copies the current values into an owned
//! [`ProgressSnapshot`] without ever blocking producers - the periodic
//! reporting collaborator polls it on its own schedule.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;

use crate::failure::ErrorKind;

/// Thread-safe counters for one run.
#[derive(Debug, Default)]
pub struct ProgressStats {
    download: DownloadProgress,
    scrape: ScrapeProgress,
}

impl ProgressStats {
    /// Creates a tracker with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Download-stage counters.
    #[must_use]
    pub fn download(&self) -> &DownloadProgress {
        &self.download
    }

    /// Scrape-stage counters.
    #[must_use]
    pub fn scrape(&self) -> &ScrapeProgress {
        &self.scrape
    }

    /// Returns an owned copy of all current counts.
    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total_files: self.download.total_files.load(Ordering::SeqCst),
            completed_files: self.download.completed_files.load(Ordering::SeqCst),
            previously_completed_files: self
                .download
                .previously_completed_files
                .load(Ordering::SeqCst),
            skipped_files: self.download.skipped_files.load(Ordering::SeqCst),
            failed_files: self.download.failed_files.load(Ordering::SeqCst),
            bytes_downloaded: self.download.bytes_downloaded.load(Ordering::SeqCst),
            download_failures: copy_failures(&self.download.failures),
            scrape_queued: self.scrape.queued.load(Ordering::SeqCst),
            scrape_completed: self.scrape.completed.load(Ordering::SeqCst),
            scrape_unsupported: self.scrape.unsupported.load(Ordering::SeqCst),
            scrape_failures: copy_failures(&self.scrape.failures),
        }
    }
}

fn copy_failures(failures: &DashMap<String, u64>) -> HashMap<String, u64> {
    failures
        .iter()
        .map(|entry| (entry.key().clone(), *entry.value()))
        .collect()
}

fn bump_failure(failures: &DashMap<String, u64>, kind: &ErrorKind) {
    failures
        .entry(kind.label())
        .and_modify(|count| *count += 1)
        .or_insert(1);
}

/// Counters for discovered media moving through the download stage.
///
/// Invariant at quiescence: every discovered file ends in exactly one of
/// completed / previously completed / skipped / failed, so those four sum to
/// `total_files`.
#[derive(Debug, Default)]
pub struct DownloadProgress {
    total_files: AtomicU64,
    completed_files: AtomicU64,
    previously_completed_files: AtomicU64,
    skipped_files: AtomicU64,
    failed_files: AtomicU64,
    bytes_downloaded: AtomicU64,
    failures: DashMap<String, u64>,
}

impl DownloadProgress {
    /// Records newly discovered media files.
    pub fn add_total(&self, count: u64) {
        self.total_files.fetch_add(count, Ordering::SeqCst);
    }

    /// Records a freshly downloaded file.
    pub fn add_completed(&self) {
        self.completed_files.fetch_add(1, Ordering::SeqCst);
    }

    /// Records a file already present in the completion store.
    pub fn add_previously_completed(&self) {
        self.previously_completed_files.fetch_add(1, Ordering::SeqCst);
    }

    /// Records a file skipped by configuration.
    pub fn add_skipped(&self) {
        self.skipped_files.fetch_add(1, Ordering::SeqCst);
    }

    /// Records a failed file under its classified category.
    pub fn add_failed(&self, kind: &ErrorKind) {
        self.failed_files.fetch_add(1, Ordering::SeqCst);
        bump_failure(&self.failures, kind);
    }

    /// Records bytes streamed to disk.
    pub fn add_bytes(&self, bytes: u64) {
        self.bytes_downloaded.fetch_add(bytes, Ordering::SeqCst);
    }
}

/// Counters for scrape jobs.
#[derive(Debug, Default)]
pub struct ScrapeProgress {
    queued: AtomicU64,
    completed: AtomicU64,
    unsupported: AtomicU64,
    failures: DashMap<String, u64>,
}

impl ScrapeProgress {
    /// Records a job accepted by the dispatcher.
    pub fn add_queued(&self) {
        self.queued.fetch_add(1, Ordering::SeqCst);
    }

    /// Records a job whose crawler finished without error.
    pub fn add_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    /// Records a job no registered crawler could handle.
    pub fn add_unsupported(&self) {
        self.unsupported.fetch_add(1, Ordering::SeqCst);
    }

    /// Records a failed job under its classified category.
    pub fn add_failure(&self, kind: &ErrorKind) {
        bump_failure(&self.failures, kind);
    }
}

/// Owned copy of all counters at one point in time.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Media files discovered so far.
    pub total_files: u64,
    /// Freshly downloaded files.
    pub completed_files: u64,
    /// Files skipped because the completion store already had them.
    pub previously_completed_files: u64,
    /// Files skipped by configuration.
    pub skipped_files: u64,
    /// Files that failed permanently or exhausted retries.
    pub failed_files: u64,
    /// Bytes streamed to disk this run.
    pub bytes_downloaded: u64,
    /// Download failure counts by category label.
    pub download_failures: HashMap<String, u64>,
    /// Scrape jobs accepted.
    pub scrape_queued: u64,
    /// Scrape jobs completed without error.
    pub scrape_completed: u64,
    /// Scrape jobs no crawler handled.
    pub scrape_unsupported: u64,
    /// Scrape failure counts by category label.
    pub scrape_failures: HashMap<String, u64>,
}

impl ProgressSnapshot {
    /// Files that were discovered but have not finished any way yet.
    #[must_use]
    pub fn in_progress(&self) -> u64 {
        self.total_files.saturating_sub(
            self.completed_files
                + self.previously_completed_files
                + self.skipped_files
                + self.failed_files,
        )
    }

    /// Sum of all terminal file states.
    #[must_use]
    pub fn settled_files(&self) -> u64 {
        self.completed_files + self.previously_completed_files + self.skipped_files
            + self.failed_files
    }

    /// Percentage of discovered files that ended well (0-100).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percent_done(&self) -> f64 {
        if self.total_files == 0 {
            return 0.0;
        }
        let done = self.completed_files + self.previously_completed_files + self.skipped_files;
        (done as f64 / self.total_files as f64) * 100.0
    }
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let done = self.completed_files + self.previously_completed_files + self.skipped_files;
        write!(
            f,
            "Progress: [{done}/{total}] {pct:.2}% - Completed: {c}, Previously: {p}, \
             Skipped: {s}, Failed: {x}, In Progress: {i}",
            total = self.total_files,
            pct = self.percent_done(),
            c = self.completed_files,
            p = self.previously_completed_files,
            s = self.skipped_files,
            x = self.failed_files,
            i = self.in_progress(),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_snapshot_starts_at_zero() {
        let stats = ProgressStats::new();
        let snap = stats.snapshot();
        assert_eq!(snap.total_files, 0);
        assert_eq!(snap.settled_files(), 0);
        assert_eq!(snap.in_progress(), 0);
        assert!(snap.download_failures.is_empty());
        assert!(snap.scrape_failures.is_empty());
    }

    #[test]
    fn test_download_counters_accumulate() {
        let stats = ProgressStats::new();
        stats.download().add_total(4);
        stats.download().add_completed();
        stats.download().add_previously_completed();
        stats.download().add_skipped();
        stats.download().add_failed(&ErrorKind::Timeout);
        stats.download().add_bytes(2048);

        let snap = stats.snapshot();
        assert_eq!(snap.total_files, 4);
        assert_eq!(snap.completed_files, 1);
        assert_eq!(snap.previously_completed_files, 1);
        assert_eq!(snap.skipped_files, 1);
        assert_eq!(snap.failed_files, 1);
        assert_eq!(snap.bytes_downloaded, 2048);
        assert_eq!(snap.settled_files(), snap.total_files);
        assert_eq!(snap.in_progress(), 0);
        assert_eq!(snap.download_failures.get("Timeout"), Some(&1));
    }

    #[test]
    fn test_failure_categories_count_separately() {
        let stats = ProgressStats::new();
        stats.scrape().add_failure(&ErrorKind::NoExtension);
        stats.scrape().add_failure(&ErrorKind::NoExtension);
        stats.scrape().add_failure(&ErrorKind::HttpStatus(503));

        let snap = stats.snapshot();
        assert_eq!(snap.scrape_failures.get("No File Extension"), Some(&2));
        assert_eq!(snap.scrape_failures.get("HTTP 503"), Some(&1));
    }

    #[test]
    fn test_concurrent_increments_lose_nothing() {
        let stats = Arc::new(ProgressStats::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let stats = Arc::clone(&stats);
            handles.push(std::thread::spawn(move || {
                for _ in 0..500 {
                    stats.download().add_total(1);
                    stats.download().add_completed();
                    stats.scrape().add_failure(&ErrorKind::Unknown);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let snap = stats.snapshot();
        assert_eq!(snap.total_files, 4000);
        assert_eq!(snap.completed_files, 4000);
        assert_eq!(snap.scrape_failures.get("Unknown"), Some(&4000));
    }

    #[test]
    fn test_display_matches_progress_line_shape() {
        let stats = ProgressStats::new();
        stats.download().add_total(2);
        stats.download().add_completed();
        let line = stats.snapshot().to_string();
        assert!(line.starts_with("Progress: [1/2]"), "got: {line}");
        assert!(line.contains("In Progress: 1"), "got: {line}");
    }
}
