//! Scrape work units and the crawler adapter contract.
//!
//! A [`ScrapeJob`] is one unit of scraping work; crawlers consume it exactly
//! once and answer with a [`Resolved`]: child jobs (an album page linking to
//! file pages), concrete [`MediaItem`]s, or both. Jobs are never mutated
//! after hand-off - children are derived copies.
//!
//! # Architecture
//!
//! - [`Crawler`] - Async trait site adapters implement
//! - [`Dispatcher`] - Runs jobs concurrently until quiescence
//! - [`ScrapeError`] - Closed error contract for adapters

mod dispatcher;
mod error;

pub use dispatcher::Dispatcher;
pub use error::ScrapeError;

use std::path::PathBuf;

use async_trait::async_trait;
use url::Url;

use crate::download::filename::{filename_and_ext, sanitize_title};
use crate::history::strip_id_suffix;
use crate::run::RunContext;

/// A unit of scrape work: a URL plus inherited context.
#[derive(Debug, Clone)]
pub struct ScrapeJob {
    /// The URL to scrape.
    pub url: Url,
    /// The page this URL was discovered on.
    pub referer: Option<Url>,
    /// Album/parent title inherited from ancestor jobs (may nest with `/`).
    pub parent_title: Option<String>,
    /// Whether this job belongs to a multi-file album.
    pub part_of_album: bool,
    /// Whether this job is a retry of a previously failed item.
    pub retry: bool,
    /// Fixed destination override used by retries.
    pub retry_path: Option<PathBuf>,
}

impl ScrapeJob {
    /// Creates a seed job with no inherited context.
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            referer: None,
            parent_title: None,
            part_of_album: false,
            retry: false,
            retry_path: None,
        }
    }

    /// Creates a retry job that downloads into a fixed destination.
    #[must_use]
    pub fn retry(url: Url, retry_path: PathBuf) -> Self {
        Self {
            url,
            referer: None,
            parent_title: None,
            part_of_album: false,
            retry: true,
            retry_path: Some(retry_path),
        }
    }

    /// Derives a child job for a discovered link.
    ///
    /// The child inherits title context and album membership; its referer is
    /// this job's URL.
    #[must_use]
    pub fn derive_child(&self, url: Url) -> Self {
        Self {
            url,
            referer: Some(self.url.clone()),
            parent_title: self.parent_title.clone(),
            part_of_album: self.part_of_album,
            retry: self.retry,
            retry_path: self.retry_path.clone(),
        }
    }

    /// Returns a copy with `title` appended to the inherited title chain.
    ///
    /// The title is sanitized and length-bounded before use as a folder name.
    #[must_use]
    pub fn with_parent_title(&self, title: &str) -> Self {
        let clean = sanitize_title(title);
        let parent_title = match (&self.parent_title, clean.is_empty()) {
            (_, true) => self.parent_title.clone(),
            (Some(existing), false) => Some(format!("{existing}/{clean}")),
            (None, false) => Some(clean),
        };
        Self {
            parent_title,
            ..self.clone()
        }
    }

    /// The referer to send when fetching media found by this job.
    #[must_use]
    pub fn referer_or_self(&self) -> &Url {
        self.referer.as_ref().unwrap_or(&self.url)
    }
}

/// A resolved, directly downloadable resource.
#[derive(Debug, Clone)]
pub struct MediaItem {
    /// Final media URL.
    pub url: Url,
    /// Referer to send when downloading.
    pub referer: Url,
    /// Sanitized, length-bounded filename (generated ID stripped when
    /// configured).
    pub filename: String,
    /// Lowercase extension including the leading dot.
    pub ext: String,
    /// Filename before ID stripping.
    pub original_filename: String,
    /// Hint that the crawler already found this resource in the completion
    /// store.
    pub completed: bool,
}

impl MediaItem {
    /// Builds a media item from a raw filename.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError::NoExtension`] when the filename has no usable
    /// extension.
    pub fn new(
        url: Url,
        referer: Url,
        raw_filename: &str,
        strip_generated_id: bool,
    ) -> Result<Self, ScrapeError> {
        let (sanitized, ext) = filename_and_ext(raw_filename)?;
        let original_filename = sanitized.clone();
        let filename = if strip_generated_id {
            strip_id_suffix(&sanitized)
        } else {
            sanitized
        };

        Ok(Self {
            url,
            referer,
            filename,
            ext,
            original_filename,
            completed: false,
        })
    }

    /// Marks this item as already present in the completion store.
    #[must_use]
    pub fn with_completed(mut self, completed: bool) -> Self {
        self.completed = completed;
        self
    }
}

/// An ordered collection of media sharing an album title.
///
/// Crawlers append while walking album pages; the collection is handed to the
/// dispatcher by value and not touched again.
#[derive(Debug, Clone)]
pub struct AlbumItem {
    title: String,
    media: Vec<MediaItem>,
}

impl AlbumItem {
    /// Creates an empty album with a sanitized, length-bounded title.
    #[must_use]
    pub fn new(raw_title: &str) -> Self {
        Self {
            title: sanitize_title(raw_title),
            media: Vec::new(),
        }
    }

    /// Sanitized album title.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Appends a discovered media item.
    pub fn push(&mut self, item: MediaItem) {
        self.media.push(item);
    }

    /// Number of media items collected.
    #[must_use]
    pub fn len(&self) -> usize {
        self.media.len()
    }

    /// True when no media has been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.media.is_empty()
    }

    /// Consumes the album, yielding its media in discovery order.
    #[must_use]
    pub fn into_media(self) -> Vec<MediaItem> {
        self.media
    }
}

/// What a crawler produced for one job.
#[derive(Debug, Default)]
pub struct Resolved {
    /// Further scrape jobs to enqueue.
    pub children: Vec<ScrapeJob>,
    /// Media to download under the job's own context.
    pub media: Vec<MediaItem>,
    /// Media grouped under album titles.
    pub albums: Vec<AlbumItem>,
}

impl Resolved {
    /// An empty result (the job led nowhere).
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// A result containing only child jobs.
    #[must_use]
    pub fn children(children: Vec<ScrapeJob>) -> Self {
        Self {
            children,
            ..Self::default()
        }
    }

    /// A result containing a single media item.
    #[must_use]
    pub fn media(item: MediaItem) -> Self {
        Self {
            media: vec![item],
            ..Self::default()
        }
    }

    /// A result containing a single album.
    #[must_use]
    pub fn album(album: AlbumItem) -> Self {
        Self {
            albums: vec![album],
            ..Self::default()
        }
    }

    /// Total number of media items across direct media and albums.
    #[must_use]
    pub fn media_count(&self) -> usize {
        self.media.len() + self.albums.iter().map(AlbumItem::len).sum::<usize>()
    }
}

/// Site adapter contract.
///
/// Implementations must be stateless across calls apart from shared
/// rate-limiter/HTTP-client handles reached through the [`RunContext`], and
/// must surface failures only as [`ScrapeError`] variants (with
/// [`ScrapeError::Unknown`] as the fallback).
///
/// # Object Safety
///
/// Uses `async_trait` to support dynamic dispatch via `Arc<dyn Crawler>`;
/// Rust 2024 native async traits are not object-safe.
#[async_trait]
pub trait Crawler: Send + Sync {
    /// Site identifier used as the completion-store key prefix (e.g.
    /// "stashbox").
    fn name(&self) -> &str;

    /// Returns true if this crawler handles the given URL.
    fn handles(&self, url: &Url) -> bool;

    /// Resolves one job into child jobs and/or media.
    async fn resolve(&self, job: &ScrapeJob, ctx: &RunContext) -> Result<Resolved, ScrapeError>;
}
