//! Completion store: the persistent ledger of downloaded media.
//!
//! One row per `(site, canonical URL)`. Download tasks consult
//! [`HistoryStore::is_complete`] before fetching and call
//! [`HistoryStore::mark_complete`] after a verified rename; repeated runs
//! skip everything already recorded. All writes are single upsert statements
//! guarded on `completed = 0`, so concurrent tasks discovering the same
//! resource cannot corrupt a record and duplicate marks report themselves as
//! no-ops instead of double-counting.

mod canonical;
mod error;

pub use canonical::{canonicalize, strip_id_suffix};
pub use error::HistoryError;

use tracing::instrument;
use url::Url;

use crate::db::Database;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, HistoryError>;

/// Persistent completion ledger backed by SQLite.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    db: Database,
    strip_generated_ids: bool,
}

impl HistoryStore {
    /// Creates a store over the given database.
    ///
    /// `strip_generated_ids` controls whether canonicalization removes
    /// host-generated filename suffixes when building dedup keys.
    #[must_use]
    pub fn new(db: Database, strip_generated_ids: bool) -> Self {
        Self {
            db,
            strip_generated_ids,
        }
    }

    /// Canonical dedup key for a URL under this store's settings.
    #[must_use]
    pub fn key_for(&self, url: &Url) -> String {
        canonicalize(url, self.strip_generated_ids)
    }

    /// Returns true when `(site, url)` is recorded as fully downloaded.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Database`] if the query fails.
    #[instrument(skip(self), fields(site = %site))]
    pub async fn is_complete(&self, site: &str, url: &Url) -> Result<bool> {
        let key = self.key_for(url);
        let row: Option<(i64,)> = sqlx::query_as(
            r"SELECT completed FROM media_history
              WHERE site = ? AND canonical_url = ?",
        )
        .bind(site)
        .bind(&key)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(matches!(row, Some((1,))))
    }

    /// Records `(site, url)` as fully downloaded.
    ///
    /// Returns `true` when this call transitioned the record to complete,
    /// `false` when it was already complete (duplicate marks are idempotent;
    /// callers use the return value to avoid double-counting).
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Database`] if the upsert fails.
    #[instrument(skip(self, referer), fields(site = %site))]
    pub async fn mark_complete(
        &self,
        site: &str,
        url: &Url,
        referer: Option<&Url>,
        download_filename: &str,
    ) -> Result<bool> {
        let key = self.key_for(url);
        let referer = referer.map(Url::as_str);
        let result = sqlx::query(
            r"INSERT INTO media_history (site, canonical_url, referer, download_filename, completed, completed_at)
              VALUES (?, ?, ?, ?, 1, datetime('now'))
              ON CONFLICT(site, canonical_url) DO UPDATE SET
                  referer = excluded.referer,
                  download_filename = excluded.download_filename,
                  completed = 1,
                  completed_at = excluded.completed_at
              WHERE media_history.completed = 0",
        )
        .bind(site)
        .bind(&key)
        .bind(referer)
        .bind(download_filename)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Records `(site, url)` as in flight before streaming starts.
    ///
    /// Never demotes a completed record. The stored filename lets a later run
    /// find leftover partial files.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Database`] if the upsert fails.
    #[instrument(skip(self, referer), fields(site = %site))]
    pub async fn mark_incomplete(
        &self,
        site: &str,
        url: &Url,
        referer: Option<&Url>,
        download_filename: &str,
    ) -> Result<()> {
        let key = self.key_for(url);
        let referer = referer.map(Url::as_str);
        sqlx::query(
            r"INSERT INTO media_history (site, canonical_url, referer, download_filename, completed)
              VALUES (?, ?, ?, ?, 0)
              ON CONFLICT(site, canonical_url) DO UPDATE SET
                  referer = excluded.referer,
                  download_filename = excluded.download_filename
              WHERE media_history.completed = 0",
        )
        .bind(site)
        .bind(&key)
        .bind(referer)
        .bind(download_filename)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Returns the filename previously recorded for `(site, url)`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Database`] if the query fails.
    #[instrument(skip(self), fields(site = %site))]
    pub async fn downloaded_filename(&self, site: &str, url: &Url) -> Result<Option<String>> {
        let key = self.key_for(url);
        let row: Option<(Option<String>,)> = sqlx::query_as(
            r"SELECT download_filename FROM media_history
              WHERE site = ? AND canonical_url = ?",
        )
        .bind(site)
        .bind(&key)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.and_then(|(name,)| name))
    }

    /// Filenames of records left incomplete by previous runs.
    ///
    /// Used at startup to report leftover partial files.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn incomplete_filenames(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r"SELECT download_filename FROM media_history
              WHERE completed = 0 AND download_filename IS NOT NULL",
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    /// Number of completed records across all sites.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn completed_count(&self) -> Result<i64> {
        let row: (i64,) =
            sqlx::query_as(r"SELECT COUNT(*) FROM media_history WHERE completed = 1")
                .fetch_one(self.db.pool())
                .await?;

        Ok(row.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn store() -> HistoryStore {
        let db = Database::new_in_memory().await.unwrap();
        HistoryStore::new(db, true)
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_url_is_not_complete() {
        let store = store().await;
        let complete = store
            .is_complete("stashbox", &url("https://example.com/img/file.jpg"))
            .await
            .unwrap();
        assert!(!complete);
    }

    #[tokio::test]
    async fn test_mark_complete_roundtrip() {
        let store = store().await;
        let target = url("https://example.com/img/file.jpg");

        let newly = store
            .mark_complete("stashbox", &target, None, "file.jpg")
            .await
            .unwrap();
        assert!(newly);
        assert!(store.is_complete("stashbox", &target).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_mark_complete_is_idempotent() {
        let store = store().await;
        let target = url("https://example.com/img/file.jpg");

        assert!(
            store
                .mark_complete("stashbox", &target, None, "file.jpg")
                .await
                .unwrap()
        );
        assert!(
            !store
                .mark_complete("stashbox", &target, None, "file.jpg")
                .await
                .unwrap(),
            "second mark must report no transition"
        );
        assert_eq!(store.completed_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sites_are_independent_keys() {
        let store = store().await;
        let target = url("https://example.com/img/file.jpg");

        store
            .mark_complete("stashbox", &target, None, "file.jpg")
            .await
            .unwrap();
        assert!(!store.is_complete("pixhost", &target).await.unwrap());
    }

    #[tokio::test]
    async fn test_id_decorated_url_collapses_to_same_record() {
        let store = store().await;
        store
            .mark_complete(
                "stashbox",
                &url("https://example.com/img/file-ab12.jpg?download=true"),
                None,
                "file.jpg",
            )
            .await
            .unwrap();

        assert!(
            store
                .is_complete("stashbox", &url("https://example.com/img/file.jpg"))
                .await
                .unwrap(),
            "plain URL must hit the decorated URL's record"
        );
    }

    #[tokio::test]
    async fn test_mark_incomplete_never_demotes_completed() {
        let store = store().await;
        let target = url("https://example.com/img/file.jpg");

        store
            .mark_complete("stashbox", &target, None, "file.jpg")
            .await
            .unwrap();
        store
            .mark_incomplete("stashbox", &target, None, "file.jpg.part")
            .await
            .unwrap();

        assert!(store.is_complete("stashbox", &target).await.unwrap());
        assert_eq!(
            store.downloaded_filename("stashbox", &target).await.unwrap(),
            Some("file.jpg".to_string())
        );
    }

    #[tokio::test]
    async fn test_incomplete_filenames_lists_leftovers() {
        let store = store().await;
        store
            .mark_incomplete(
                "stashbox",
                &url("https://example.com/img/a.jpg"),
                None,
                "a.jpg.part",
            )
            .await
            .unwrap();
        store
            .mark_complete(
                "stashbox",
                &url("https://example.com/img/b.jpg"),
                None,
                "b.jpg",
            )
            .await
            .unwrap();

        let leftovers = store.incomplete_filenames().await.unwrap();
        assert_eq!(leftovers, vec!["a.jpg.part".to_string()]);
    }
}
