//! Error types for completion-store operations.

use thiserror::Error;

/// Errors from the completion store.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Underlying database operation failed.
    #[error("history database error: {0}")]
    Database(#[from] sqlx::Error),
}
