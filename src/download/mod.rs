//! Streaming download pipeline: client, executor, rate limiting, retry.
//!
//! # Features
//!
//! - Streaming downloads into `.part` files (memory-efficient for large media)
//! - HTTP Range resume of interrupted partials
//! - Rename to the final path only after byte-count verification
//! - Per-domain and process-wide rate limiting
//! - Bounded retry with exponential backoff for transient failures

mod client;
mod error;
mod executor;
pub mod filename;
pub mod rate_limiter;
mod retry;

pub use client::{HttpClient, StreamResult};
pub use error::DownloadError;
pub use executor::{DownloadExecutor, DownloadOutcome};
pub use rate_limiter::{RateLimiter, extract_domain, parse_retry_after};
pub use retry::{DEFAULT_MAX_ATTEMPTS, RetryDecision, RetryPolicy};
