//! External book metadata API: lookup client, daily quota and cache validation.
//!
//! Every outbound call is counted against a single per-day counter before it
//! is issued. Callers check the remaining quota against the configured floor
//! and stop issuing calls once it is crossed.

mod client;
mod quota;
mod validate;

pub use client::GoogleBooksClient;
pub use quota::{batch_size, calls_today, quota_status, record_calls, today, QuotaStatus};
pub use validate::{lookup_isbn, validate_cache, LookupOutcome, ValidationReport};

use async_trait::async_trait;
use thiserror::Error;

use crate::db::BookMetadata;

#[derive(Error, Debug)]
pub enum BookApiError {
    #[error("Book API quota exhausted for today ({remaining} calls left, floor is {floor})")]
    QuotaExhausted { remaining: i64, floor: i64 },

    #[error("Book API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Book API returned HTTP {0}")]
    Status(u16),

    #[error("Failed to decode Book API response: {0}")]
    Decode(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Source of authoritative book metadata
#[async_trait]
pub trait BookLookup: Send + Sync {
    /// Look up a normalised ISBN. `Ok(None)` means the API has no match.
    async fn lookup(&self, isbn: &str) -> Result<Option<BookMetadata>, BookApiError>;
}
