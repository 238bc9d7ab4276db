//! ISBN lookups through the cache and the batch that validates cached entries.

use serde::Serialize;
use sqlx::SqlitePool;

use crate::api::metrics::record_book_api_call;
use crate::config::BookApiConfig;
use crate::db::{find_cached_book, mark_checked, unvalidated_batch, upsert_validated, CachedBook};

use super::quota::{batch_size, calls_today, record_calls, QuotaStatus};
use super::{BookApiError, BookLookup};

#[derive(Debug)]
pub enum LookupOutcome {
    /// Validated entry already in the cache
    Cached(CachedBook),
    /// Fetched from the API just now and stored as validated
    Fetched(CachedBook),
    /// Quota is below the floor; the unconfirmed entry is the best we have
    Unvalidated(CachedBook),
    /// The API has no record of this ISBN
    NotFound,
}

/// Resolve an ISBN through the cache, calling the API only while quota allows
pub async fn lookup_isbn(
    db: &SqlitePool,
    lookup: &dyn BookLookup,
    config: &BookApiConfig,
    isbn: &str,
) -> Result<LookupOutcome, BookApiError> {
    let cached = find_cached_book(db, isbn).await?;
    if let Some(entry) = cached.as_ref().filter(|c| c.validated) {
        return Ok(LookupOutcome::Cached(entry.clone()));
    }

    let status = QuotaStatus::from_calls(calls_today(db).await?, config);
    if status.below_floor() {
        return match cached {
            Some(entry) => Ok(LookupOutcome::Unvalidated(entry)),
            None => Err(BookApiError::QuotaExhausted {
                remaining: status.remaining,
                floor: status.floor,
            }),
        };
    }

    record_calls(db, 1).await?;
    match lookup.lookup(isbn).await {
        Ok(Some(meta)) => {
            record_book_api_call("found");
            let entry = upsert_validated(db, &meta).await?;
            Ok(LookupOutcome::Fetched(entry))
        }
        Ok(None) => {
            record_book_api_call("not_found");
            if cached.is_some() {
                mark_checked(db, isbn).await?;
            }
            Ok(LookupOutcome::NotFound)
        }
        Err(e) => {
            record_book_api_call("error");
            Err(e)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    /// Entries selected for this run
    pub batch_size: i64,
    pub checked: i64,
    pub validated: i64,
    pub not_found: i64,
    /// Remaining quota when the run finished
    pub remaining: i64,
    /// The run ended early because remaining quota fell below the floor
    pub stopped_at_floor: bool,
    /// Transport or decode error that ended the run early
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

/// Check a batch of unvalidated cache entries against the API.
///
/// The batch holds at most `min(remaining / 2, max_batch)` entries. Before
/// every call the remaining quota is compared with the floor and the run
/// stops as soon as it is below.
pub async fn validate_cache(
    db: &SqlitePool,
    lookup: &dyn BookLookup,
    config: &BookApiConfig,
) -> Result<ValidationReport, BookApiError> {
    let calls = calls_today(db).await?;
    let mut remaining = (config.daily_limit - calls).max(0);
    let mut report = ValidationReport {
        remaining,
        ..Default::default()
    };

    if remaining < config.quota_floor {
        report.stopped_at_floor = true;
        tracing::info!(remaining, floor = config.quota_floor, "Skipping cache validation, quota below floor");
        return Ok(report);
    }

    let batch = batch_size(remaining, config.max_batch);
    let entries = unvalidated_batch(db, batch).await?;
    report.batch_size = entries.len() as i64;

    for entry in entries {
        if remaining < config.quota_floor {
            report.stopped_at_floor = true;
            break;
        }

        let calls = record_calls(db, 1).await?;
        remaining = (config.daily_limit - calls).max(0);
        report.checked += 1;

        match lookup.lookup(&entry.isbn).await {
            Ok(Some(meta)) => {
                record_book_api_call("found");
                upsert_validated(db, &meta).await?;
                report.validated += 1;
            }
            Ok(None) => {
                record_book_api_call("not_found");
                mark_checked(db, &entry.isbn).await?;
                report.not_found += 1;
            }
            Err(BookApiError::Database(e)) => return Err(BookApiError::Database(e)),
            Err(e) => {
                record_book_api_call("error");
                tracing::warn!(isbn = %entry.isbn, error = %e, "Cache validation aborted");
                report.aborted = Some(e.to_string());
                break;
            }
        }
    }

    report.remaining = remaining;
    tracing::info!(
        checked = report.checked,
        validated = report.validated,
        not_found = report.not_found,
        remaining = report.remaining,
        stopped_at_floor = report.stopped_at_floor,
        "Cache validation finished"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{insert_unvalidated, BookMetadata};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Knows a fixed set of ISBNs and counts every call
    struct StubLookup {
        known: HashSet<String>,
        calls: AtomicUsize,
    }

    impl StubLookup {
        fn new(known: &[&str]) -> Self {
            Self {
                known: known.iter().map(|s| s.to_string()).collect(),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BookLookup for StubLookup {
        async fn lookup(&self, isbn: &str) -> Result<Option<BookMetadata>, BookApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.known.contains(isbn).then(|| BookMetadata {
                isbn: isbn.to_string(),
                title: format!("Title {}", isbn),
                authors: vec!["Author".to_string()],
                publisher: None,
                published_date: None,
                cover_url: None,
            }))
        }
    }

    fn config(daily_limit: i64, floor: i64) -> BookApiConfig {
        BookApiConfig {
            daily_limit,
            quota_floor: floor,
            max_batch: 100,
            ..Default::default()
        }
    }

    async fn seed(pool: &SqlitePool, n: usize) -> Vec<String> {
        let mut isbns = Vec::new();
        for i in 0..n {
            let isbn = format!("isbn-{:03}", i);
            insert_unvalidated(pool, &isbn, "Imported title", "Someone").await.unwrap();
            isbns.push(isbn);
        }
        isbns
    }

    #[tokio::test]
    async fn test_batch_is_half_the_remaining_quota() {
        let pool = crate::db::init_in_memory().await.unwrap();
        seed(&pool, 30).await;
        let stub = StubLookup::new(&[]);

        let report = validate_cache(&pool, &stub, &config(20, 0)).await.unwrap();

        assert_eq!(report.batch_size, 10);
        assert_eq!(stub.calls(), 10);
        assert_eq!(report.not_found, 10);
        assert_eq!(calls_today(&pool).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_batch_is_capped_at_max() {
        let pool = crate::db::init_in_memory().await.unwrap();
        seed(&pool, 120).await;
        let stub = StubLookup::new(&[]);

        let report = validate_cache(&pool, &stub, &config(1000, 50)).await.unwrap();

        assert_eq!(report.batch_size, 100);
        assert_eq!(stub.calls(), 100);
        assert!(!report.stopped_at_floor);
    }

    #[tokio::test]
    async fn test_stops_issuing_calls_below_floor() {
        let pool = crate::db::init_in_memory().await.unwrap();
        seed(&pool, 30).await;
        record_calls(&pool, 40).await.unwrap();
        let stub = StubLookup::new(&[]);

        // remaining 60, floor 55: calls are made at 60..=55 remaining, then it stops
        let report = validate_cache(&pool, &stub, &config(100, 55)).await.unwrap();

        assert_eq!(stub.calls(), 6);
        assert!(report.stopped_at_floor);
        assert_eq!(report.remaining, 54);
        assert_eq!(calls_today(&pool).await.unwrap(), 46);
    }

    #[tokio::test]
    async fn test_no_calls_when_already_below_floor() {
        let pool = crate::db::init_in_memory().await.unwrap();
        seed(&pool, 5).await;
        record_calls(&pool, 960).await.unwrap();
        let stub = StubLookup::new(&[]);

        let report = validate_cache(&pool, &stub, &config(1000, 50)).await.unwrap();

        assert_eq!(stub.calls(), 0);
        assert!(report.stopped_at_floor);
        assert_eq!(report.batch_size, 0);
    }

    #[tokio::test]
    async fn test_found_entries_become_validated() {
        let pool = crate::db::init_in_memory().await.unwrap();
        let isbns = seed(&pool, 3).await;
        let stub = StubLookup::new(&[isbns[1].as_str()]);

        let report = validate_cache(&pool, &stub, &config(1000, 0)).await.unwrap();
        assert_eq!(report.validated, 1);
        assert_eq!(report.not_found, 2);

        let entry = find_cached_book(&pool, &isbns[1]).await.unwrap().unwrap();
        assert!(entry.validated);
        assert_eq!(entry.title, format!("Title {}", isbns[1]));

        // Misses move to the back of the queue
        let next = unvalidated_batch(&pool, 1).await.unwrap();
        assert_eq!(next.len(), 1);
        assert!(next[0].last_checked_at.is_some());
    }

    #[tokio::test]
    async fn test_lookup_uses_cache_then_api() {
        let pool = crate::db::init_in_memory().await.unwrap();
        let stub = StubLookup::new(&["9780306406157"]);
        let cfg = config(1000, 50);

        let first = lookup_isbn(&pool, &stub, &cfg, "9780306406157").await.unwrap();
        assert!(matches!(first, LookupOutcome::Fetched(_)));
        let second = lookup_isbn(&pool, &stub, &cfg, "9780306406157").await.unwrap();
        assert!(matches!(second, LookupOutcome::Cached(_)));
        assert_eq!(stub.calls(), 1);

        let miss = lookup_isbn(&pool, &stub, &cfg, "0306406152").await.unwrap();
        assert!(matches!(miss, LookupOutcome::NotFound));
        assert_eq!(calls_today(&pool).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_lookup_below_floor() {
        let pool = crate::db::init_in_memory().await.unwrap();
        insert_unvalidated(&pool, "9780306406157", "From a CSV", "").await.unwrap();
        record_calls(&pool, 990).await.unwrap();
        let stub = StubLookup::new(&["9780306406157", "0306406152"]);
        let cfg = config(1000, 50);

        let known = lookup_isbn(&pool, &stub, &cfg, "9780306406157").await.unwrap();
        match known {
            LookupOutcome::Unvalidated(entry) => assert_eq!(entry.title, "From a CSV"),
            other => panic!("unexpected outcome {:?}", other),
        }

        let unknown = lookup_isbn(&pool, &stub, &cfg, "0306406152").await;
        assert!(matches!(unknown, Err(BookApiError::QuotaExhausted { remaining: 10, floor: 50 })));
        assert_eq!(stub.calls(), 0);
    }
}
