//! Cache of external book API lookups, keyed by ISBN.

use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CachedBook {
    pub isbn: String,
    pub title: String,
    pub authors: String,
    pub publisher: Option<String>,
    pub published_date: Option<String>,
    pub cover_url: Option<String>,
    /// Metadata was confirmed by the external API (not just user input)
    pub validated: bool,
    pub validated_at: Option<String>,
    pub last_checked_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Metadata returned by the external book API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookMetadata {
    pub isbn: String,
    pub title: String,
    pub authors: Vec<String>,
    pub publisher: Option<String>,
    pub published_date: Option<String>,
    pub cover_url: Option<String>,
}

pub async fn find_cached_book<'e, E>(db: E, isbn: &str) -> Result<Option<CachedBook>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as("SELECT * FROM cached_books WHERE isbn = ?")
        .bind(isbn)
        .fetch_optional(db)
        .await
}

/// Record user-supplied metadata for an ISBN unless an entry already exists
pub async fn insert_unvalidated<'e, E>(db: E, isbn: &str, title: &str, authors: &str) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let now = crate::db::now();
    sqlx::query(
        r#"
        INSERT INTO cached_books (isbn, title, authors, validated, created_at, updated_at)
        VALUES (?, ?, ?, 0, ?, ?)
        ON CONFLICT(isbn) DO NOTHING
        "#,
    )
    .bind(isbn)
    .bind(title.trim())
    .bind(authors.trim())
    .bind(&now)
    .bind(&now)
    .execute(db)
    .await?;
    Ok(())
}

/// Insert or overwrite the entry with API-confirmed metadata
pub async fn upsert_validated<'e, E>(db: E, meta: &BookMetadata) -> Result<CachedBook, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let now = crate::db::now();
    sqlx::query_as::<_, CachedBook>(
        r#"
        INSERT INTO cached_books (isbn, title, authors, publisher, published_date, cover_url,
                                  validated, validated_at, last_checked_at, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?)
        ON CONFLICT(isbn) DO UPDATE SET
            title = excluded.title,
            authors = excluded.authors,
            publisher = excluded.publisher,
            published_date = excluded.published_date,
            cover_url = excluded.cover_url,
            validated = 1,
            validated_at = excluded.validated_at,
            last_checked_at = excluded.last_checked_at,
            updated_at = excluded.updated_at
        RETURNING *
        "#,
    )
    .bind(&meta.isbn)
    .bind(&meta.title)
    .bind(meta.authors.join(", "))
    .bind(&meta.publisher)
    .bind(&meta.published_date)
    .bind(&meta.cover_url)
    .bind(&now)
    .bind(&now)
    .bind(&now)
    .bind(&now)
    .fetch_one(db)
    .await
}

/// Note a lookup that found nothing so the entry moves to the back of the queue
pub async fn mark_checked<'e, E>(db: E, isbn: &str) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let now = crate::db::now();
    sqlx::query("UPDATE cached_books SET last_checked_at = ?, updated_at = ? WHERE isbn = ?")
        .bind(&now)
        .bind(&now)
        .bind(isbn)
        .execute(db)
        .await?;
    Ok(())
}

/// Unvalidated entries, never-checked first, then least recently checked
pub async fn unvalidated_batch<'e, E>(db: E, limit: i64) -> Result<Vec<CachedBook>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as(
        r#"
        SELECT * FROM cached_books
        WHERE validated = 0
        ORDER BY last_checked_at IS NOT NULL, last_checked_at, created_at
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(db)
    .await
}
