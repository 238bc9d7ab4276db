mod models;

pub use models::*;

use anyhow::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

pub type DbPool = SqlitePool;

/// Current time as a fixed-width RFC 3339 string.
///
/// Every timestamp column uses this format so that lexicographic comparison
/// in SQL matches chronological order.
pub fn now() -> String {
    timestamp(chrono::Utc::now())
}

pub fn timestamp(at: chrono::DateTime<chrono::Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Execute a SQL migration file, properly handling comments
async fn execute_sql(pool: &SqlitePool, sql: &str) -> Result<()> {
    for statement in sql.split(';') {
        // Strip SQL comment lines (lines starting with --)
        let cleaned: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let trimmed = cleaned.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(pool).await?;
        }
    }
    Ok(())
}

pub async fn init(data_dir: &Path) -> Result<DbPool> {
    let db_path = data_dir.join("bookworm.db");
    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    info!("Initializing database at {}", db_path.display());

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    // Enable WAL mode for better concurrency
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    info!("Database initialized successfully");
    Ok(pool)
}

/// Open a private in-memory database with the full schema.
///
/// The pool is pinned to a single connection because every SQLite memory
/// connection owns a separate database.
pub async fn init_in_memory() -> Result<DbPool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;
    Ok(pool)
}

async fn table_exists(pool: &SqlitePool, table: &str) -> Result<bool> {
    let found: Option<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name = ?")
            .bind(table)
            .fetch_optional(pool)
            .await?;
    Ok(found.is_some())
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");

    // Migration 001: Schools, users, sessions, delegates, classroom books
    execute_sql(pool, include_str!("../../migrations/001_initial.sql")).await?;

    // Migration 002: Book challenges and parent/student links
    if !table_exists(pool, "book_challenges").await? {
        execute_sql(pool, include_str!("../../migrations/002_challenges.sql")).await?;
    }

    // Migration 003: Delegate invitations
    if !table_exists(pool, "invitations").await? {
        execute_sql(pool, include_str!("../../migrations/003_invitations.sql")).await?;
    }

    // Migration 004: Book API cache and quota counter
    if !table_exists(pool, "cached_books").await? {
        execute_sql(pool, include_str!("../../migrations/004_book_cache.sql")).await?;
    }

    // Migration 005: Audit logs
    if !table_exists(pool, "audit_logs").await? {
        execute_sql(pool, include_str!("../../migrations/005_audit_logs.sql")).await?;
    }

    info!("Migrations completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = init_in_memory().await.unwrap();
        run_migrations(&pool).await.unwrap();
        assert!(table_exists(&pool, "classroom_books").await.unwrap());
        assert!(table_exists(&pool, "api_quota").await.unwrap());
    }

    #[test]
    fn test_timestamps_are_fixed_width() {
        let a = timestamp(chrono::DateTime::from_timestamp(0, 0).unwrap());
        let b = timestamp(chrono::DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap());
        assert_eq!(a, "1970-01-01T00:00:00Z");
        assert_eq!(a.len(), b.len());
        assert!(a < b);
    }
}
