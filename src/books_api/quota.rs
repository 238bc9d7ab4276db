//! Daily call counter for the external book API.

use serde::Serialize;
use sqlx::{Executor, Sqlite, SqlitePool};

use crate::config::BookApiConfig;

/// Current UTC day, the counter key
pub fn today() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}

/// Add `n` calls to today's counter and return the new total
pub async fn record_calls<'e, E>(db: E, n: i64) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_scalar(
        r#"
        INSERT INTO api_quota (day, calls) VALUES (?, ?)
        ON CONFLICT(day) DO UPDATE SET calls = calls + excluded.calls
        RETURNING calls
        "#,
    )
    .bind(today())
    .bind(n)
    .fetch_one(db)
    .await
}

pub async fn calls_today<'e, E>(db: E) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let calls: Option<i64> = sqlx::query_scalar("SELECT calls FROM api_quota WHERE day = ?")
        .bind(today())
        .fetch_optional(db)
        .await?;
    Ok(calls.unwrap_or(0))
}

/// Entries one validation batch may check: half the remaining quota, capped
pub fn batch_size(remaining: i64, max_batch: i64) -> i64 {
    (remaining / 2).min(max_batch).max(0)
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct QuotaStatus {
    pub day: String,
    pub calls: i64,
    pub daily_limit: i64,
    pub remaining: i64,
    pub floor: i64,
    /// Size the next validation batch would have
    pub next_batch: i64,
}

impl QuotaStatus {
    pub fn from_calls(calls: i64, config: &BookApiConfig) -> Self {
        let remaining = (config.daily_limit - calls).max(0);
        let next_batch = if remaining < config.quota_floor {
            0
        } else {
            batch_size(remaining, config.max_batch)
        };
        Self {
            day: today(),
            calls,
            daily_limit: config.daily_limit,
            remaining,
            floor: config.quota_floor,
            next_batch,
        }
    }

    pub fn below_floor(&self) -> bool {
        self.remaining < self.floor
    }
}

pub async fn quota_status(db: &SqlitePool, config: &BookApiConfig) -> Result<QuotaStatus, sqlx::Error> {
    let calls = calls_today(db).await?;
    Ok(QuotaStatus::from_calls(calls, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_size() {
        assert_eq!(batch_size(1000, 100), 100);
        assert_eq!(batch_size(150, 100), 75);
        assert_eq!(batch_size(7, 100), 3);
        assert_eq!(batch_size(0, 100), 0);
        assert_eq!(batch_size(-5, 100), 0);
    }

    #[test]
    fn test_status_below_floor_has_no_batch() {
        let config = BookApiConfig {
            daily_limit: 100,
            quota_floor: 50,
            ..Default::default()
        };
        let status = QuotaStatus::from_calls(60, &config);
        assert_eq!(status.remaining, 40);
        assert!(status.below_floor());
        assert_eq!(status.next_batch, 0);

        let over = QuotaStatus::from_calls(250, &config);
        assert_eq!(over.remaining, 0);
    }

    #[tokio::test]
    async fn test_counter_accumulates() {
        let pool = crate::db::init_in_memory().await.unwrap();
        assert_eq!(calls_today(&pool).await.unwrap(), 0);
        assert_eq!(record_calls(&pool, 1).await.unwrap(), 1);
        assert_eq!(record_calls(&pool, 4).await.unwrap(), 5);
        assert_eq!(calls_today(&pool).await.unwrap(), 5);
    }
}
