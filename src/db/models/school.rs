//! School (tenant) models.

use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqliteConnection};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct School {
    pub id: String,
    pub name: String,
    pub slug: String,
    /// New teacher accounts with an email in this domain join the school automatically
    pub email_domain: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Public listing used by the signup form
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SchoolSummary {
    pub id: String,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateSchoolRequest {
    pub name: String,
    /// Optional slug (generated from name if not provided)
    pub slug: Option<String>,
    pub email_domain: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSchoolRequest {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub email_domain: Option<String>,
}

/// Generate a URL-friendly slug from a name
pub fn generate_slug(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

pub async fn insert_school<'e, E>(
    db: E,
    name: &str,
    slug: &str,
    email_domain: Option<&str>,
) -> Result<School, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let id = uuid::Uuid::new_v4().to_string();
    let now = crate::db::now();

    sqlx::query_as::<_, School>(
        r#"
        INSERT INTO schools (id, name, slug, email_domain, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(&id)
    .bind(name.trim())
    .bind(slug)
    .bind(email_domain.map(str::to_lowercase))
    .bind(&now)
    .bind(&now)
    .fetch_one(db)
    .await
}

pub async fn find_school_by_id<'e, E>(db: E, id: &str) -> Result<Option<School>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as("SELECT * FROM schools WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await
}

pub async fn find_school_by_slug<'e, E>(db: E, slug: &str) -> Result<Option<School>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as("SELECT * FROM schools WHERE slug = ?")
        .bind(slug)
        .fetch_optional(db)
        .await
}

/// Case-insensitive match on the display name
pub async fn find_school_by_name<'e, E>(db: E, name: &str) -> Result<Option<School>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as("SELECT * FROM schools WHERE lower(name) = lower(?) ORDER BY created_at LIMIT 1")
        .bind(name.trim())
        .fetch_optional(db)
        .await
}

/// Pick `base`, or `base-2`, `base-3`, ... if the slug is taken
pub async fn unique_slug(conn: &mut SqliteConnection, base: &str) -> Result<String, sqlx::Error> {
    let mut candidate = base.to_string();
    let mut n = 2;
    while find_school_by_slug(&mut *conn, &candidate).await?.is_some() {
        candidate = format!("{}-{}", base, n);
        n += 1;
    }
    Ok(candidate)
}

/// School whose email domain matches the domain part of `email`
pub async fn find_school_for_email<'e, E>(db: E, email: &str) -> Result<Option<School>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let Some((_, domain)) = email.rsplit_once('@') else {
        return Ok(None);
    };

    sqlx::query_as("SELECT * FROM schools WHERE email_domain = ?")
        .bind(domain.trim().to_lowercase())
        .fetch_optional(db)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_slug() {
        assert_eq!(generate_slug("Lincoln Elementary"), "lincoln-elementary");
        assert_eq!(generate_slug("  St. Mary's -- Upper School "), "st-mary-s-upper-school");
        assert_eq!(generate_slug("PS 118"), "ps-118");
    }

    #[tokio::test]
    async fn test_email_domain_match() {
        let pool = crate::db::init_in_memory().await.unwrap();
        let school = insert_school(&pool, "Walkerville Elementary", "walkerville", Some("Walkerville.EDU"))
            .await
            .unwrap();

        let found = find_school_for_email(&pool, "arnold@walkerville.edu").await.unwrap();
        assert_eq!(found.map(|s| s.id), Some(school.id));
        assert!(find_school_for_email(&pool, "arnold@gmail.com").await.unwrap().is_none());
        assert!(find_school_for_email(&pool, "not-an-email").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_name_lookup_ignores_slug_and_case() {
        let pool = crate::db::init_in_memory().await.unwrap();
        let school = insert_school(&pool, "Roosevelt Middle", "roosevelt", None)
            .await
            .unwrap();

        let found = find_school_by_name(&pool, " roosevelt MIDDLE ").await.unwrap();
        assert_eq!(found.map(|s| s.id), Some(school.id));

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(unique_slug(&mut conn, "roosevelt").await.unwrap(), "roosevelt-2");
        assert_eq!(unique_slug(&mut conn, "lincoln").await.unwrap(), "lincoln");
    }
}
