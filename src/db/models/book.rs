//! Classroom book catalog models.

use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite};

/// One catalog entry (possibly several copies) in a teacher's classroom library
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ClassroomBook {
    pub id: String,
    pub teacher_id: String,
    pub isbn: Option<String>,
    pub title: String,
    pub authors: String,
    pub quantity: i64,
    /// Created by a bulk import rather than by hand
    pub imported: bool,
    pub added_by_delegate: bool,
    pub added_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateBookRequest {
    /// Required for delegates, defaults to the caller for teachers
    pub teacher_id: Option<String>,
    pub isbn: Option<String>,
    pub title: String,
    #[serde(default)]
    pub authors: String,
    pub quantity: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBookRequest {
    pub title: Option<String>,
    pub authors: Option<String>,
    pub quantity: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct BookQuery {
    pub teacher_id: Option<String>,
}

/// Fields for inserting a classroom book
#[derive(Debug, Clone)]
pub struct NewBook {
    pub teacher_id: String,
    pub isbn: Option<String>,
    pub title: String,
    pub authors: String,
    pub quantity: i64,
    pub imported: bool,
    pub added_by_delegate: bool,
    pub added_by: Option<String>,
}

pub async fn insert_book<'e, E>(db: E, new: &NewBook) -> Result<ClassroomBook, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let id = uuid::Uuid::new_v4().to_string();
    let now = crate::db::now();

    sqlx::query_as::<_, ClassroomBook>(
        r#"
        INSERT INTO classroom_books (id, teacher_id, isbn, title, authors, quantity,
                                     imported, added_by_delegate, added_by, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(&id)
    .bind(&new.teacher_id)
    .bind(&new.isbn)
    .bind(new.title.trim())
    .bind(new.authors.trim())
    .bind(new.quantity)
    .bind(new.imported)
    .bind(new.added_by_delegate)
    .bind(&new.added_by)
    .bind(&now)
    .bind(&now)
    .fetch_one(db)
    .await
}

pub async fn find_book_by_id<'e, E>(db: E, id: &str) -> Result<Option<ClassroomBook>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as("SELECT * FROM classroom_books WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await
}

/// Row shape for CSV export (book joined with its teacher and school)
#[derive(Debug, Clone, FromRow)]
pub struct ExportRow {
    pub school: String,
    pub teacher_name: String,
    pub teacher_email: Option<String>,
    pub isbn: Option<String>,
    pub title: String,
    pub authors: String,
    pub quantity: i64,
}

pub async fn export_rows<'e, E>(db: E, school_id: Option<&str>) -> Result<Vec<ExportRow>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as(
        r#"
        SELECT s.name AS school, u.name AS teacher_name, u.email AS teacher_email,
               b.isbn, b.title, b.authors, b.quantity
        FROM classroom_books b
        INNER JOIN users u ON b.teacher_id = u.id
        INNER JOIN schools s ON u.school_id = s.id
        WHERE (? IS NULL OR s.id = ?)
        ORDER BY s.name, u.name, b.title
        "#,
    )
    .bind(school_id)
    .bind(school_id)
    .fetch_all(db)
    .await
}
