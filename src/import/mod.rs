//! Bulk CSV import of schools, teachers and classroom books, plus the
//! matching export.
//!
//! Rows are independent: each runs in its own transaction and a failing row
//! is reported with its line number while the rest of the file continues.

pub mod csv;

use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashMap;
use thiserror::Error;

use crate::api::validation::{normalize_isbn, validate_email, validate_quantity};
use crate::db::{
    export_rows, find_school_by_name, find_user_by_email, find_user_by_username, generate_slug,
    insert_book, insert_school, insert_unvalidated, insert_user, unique_slug, unique_username,
    NewBook, NewUser, Role, School, User,
};

use self::csv::{split_header, write_row, CsvRecord, Header};

pub const BOOK_COLUMNS: [&str; 7] = [
    "school",
    "teacher_name",
    "teacher_email",
    "isbn",
    "title",
    "authors",
    "quantity",
];

/// Columns that must appear in a book import header
const REQUIRED_BOOK_COLUMNS: [&str; 3] = ["school", "teacher_name", "title"];

pub const STAFF_COLUMNS: [&str; 2] = ["name", "email"];

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("CSV input is empty")]
    EmptyInput,

    #[error("CSV header is missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Schools an import may touch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportScope {
    /// Any school, creating missing ones (super admin)
    AnySchool,
    /// Only this existing school (school admin)
    School(String),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub created_books: usize,
    pub created_schools: usize,
    pub created_teachers: usize,
    /// Non-blank data rows processed
    pub rows: usize,
    pub errors: Vec<RowError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    /// Every row succeeded (or there were none)
    Complete,
    /// Some rows succeeded, some failed
    Partial,
    /// Rows were present and all of them failed
    Failed,
}

impl ImportReport {
    pub fn succeeded(&self) -> usize {
        self.rows - self.errors.len()
    }

    pub fn outcome(&self) -> ImportOutcome {
        if self.errors.is_empty() {
            ImportOutcome::Complete
        } else if self.succeeded() > 0 {
            ImportOutcome::Partial
        } else {
            ImportOutcome::Failed
        }
    }

    fn fail(&mut self, line: usize, message: impl Into<String>) {
        self.errors.push(RowError {
            line,
            message: message.into(),
        });
    }
}

/// Why a single row was rejected
#[derive(Debug)]
enum RowFailure {
    Invalid(String),
    Database(sqlx::Error),
}

impl From<sqlx::Error> for RowFailure {
    fn from(err: sqlx::Error) -> Self {
        RowFailure::Database(err)
    }
}

impl RowFailure {
    fn into_message(self, line: usize) -> String {
        match self {
            RowFailure::Invalid(msg) => msg,
            RowFailure::Database(e) => {
                tracing::error!(line, error = %e, "Import row failed with a database error");
                if e.as_database_error()
                    .is_some_and(|d| d.message().contains("UNIQUE constraint failed"))
                {
                    "Conflicts with an existing record".to_string()
                } else {
                    "Database error".to_string()
                }
            }
        }
    }
}

fn invalid(msg: impl Into<String>) -> RowFailure {
    RowFailure::Invalid(msg.into())
}

struct BookRow<'a> {
    school: &'a str,
    teacher_name: &'a str,
    teacher_email: Option<String>,
    isbn: Option<String>,
    title: &'a str,
    authors: &'a str,
    quantity: i64,
}

fn parse_book_row<'a>(header: &Header, record: &'a CsvRecord) -> Result<BookRow<'a>, RowFailure> {
    let school = header.get(record, "school");
    if school.is_empty() {
        return Err(invalid("school is required"));
    }

    let teacher_name = header.get(record, "teacher_name");
    let teacher_email = match header.get(record, "teacher_email") {
        "" => None,
        email => {
            validate_email(email).map_err(invalid)?;
            Some(email.to_lowercase())
        }
    };
    if teacher_name.is_empty() {
        return Err(invalid("teacher_name is required"));
    }

    let title = header.get(record, "title");
    if title.is_empty() {
        return Err(invalid("title is required"));
    }

    let isbn = match header.get(record, "isbn") {
        "" => None,
        raw => Some(normalize_isbn(raw).map_err(invalid)?),
    };

    let quantity = match header.get(record, "quantity") {
        "" => 1,
        raw => {
            let q: i64 = raw
                .parse()
                .map_err(|_| invalid(format!("quantity '{}' is not a whole number", raw)))?;
            validate_quantity(q).map_err(invalid)?;
            q
        }
    };

    Ok(BookRow {
        school,
        teacher_name,
        teacher_email,
        isbn,
        title,
        authors: header.get(record, "authors"),
        quantity,
    })
}

/// Lookups that survived a committed row, reused by later rows
#[derive(Default)]
struct ImportCache {
    /// Keyed by `school_key`
    schools: HashMap<String, School>,
    teachers: HashMap<(String, String), String>,
}

fn school_key(name: &str) -> String {
    name.trim().to_lowercase()
}

fn teacher_key(email: Option<&str>, username: &str) -> String {
    match email {
        Some(email) => format!("email:{}", email),
        None => format!("user:{}", username),
    }
}

struct Resolved {
    school: School,
    school_created: bool,
    teacher_id: String,
    teacher_created: bool,
}

async fn resolve_school(
    conn: &mut SqliteConnection,
    cache: &ImportCache,
    scope: &ImportScope,
    name: &str,
) -> Result<(School, bool), RowFailure> {
    let existing = match cache.schools.get(&school_key(name)) {
        Some(school) => Some(school.clone()),
        None => find_school_by_name(&mut *conn, name).await?,
    };

    match (existing, scope) {
        (Some(school), ImportScope::School(own)) if &school.id != own => Err(invalid(format!(
            "school '{}' is not the school you administer",
            name
        ))),
        (Some(school), _) => Ok((school, false)),
        (None, ImportScope::School(_)) => Err(invalid(format!(
            "school '{}' does not exist and you may only import into your own school",
            name
        ))),
        (None, ImportScope::AnySchool) => {
            let base = generate_slug(name);
            if base.is_empty() {
                return Err(invalid(format!("school name '{}' has no usable characters", name)));
            }
            let slug = unique_slug(conn, &base).await?;
            let school = insert_school(&mut *conn, name, &slug, None).await?;
            Ok((school, true))
        }
    }
}

/// Find or create the teacher for a row. Returns (teacher id, created).
async fn resolve_teacher(
    conn: &mut SqliteConnection,
    cache: &ImportCache,
    school: &School,
    name: &str,
    email: Option<&str>,
) -> Result<(String, bool), RowFailure> {
    let base_username = generate_slug(name);
    if base_username.is_empty() && email.is_none() {
        return Err(invalid(format!("teacher_name '{}' has no usable characters", name)));
    }

    let key = (school.id.clone(), teacher_key(email, &base_username));
    if let Some(id) = cache.teachers.get(&key) {
        return Ok((id.clone(), false));
    }

    let existing = match email {
        Some(email) => find_user_by_email(&mut *conn, email).await?,
        None => find_user_by_username(&mut *conn, &school.id, &base_username).await?,
    };

    if let Some(user) = existing {
        return check_existing_teacher(user, school, name).map(|id| (id, false));
    }

    let username = if base_username.is_empty() {
        None
    } else {
        Some(unique_username(conn, &school.id, &base_username).await?)
    };

    let teacher = insert_user(
        &mut *conn,
        &NewUser {
            email: email.map(str::to_string),
            username,
            name: name.to_string(),
            role: Role::Teacher,
            school_id: Some(school.id.clone()),
            password_hash: None,
            verified: true,
            placeholder: email.is_none(),
        },
    )
    .await?;

    Ok((teacher.id, true))
}

fn check_existing_teacher(user: User, school: &School, name: &str) -> Result<String, RowFailure> {
    if user.role_enum() != Role::Teacher {
        return Err(invalid(format!(
            "'{}' matches an existing {} account, not a teacher",
            name, user.role
        )));
    }
    if user.school_id.as_deref() != Some(school.id.as_str()) {
        return Err(invalid(format!(
            "teacher '{}' belongs to a different school",
            name
        )));
    }
    Ok(user.id)
}

async fn import_book_row(
    conn: &mut SqliteConnection,
    cache: &ImportCache,
    scope: &ImportScope,
    actor_id: Option<&str>,
    row: &BookRow<'_>,
) -> Result<Resolved, RowFailure> {
    let (school, school_created) = resolve_school(conn, cache, scope, row.school).await?;
    let (teacher_id, teacher_created) = resolve_teacher(
        conn,
        cache,
        &school,
        row.teacher_name,
        row.teacher_email.as_deref(),
    )
    .await?;

    insert_book(
        &mut *conn,
        &NewBook {
            teacher_id: teacher_id.clone(),
            isbn: row.isbn.clone(),
            title: row.title.to_string(),
            authors: row.authors.to_string(),
            quantity: row.quantity,
            imported: true,
            added_by_delegate: false,
            added_by: actor_id.map(str::to_string),
        },
    )
    .await?;

    if let Some(ref isbn) = row.isbn {
        insert_unvalidated(&mut *conn, isbn, row.title, row.authors).await?;
    }

    Ok(Resolved {
        school,
        school_created,
        teacher_id,
        teacher_created,
    })
}

/// Import classroom books from CSV text with the `BOOK_COLUMNS` header
pub async fn run_book_import(
    pool: &SqlitePool,
    text: &str,
    scope: &ImportScope,
    actor_id: Option<&str>,
) -> Result<ImportReport, ImportError> {
    let (header, records) = split_header(text, &REQUIRED_BOOK_COLUMNS)?;
    let mut report = ImportReport {
        rows: records.len(),
        ..Default::default()
    };
    let mut cache = ImportCache::default();

    for record in &records {
        let row = match parse_book_row(&header, record) {
            Ok(row) => row,
            Err(failure) => {
                report.fail(record.line, failure.into_message(record.line));
                continue;
            }
        };

        let mut tx = pool.begin().await?;
        match import_book_row(&mut tx, &cache, scope, actor_id, &row).await {
            Ok(resolved) => {
                tx.commit().await?;
                report.created_books += 1;
                if resolved.school_created {
                    report.created_schools += 1;
                }
                if resolved.teacher_created {
                    report.created_teachers += 1;
                }
                let key = (
                    resolved.school.id.clone(),
                    teacher_key(row.teacher_email.as_deref(), &generate_slug(row.teacher_name)),
                );
                cache.teachers.insert(key, resolved.teacher_id);
                cache.schools.insert(school_key(row.school), resolved.school);
            }
            Err(failure) => {
                tx.rollback().await?;
                report.fail(record.line, failure.into_message(record.line));
            }
        }
    }

    tracing::info!(
        rows = report.rows,
        books = report.created_books,
        schools = report.created_schools,
        teachers = report.created_teachers,
        errors = report.errors.len(),
        "Book import finished"
    );

    Ok(report)
}

/// Import teacher accounts for one school from CSV text with a `name,email` header
pub async fn run_staff_import(
    pool: &SqlitePool,
    text: &str,
    school: &School,
) -> Result<ImportReport, ImportError> {
    let (header, records) = split_header(text, &["name"])?;
    let mut report = ImportReport {
        rows: records.len(),
        ..Default::default()
    };

    for record in &records {
        let name = header.get(record, "name");
        let email = header.get(record, "email");
        if name.is_empty() {
            report.fail(record.line, "name is required");
            continue;
        }
        let email = if email.is_empty() {
            None
        } else if let Err(e) = validate_email(email) {
            report.fail(record.line, e);
            continue;
        } else {
            Some(email.to_lowercase())
        };

        let mut tx = pool.begin().await?;
        let existing = match email.as_deref() {
            Some(email) => find_user_by_email(&mut *tx, email).await?,
            None => find_user_by_username(&mut *tx, &school.id, &generate_slug(name)).await?,
        };
        if existing.is_some() {
            report.fail(record.line, format!("'{}' already has an account", name));
            continue;
        }

        let cache = ImportCache::default();
        match resolve_teacher(&mut tx, &cache, school, name, email.as_deref()).await {
            Ok(_) => {
                tx.commit().await?;
                report.created_teachers += 1;
            }
            Err(failure) => {
                tx.rollback().await?;
                report.fail(record.line, failure.into_message(record.line));
            }
        }
    }

    tracing::info!(
        school_id = %school.id,
        rows = report.rows,
        teachers = report.created_teachers,
        errors = report.errors.len(),
        "Staff import finished"
    );

    Ok(report)
}

/// Every book in scope as CSV in the import format
pub async fn export_csv(pool: &SqlitePool, school_id: Option<&str>) -> Result<String, sqlx::Error> {
    let rows = export_rows(pool, school_id).await?;

    let mut out = write_row(&BOOK_COLUMNS);
    for row in rows {
        out.push_str(&write_row(&[
            row.school,
            row.teacher_name,
            row.teacher_email.unwrap_or_default(),
            row.isbn.unwrap_or_default(),
            row.title,
            row.authors,
            row.quantity.to_string(),
        ]));
    }
    Ok(out)
}
