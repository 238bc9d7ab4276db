//! Classroom book catalog endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::books_api::{lookup_isbn, LookupOutcome};
use crate::db::{
    find_book_by_id, find_user_by_id, has_verified_student, insert_book, insert_unvalidated,
    is_delegate_for, BookQuery, CachedBook, ClassroomBook, CreateBookRequest, NewBook, Role,
    UpdateBookRequest, User,
};
use crate::AppState;

use super::auth::{admin_scope, require_verified_teacher};
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{normalize_isbn, validate_name, validate_quantity};

/// Narrowing applied to the catalog query; `None` fields do not filter
#[derive(Debug, Default)]
struct BookFilter {
    teacher_id: Option<String>,
    school_id: Option<String>,
    delegate_id: Option<String>,
}

/// Work out which books the caller may see
async fn read_filter(state: &AppState, user: &User, query: BookQuery) -> Result<BookFilter, ApiError> {
    match user.role_enum() {
        Role::Teacher => {
            if query.teacher_id.as_deref().is_some_and(|t| t != user.id) {
                return Err(ApiError::forbidden("Teachers can only view their own classroom"));
            }
            Ok(BookFilter {
                teacher_id: Some(user.id.clone()),
                ..Default::default()
            })
        }
        Role::Delegate => {
            if let Some(ref teacher_id) = query.teacher_id {
                if !is_delegate_for(&state.db, &user.id, teacher_id).await? {
                    return Err(ApiError::forbidden("You are not a delegate for this teacher"));
                }
            }
            Ok(BookFilter {
                teacher_id: query.teacher_id,
                delegate_id: Some(user.id.clone()),
                ..Default::default()
            })
        }
        Role::Parent => {
            let teacher_id = query
                .teacher_id
                .ok_or_else(|| ApiError::validation_field("teacher_id", "teacher_id is required"))?;
            let teacher = find_user_by_id(&state.db, &teacher_id)
                .await?
                .filter(|t| t.role_enum() == Role::Teacher)
                .ok_or_else(|| ApiError::not_found("Teacher not found"))?;
            let allowed = match teacher.school_id.as_deref() {
                Some(school_id) => has_verified_student(&state.db, &user.id, school_id).await?,
                None => false,
            };
            if !allowed {
                return Err(ApiError::forbidden(
                    "A verified student at this school is required to view its classrooms",
                ));
            }
            Ok(BookFilter {
                teacher_id: Some(teacher_id),
                ..Default::default()
            })
        }
        Role::SchoolAdmin | Role::SuperAdmin => Ok(BookFilter {
            teacher_id: query.teacher_id,
            school_id: admin_scope(user)?,
            ..Default::default()
        }),
    }
}

/// Resolve the teacher whose classroom the caller is changing.
///
/// Returns the teacher id and whether the caller is acting as a delegate.
async fn write_target(
    state: &AppState,
    user: &User,
    teacher_id: Option<&str>,
) -> Result<(String, bool), ApiError> {
    match user.role_enum() {
        Role::Teacher => {
            require_verified_teacher(user)?;
            if teacher_id.is_some_and(|t| t != user.id) {
                return Err(ApiError::forbidden("Teachers can only change their own classroom"));
            }
            Ok((user.id.clone(), false))
        }
        Role::Delegate => {
            let teacher_id = teacher_id
                .ok_or_else(|| ApiError::validation_field("teacher_id", "teacher_id is required"))?;
            if !is_delegate_for(&state.db, &user.id, teacher_id).await? {
                return Err(ApiError::forbidden("You are not a delegate for this teacher"));
            }
            let teacher = find_user_by_id(&state.db, teacher_id)
                .await?
                .ok_or_else(|| ApiError::not_found("Teacher not found"))?;
            if !teacher.verified {
                return Err(ApiError::forbidden("This teacher's account is awaiting verification"));
            }
            Ok((teacher.id, true))
        }
        _ => Err(ApiError::forbidden("Only teachers and their delegates can change a classroom")),
    }
}

/// List classroom books visible to the caller
pub async fn list_books(
    State(state): State<Arc<AppState>>,
    user: User,
    Query(query): Query<BookQuery>,
) -> Result<Json<Vec<ClassroomBook>>, ApiError> {
    let filter = read_filter(&state, &user, query).await?;

    let books = sqlx::query_as::<_, ClassroomBook>(
        r#"
        SELECT b.* FROM classroom_books b
        INNER JOIN users t ON t.id = b.teacher_id
        WHERE (? IS NULL OR b.teacher_id = ?)
          AND (? IS NULL OR t.school_id = ?)
          AND (? IS NULL OR b.teacher_id IN
                (SELECT teacher_id FROM delegate_teachers WHERE delegate_id = ?))
        ORDER BY b.title
        "#,
    )
    .bind(&filter.teacher_id)
    .bind(&filter.teacher_id)
    .bind(&filter.school_id)
    .bind(&filter.school_id)
    .bind(&filter.delegate_id)
    .bind(&filter.delegate_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(books))
}

pub async fn create_book(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(req): Json<CreateBookRequest>,
) -> Result<(StatusCode, Json<ClassroomBook>), ApiError> {
    let (teacher_id, by_delegate) = write_target(&state, &user, req.teacher_id.as_deref()).await?;

    let quantity = req.quantity.unwrap_or(1);
    let mut errors = ValidationErrorBuilder::new();
    errors.check("title", validate_name(&req.title, "Title"));
    errors.check("quantity", validate_quantity(quantity));
    let isbn = match req.isbn.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => match normalize_isbn(raw) {
            Ok(isbn) => Some(isbn),
            Err(e) => {
                errors.add("isbn", e);
                None
            }
        },
        None => None,
    };
    errors.finish()?;

    let mut tx = state.db.begin().await?;
    let book = insert_book(
        &mut *tx,
        &NewBook {
            teacher_id,
            isbn: isbn.clone(),
            title: req.title.clone(),
            authors: req.authors.clone(),
            quantity,
            imported: false,
            added_by_delegate: by_delegate,
            added_by: Some(user.id.clone()),
        },
    )
    .await?;
    if let Some(ref isbn) = isbn {
        insert_unvalidated(&mut *tx, isbn, &book.title, &book.authors).await?;
    }
    tx.commit().await?;

    tracing::info!(
        book_id = %book.id,
        teacher_id = %book.teacher_id,
        by_delegate,
        "Added classroom book"
    );

    Ok((StatusCode::CREATED, Json(book)))
}

pub async fn update_book(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    user: User,
    Json(req): Json<UpdateBookRequest>,
) -> Result<Json<ClassroomBook>, ApiError> {
    let book = find_book_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Book not found"))?;
    write_target(&state, &user, Some(&book.teacher_id)).await?;

    let mut errors = ValidationErrorBuilder::new();
    if let Some(ref title) = req.title {
        errors.check("title", validate_name(title, "Title"));
    }
    if let Some(quantity) = req.quantity {
        errors.check("quantity", validate_quantity(quantity));
    }
    errors.finish()?;

    let updated = sqlx::query_as::<_, ClassroomBook>(
        r#"
        UPDATE classroom_books SET title = ?, authors = ?, quantity = ?, updated_at = ?
        WHERE id = ?
        RETURNING *
        "#,
    )
    .bind(req.title.as_deref().map(str::trim).unwrap_or(&book.title))
    .bind(req.authors.as_deref().map(str::trim).unwrap_or(&book.authors))
    .bind(req.quantity.unwrap_or(book.quantity))
    .bind(crate::db::now())
    .bind(&id)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(updated))
}

pub async fn delete_book(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    user: User,
) -> Result<StatusCode, ApiError> {
    let book = find_book_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Book not found"))?;
    write_target(&state, &user, Some(&book.teacher_id)).await?;

    sqlx::query("DELETE FROM classroom_books WHERE id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;
    tracing::info!(book_id = %id, teacher_id = %book.teacher_id, "Removed classroom book");

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct IsbnLookupResponse {
    /// cache, api or unvalidated
    pub source: &'static str,
    #[serde(flatten)]
    pub book: CachedBook,
}

/// Look up book metadata by ISBN through the cache and the external API
pub async fn lookup_book(
    State(state): State<Arc<AppState>>,
    Path(raw_isbn): Path<String>,
    _user: User,
) -> Result<Json<IsbnLookupResponse>, ApiError> {
    let isbn = normalize_isbn(&raw_isbn).map_err(|e| ApiError::validation_field("isbn", e))?;

    let outcome = lookup_isbn(
        &state.db,
        state.book_lookup.as_ref(),
        &state.config.book_api,
        &isbn,
    )
    .await?;

    let (source, book) = match outcome {
        LookupOutcome::Cached(book) => ("cache", book),
        LookupOutcome::Fetched(book) => ("api", book),
        LookupOutcome::Unvalidated(book) => ("unvalidated", book),
        LookupOutcome::NotFound => {
            return Err(ApiError::not_found(format!("No book found for ISBN {}", isbn)));
        }
    };

    Ok(Json(IsbnLookupResponse { source, book }))
}
