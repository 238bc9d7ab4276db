//! Book challenges: parents submit them, school admins review them.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::db::{
    actions, find_book_by_id, find_user_by_id, has_verified_student, resource_types,
    BookChallenge, ChallengeDetail, ChallengeQuery, ChallengeStatus, CreateChallengeRequest,
    ReviewChallengeRequest, Role, User, CHALLENGE_DETAIL_SELECT,
};
use crate::AppState;

use super::audit::audit_log;
use super::auth::{admin_scope, require_role, require_school_admin};
use super::error::{ApiError, ValidationErrorBuilder};
use super::metrics::record_challenge;
use super::validation::{validate_reason, validate_uuid};

fn parse_status(status: &str) -> Result<ChallengeStatus, ApiError> {
    status
        .parse::<ChallengeStatus>()
        .map_err(|e| ApiError::validation_field("status", e))
}

/// Submit a challenge against a classroom book
pub async fn create_challenge(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(req): Json<CreateChallengeRequest>,
) -> Result<(StatusCode, Json<BookChallenge>), ApiError> {
    require_role(&user, &[Role::Parent])?;

    let mut errors = ValidationErrorBuilder::new();
    errors.check("book_id", validate_uuid(&req.book_id, "book_id"));
    errors.check("reason", validate_reason(&req.reason));
    errors.finish()?;

    let book = find_book_by_id(&state.db, &req.book_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Book not found"))?;
    let school_id = find_user_by_id(&state.db, &book.teacher_id)
        .await?
        .and_then(|teacher| teacher.school_id)
        .ok_or_else(|| ApiError::bad_request("This book's classroom is not assigned to a school"))?;

    if !has_verified_student(&state.db, &user.id, &school_id).await? {
        return Err(ApiError::forbidden(
            "A verified student at this school is required to challenge its books",
        ));
    }

    let mut tx = state.db.begin().await?;
    let open: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM book_challenges
        WHERE book_id = ? AND parent_id = ? AND status IN ('pending', 'under_review')
        "#,
    )
    .bind(&book.id)
    .bind(&user.id)
    .fetch_one(&mut *tx)
    .await?;
    if open > 0 {
        return Err(ApiError::conflict("You already have an open challenge for this book"));
    }

    let now = crate::db::now();
    let challenge = sqlx::query_as::<_, BookChallenge>(
        r#"
        INSERT INTO book_challenges (id, book_id, parent_id, school_id, reason, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, 'pending', ?, ?)
        RETURNING *
        "#,
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(&book.id)
    .bind(&user.id)
    .bind(&school_id)
    .bind(req.reason.trim())
    .bind(&now)
    .bind(&now)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    record_challenge(ChallengeStatus::Pending.as_str());
    audit_log(
        &state,
        actions::CHALLENGE_CREATE,
        resource_types::CHALLENGE,
        Some(&challenge.id),
        Some(&user.id),
        Some(&challenge.school_id),
        Some(serde_json::json!({ "book_id": challenge.book_id })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(challenge)))
}

/// The calling parent's challenges, newest first
pub async fn list_my_challenges(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<Vec<ChallengeDetail>>, ApiError> {
    require_role(&user, &[Role::Parent])?;

    let sql = format!("{} WHERE c.parent_id = ? ORDER BY c.created_at DESC", CHALLENGE_DETAIL_SELECT);
    let challenges = sqlx::query_as::<_, ChallengeDetail>(&sql)
        .bind(&user.id)
        .fetch_all(&state.db)
        .await?;

    Ok(Json(challenges))
}

/// Review queue, optionally filtered by status
pub async fn list_challenges(
    State(state): State<Arc<AppState>>,
    user: User,
    Query(query): Query<ChallengeQuery>,
) -> Result<Json<Vec<ChallengeDetail>>, ApiError> {
    let school_id = admin_scope(&user)?.or(query.school_id);
    let status = query.status.as_deref().map(parse_status).transpose()?;

    let sql = format!(
        "{} WHERE (? IS NULL OR c.school_id = ?) AND (? IS NULL OR c.status = ?) ORDER BY c.created_at",
        CHALLENGE_DETAIL_SELECT
    );
    let status = status.map(|s| s.as_str());
    let challenges = sqlx::query_as::<_, ChallengeDetail>(&sql)
        .bind(&school_id)
        .bind(&school_id)
        .bind(status)
        .bind(status)
        .fetch_all(&state.db)
        .await?;

    Ok(Json(challenges))
}

/// Set the status of a challenge. Any status may follow any other.
pub async fn review_challenge(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(req): Json<ReviewChallengeRequest>,
) -> Result<Json<BookChallenge>, ApiError> {
    admin_scope(&user)?;
    let status = parse_status(&req.status)?;

    let existing: BookChallenge = sqlx::query_as("SELECT * FROM book_challenges WHERE id = ?")
        .bind(&req.id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Challenge not found"))?;
    require_school_admin(&user, &existing.school_id)?;

    let now = crate::db::now();
    let challenge = sqlx::query_as::<_, BookChallenge>(
        r#"
        UPDATE book_challenges
        SET status = ?, reviewed_by = ?, reviewed_at = ?,
            review_notes = COALESCE(?, review_notes), updated_at = ?
        WHERE id = ?
        RETURNING *
        "#,
    )
    .bind(status.as_str())
    .bind(&user.id)
    .bind(&now)
    .bind(req.review_notes.as_deref().map(str::trim))
    .bind(&now)
    .bind(&existing.id)
    .fetch_one(&state.db)
    .await?;

    record_challenge(status.as_str());
    audit_log(
        &state,
        actions::CHALLENGE_REVIEW,
        resource_types::CHALLENGE,
        Some(&challenge.id),
        Some(&user.id),
        Some(&challenge.school_id),
        Some(serde_json::json!({
            "from": existing.status,
            "to": challenge.status,
        })),
    )
    .await;
    tracing::info!(
        challenge_id = %challenge.id,
        from = %existing.status,
        to = %challenge.status,
        "Challenge reviewed"
    );

    Ok(Json(challenge))
}
