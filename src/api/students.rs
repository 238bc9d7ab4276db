//! Parent/student associations and their admin review.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::db::{
    actions, find_school_by_id, find_user_by_id, resource_types, ClaimStudentRequest,
    ParentStudent, ReviewStudentRequest, Role, StudentLinkStatus, StudentQuery, User,
};
use crate::AppState;

use super::audit::audit_log;
use super::auth::{admin_scope, require_role, require_school_admin};
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::validate_name;

/// Claim a student; the link stays pending until a school admin verifies it
pub async fn claim_student(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(req): Json<ClaimStudentRequest>,
) -> Result<(StatusCode, Json<ParentStudent>), ApiError> {
    require_role(&user, &[Role::Parent])?;

    let mut errors = ValidationErrorBuilder::new();
    errors.check("student_name", validate_name(&req.student_name, "Student name"));
    errors.check("grade", validate_name(&req.grade, "Grade"));
    errors.finish()?;

    if find_school_by_id(&state.db, &req.school_id).await?.is_none() {
        return Err(ApiError::validation_field("school_id", "Unknown school"));
    }
    if let Some(ref teacher_id) = req.teacher_id {
        let in_school = find_user_by_id(&state.db, teacher_id).await?.is_some_and(|t| {
            t.role_enum() == Role::Teacher && t.school_id.as_deref() == Some(req.school_id.as_str())
        });
        if !in_school {
            return Err(ApiError::validation_field("teacher_id", "Teacher is not at this school"));
        }
    }

    let link = sqlx::query_as::<_, ParentStudent>(
        r#"
        INSERT INTO parent_students (id, parent_id, student_name, grade, school_id, teacher_id, status, created_at)
        VALUES (?, ?, ?, ?, ?, ?, 'pending', ?)
        RETURNING *
        "#,
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(&user.id)
    .bind(req.student_name.trim())
    .bind(req.grade.trim())
    .bind(&req.school_id)
    .bind(&req.teacher_id)
    .bind(crate::db::now())
    .fetch_one(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(link)))
}

pub async fn list_my_students(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<Vec<ParentStudent>>, ApiError> {
    require_role(&user, &[Role::Parent])?;

    let students = sqlx::query_as::<_, ParentStudent>(
        "SELECT * FROM parent_students WHERE parent_id = ? ORDER BY created_at",
    )
    .bind(&user.id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(students))
}

pub async fn list_students(
    State(state): State<Arc<AppState>>,
    user: User,
    Query(query): Query<StudentQuery>,
) -> Result<Json<Vec<ParentStudent>>, ApiError> {
    let school_id = admin_scope(&user)?.or(query.school_id);
    let status = query
        .status
        .as_deref()
        .map(|s| s.parse::<StudentLinkStatus>())
        .transpose()
        .map_err(|e| ApiError::validation_field("status", e))?
        .map(|s| s.as_str());

    let students = sqlx::query_as::<_, ParentStudent>(
        r#"
        SELECT * FROM parent_students
        WHERE (? IS NULL OR school_id = ?) AND (? IS NULL OR status = ?)
        ORDER BY created_at
        "#,
    )
    .bind(&school_id)
    .bind(&school_id)
    .bind(status)
    .bind(status)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(students))
}

/// Verify or reject a pending association. Decided links are final.
pub async fn review_student(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    user: User,
    Json(req): Json<ReviewStudentRequest>,
) -> Result<Json<ParentStudent>, ApiError> {
    admin_scope(&user)?;
    let status = req
        .status
        .parse::<StudentLinkStatus>()
        .map_err(|e| ApiError::validation_field("status", e))?;
    if status == StudentLinkStatus::Pending {
        return Err(ApiError::validation_field(
            "status",
            "Status must be verified or rejected",
        ));
    }

    let existing: ParentStudent = sqlx::query_as("SELECT * FROM parent_students WHERE id = ?")
        .bind(&id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Student association not found"))?;
    require_school_admin(&user, &existing.school_id)?;
    if existing.status_enum() != StudentLinkStatus::Pending {
        return Err(ApiError::conflict(format!(
            "Association has already been {}",
            existing.status
        )));
    }

    // Conditional on pending; a concurrent review leaves zero rows
    let updated: ParentStudent = sqlx::query_as(
        r#"
        UPDATE parent_students SET status = ?, reviewed_by = ?, reviewed_at = ?
        WHERE id = ? AND status = 'pending'
        RETURNING *
        "#,
    )
    .bind(status.as_str())
    .bind(&user.id)
    .bind(crate::db::now())
    .bind(&id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::conflict("Association has already been reviewed"))?;

    audit_log(
        &state,
        actions::STUDENT_REVIEW,
        resource_types::STUDENT,
        Some(&updated.id),
        Some(&user.id),
        Some(&updated.school_id),
        Some(serde_json::json!({ "status": updated.status })),
    )
    .await;

    Ok(Json(updated))
}
