//! Delegate invitations and delegate assignments.
//!
//! A verified teacher issues an invitation; the plaintext token is shown once
//! and only its SHA-256 is stored. Accepting it links the delegate to the
//! teacher. A token can be redeemed once.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use sqlx::SqliteConnection;
use std::sync::Arc;

use crate::db::{
    actions, resource_types, user_response, AcceptInvitationRequest, CreateInvitationRequest,
    CreatedInvitation, Invitation, Role, User, UserResponse,
};
use crate::AppState;

use super::audit::audit_log;
use super::auth::{generate_token, hash_token, require_role, require_verified_teacher};
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::validate_email;

/// Load an invitation that can still be redeemed.
///
/// When `email` is given and the invitation has an addressee, they must match.
pub(super) async fn load_open_invitation(
    conn: &mut SqliteConnection,
    token: &str,
    email: Option<&str>,
) -> Result<Invitation, ApiError> {
    let invitation: Invitation = sqlx::query_as("SELECT * FROM invitations WHERE token_hash = ?")
        .bind(hash_token(token.trim()))
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ApiError::not_found("Invitation not found"))?;

    if invitation.is_used() {
        return Err(ApiError::gone("Invitation has already been used"));
    }
    if invitation.is_expired() {
        return Err(ApiError::gone("Invitation has expired"));
    }
    if let (Some(addressee), Some(email)) = (invitation.email.as_deref(), email) {
        if !addressee.eq_ignore_ascii_case(email.trim()) {
            return Err(ApiError::forbidden("This invitation was sent to a different email"));
        }
    }

    Ok(invitation)
}

/// Link the delegate to the inviting teacher and mark the invitation used.
///
/// The update is conditional so two concurrent redemptions cannot both win.
pub(super) async fn redeem_invitation(
    conn: &mut SqliteConnection,
    invitation: &Invitation,
    delegate_id: &str,
) -> Result<(), ApiError> {
    let now = crate::db::now();

    let result = sqlx::query(
        "UPDATE invitations SET used_at = ?, used_by = ? WHERE id = ? AND used_at IS NULL",
    )
    .bind(&now)
    .bind(delegate_id)
    .bind(&invitation.id)
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::gone("Invitation has already been used"));
    }

    sqlx::query(
        "INSERT OR IGNORE INTO delegate_teachers (delegate_id, teacher_id, created_at) VALUES (?, ?, ?)",
    )
    .bind(delegate_id)
    .bind(&invitation.teacher_id)
    .bind(&now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Issue a delegate invitation for the calling teacher
pub async fn create_invitation(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(req): Json<CreateInvitationRequest>,
) -> Result<(StatusCode, Json<CreatedInvitation>), ApiError> {
    require_verified_teacher(&user)?;

    let mut errors = ValidationErrorBuilder::new();
    if let Some(ref email) = req.email {
        errors.check("email", validate_email(email));
    }
    errors.finish()?;

    let token = generate_token();
    let now = crate::db::now();
    let expires_at = crate::db::timestamp(
        chrono::Utc::now() + chrono::Duration::days(state.config.invitations.expires_in_days),
    );

    let invitation = sqlx::query_as::<_, Invitation>(
        r#"
        INSERT INTO invitations (id, teacher_id, email, token_hash, expires_at, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(&user.id)
    .bind(req.email.as_deref().map(|e| e.trim().to_lowercase()))
    .bind(hash_token(&token))
    .bind(&expires_at)
    .bind(&now)
    .fetch_one(&state.db)
    .await?;

    audit_log(
        &state,
        actions::INVITATION_CREATE,
        resource_types::INVITATION,
        Some(&invitation.id),
        Some(&user.id),
        user.school_id.as_deref(),
        invitation.email.as_ref().map(|e| serde_json::json!({ "email": e })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(CreatedInvitation { invitation, token })))
}

/// Invitations issued by the calling teacher, newest first
pub async fn list_invitations(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<Vec<Invitation>>, ApiError> {
    require_role(&user, &[Role::Teacher])?;

    let invitations = sqlx::query_as::<_, Invitation>(
        "SELECT * FROM invitations WHERE teacher_id = ? ORDER BY created_at DESC",
    )
    .bind(&user.id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(invitations))
}

/// Revoke an unused invitation
pub async fn revoke_invitation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    user: User,
) -> Result<StatusCode, ApiError> {
    require_role(&user, &[Role::Teacher])?;

    let invitation: Invitation =
        sqlx::query_as("SELECT * FROM invitations WHERE id = ? AND teacher_id = ?")
            .bind(&id)
            .bind(&user.id)
            .fetch_optional(&state.db)
            .await?
            .ok_or_else(|| ApiError::not_found("Invitation not found"))?;

    if invitation.is_used() {
        return Err(ApiError::conflict("Invitation has already been used"));
    }

    sqlx::query("DELETE FROM invitations WHERE id = ? AND used_at IS NULL")
        .bind(&id)
        .execute(&state.db)
        .await?;

    audit_log(
        &state,
        actions::INVITATION_REVOKE,
        resource_types::INVITATION,
        Some(&id),
        Some(&user.id),
        user.school_id.as_deref(),
        None,
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

/// Accept an invitation as an existing delegate account
pub async fn accept_invitation(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(req): Json<AcceptInvitationRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    require_role(&user, &[Role::Delegate])?;

    let mut tx = state.db.begin().await?;
    let invitation = load_open_invitation(&mut tx, &req.token, user.email.as_deref()).await?;
    redeem_invitation(&mut tx, &invitation, &user.id).await?;
    let response = user_response(&mut *tx, user.clone()).await?;
    tx.commit().await?;

    audit_log(
        &state,
        actions::INVITATION_ACCEPT,
        resource_types::INVITATION,
        Some(&invitation.id),
        Some(&user.id),
        user.school_id.as_deref(),
        Some(serde_json::json!({ "teacher_id": invitation.teacher_id })),
    )
    .await;
    tracing::info!(
        delegate_id = %user.id,
        teacher_id = %invitation.teacher_id,
        "Delegate invitation accepted"
    );

    Ok(Json(response))
}

/// Delegates assigned to the calling teacher
pub async fn list_delegates(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    require_role(&user, &[Role::Teacher])?;

    let delegates = sqlx::query_as::<_, User>(
        r#"
        SELECT u.* FROM delegate_teachers d
        INNER JOIN users u ON u.id = d.delegate_id
        WHERE d.teacher_id = ?
        ORDER BY u.name
        "#,
    )
    .bind(&user.id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(delegates.into_iter().map(UserResponse::from).collect()))
}

/// Remove a delegate from the calling teacher's classroom
pub async fn remove_delegate(
    State(state): State<Arc<AppState>>,
    Path(delegate_id): Path<String>,
    user: User,
) -> Result<StatusCode, ApiError> {
    require_role(&user, &[Role::Teacher])?;

    let result = sqlx::query("DELETE FROM delegate_teachers WHERE delegate_id = ? AND teacher_id = ?")
        .bind(&delegate_id)
        .bind(&user.id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Delegate not found"));
    }

    audit_log(
        &state,
        actions::DELEGATE_REMOVE,
        resource_types::USER,
        Some(&delegate_id),
        Some(&user.id),
        user.school_id.as_deref(),
        None,
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}
