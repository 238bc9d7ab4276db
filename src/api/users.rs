//! Administrative user management, scoped to the admin's school.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::db::{
    actions, find_school_by_id, find_user_by_id, generate_slug, insert_user, resource_types,
    unique_username, user_response, CreateUserRequest, NewUser, Role, UpdateUserRequest, User,
    UserQuery, UserResponse,
};
use crate::AppState;

use super::audit::audit_log;
use super::auth::{admin_scope, hash_password};
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{validate_email, validate_name, validate_password, validate_username};

/// Load a user the caller may manage. School admins may not touch other
/// schools or other admins.
async fn load_managed_user(state: &AppState, actor: &User, id: &str) -> Result<User, ApiError> {
    let scope = admin_scope(actor)?;
    let target = find_user_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if let Some(school_id) = scope {
        if target.school_id.as_deref() != Some(school_id.as_str()) {
            return Err(ApiError::not_found("User not found"));
        }
        if target.role_enum().is_admin() {
            return Err(ApiError::forbidden("School admins cannot manage admin accounts"));
        }
    }
    Ok(target)
}

fn parse_role(role: &str) -> Result<Role, ApiError> {
    role.parse::<Role>()
        .map_err(|e| ApiError::validation_field("role", e))
}

pub async fn list_users(
    State(state): State<Arc<AppState>>,
    user: User,
    Query(mut query): Query<UserQuery>,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    if let Some(school_id) = admin_scope(&user)? {
        query.school_id = Some(school_id);
    }
    if let Some(ref role) = query.role {
        parse_role(role)?;
    }

    let users = sqlx::query_as::<_, User>(
        r#"
        SELECT * FROM users
        WHERE (? IS NULL OR role = ?)
          AND (? IS NULL OR school_id = ?)
          AND (? IS NULL OR placeholder = ?)
        ORDER BY name
        "#,
    )
    .bind(&query.role)
    .bind(&query.role)
    .bind(&query.school_id)
    .bind(&query.school_id)
    .bind(query.placeholder)
    .bind(query.placeholder)
    .fetch_all(&state.db)
    .await?;

    let mut responses = Vec::with_capacity(users.len());
    for u in users {
        responses.push(user_response(&state.db, u).await?);
    }
    Ok(Json(responses))
}

/// Create an account directly. Teachers without an email become placeholders
/// that the real teacher can later claim.
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let scope = admin_scope(&user)?;
    let role = parse_role(&req.role)?;
    if !user.role_enum().can_assign(role) {
        return Err(ApiError::forbidden("You cannot create accounts with this role"));
    }

    let mut errors = ValidationErrorBuilder::new();
    errors.check("name", validate_name(&req.name, "Name"));
    if let Some(ref email) = req.email {
        errors.check("email", validate_email(email));
    } else if role != Role::Teacher {
        errors.add("email", "Email is required except for placeholder teachers");
    }
    match req.password {
        Some(_) if req.email.is_none() => {
            errors.add("password", "Placeholder teachers cannot have a password");
        }
        Some(ref password) => {
            errors.check("password", validate_password(password));
        }
        None => {}
    }
    if let Some(ref username) = req.username {
        errors.check("username", validate_username(username));
    }
    errors.finish()?;

    let school_id = match scope {
        Some(own) => {
            if req.school_id.as_deref().is_some_and(|s| s != own) {
                return Err(ApiError::forbidden("You can only create users in your school"));
            }
            Some(own)
        }
        None => req.school_id.clone(),
    };
    if let Some(ref id) = school_id {
        if find_school_by_id(&state.db, id).await?.is_none() {
            return Err(ApiError::validation_field("school_id", "Unknown school"));
        }
    }
    if role == Role::SchoolAdmin && school_id.is_none() {
        return Err(ApiError::validation_field("school_id", "School admins need a school"));
    }

    let password_hash = match req.password.as_deref() {
        Some(p) => Some(
            hash_password(p).map_err(|e| ApiError::internal(format!("Failed to hash password: {}", e)))?,
        ),
        None => None,
    };
    let placeholder = req.email.is_none();

    let mut tx = state.db.begin().await?;
    let username = match (&req.username, &school_id) {
        (Some(username), _) => Some(username.clone()),
        (None, Some(school)) if placeholder => {
            let base = generate_slug(&req.name);
            if base.is_empty() {
                return Err(ApiError::validation_field("name", "Name has no usable characters"));
            }
            Some(unique_username(&mut tx, school, &base).await?)
        }
        _ => None,
    };
    if placeholder && username.is_none() {
        return Err(ApiError::validation_field(
            "school_id",
            "Placeholder teachers need a school",
        ));
    }

    let created = insert_user(
        &mut *tx,
        &NewUser {
            email: req.email.clone(),
            username,
            name: req.name.trim().to_string(),
            role,
            school_id,
            password_hash,
            verified: true,
            placeholder,
        },
    )
    .await?;
    tx.commit().await?;

    audit_log(
        &state,
        actions::USER_CREATE,
        resource_types::USER,
        Some(&created.id),
        Some(&user.id),
        created.school_id.as_deref(),
        Some(serde_json::json!({ "role": created.role, "placeholder": created.placeholder })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(UserResponse::from(created))))
}

/// Update role, school, verification or email of an account
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    user: User,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let target = load_managed_user(&state, &user, &id).await?;

    let mut errors = ValidationErrorBuilder::new();
    if let Some(ref name) = req.name {
        errors.check("name", validate_name(name, "Name"));
    }
    if let Some(ref email) = req.email {
        errors.check("email", validate_email(email));
    }
    errors.finish()?;

    let role = match req.role.as_deref() {
        Some(r) => {
            let role = parse_role(r)?;
            if !user.role_enum().can_assign(role) {
                return Err(ApiError::forbidden("You cannot assign this role"));
            }
            role
        }
        None => target.role_enum(),
    };

    let school_id = match req.school_id.as_deref() {
        Some(new_school) if target.school_id.as_deref() != Some(new_school) => {
            if !user.is_super_admin() {
                return Err(ApiError::forbidden("Only super admins can move users between schools"));
            }
            if find_school_by_id(&state.db, new_school).await?.is_none() {
                return Err(ApiError::validation_field("school_id", "Unknown school"));
            }
            Some(new_school.to_string())
        }
        _ => target.school_id.clone(),
    };
    if role == Role::SchoolAdmin && school_id.is_none() {
        return Err(ApiError::validation_field("school_id", "School admins need a school"));
    }

    let email = match req.email.as_deref() {
        Some(email) => Some(email.trim().to_lowercase()),
        None => target.email.clone(),
    };

    let updated = sqlx::query_as::<_, User>(
        r#"
        UPDATE users
        SET name = ?, role = ?, school_id = ?, verified = ?, email = ?, updated_at = ?
        WHERE id = ?
        RETURNING *
        "#,
    )
    .bind(req.name.as_deref().map(str::trim).unwrap_or(&target.name))
    .bind(role.as_str())
    .bind(&school_id)
    .bind(req.verified.unwrap_or(target.verified))
    .bind(&email)
    .bind(crate::db::now())
    .bind(&id)
    .fetch_one(&state.db)
    .await?;

    audit_log(
        &state,
        actions::USER_UPDATE,
        resource_types::USER,
        Some(&updated.id),
        Some(&user.id),
        updated.school_id.as_deref(),
        Some(serde_json::json!({
            "role": updated.role,
            "verified": updated.verified,
            "email_changed": req.email.is_some(),
        })),
    )
    .await;

    Ok(Json(user_response(&state.db, updated).await?))
}

pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    user: User,
) -> Result<StatusCode, ApiError> {
    if user.id == id {
        return Err(ApiError::bad_request("You cannot delete your own account"));
    }
    let target = load_managed_user(&state, &user, &id).await?;

    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(&target.id)
        .execute(&state.db)
        .await?;

    audit_log(
        &state,
        actions::USER_DELETE,
        resource_types::USER,
        Some(&target.id),
        Some(&user.id),
        target.school_id.as_deref(),
        None,
    )
    .await;
    tracing::info!(user_id = %target.id, "Deleted user");

    Ok(StatusCode::NO_CONTENT)
}
