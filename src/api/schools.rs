//! School (tenant) endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::db::{
    actions, find_school_by_id, generate_slug, insert_school, resource_types, CreateSchoolRequest,
    School, SchoolSummary, UpdateSchoolRequest, User,
};
use crate::AppState;

use super::audit::audit_log;
use super::auth::{admin_scope, require_super_admin};
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{validate_email_domain, validate_name, validate_slug};

fn validate_create_request(req: &CreateSchoolRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors.check("name", validate_name(&req.name, "School name"));
    if let Some(ref slug) = req.slug {
        errors.check("slug", validate_slug(slug));
    }
    if let Some(ref domain) = req.email_domain {
        errors.check("email_domain", validate_email_domain(domain));
    }
    errors.finish()
}

fn validate_update_request(req: &UpdateSchoolRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Some(ref name) = req.name {
        errors.check("name", validate_name(name, "School name"));
    }
    if let Some(ref slug) = req.slug {
        errors.check("slug", validate_slug(slug));
    }
    if let Some(ref domain) = req.email_domain {
        if !domain.is_empty() {
            errors.check("email_domain", validate_email_domain(domain));
        }
    }
    errors.finish()
}

/// Public school list for the signup form
pub async fn list_public_schools(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<SchoolSummary>>, ApiError> {
    let schools = sqlx::query_as::<_, SchoolSummary>("SELECT id, name, slug FROM schools ORDER BY name")
        .fetch_all(&state.db)
        .await?;
    Ok(Json(schools))
}

/// Full school records; school admins only see their own
pub async fn list_schools(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<Vec<School>>, ApiError> {
    let schools = match admin_scope(&user)? {
        None => {
            sqlx::query_as::<_, School>("SELECT * FROM schools ORDER BY name")
                .fetch_all(&state.db)
                .await?
        }
        Some(school_id) => find_school_by_id(&state.db, &school_id)
            .await?
            .into_iter()
            .collect(),
    };
    Ok(Json(schools))
}

pub async fn create_school(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(req): Json<CreateSchoolRequest>,
) -> Result<(StatusCode, Json<School>), ApiError> {
    require_super_admin(&user)?;
    validate_create_request(&req)?;

    let slug = req.slug.clone().unwrap_or_else(|| generate_slug(&req.name));
    if slug.len() < 2 {
        return Err(ApiError::validation_field(
            "slug",
            "Could not derive a slug from the name; provide one",
        ));
    }

    let school = insert_school(&state.db, &req.name, &slug, req.email_domain.as_deref())
        .await
        .map_err(|e| match ApiError::from(e) {
            err if err.status() == StatusCode::CONFLICT => {
                ApiError::conflict("A school with this slug or email domain already exists")
            }
            err => err,
        })?;

    audit_log(
        &state,
        actions::SCHOOL_CREATE,
        resource_types::SCHOOL,
        Some(&school.id),
        Some(&user.id),
        Some(&school.id),
        Some(serde_json::json!({ "name": school.name, "slug": school.slug })),
    )
    .await;
    tracing::info!(school_id = %school.id, slug = %school.slug, "Created school");

    Ok((StatusCode::CREATED, Json(school)))
}

pub async fn update_school(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    user: User,
    Json(req): Json<UpdateSchoolRequest>,
) -> Result<Json<School>, ApiError> {
    require_super_admin(&user)?;
    validate_update_request(&req)?;

    let existing = find_school_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("School not found"))?;

    let name = req.name.as_deref().map(str::trim).unwrap_or(&existing.name);
    let slug = req.slug.as_deref().unwrap_or(&existing.slug);
    // An empty string clears the domain
    let email_domain = match req.email_domain.as_deref() {
        Some("") => None,
        Some(domain) => Some(domain.to_lowercase()),
        None => existing.email_domain.clone(),
    };

    let school = sqlx::query_as::<_, School>(
        r#"
        UPDATE schools SET name = ?, slug = ?, email_domain = ?, updated_at = ?
        WHERE id = ?
        RETURNING *
        "#,
    )
    .bind(name)
    .bind(slug)
    .bind(&email_domain)
    .bind(crate::db::now())
    .bind(&id)
    .fetch_one(&state.db)
    .await?;

    audit_log(
        &state,
        actions::SCHOOL_UPDATE,
        resource_types::SCHOOL,
        Some(&school.id),
        Some(&user.id),
        Some(&school.id),
        None,
    )
    .await;

    Ok(Json(school))
}

pub async fn delete_school(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    user: User,
) -> Result<StatusCode, ApiError> {
    require_super_admin(&user)?;

    let result = sqlx::query("DELETE FROM schools WHERE id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("School not found"));
    }

    audit_log(
        &state,
        actions::SCHOOL_DELETE,
        resource_types::SCHOOL,
        Some(&id),
        Some(&user.id),
        None,
        None,
    )
    .await;
    tracing::info!(school_id = %id, "Deleted school");

    Ok(StatusCode::NO_CONTENT)
}
