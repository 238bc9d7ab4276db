//! Book API quota status and the cache validation trigger.

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::books_api::{quota_status, validate_cache, QuotaStatus, ValidationReport};
use crate::db::{actions, resource_types, User};
use crate::AppState;

use super::audit::audit_log;
use super::auth::require_super_admin;
use super::error::ApiError;

pub async fn get_quota(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<QuotaStatus>, ApiError> {
    require_super_admin(&user)?;
    Ok(Json(quota_status(&state.db, &state.config.book_api).await?))
}

/// Run one validation batch over unvalidated cache entries
pub async fn run_cache_validation(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<ValidationReport>, ApiError> {
    require_super_admin(&user)?;

    let report = validate_cache(&state.db, state.book_lookup.as_ref(), &state.config.book_api).await?;

    audit_log(
        &state,
        actions::CACHE_VALIDATE,
        resource_types::BOOK_CACHE,
        None,
        Some(&user.id),
        None,
        serde_json::to_value(&report).ok(),
    )
    .await;

    Ok(Json(report))
}
