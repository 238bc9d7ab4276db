//! Audit log API endpoints and helpers.

use axum::{
    extract::{Query, State},
    Json,
};
use std::sync::Arc;

use crate::db::{list_audit_logs, log_audit, AuditLogListResponse, AuditLogQuery, User};
use crate::AppState;

use super::auth::admin_scope;
use super::error::ApiError;

/// Record an audit event, logging instead of failing when the write errors.
pub async fn audit_log(
    state: &AppState,
    action: &str,
    resource_type: &str,
    resource_id: Option<&str>,
    user_id: Option<&str>,
    school_id: Option<&str>,
    details: Option<serde_json::Value>,
) {
    if let Err(e) = log_audit(
        &state.db,
        action,
        resource_type,
        resource_id,
        user_id,
        school_id,
        details,
    )
    .await
    {
        tracing::warn!(
            action = action,
            resource_type = resource_type,
            error = %e,
            "Failed to create audit log entry"
        );
    }
}

/// List audit logs with filtering and pagination
///
/// School admins only see entries for their own school; the `school_id`
/// filter is forced to it.
pub async fn list_logs(
    State(state): State<Arc<AppState>>,
    user: User,
    Query(mut query): Query<AuditLogQuery>,
) -> Result<Json<AuditLogListResponse>, ApiError> {
    if let Some(school_id) = admin_scope(&user)? {
        query.school_id = Some(school_id);
    }

    let result = list_audit_logs(&state.db, &query).await?;
    Ok(Json(result))
}
