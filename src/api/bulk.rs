//! Bulk CSV import and export endpoints.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::db::{actions, find_school_by_id, resource_types, User};
use crate::import::{export_csv, run_book_import, run_staff_import, ImportOutcome, ImportReport, ImportScope};
use crate::AppState;

use super::audit::audit_log;
use super::auth::{admin_scope, require_school_admin};
use super::error::ApiError;
use super::metrics::record_import_rows;

/// 201 when every row succeeded, 207 on partial success, 400 when all failed
fn report_status(report: &ImportReport) -> StatusCode {
    match report.outcome() {
        ImportOutcome::Complete => StatusCode::CREATED,
        ImportOutcome::Partial => StatusCode::MULTI_STATUS,
        ImportOutcome::Failed => StatusCode::BAD_REQUEST,
    }
}

fn import_details(report: &ImportReport) -> serde_json::Value {
    serde_json::json!({
        "rows": report.rows,
        "created_books": report.created_books,
        "created_schools": report.created_schools,
        "created_teachers": report.created_teachers,
        "errors": report.errors.len(),
    })
}

/// Import classroom books from a CSV body
pub async fn import_books(
    State(state): State<Arc<AppState>>,
    user: User,
    body: String,
) -> Result<(StatusCode, Json<ImportReport>), ApiError> {
    let scope = match admin_scope(&user)? {
        None => ImportScope::AnySchool,
        Some(school_id) => ImportScope::School(school_id),
    };

    let report = run_book_import(&state.db, &body, &scope, Some(&user.id)).await?;
    record_import_rows(report.succeeded() as u64, report.errors.len() as u64);

    let school_id = match &scope {
        ImportScope::School(id) => Some(id.as_str()),
        ImportScope::AnySchool => None,
    };
    audit_log(
        &state,
        actions::IMPORT_BOOKS,
        resource_types::IMPORT,
        None,
        Some(&user.id),
        school_id,
        Some(import_details(&report)),
    )
    .await;

    Ok((report_status(&report), Json(report)))
}

/// Import teacher accounts into one school from a `name,email` CSV body
pub async fn import_staff(
    State(state): State<Arc<AppState>>,
    Path(school_id): Path<String>,
    user: User,
    body: String,
) -> Result<(StatusCode, Json<ImportReport>), ApiError> {
    require_school_admin(&user, &school_id)?;
    let school = find_school_by_id(&state.db, &school_id)
        .await?
        .ok_or_else(|| ApiError::not_found("School not found"))?;

    let report = run_staff_import(&state.db, &body, &school).await?;
    record_import_rows(report.succeeded() as u64, report.errors.len() as u64);

    audit_log(
        &state,
        actions::IMPORT_STAFF,
        resource_types::IMPORT,
        None,
        Some(&user.id),
        Some(&school.id),
        Some(import_details(&report)),
    )
    .await;

    Ok((report_status(&report), Json(report)))
}

#[derive(Debug, Deserialize, Default)]
pub struct ExportQuery {
    pub school_id: Option<String>,
}

/// Download every book in scope as CSV in the import format
pub async fn export_books(
    State(state): State<Arc<AppState>>,
    user: User,
    Query(query): Query<ExportQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let school_id = admin_scope(&user)?.or(query.school_id);
    let csv = export_csv(&state.db, school_id.as_deref()).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"bookworm-books.csv\"",
            ),
        ],
        csv,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::RowError;

    fn report(rows: usize, failed: usize) -> ImportReport {
        ImportReport {
            rows,
            created_books: rows - failed,
            errors: (0..failed)
                .map(|i| RowError {
                    line: i + 2,
                    message: "bad row".to_string(),
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_report_status() {
        assert_eq!(report_status(&report(3, 0)), StatusCode::CREATED);
        assert_eq!(report_status(&report(3, 1)), StatusCode::MULTI_STATUS);
        assert_eq!(report_status(&report(3, 3)), StatusCode::BAD_REQUEST);
        assert_eq!(report_status(&report(0, 0)), StatusCode::CREATED);
    }
}
