//! Prometheus metrics endpoint and HTTP request tracking middleware.

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Instant;

use crate::AppState;

pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
pub const IMPORT_ROWS_TOTAL: &str = "import_rows_total";
pub const CHALLENGES_TOTAL: &str = "book_challenges_total";
pub const BOOK_API_CALLS_TOTAL: &str = "book_api_calls_total";
pub const BOOKS_TOTAL: &str = "classroom_books_total";
pub const SCHOOLS_TOTAL: &str = "schools_total";
pub const BOOK_API_QUOTA_REMAINING: &str = "book_api_quota_remaining";

/// Install the Prometheus recorder. Call once at startup.
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    describe_counter!(HTTP_REQUESTS_TOTAL, "Total number of HTTP requests received");
    describe_histogram!(HTTP_REQUEST_DURATION_SECONDS, "HTTP request duration in seconds");
    describe_counter!(IMPORT_ROWS_TOTAL, "CSV import rows processed by outcome (ok/error)");
    describe_counter!(CHALLENGES_TOTAL, "Book challenge events by status");
    describe_counter!(BOOK_API_CALLS_TOTAL, "External book API calls by outcome");
    describe_gauge!(BOOKS_TOTAL, "Classroom book records across all schools");
    describe_gauge!(SCHOOLS_TOTAL, "Registered schools");
    describe_gauge!(BOOK_API_QUOTA_REMAINING, "External book API calls left today");

    Ok(handle)
}

/// GET /metrics - Prometheus text format, unauthenticated
pub async fn metrics_endpoint(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    update_gauge_metrics(&state).await;

    match state.metrics_handle.as_ref() {
        Some(h) => (StatusCode::OK, h.render()),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Metrics not initialized".to_string(),
        ),
    }
}

async fn update_gauge_metrics(state: &AppState) {
    if let Ok(count) = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM classroom_books")
        .fetch_one(&state.db)
        .await
    {
        gauge!(BOOKS_TOTAL).set(count as f64);
    }

    if let Ok(count) = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM schools")
        .fetch_one(&state.db)
        .await
    {
        gauge!(SCHOOLS_TOTAL).set(count as f64);
    }

    if let Ok(status) = crate::books_api::quota_status(&state.db, &state.config.book_api).await {
        gauge!(BOOK_API_QUOTA_REMAINING).set(status.remaining as f64);
    }
}

/// Records request count and duration keyed by the matched route template
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();

    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|mp| mp.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let method = request.method().to_string();

    let response = next.run(request).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

pub fn record_import_rows(ok: u64, failed: u64) {
    counter!(IMPORT_ROWS_TOTAL, "outcome" => "ok").increment(ok);
    counter!(IMPORT_ROWS_TOTAL, "outcome" => "error").increment(failed);
}

pub fn record_challenge(status: &str) {
    counter!(CHALLENGES_TOTAL, "status" => status.to_string()).increment(1);
}

pub fn record_book_api_call(outcome: &'static str) {
    counter!(BOOK_API_CALLS_TOTAL, "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        for name in [HTTP_REQUESTS_TOTAL, IMPORT_ROWS_TOTAL, CHALLENGES_TOTAL, BOOK_API_CALLS_TOTAL] {
            assert!(name.ends_with("_total"), "{} should end in _total", name);
        }
        assert!(HTTP_REQUEST_DURATION_SECONDS.ends_with("_seconds"));
    }
}
