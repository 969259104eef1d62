//! HTTP surface: report upload, analytics query and a health check.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::config::{CacheConfig, ServerConfig};
use crate::ingest::{self, IngestError};
use crate::query::{AnalyticsParams, AnalyticsQuery, AnalyticsService, QueryError};

pub type ServerState = Arc<AnalyticsService>;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct FailureResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub message: String,
    pub records_processed: usize,
    pub total_records: usize,
}

fn bad_request(error: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: error.into() })).into_response()
}

fn internal_error(error: &str, message: impl ToString) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(FailureResponse {
            error: error.to_string(),
            message: message.to_string(),
        }),
    )
        .into_response()
}

/// POST /api/analytics/upload - multipart `{file, reportDate}`
async fn upload_report(State(service): State<ServerState>, mut multipart: Multipart) -> Response {
    let mut filename: Option<String> = None;
    let mut data: Option<Vec<u8>> = None;
    let mut report_date: Option<String> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                log::warn!("Rejected upload body: {}", e);
                return (e.status(), Json(ErrorResponse { error: e.body_text() })).into_response();
            }
        };

        let field_name = field.name().unwrap_or("").to_string();
        match field_name.as_str() {
            "file" => {
                filename = field.file_name().map(|s| s.to_string());
                match field.bytes().await {
                    Ok(bytes) => data = Some(bytes.to_vec()),
                    Err(e) => {
                        log::warn!("Failed to read file data: {}", e);
                        return (e.status(), Json(ErrorResponse { error: "Failed to read file".to_string() }))
                            .into_response();
                    }
                }
            }
            "reportDate" => match field.text().await {
                Ok(text) => report_date = Some(text),
                Err(e) => {
                    log::warn!("Failed to read report date: {}", e);
                    return bad_request("Failed to read report date");
                }
            },
            _ => {}
        }
    }

    let data = match data {
        Some(d) if !d.is_empty() => d,
        _ => return bad_request("No file uploaded"),
    };
    let report_date = match report_date.as_deref().map(ingest::parse_report_date) {
        Some(Ok(date)) => date,
        Some(Err(e)) => return bad_request(e.to_string()),
        None => return bad_request("Report date is required"),
    };
    let filename = filename
        .filter(|f| !f.is_empty())
        .unwrap_or_else(|| "upload.csv".to_string());

    log::debug!("Uploading {} ({} bytes) for {}", filename, data.len(), report_date);

    let result =
        tokio::task::spawn_blocking(move || service.upload(&data, report_date, &filename)).await;

    match result {
        Ok(Ok(summary)) => Json(UploadResponse {
            message: "Report processed successfully".to_string(),
            records_processed: summary.records_processed,
            total_records: summary.total_records,
        })
        .into_response(),
        Ok(Err(IngestError::Validation(msg))) => bad_request(msg),
        Ok(Err(e)) => {
            log::warn!("Upload failed: {}", e);
            internal_error("Failed to process report", e)
        }
        Err(e) => internal_error("Failed to process report", e),
    }
}

/// GET /api/analytics?release=&artist=&from=&to=&limit=
async fn get_analytics(
    State(service): State<ServerState>,
    Query(params): Query<AnalyticsParams>,
) -> Response {
    let query = match AnalyticsQuery::try_from(params) {
        Ok(q) => q,
        Err(e) => return bad_request(e.to_string()),
    };

    match tokio::task::spawn_blocking(move || service.query(&query)).await {
        Ok(Ok(response)) => Json(response).into_response(),
        Ok(Err(QueryError::InvalidFilter(msg))) => bad_request(msg),
        Ok(Err(e)) => {
            log::warn!("Analytics query failed: {}", e);
            internal_error("Failed to fetch analytics", e)
        }
        Err(e) => internal_error("Failed to fetch analytics", e),
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Build the application router.
///
/// - POST /api/analytics/upload - Upload a report
/// - GET /api/analytics - Query aggregated analytics
/// - GET /health - Liveness check
pub fn build_router(service: ServerState, config: &ServerConfig) -> Router {
    let upload_route = Router::new()
        .route("/api/analytics/upload", post(upload_report))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes()));

    Router::new()
        .merge(upload_route)
        .route("/api/analytics", get(get_analytics))
        .route("/health", get(health))
        .with_state(service)
}

/// Periodically drop expired catalog entries so keys that stop being read
/// don't linger.
fn spawn_cache_reaper(service: ServerState, cache: &CacheConfig) -> tokio::task::JoinHandle<()> {
    let period = cache.reap_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let purged = service.cache().purge_expired();
            if purged > 0 {
                log::debug!("Cache reaper removed {} expired entries", purged);
            }
        }
    })
}

pub async fn run_server(
    service: ServerState,
    server: &ServerConfig,
    cache: &CacheConfig,
) -> anyhow::Result<()> {
    let reaper = spawn_cache_reaper(service.clone(), cache);
    let app = build_router(service, server);

    let listener = tokio::net::TcpListener::bind(&server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", server.bind))?;
    log::info!("Listening on {}", server.bind);

    let result = axum::serve(listener, app).await.context("Server error");
    reaper.abort();
    result
}
