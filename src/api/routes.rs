//! API route definitions.
//!
//! Every response uses the `{"data": ..., "meta": {...}}` envelope; `data` is
//! null when nothing has been produced yet.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::{routing::get, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use super::state::AppState;
use crate::detect;
use crate::storage;

const DEFAULT_REPORT_LIMIT: usize = 20;
const MAX_REPORT_LIMIT: usize = 500;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/report/latest", get(report_latest))
        .route("/reports", get(report_history))
        .route("/baseline", get(baseline))
}

fn meta() -> Value {
    json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    })
}

fn internal_error(e: anyhow::Error) -> (StatusCode, Json<Value>) {
    error!("API request failed: {:#}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "data": null, "meta": { "error": e.to_string() } })),
    )
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": meta()
    }))
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    let report = state.reports.borrow().clone();
    let baseline = state.analyzer.read().await.baseline().status();

    let data = report.map(|r| {
        json!({
            "sequence_id": r.sequence_id,
            "timestamp": r.timestamp,
            "status": r.status,
            "confidence": r.confidence,
            "summary": detect::summarize(&r.findings),
            "interpretation": r.temporal.interpretation(),
        })
    });
    Json(json!({
        "data": data,
        "meta": {
            "baseline": baseline,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }
    }))
}

async fn report_latest(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let published = state.reports.borrow().clone();
    let report = match (published, state.pool) {
        (Some(r), _) => Some((*r).clone()),
        (None, Some(pool)) => tokio::task::spawn_blocking(move || storage::latest_report(&pool))
            .await
            .map_err(|e| internal_error(e.into()))?
            .map_err(internal_error)?,
        (None, None) => None,
    };

    match report {
        Some(r) => Ok(Json(json!({ "data": r, "meta": meta() }))),
        None => Ok(Json(json!({
            "data": null,
            "meta": { "message": "no reports yet" }
        }))),
    }
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn report_history(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let Some(pool) = state.pool else {
        return Ok(Json(json!({
            "data": [],
            "meta": { "total": 0, "message": "no database attached" }
        })));
    };
    let limit = q.limit.unwrap_or(DEFAULT_REPORT_LIMIT).min(MAX_REPORT_LIMIT);
    let reports = tokio::task::spawn_blocking(move || storage::recent_reports(&pool, limit))
        .await
        .map_err(|e| internal_error(e.into()))?
        .map_err(internal_error)?;

    let rows: Vec<Value> = reports
        .iter()
        .map(|r| {
            json!({
                "id": r.id,
                "sequence_id": r.sequence_id,
                "timestamp": r.timestamp,
                "status": r.status,
                "confidence": r.confidence,
                "findings": r.findings.len(),
            })
        })
        .collect();
    Ok(Json(json!({ "data": rows, "meta": { "total": reports.len() } })))
}

async fn baseline(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.analyzer.read().await.baseline().snapshot();
    Json(json!({ "data": snapshot, "meta": meta() }))
}
