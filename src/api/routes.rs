//! API route definitions.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error::ApiError;
use super::state::AppState;
use crate::carbon::CarbonReport;
use crate::queue::JobRequest;
use crate::telemetry::RawTelemetry;

/// Entries returned by `GET /history` without an explicit limit.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/jobs", get(list_jobs).post(submit_job))
        .route("/jobs/{task_id}", delete(remove_job))
        .route("/cycle", post(run_cycle))
        .route("/history", get(history))
        .route("/telemetry", post(push_telemetry))
        .route("/carbon", post(push_carbon))
}

fn envelope(data: impl Serialize, mut meta: Value) -> Json<Value> {
    if let Value::Object(ref mut m) = meta {
        m.insert("timestamp".into(), json!(chrono::Utc::now().to_rfc3339()));
    }
    Json(json!({ "data": data, "meta": meta }))
}

async fn health() -> Json<Value> {
    envelope(
        json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }),
        json!({ "version": env!("CARGO_PKG_VERSION") }),
    )
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    envelope(state.engine.get_status().await, json!({}))
}

async fn list_jobs(State(state): State<AppState>) -> Json<Value> {
    let jobs = state.engine.jobs().await;
    let total = jobs.len();
    envelope(jobs, json!({ "total": total }))
}

async fn submit_job(
    State(state): State<AppState>,
    payload: Result<Json<JobRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Json(request) = payload?;
    let job = state.engine.submit_job(request).await?;
    Ok((StatusCode::CREATED, envelope(job, json!({}))))
}

async fn remove_job(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let job = state.engine.remove_job(&task_id).await?;
    Ok(envelope(job, json!({})))
}

async fn run_cycle(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let decision = state.engine.run_cycle().await?;
    Ok(envelope(decision, json!({})))
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
}

async fn history(
    State(state): State<AppState>,
    params: Result<Query<HistoryParams>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(params) = params?;
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let decisions = state.engine.get_history(Some(limit)).await;
    let total = decisions.len();
    Ok(envelope(decisions, json!({ "total": total, "limit": limit })))
}

async fn push_telemetry(
    State(state): State<AppState>,
    payload: Result<Json<RawTelemetry>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Json(raw) = payload?;
    state.telemetry_feed.push(raw).await;
    Ok((StatusCode::ACCEPTED, envelope(json!({ "accepted": true }), json!({}))))
}

async fn push_carbon(
    State(state): State<AppState>,
    payload: Result<Json<CarbonReport>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Json(report) = payload?;
    if !report.current.is_finite() || report.current < 0.0 {
        return Err(ApiError::BadRequest(
            "current must be a finite non-negative intensity".into(),
        ));
    }
    let points = report.forecast.len();
    state.carbon_feed.push(report).await;
    Ok((
        StatusCode::ACCEPTED,
        envelope(json!({ "accepted": true }), json!({ "forecast_points": points })),
    ))
}
