//! HTTP surface: submit and read endpoints, delegating to
//! [`taskgraph_core::submit`] and [`taskgraph_db::queries::tasks`].
//!
//! A thin wrapper over the kernel -- request validation and status-code
//! mapping live here; every invariant-bearing decision happens inside the
//! store transactions the kernel already guards.

use std::str::FromStr;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;

use taskgraph_core::submit::{self, SubmitOutcome};
use taskgraph_core::KernelError;
use taskgraph_db::models::{Task, TaskStatus};
use taskgraph_db::queries::tasks;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub default_max_attempts: i64,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/tasks", post(submit_task).get(list_tasks))
        .route("/tasks/batch", post(submit_batch))
        .route("/tasks/{id}", get(get_task))
        .route("/tasks/{id}/dependencies", get(get_dependencies))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request/response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.into() }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

impl From<KernelError> for AppError {
    fn from(err: KernelError) -> Self {
        let status = match &err {
            KernelError::DuplicateId(_)
            | KernelError::UnknownDependency(_, _)
            | KernelError::CycleInBatch(_)
            | KernelError::StateConflict { .. } => StatusCode::CONFLICT,
            KernelError::NotFound(_) => StatusCode::NOT_FOUND,
            KernelError::Validation(_) => StatusCode::BAD_REQUEST,
            KernelError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, message: err.to_string() }
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn healthz() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

async fn submit_task(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<axum::response::Response, AppError> {
    let outcome =
        submit::submit_json(&state.pool, now_millis(), body, state.default_max_attempts).await?;
    let SubmitOutcome::Single(task) = outcome else {
        return Err(AppError::bad_request("expected a single task spec, not a batch"));
    };
    Ok((StatusCode::CREATED, Json(task)).into_response())
}

async fn submit_batch(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<axum::response::Response, AppError> {
    let outcome =
        submit::submit_json(&state.pool, now_millis(), body, state.default_max_attempts).await?;
    let SubmitOutcome::Batch(created) = outcome else {
        return Err(AppError::bad_request("expected a batch spec (a \"tasks\" array)"));
    };
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Task>, AppError> {
    let task = tasks::get_task(&state.pool, &id)
        .await
        .map_err(KernelError::from)?
        .ok_or_else(|| KernelError::NotFound(id))?;
    Ok(Json(task))
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Task>>, AppError> {
    let status = match query.status {
        Some(raw) => {
            let parsed = TaskStatus::from_str(&raw)
                .map_err(|_| AppError::bad_request(format!("invalid status filter: {raw:?}")))?;
            Some(parsed)
        }
        None => None,
    };
    let rows = tasks::list_tasks(&state.pool, status).await.map_err(KernelError::from)?;
    Ok(Json(rows))
}

async fn get_dependencies(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<String>>, AppError> {
    tasks::get_task(&state.pool, &id)
        .await
        .map_err(KernelError::from)?
        .ok_or_else(|| KernelError::NotFound(id.clone()))?;
    let deps = tasks::get_dependencies(&state.pool, &id).await.map_err(KernelError::from)?;
    Ok(Json(deps))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
