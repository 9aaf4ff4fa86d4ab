use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use webloom_core::error::WebloomError;
use webloom_core::records::{
    NewTask, NewWorkflow, TaskQuery, TaskRecord, TaskUpdate, WorkflowRecord, WorkflowUpdate,
};
use webloom_engine::validate_trigger;

use crate::connection;
use crate::middleware::Authenticated;
use crate::state::AppState;

/// JSON error body with a status derived from the engine error.
pub struct ApiError(StatusCode, String);

impl From<WebloomError> for ApiError {
    fn from(e: WebloomError) -> Self {
        let status = match &e {
            WebloomError::NotFound { .. } | WebloomError::RunNotFound(_) => StatusCode::NOT_FOUND,
            WebloomError::Validation(_)
            | WebloomError::CycleDetected { .. }
            | WebloomError::Config(_)
            | WebloomError::Protocol(_) => StatusCode::BAD_REQUEST,
            WebloomError::Gateway(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn not_found(kind: &'static str, id: String) -> ApiError {
    WebloomError::NotFound { kind, id }.into()
}

// GET /api/health - no auth required
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// GET /api/status
pub async fn status(_: Authenticated, State(state): State<Arc<AppState>>) -> Json<Value> {
    let pool = state.engine.pool();
    Json(json!({
        "connections": state.router.connection_count(),
        "bindings": state.router.bindings(),
        "active_runs": state.engine.runs().active(),
        "sessions": {
            "capacity": pool.capacity(),
            "available": pool.available(),
        },
    }))
}

#[derive(Deserialize)]
pub struct Page {
    #[serde(default)]
    pub skip: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

// ── Workflows ───────────────────────────────────────────────────

pub async fn list_workflows(
    _: Authenticated,
    State(state): State<Arc<AppState>>,
    Query(page): Query<Page>,
) -> ApiResult<Vec<WorkflowRecord>> {
    Ok(Json(state.workflows.list_workflows(page.skip, page.limit).await?))
}

pub async fn create_workflow(
    _: Authenticated,
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewWorkflow>,
) -> Result<(StatusCode, Json<WorkflowRecord>), ApiError> {
    if body.name.trim().is_empty() {
        return Err(ApiError(StatusCode::BAD_REQUEST, "name is required".into()));
    }
    let record = state.workflows.create_workflow(body).await?;
    info!(workflow_id = %record.id, "Workflow created");
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn get_workflow(
    _: Authenticated,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<WorkflowRecord> {
    let found = state.workflows.get_workflow(&id).await?;
    found.map(Json).ok_or_else(|| not_found("workflow", id))
}

pub async fn update_workflow(
    _: Authenticated,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<WorkflowUpdate>,
) -> ApiResult<WorkflowRecord> {
    let found = state.workflows.update_workflow(&id, body).await?;
    found.map(Json).ok_or_else(|| not_found("workflow", id))
}

pub async fn delete_workflow(
    _: Authenticated,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.workflows.delete_workflow(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("workflow", id))
    }
}

// ── Tasks ───────────────────────────────────────────────────────

pub async fn list_tasks(
    _: Authenticated,
    State(state): State<Arc<AppState>>,
    Query(query): Query<TaskQuery>,
) -> ApiResult<Vec<TaskRecord>> {
    Ok(Json(state.tasks.list_tasks(query).await?))
}

pub async fn create_task(
    _: Authenticated,
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewTask>,
) -> Result<(StatusCode, Json<TaskRecord>), ApiError> {
    validate_trigger(&body.trigger)?;
    if state.workflows.get_workflow(&body.workflow_id).await?.is_none() {
        return Err(not_found("workflow", body.workflow_id));
    }
    let task = state.tasks.create_task(body).await?;
    info!(task_id = %task.id, workflow_id = %task.workflow_id, "Task created");
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn get_task(
    _: Authenticated,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<TaskRecord> {
    let found = state.tasks.get_task(&id).await?;
    found.map(Json).ok_or_else(|| not_found("task", id))
}

pub async fn update_task(
    _: Authenticated,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<TaskUpdate>,
) -> ApiResult<TaskRecord> {
    if let Some(trigger) = &body.trigger {
        validate_trigger(trigger)?;
    }
    let found = state.tasks.update_task(&id, body).await?;
    found.map(Json).ok_or_else(|| not_found("task", id))
}

pub async fn delete_task(
    _: Authenticated,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.scheduler.stop_task(&id);
    if state.tasks.delete_task(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("task", id))
    }
}

// POST /api/v1/tasks/{id}/execute
pub async fn execute_task(
    _: Authenticated,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    let execution_id = state.scheduler.execute_task(&id).await?;
    Ok(Json(json!({
        "task_id": id,
        "execution_id": execution_id,
        "status": "executing",
    })))
}

// POST /api/v1/tasks/{id}/stop
pub async fn stop_task(
    _: Authenticated,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    let execution_id = state.scheduler.active_run(&id);
    let stopped = state.scheduler.stop_task(&id);
    Ok(Json(json!({
        "task_id": id,
        "execution_id": execution_id,
        "stopped": stopped,
    })))
}

// GET /ws - WebSocket upgrade, requires auth
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    _: Authenticated,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(socket: WebSocket, state: Arc<AppState>) {
    debug!("WebSocket client connected");
    connection::handle_connection(socket, state.router.clone()).await;
    debug!("WebSocket client disconnected");
}
