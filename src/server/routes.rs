//! Route table and handlers.
//!
//! Mutating task routes write through the database and then emit webhook
//! events. Event fan-out never fails the request that caused it.

use super::auth::require_api_key;
use crate::db::Database;
use crate::error::{FluxError, FluxResult};
use crate::types::{
    BlockedTask, CommentAuthor, DeliveryOutcome, Epic, NewTask, NewWebhook, Project, Task,
    TaskPatch, TaskStatus, Webhook, WebhookDelivery, WebhookEventType, WebhookPatch,
};
use crate::webhooks::WebhookDispatcher;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// State shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub dispatcher: WebhookDispatcher,
    pub api_key: Option<Arc<str>>,
}

impl AppState {
    pub fn new(db: Arc<Database>, dispatcher: WebhookDispatcher, api_key: Option<String>) -> Self {
        Self {
            db,
            dispatcher,
            api_key: api_key.map(Arc::from),
        }
    }

    fn emit(&self, event: WebhookEventType, project_id: &str, data: Value) {
        if let Err(e) = self.dispatcher.emit(event, Some(project_id), data) {
            warn!(event = %event, error = %e, "Failed to emit webhook event");
        }
    }
}

/// Error response carrying a `FluxError` body.
#[derive(Debug)]
pub struct ApiError(pub FluxError);

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError(FluxError::from(err))
    }
}

impl From<FluxError> for ApiError {
    fn from(err: FluxError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.code.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!(code = ?self.0.code, error = %self.0.message, "Request failed");
        }
        (status, Json(self.0)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Deserialize)]
struct ProjectQuery {
    project_id: Option<String>,
}

impl ProjectQuery {
    fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref().filter(|p| !p.is_empty())
    }
}

async fn ready_tasks(
    State(state): State<AppState>,
    Query(query): Query<ProjectQuery>,
) -> ApiResult<Json<Vec<Task>>> {
    Ok(Json(state.db.ready_tasks(query.project_id())?))
}

async fn blocked_tasks(
    State(state): State<AppState>,
    Query(query): Query<ProjectQuery>,
) -> ApiResult<Json<Vec<BlockedTask>>> {
    Ok(Json(state.db.blocked_tasks(query.project_id())?))
}

#[derive(Debug, Deserialize)]
struct CreateProject {
    name: String,
    #[serde(default)]
    description: Option<String>,
}

async fn list_projects(State(state): State<AppState>) -> ApiResult<Json<Vec<Project>>> {
    Ok(Json(state.db.list_projects()?))
}

async fn create_project(
    State(state): State<AppState>,
    Json(body): Json<CreateProject>,
) -> ApiResult<(StatusCode, Json<Project>)> {
    let project = state
        .db
        .create_project(&body.name, body.description.as_deref())?;
    state.emit(
        WebhookEventType::ProjectCreated,
        &project.id,
        json!({ "project": project }),
    );
    Ok((StatusCode::CREATED, Json(project)))
}

#[derive(Debug, Deserialize)]
struct CreateEpic {
    title: String,
}

async fn list_epics(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Vec<Epic>>> {
    if state.db.get_project(&project_id)?.is_none() {
        return Err(FluxError::project_not_found(&project_id).into());
    }
    Ok(Json(state.db.list_epics(&project_id)?))
}

async fn create_epic(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(body): Json<CreateEpic>,
) -> ApiResult<(StatusCode, Json<Epic>)> {
    let epic = state.db.create_epic(&project_id, &body.title)?;
    state.emit(
        WebhookEventType::EpicCreated,
        &epic.project_id,
        json!({ "epic": epic }),
    );
    Ok((StatusCode::CREATED, Json(epic)))
}

async fn list_project_tasks(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Vec<Task>>> {
    if state.db.get_project(&project_id)?.is_none() {
        return Err(FluxError::project_not_found(&project_id).into());
    }
    Ok(Json(state.db.list_tasks(Some(&project_id))?))
}

async fn create_task(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(body): Json<NewTask>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    let task = state.db.create_task(&project_id, body)?;
    state.emit(
        WebhookEventType::TaskCreated,
        &task.project_id,
        json!({ "task": task }),
    );
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<Task>> {
    let task = state
        .db
        .get_task(&task_id)?
        .ok_or_else(|| FluxError::task_not_found(&task_id))?;
    Ok(Json(task))
}

async fn update_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Json(patch): Json<TaskPatch>,
) -> ApiResult<Json<Task>> {
    let (before, task) = state.db.update_task(&task_id, &patch)?;

    state.emit(
        WebhookEventType::TaskUpdated,
        &task.project_id,
        json!({ "task": task, "changes": patch }),
    );
    if before.status != task.status {
        state.emit(
            WebhookEventType::TaskStatusChanged,
            &task.project_id,
            json!({ "task": task, "previous_status": before.status }),
        );
    }
    if !before.archived && task.archived {
        state.emit(
            WebhookEventType::TaskArchived,
            &task.project_id,
            json!({ "task": task }),
        );
    }

    Ok(Json(task))
}

async fn delete_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<StatusCode> {
    let task = state.db.delete_task(&task_id)?;
    state.emit(
        WebhookEventType::TaskDeleted,
        &task.project_id,
        json!({ "task": task }),
    );
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct NewComment {
    body: String,
    #[serde(default = "default_author")]
    author: CommentAuthor,
}

fn default_author() -> CommentAuthor {
    CommentAuthor::User
}

async fn add_comment(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Json(body): Json<NewComment>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    let task = state.db.add_comment(&task_id, &body.body, body.author)?;
    state.emit(
        WebhookEventType::TaskUpdated,
        &task.project_id,
        json!({ "task": task }),
    );
    Ok((StatusCode::CREATED, Json(task)))
}

async fn list_webhooks(State(state): State<AppState>) -> ApiResult<Json<Vec<Webhook>>> {
    Ok(Json(state.db.list_webhooks()?))
}

async fn create_webhook(
    State(state): State<AppState>,
    Json(body): Json<NewWebhook>,
) -> ApiResult<(StatusCode, Json<Webhook>)> {
    let webhook = state.db.create_webhook(body)?;
    info!(webhook_id = %webhook.id, url = %webhook.url, "Webhook registered");
    Ok((StatusCode::CREATED, Json(webhook)))
}

fn find_webhook(state: &AppState, webhook_id: &str) -> FluxResult<Webhook> {
    state
        .db
        .get_webhook(webhook_id)?
        .ok_or_else(|| FluxError::webhook_not_found(webhook_id))
}

async fn get_webhook(
    State(state): State<AppState>,
    Path(webhook_id): Path<String>,
) -> ApiResult<Json<Webhook>> {
    Ok(Json(find_webhook(&state, &webhook_id)?))
}

async fn update_webhook(
    State(state): State<AppState>,
    Path(webhook_id): Path<String>,
    Json(patch): Json<WebhookPatch>,
) -> ApiResult<Json<Webhook>> {
    Ok(Json(state.db.update_webhook(&webhook_id, &patch)?))
}

async fn delete_webhook(
    State(state): State<AppState>,
    Path(webhook_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.db.delete_webhook(&webhook_id)?;
    info!(webhook_id = %webhook_id, "Webhook deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn test_webhook(
    State(state): State<AppState>,
    Path(webhook_id): Path<String>,
) -> ApiResult<Json<DeliveryOutcome>> {
    Ok(Json(state.dispatcher.test_webhook(&webhook_id).await?))
}

#[derive(Debug, Deserialize)]
struct DeliveryQuery {
    webhook_id: Option<String>,
    limit: Option<usize>,
}

async fn webhook_deliveries(
    State(state): State<AppState>,
    Path(webhook_id): Path<String>,
    Query(query): Query<DeliveryQuery>,
) -> ApiResult<Json<Vec<WebhookDelivery>>> {
    find_webhook(&state, &webhook_id)?;
    let deliveries = state
        .dispatcher
        .get_recent_deliveries(Some(&webhook_id), query.limit)?;
    Ok(Json(deliveries))
}

async fn recent_deliveries(
    State(state): State<AppState>,
    Query(query): Query<DeliveryQuery>,
) -> ApiResult<Json<Vec<WebhookDelivery>>> {
    let deliveries = state
        .dispatcher
        .get_recent_deliveries(query.webhook_id.as_deref(), query.limit)?;
    Ok(Json(deliveries))
}

async fn task_statuses() -> Json<Vec<&'static str>> {
    Json(
        [
            TaskStatus::Planning,
            TaskStatus::Todo,
            TaskStatus::InProgress,
            TaskStatus::Done,
        ]
        .iter()
        .map(TaskStatus::as_str)
        .collect(),
    )
}

async fn event_types() -> Json<Vec<&'static str>> {
    Json(
        WebhookEventType::ALL
            .iter()
            .map(WebhookEventType::as_str)
            .collect(),
    )
}

/// Build the API router.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/statuses", get(task_statuses))
        .route("/api/webhooks/events", get(event_types))
        .route("/api/tasks/ready", get(ready_tasks))
        .route("/api/tasks/blocked", get(blocked_tasks))
        .route("/api/projects", get(list_projects).post(create_project))
        .route(
            "/api/projects/{project_id}/epics",
            get(list_epics).post(create_epic),
        )
        .route(
            "/api/projects/{project_id}/tasks",
            get(list_project_tasks).post(create_task),
        )
        .route(
            "/api/tasks/{task_id}",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .route("/api/tasks/{task_id}/comments", post(add_comment))
        .route("/api/webhooks", get(list_webhooks).post(create_webhook))
        .route(
            "/api/webhooks/{webhook_id}",
            get(get_webhook).patch(update_webhook).delete(delete_webhook),
        )
        .route("/api/webhooks/{webhook_id}/test", post(test_webhook))
        .route(
            "/api/webhooks/{webhook_id}/deliveries",
            get(webhook_deliveries),
        )
        .route("/api/deliveries", get(recent_deliveries))
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server on the given address.
///
/// Returns a oneshot sender that can be used to signal shutdown,
/// and the actual address the server is bound to.
pub async fn start_server(
    state: AppState,
    addr: SocketAddr,
) -> anyhow::Result<(oneshot::Sender<()>, SocketAddr)> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    info!("API server listening on http://{}", bound_addr);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                info!("API server shutting down");
            })
            .await
        {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok((shutdown_tx, bound_addr))
}
