//! axum-based HTTP server for task submission and inspection.

use axum::{
    Router,
    extract::{Path, Query, State},
    http::{StatusCode, Uri},
    response::{IntoResponse, Json},
    routing::get,
};
use serde::Deserialize;
use std::net::SocketAddr;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::db::Database;
use crate::error::{ApiError, ApiResult};
use crate::types::{NewTask, Task, TaskCounts, TaskState};

/// State shared across handlers.
#[derive(Clone)]
pub struct HttpState {
    db: Database,
}

impl HttpState {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

/// Health check response.
#[derive(serde::Serialize)]
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

/// Insert a PENDING task.
async fn submit_task(
    State(state): State<HttpState>,
    Json(new_task): Json<NewTask>,
) -> ApiResult<impl IntoResponse> {
    new_task
        .validate()
        .map_err(|reason| ApiError::invalid_value("task", reason))?;
    let task = state.db.insert_task(&new_task)?;
    info!(task_id = task.id, name = %task.name, task_type = %task.task_type, "task submitted");
    Ok((StatusCode::CREATED, Json(task)))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    state: Option<String>,
    limit: Option<u32>,
}

async fn list_tasks(
    State(state): State<HttpState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Task>>> {
    let task_state = match query.state.as_deref() {
        Some(s) => s
            .parse::<TaskState>()
            .map_err(|reason| ApiError::invalid_value("state", reason))?,
        None => TaskState::Pending,
    };
    Ok(Json(state.db.list_tasks_by_state(task_state, query.limit)?))
}

async fn get_task(
    State(state): State<HttpState>,
    Path(task_id): Path<i64>,
) -> ApiResult<Json<Task>> {
    state
        .db
        .get_task(task_id)?
        .map(Json)
        .ok_or_else(|| ApiError::task_not_found(task_id))
}

async fn stats(State(state): State<HttpState>) -> ApiResult<Json<TaskCounts>> {
    Ok(Json(state.db.task_counts()?))
}

async fn unknown_path(uri: Uri) -> ApiError {
    ApiError::path_not_found(uri.path())
}

/// Build the route table. `extra` routes are merged in before the fallback.
///
/// A registered path answers a method it does not list with 405; an
/// unregistered path answers 404.
pub fn build_router(db: Database, extra: Option<Router>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/tasks", get(list_tasks).post(submit_task))
        .route("/tasks/{task_id}", get(get_task))
        .route("/stats", get(stats))
        .with_state(HttpState::new(db));

    if let Some(extra) = extra {
        router = router.merge(extra);
    }

    router
        .fallback(unknown_path)
        .layer(TraceLayer::new_for_http())
}

/// Serve `router` on `port` until `shutdown` becomes true.
pub async fn serve(
    router: Router,
    port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
            info!("HTTP server shutting down");
        })
        .await?;

    Ok(())
}
