//! HTTP endpoint of a worker node
//!
//! - `POST /tasks` - execute one [`TaskRequest`], answered with a [`TaskReply`]
//! - `GET /health` - liveness and node id
//! - `GET /metrics` - task counters of this process

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::FederationError;
use crate::metrics::{self, TaskMetricsSnapshot};
use crate::protocol::{TaskOutput, TaskReply, TaskRequest};
use crate::worker::node::WorkerNode;

type AppState = Arc<WorkerNode>;

pub fn router(node: Arc<WorkerNode>) -> Router {
    Router::new()
        .route("/tasks", post(run_task))
        .route("/health", get(health))
        .route("/metrics", get(task_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(node)
}

/// Serves `node` on `listener` until `shutdown` is cancelled
pub async fn serve(
    listener: TcpListener,
    node: Arc<WorkerNode>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!(node_id = %node.id(), %addr, "Worker listening");
    axum::serve(listener, router(node))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!(%addr, "Worker stopped");
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

/// The body is decoded here rather than by an extractor so malformed requests
/// still get a typed error reply.
async fn run_task(State(node): State<AppState>, body: String) -> (StatusCode, Json<TaskReply>) {
    let request: TaskRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Rejected malformed task request");
            let err = FederationError::bad_user_input(format!("Malformed task request: {}", e));
            return (
                StatusCode::BAD_REQUEST,
                Json(TaskReply::from(Err::<TaskOutput, _>(err))),
            );
        }
    };
    (StatusCode::OK, Json(node.handle(request).await))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    node_id: String,
}

async fn health(State(node): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        node_id: node.id().to_string(),
    })
}

async fn task_metrics() -> Json<TaskMetricsSnapshot> {
    Json(metrics::snapshot())
}
