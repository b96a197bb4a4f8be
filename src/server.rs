//! HTTP control surface the surrounding management API (out of scope per
//! SPEC_FULL.md §1) drives: `deploy`/`start`/`stop`/`reload`/`status`/
//! `item_metrics` over the [`Engine`], per SPEC_FULL.md §4.6/§6.
//!
//! Grounded on the teacher's `server.rs`: `create_router`/`serve`/
//! `serve_with_graceful_shutdown` built on `axum` with a
//! `tokio_util::sync::CancellationToken` shutdown signal, generalized from a
//! static two-route health-check app to a stateful router carrying an
//! `Arc<Engine>`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::engine::snapshot::ProductionSnapshot;
use crate::engine::{Engine, EngineError, ItemMetrics};

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidSnapshot(_) | Self::InvalidItem(_) => StatusCode::BAD_REQUEST,
            Self::UnknownProduction(_) | Self::UnknownItem(_, _) => StatusCode::NOT_FOUND,
            Self::HostStartFailed { .. } | Self::AdapterStartFailed { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Builds the control-surface router over a shared [`Engine`].
#[must_use]
pub fn create_router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/productions/:project_id/deploy", post(deploy))
        .route("/productions/:project_id/start", post(start))
        .route("/productions/:project_id/stop", post(stop))
        .route("/productions/:project_id/reload", post(reload))
        .route("/productions/:project_id/status", get(status))
        .route("/productions/:project_id/items/:item_name/metrics", get(item_metrics))
        .with_state(engine)
}

async fn deploy(
    State(engine): State<Arc<Engine>>,
    Path(project_id): Path<String>,
    Json(snapshot): Json<ProductionSnapshot>,
) -> Result<StatusCode, EngineError> {
    engine.deploy(project_id, snapshot).await?;
    Ok(StatusCode::CREATED)
}

async fn start(
    State(engine): State<Arc<Engine>>,
    Path(project_id): Path<String>,
) -> Result<StatusCode, EngineError> {
    engine.start(&project_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn stop(
    State(engine): State<Arc<Engine>>,
    Path(project_id): Path<String>,
) -> Result<StatusCode, EngineError> {
    engine.stop(&project_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reload(
    State(engine): State<Arc<Engine>>,
    Path(project_id): Path<String>,
    Json(snapshot): Json<ProductionSnapshot>,
) -> Result<StatusCode, EngineError> {
    engine.reload(&project_id, snapshot).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn status(
    State(engine): State<Arc<Engine>>,
    Path(project_id): Path<String>,
) -> Result<Json<std::collections::HashMap<String, crate::domain::HostState>>, EngineError> {
    let status = engine.status(&project_id).await?;
    Ok(Json(status))
}

async fn item_metrics(
    State(engine): State<Arc<Engine>>,
    Path((project_id, item_name)): Path<(String, String)>,
) -> Result<Json<ItemMetrics>, EngineError> {
    let metrics = engine.item_metrics(&project_id, &item_name).await?;
    Ok(Json(metrics))
}

/// Binds `router` to `addr` and serves it, respecting cancellation for
/// graceful shutdown.
///
/// # Errors
///
/// Returns an error if the listener cannot bind or the server fails while
/// running.
pub async fn serve(
    addr: SocketAddr,
    router: Router,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
