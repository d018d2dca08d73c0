/*
* Container VM Manager API Routes
* -------------------------------
*
* Two operations, both backed by the orchestrator:
*
* POST   /api/v1/containers              - Creates the VM for a new container, returns its id
* POST   /api/v1/containers/{id}/start   - Powers the container VM on
*
* Every request gets a deadline (operations.timeout_secs). The pipeline runs
* on its own task; if the client goes away the handler future is dropped,
* the cancel guard fires and the pipeline unwinds what it already allocated
* instead of being torn down halfway.
*/

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{Request, StatusCode},
    routing::post,
    Json, Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::api::error::ErrorResponse;
use crate::core::{Cancellation, ContainerCreated, CreateRequest, Orchestrator};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub request_timeout: Duration,
}

/// Cancels the request's pipeline when dropped.
struct CancelGuard {
    tx: watch::Sender<bool>,
}

impl CancelGuard {
    fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, rx)
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.tx.send_replace(true);
    }
}

impl AppState {
    fn cancellation(&self) -> (CancelGuard, Cancellation) {
        let (guard, rx) = CancelGuard::new();
        let cancel = Cancellation::none()
            .with_timeout(self.request_timeout)
            .with_signal(rx);
        (guard, cancel)
    }
}

pub fn create_router(app_state: Arc<AppState>, api_prefix: &str) -> Router {
    let containers = Router::new()
        .route("/containers", post(create_container))
        .route("/containers/{id}/start", post(start_container));

    Router::new()
        .nest(api_prefix, containers)
        .fallback(fallback_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

#[axum::debug_handler]
async fn create_container(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateRequest>, JsonRejection>,
) -> Result<Json<ContainerCreated>, ErrorResponse> {
    let Json(request) = payload.map_err(|rejection| {
        warn!(error = %rejection.body_text(), "Rejected create request body");
        ErrorResponse::validation(rejection.body_text())
    })?;
    let (_guard, cancel) = state.cancellation();
    let orchestrator = state.orchestrator.clone();

    let created = tokio::spawn(async move { orchestrator.create(request, &cancel).await })
        .await
        .map_err(|e| {
            error!("Create task failed: {}", e);
            ErrorResponse::internal(e.to_string())
        })??;

    Ok(Json(created))
}

#[axum::debug_handler]
async fn start_container(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ErrorResponse> {
    let (_guard, cancel) = state.cancellation();
    let orchestrator = state.orchestrator.clone();

    tokio::spawn(async move { orchestrator.start(&id, &cancel).await })
        .await
        .map_err(|e| {
            error!("Start task failed: {}", e);
            ErrorResponse::internal(e.to_string())
        })??;

    Ok(StatusCode::OK)
}

async fn fallback_handler(req: Request<axum::body::Body>) -> StatusCode {
    warn!(method = %req.method(), uri = %req.uri(), "No route for request");
    StatusCode::NOT_FOUND
}
