//! HTTP service
//!
//! Exposes the coordinator's RPC operations as JSON POST endpoints under
//! `/v1`, plus `/metrics` and `/status`. Blocking operations hold the
//! request open until their barrier (or the result slot) releases them.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::coordinator::Coordinator;
use crate::error::PoolError;
use crate::metrics::gather_pool_metrics;
use crate::protocol::{
    AnnounceReply, AnnounceRequest, CancelNotice, CoordinatorStatus, ErrorBody, GetCancelRequest,
    GetResultReply, GetResultRequest, GetWorkReply, GetWorkRequest, IssueBlockReply,
    IssueBlockRequest, LoginReply, LoginRequest,
};
use crate::runtime::ShutdownSignal;

/// Error wrapper carrying the HTTP mapping of a `PoolError`
pub struct ApiError(PoolError);

impl From<PoolError> for ApiError {
    fn from(err: PoolError) -> Self {
        Self(err)
    }
}

/// HTTP status for an error returned to a remote caller
pub fn status_for(err: &PoolError) -> StatusCode {
    match err {
        PoolError::AlreadyLoggedIn { .. } => StatusCode::CONFLICT,
        PoolError::AuthenticationFailed { .. } => StatusCode::UNAUTHORIZED,
        PoolError::CapacityReached { .. } | PoolError::ShutdownInProgress => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        PoolError::NotLoggedIn { .. } => StatusCode::FORBIDDEN,
        PoolError::InvalidMessage { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        debug!("Request failed with {}: {}", status, self.0);
        (status, Json(ErrorBody::from(&self.0))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// Build the router over a shared coordinator
pub fn router(coordinator: Arc<Coordinator>) -> Router {
    Router::new()
        .route("/v1/login", post(login))
        .route("/v1/work", post(get_work))
        .route("/v1/announce", post(announce))
        .route("/v1/cancel", post(get_cancel))
        .route("/v1/block", post(issue_block))
        .route("/v1/result", post(get_result))
        .route("/status", get(status))
        .route("/metrics", get(|| async { gather_pool_metrics() }))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(coordinator)
}

/// Serve until `shutdown` fires, then drain in-flight requests
pub async fn serve(
    listener: TcpListener,
    coordinator: Arc<Coordinator>,
    shutdown: ShutdownSignal,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Coordinator listening on {}", addr);
    }
    axum::serve(listener, router(coordinator))
        .with_graceful_shutdown(async move { shutdown.recv().await })
        .await
}

async fn login(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<LoginReply> {
    let identity = coordinator.login(&req.name, req.credential.as_ref())?;
    Ok(Json(LoginReply { id: identity.id }))
}

async fn get_work(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<GetWorkRequest>,
) -> ApiResult<GetWorkReply> {
    let work = coordinator.get_work(&req.name).await?;
    Ok(Json(GetWorkReply { work }))
}

async fn announce(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<AnnounceRequest>,
) -> Json<AnnounceReply> {
    Json(AnnounceReply {
        accepted: coordinator.announce(req.solution),
    })
}

async fn get_cancel(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<GetCancelRequest>,
) -> ApiResult<CancelNotice> {
    Ok(Json(coordinator.get_cancel(&req.name, req.round).await?))
}

async fn issue_block(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<IssueBlockRequest>,
) -> Json<IssueBlockReply> {
    Json(coordinator.issue_block(req.template))
}

async fn get_result(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<GetResultRequest>,
) -> ApiResult<GetResultReply> {
    let record = coordinator.await_result(&req.observer).await?;
    Ok(Json(GetResultReply { record }))
}

async fn status(State(coordinator): State<Arc<Coordinator>>) -> Json<CoordinatorStatus> {
    Json(coordinator.status())
}
