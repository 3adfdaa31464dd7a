//! REST API the UI process uses to drive the launcher

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::launcher::{Launcher, LoadError, ResolveAndLoad};
use crate::navigation::{NavigationController, NavigationOutcome};

/// API state shared across handlers
#[derive(Clone)]
pub struct ApiState {
    pub launcher: Arc<Launcher>,
    pub navigation: Arc<NavigationController>,
}

/// Health check response
#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    /// `None` until the daemon has been started or detected
    pub daemon_owned: Option<bool>,
    pub pinned: usize,
    pub networks: BTreeMap<String, String>,
}

/// Response for a resolved network
#[derive(Serialize, Deserialize)]
pub struct LoadResponse {
    pub network: String,
    pub url: String,
}

#[derive(Serialize, Deserialize)]
pub struct NavigateRequest {
    pub url: String,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum NavigateResponse {
    Load { url: String },
    External,
}

#[derive(Serialize, Deserialize)]
pub struct ReportRequest {
    pub resource: String,
}

#[derive(Serialize, Deserialize)]
pub struct ReportResponse {
    /// False when the queue was full and the report was dropped
    pub queued: bool,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Create the REST API router
pub fn create_router(launcher: Arc<Launcher>) -> Router {
    let state = ApiState {
        navigation: Arc::new(launcher.navigation()),
        launcher,
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_endpoint))
        .route("/api/v1/networks/:network", get(load_network))
        .route("/api/v1/navigate", post(navigate))
        .route("/api/v1/resources", post(report_resource))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Health check endpoint
async fn health_check(State(state): State<ApiState>) -> impl IntoResponse {
    let pin_cache = state.launcher.pin_cache();

    Json(HealthResponse {
        status: "ok".to_string(),
        daemon_owned: state.launcher.owns_daemon().await,
        pinned: pin_cache.pinned_count().await,
        networks: pin_cache.current_versions().await,
    })
}

/// Prometheus metrics endpoint
async fn metrics_endpoint(State(state): State<ApiState>) -> impl IntoResponse {
    let pin_cache = state.launcher.pin_cache();
    let metrics = state.launcher.metrics().to_prometheus(
        pin_cache.pinned_count().await,
        pin_cache.current_versions().await.len(),
    );

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        metrics,
    )
}

/// Resolve and load a network (GET /api/v1/networks/:network)
async fn load_network(
    State(state): State<ApiState>,
    Path(network): Path<String>,
) -> Result<Json<LoadResponse>, ApiError> {
    info!("API: Loading network {}", network);

    let url = state.launcher.resolve_and_load(&network).await?;

    Ok(Json(LoadResponse { network, url }))
}

/// Classify a navigation and act on it (POST /api/v1/navigate)
async fn navigate(
    State(state): State<ApiState>,
    Json(request): Json<NavigateRequest>,
) -> Result<Json<NavigateResponse>, ApiError> {
    if request.url.trim().is_empty() {
        return Err(ApiError::BadRequest("Empty URL".to_string()));
    }

    let response = match state.navigation.handle(&request.url).await? {
        NavigationOutcome::Load { url } => NavigateResponse::Load { url },
        NavigationOutcome::External => NavigateResponse::External,
    };

    Ok(Json(response))
}

/// Report a resource seen by the renderer (POST /api/v1/resources)
async fn report_resource(
    State(state): State<ApiState>,
    Json(request): Json<ReportRequest>,
) -> impl IntoResponse {
    let queued = state.launcher.reporter().report(request.resource);
    (StatusCode::ACCEPTED, Json(ReportResponse { queued }))
}

/// API error type
#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    BadGateway(String),
}

impl From<LoadError> for ApiError {
    fn from(e: LoadError) -> Self {
        match e {
            LoadError::UnknownNetwork(_) => ApiError::NotFound(e.to_string()),
            LoadError::Superseded(_) => ApiError::Conflict(e.to_string()),
            LoadError::Resolve(_) => ApiError::BadGateway(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::BadGateway(msg) => {
                warn!("API error: {}", msg);
                (StatusCode::BAD_GATEWAY, msg)
            }
        };

        let body = Json(ErrorResponse { error: message });
        (status, body).into_response()
    }
}
