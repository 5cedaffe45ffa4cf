//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::info;

use crate::deploy::DeployRequest;
use crate::errors::ControllerError;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub pending_rollouts: usize,
}

/// Health check handler
pub async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "dockyard".to_string(),
        version: version_info().version,
        pending_rollouts: state.coordinator.queue().pending(),
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    Json(version_info())
}

/// Error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub problems: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
}

/// Control plane error rendered as a JSON response
#[derive(Debug)]
pub struct ApiError(pub ControllerError);

impl From<ControllerError> for ApiError {
    fn from(err: ControllerError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ControllerError::ValidationError(_)
            | ControllerError::NameTooLong { .. }
            | ControllerError::ConfigError(_) => StatusCode::BAD_REQUEST,
            ControllerError::ConflictError { .. } => StatusCode::CONFLICT,
            ControllerError::NotFound(_) => StatusCode::NOT_FOUND,
            ControllerError::AuthError(_) => StatusCode::BAD_GATEWAY,
            ControllerError::ShutdownError(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let problems = match &self.0 {
            ControllerError::ValidationError(problems) => problems.clone(),
            _ => Vec::new(),
        };
        let body = ErrorResponse {
            error: self.0.summary(),
            problems,
            logs: self.0.diagnostics().map(str::to_string),
        };
        (status, Json(body)).into_response()
    }
}

/// Build (or take the given image) and deploy. Answers 202 when the
/// rollout runs in the background.
pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<DeployRequest>,
) -> Result<impl IntoResponse, ApiError> {
    info!("Deploy requested for {} ({})", request.app, request.env);
    let outcome = state.coordinator.build_and_deploy(&request).await?;
    let status = if request.deploy_in_background {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome)))
}

/// Stop build response
#[derive(Debug, Serialize)]
pub struct StopBuildResponse {
    pub app: String,
    pub build: String,
    pub stopped: bool,
}

/// Stop a running build
pub async fn stop_build_handler(
    State(state): State<Arc<ServerState>>,
    Path((app, build)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    state.coordinator.stop_build(&app, &build).await?;
    Ok(Json(StopBuildResponse {
        app,
        build,
        stopped: true,
    }))
}
