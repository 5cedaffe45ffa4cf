//! Error types for the control plane

use std::time::Duration;

use thiserror::Error;

/// Main error type for dockyard
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Missing or invalid configuration. All problems found are reported together.
    #[error("Validation error: {}", .0.join("; "))]
    ValidationError(Vec<String>),

    #[error(
        "Name too long: \"{name}\" is {len} characters (limit {limit}), shorten the project or app name"
    )]
    NameTooLong {
        name: String,
        len: usize,
        limit: usize,
    },

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Domain conflict: \"{domain}\" is already served by ingress \"{ingress}\" in namespace \"{namespace}\"")]
    ConflictError {
        domain: String,
        namespace: String,
        ingress: String,
    },

    #[error("Apply error: {0}")]
    ApplyError(String),

    #[error("Readiness timeout: pods of \"{version}\" were not ready after {waited:?}")]
    ReadinessTimeout {
        version: String,
        waited: Duration,
        logs: String,
    },

    #[error("Readiness failure for \"{version}\": {reason}")]
    ReadinessFailed {
        version: String,
        reason: String,
        logs: String,
    },

    #[error("Build error: {0}")]
    BuildError(String),

    #[error("Build cancelled: {0}")]
    Cancelled(String),

    #[error("Cluster error: {0}")]
    ClusterError(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Domain allocation error: {0}")]
    DomainError(String),

    #[error("Webhook error: {0}")]
    WebhookError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ControllerError {
    /// Container logs captured while diagnosing a failed readiness wait
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            ControllerError::ReadinessTimeout { logs, .. }
            | ControllerError::ReadinessFailed { logs, .. } => Some(logs.as_str()),
            _ => None,
        }
    }

    /// First line of the error message, suitable for a terminal status line
    pub fn summary(&self) -> String {
        let message = self.to_string();
        message.lines().next().unwrap_or_default().to_string()
    }
}

impl From<anyhow::Error> for ControllerError {
    fn from(err: anyhow::Error) -> Self {
        ControllerError::Internal(err.to_string())
    }
}
