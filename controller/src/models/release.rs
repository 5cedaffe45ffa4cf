//! Release models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Release status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseStatus {
    InProgress,
    Success,
    Failed,
}

/// One deployable unit derived from exactly one build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub id: String,
    pub build_id: String,
    pub app_slug: String,
    pub project_slug: String,
    pub env: String,
    pub namespace: String,

    /// Slug of the cluster the release targets
    pub cluster: String,

    /// Public URL, absent for cluster-internal workloads
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Stable `<project>-<app>` name
    pub deployment_name: String,

    /// `<deployment-name>-<build-tag>` label selecting this version's pods
    pub app_version: String,

    pub namespace_yaml: String,
    pub deployment_yaml: String,

    /// SHA256 of `deployment_yaml`
    pub manifest_digest: String,

    pub status: ReleaseStatus,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}
