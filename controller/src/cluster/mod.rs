//! Cluster gateway
//!
//! Narrow, idempotent primitives the rollout controller needs from a
//! Kubernetes cluster. The production gateway shells out to `kubectl`.

pub mod kubectl;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::Deserialize;

use crate::errors::ControllerError;
use crate::models::Cluster;

pub use self::kubectl::KubectlGateway;

/// Resolved handle on an authenticated cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterContext {
    pub cluster_slug: String,

    /// kubeconfig context, the current context when absent
    pub context: Option<String>,

    /// Materialized kubeconfig, the ambient one when absent
    pub kubeconfig: Option<PathBuf>,
}

/// Object kinds the control plane manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Namespace,
    Ingress,
    Service,
    Deployment,
    PersistentVolumeClaim,
    Pod,
    Secret,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Namespace => "namespace",
            ResourceKind::Ingress => "ingress",
            ResourceKind::Service => "service",
            ResourceKind::Deployment => "deployment",
            ResourceKind::PersistentVolumeClaim => "persistentvolumeclaim",
            ResourceKind::Pod => "pod",
            ResourceKind::Secret => "secret",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Namespace scope of a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Namespace(String),
    AllNamespaces,
}

/// Metadata of a live object
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ObjectMetadata {
    pub name: String,

    #[serde(default)]
    pub namespace: Option<String>,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// A live object as returned by the cluster. Only metadata is typed, the
/// rest stays untyped since every kind shapes it differently.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ClusterObject {
    pub metadata: ObjectMetadata,

    #[serde(default)]
    pub spec: serde_json::Value,

    #[serde(default)]
    pub status: serde_json::Value,
}

/// Readiness of one pod, from its `Ready` condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodReadiness {
    Ready,
    NotReady { reason: Option<String> },
}

impl ClusterObject {
    /// Hosts served by an Ingress
    pub fn ingress_hosts(&self) -> Vec<String> {
        self.spec["rules"]
            .as_array()
            .map(|rules| {
                rules
                    .iter()
                    .filter_map(|rule| rule["host"].as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Pod readiness. A pod without a `Ready` condition is not ready.
    pub fn pod_readiness(&self) -> PodReadiness {
        let ready = self.status["conditions"].as_array().and_then(|conditions| {
            conditions
                .iter()
                .find(|condition| condition["type"].as_str() == Some("Ready"))
        });

        match ready {
            Some(condition) if condition["status"].as_str() == Some("True") => PodReadiness::Ready,
            Some(condition) => PodReadiness::NotReady {
                reason: condition["reason"].as_str().map(str::to_string),
            },
            None => PodReadiness::NotReady { reason: None },
        }
    }
}

/// Registry credentials turned into an image-pull secret
#[derive(Debug, Clone)]
pub struct PullSecret {
    pub name: String,
    pub registry: String,
    pub username: String,
    pub password: SecretString,
}

#[async_trait]
pub trait ClusterGateway: Send + Sync {
    /// Resolve and verify access to a cluster
    async fn authenticate(&self, cluster: &Cluster) -> Result<ClusterContext, ControllerError>;

    async fn namespace_exists(
        &self,
        ctx: &ClusterContext,
        namespace: &str,
    ) -> Result<bool, ControllerError>;

    /// Create a namespace from its generated document
    async fn create_namespace(
        &self,
        ctx: &ClusterContext,
        namespace: &str,
        manifest: &str,
    ) -> Result<(), ControllerError>;

    async fn delete_namespace(
        &self,
        ctx: &ClusterContext,
        namespace: &str,
    ) -> Result<(), ControllerError>;

    async fn create_image_pull_secret(
        &self,
        ctx: &ClusterContext,
        namespace: &str,
        secret: &PullSecret,
    ) -> Result<(), ControllerError>;

    async fn apply_manifest(
        &self,
        ctx: &ClusterContext,
        manifest: &str,
    ) -> Result<(), ControllerError>;

    async fn list_by_label(
        &self,
        ctx: &ClusterContext,
        kind: ResourceKind,
        scope: &Scope,
        selector: Option<&str>,
    ) -> Result<Vec<ClusterObject>, ControllerError>;

    async fn delete_by_label(
        &self,
        ctx: &ClusterContext,
        kind: ResourceKind,
        namespace: &str,
        selector: &str,
    ) -> Result<(), ControllerError>;

    async fn get_pod_logs(
        &self,
        ctx: &ClusterContext,
        namespace: &str,
        selector: &str,
        previous: bool,
    ) -> Result<String, ControllerError>;
}
