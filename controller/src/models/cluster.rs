//! Cluster and container registry records

use serde::{Deserialize, Serialize};

/// A Kubernetes cluster the control plane can deploy to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub slug: String,
    pub name: String,

    /// kubeconfig context to select, the kubeconfig's current context otherwise
    #[serde(default)]
    pub context: Option<String>,

    /// Full kubeconfig text, the ambient kubeconfig is used when absent
    #[serde(default)]
    pub kubeconfig: Option<String>,
}

/// A container registry images are pushed to and pulled from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRegistry {
    pub slug: String,

    /// Registry host, e.g. "ghcr.io"
    pub host: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// Name of the image-pull secret created in each namespace
    #[serde(default)]
    pub image_pull_secret: Option<String>,
}

impl ContainerRegistry {
    pub fn pull_secret_name(&self) -> String {
        self.image_pull_secret
            .clone()
            .unwrap_or_else(|| format!("{}-docker-registry-key", self.slug))
    }

    pub fn has_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}
