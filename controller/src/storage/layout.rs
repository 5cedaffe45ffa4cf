//! Workspace directory layout

use std::path::PathBuf;

use crate::errors::ControllerError;
use crate::manifest::naming::slugify;

/// Where checkouts, kubeconfigs and logs live
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Source checkouts, one per app environment
    pub fn sources_dir(&self) -> PathBuf {
        self.base_dir.join("sources")
    }

    /// Checkout of one app environment
    pub fn source_dir(&self, app_slug: &str, env: &str) -> PathBuf {
        self.sources_dir()
            .join(format!("{}-{}", slugify(app_slug), slugify(env)))
    }

    /// Materialized kubeconfigs
    pub fn kubeconfig_dir(&self) -> PathBuf {
        self.base_dir.join("kubeconfigs")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Create every directory of the layout
    pub async fn setup(&self) -> Result<(), ControllerError> {
        for dir in [self.sources_dir(), self.kubeconfig_dir(), self.logs_dir()] {
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }
}
