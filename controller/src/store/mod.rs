//! Metadata store contract
//!
//! Apps, clusters, registries, builds, releases and webhooks live in an
//! external store. The control plane only needs the narrow set of reads and
//! writes below.

pub mod http;
pub mod memory;

use async_trait::async_trait;

use crate::errors::ControllerError;
use crate::models::{
    AppConfig, Build, BuildStatus, Cluster, ContainerRegistry, DeployEnvironmentConfig,
    DeployStatus, Release, ReleaseStatus, Webhook, WebhookOutcome,
};

pub use self::http::HttpStore;
pub use self::memory::MemoryStore;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_app(&self, slug: &str) -> Result<AppConfig, ControllerError>;

    /// Replace one deploy environment of an app
    async fn save_environment(
        &self,
        app_slug: &str,
        env: &str,
        config: &DeployEnvironmentConfig,
    ) -> Result<(), ControllerError>;

    async fn get_cluster(&self, slug: &str) -> Result<Option<Cluster>, ControllerError>;

    async fn get_registry(&self, slug: &str)
        -> Result<Option<ContainerRegistry>, ControllerError>;

    async fn create_build(&self, build: &Build) -> Result<(), ControllerError>;

    async fn get_build(&self, id: &str) -> Result<Option<Build>, ControllerError>;

    /// Most recent successful build of an app environment, used as cache source
    async fn latest_successful_build(
        &self,
        app_slug: &str,
        env: &str,
    ) -> Result<Option<Build>, ControllerError>;

    /// Move a build through its lifecycle. Terminal builds are immutable.
    async fn update_build_status(
        &self,
        id: &str,
        status: BuildStatus,
        image: Option<&str>,
    ) -> Result<(), ControllerError>;

    async fn update_build_deploy_status(
        &self,
        id: &str,
        status: DeployStatus,
    ) -> Result<(), ControllerError>;

    async fn create_release(&self, release: &Release) -> Result<(), ControllerError>;

    async fn get_release(&self, id: &str) -> Result<Option<Release>, ControllerError>;

    async fn list_releases(&self, app_slug: &str) -> Result<Vec<Release>, ControllerError>;

    async fn update_release_status(
        &self,
        id: &str,
        status: ReleaseStatus,
    ) -> Result<(), ControllerError>;

    async fn set_release_active(&self, id: &str, active: bool) -> Result<(), ControllerError>;

    async fn create_webhook(&self, webhook: &Webhook) -> Result<(), ControllerError>;

    async fn get_webhook(&self, id: &str) -> Result<Option<Webhook>, ControllerError>;

    /// Record the outcome of a webhook. Returns `false` when it had already fired.
    async fn mark_webhook_triggered(
        &self,
        id: &str,
        outcome: WebhookOutcome,
    ) -> Result<bool, ControllerError>;
}
