//! In-memory metadata store

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use crate::errors::ControllerError;
use crate::models::{
    AppConfig, Build, BuildStatus, Cluster, ContainerRegistry, DeployEnvironmentConfig,
    DeployStatus, Release, ReleaseStatus, Webhook, WebhookOutcome,
};
use crate::store::MetadataStore;

/// Process-local store, used for single-node setups and tests
#[derive(Default)]
pub struct MemoryStore {
    apps: RwLock<HashMap<String, AppConfig>>,
    clusters: RwLock<HashMap<String, Cluster>>,
    registries: RwLock<HashMap<String, ContainerRegistry>>,
    builds: RwLock<HashMap<String, Build>>,
    releases: RwLock<HashMap<String, Release>>,
    webhooks: RwLock<HashMap<String, Webhook>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_app(&self, app: AppConfig) {
        let mut apps = self.apps.write().unwrap_or_else(|e| e.into_inner());
        apps.insert(app.slug.clone(), app);
    }

    pub fn insert_cluster(&self, cluster: Cluster) {
        let mut clusters = self.clusters.write().unwrap_or_else(|e| e.into_inner());
        clusters.insert(cluster.slug.clone(), cluster);
    }

    pub fn insert_registry(&self, registry: ContainerRegistry) {
        let mut registries = self.registries.write().unwrap_or_else(|e| e.into_inner());
        registries.insert(registry.slug.clone(), registry);
    }

    /// All builds of an app, oldest first
    pub fn builds_of(&self, app_slug: &str) -> Vec<Build> {
        let builds = self.builds.read().unwrap_or_else(|e| e.into_inner());
        let mut found: Vec<Build> = builds
            .values()
            .filter(|b| b.app_slug == app_slug)
            .cloned()
            .collect();
        found.sort_by_key(|b| b.created_at);
        found
    }

    /// All webhooks, in no particular order
    pub fn webhooks(&self) -> Vec<Webhook> {
        let webhooks = self.webhooks.read().unwrap_or_else(|e| e.into_inner());
        webhooks.values().cloned().collect()
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn get_app(&self, slug: &str) -> Result<AppConfig, ControllerError> {
        let apps = self.apps.read().unwrap_or_else(|e| e.into_inner());
        apps.get(slug)
            .cloned()
            .ok_or_else(|| ControllerError::NotFound(format!("app {}", slug)))
    }

    async fn save_environment(
        &self,
        app_slug: &str,
        env: &str,
        config: &DeployEnvironmentConfig,
    ) -> Result<(), ControllerError> {
        let mut apps = self.apps.write().unwrap_or_else(|e| e.into_inner());
        let app = apps
            .get_mut(app_slug)
            .ok_or_else(|| ControllerError::NotFound(format!("app {}", app_slug)))?;
        app.deploy_environment
            .insert(env.to_string(), config.clone());
        Ok(())
    }

    async fn get_cluster(&self, slug: &str) -> Result<Option<Cluster>, ControllerError> {
        let clusters = self.clusters.read().unwrap_or_else(|e| e.into_inner());
        Ok(clusters.get(slug).cloned())
    }

    async fn get_registry(
        &self,
        slug: &str,
    ) -> Result<Option<ContainerRegistry>, ControllerError> {
        let registries = self.registries.read().unwrap_or_else(|e| e.into_inner());
        Ok(registries.get(slug).cloned())
    }

    async fn create_build(&self, build: &Build) -> Result<(), ControllerError> {
        let mut builds = self.builds.write().unwrap_or_else(|e| e.into_inner());
        builds.insert(build.id.clone(), build.clone());
        Ok(())
    }

    async fn get_build(&self, id: &str) -> Result<Option<Build>, ControllerError> {
        let builds = self.builds.read().unwrap_or_else(|e| e.into_inner());
        Ok(builds.get(id).cloned())
    }

    async fn latest_successful_build(
        &self,
        app_slug: &str,
        env: &str,
    ) -> Result<Option<Build>, ControllerError> {
        let builds = self.builds.read().unwrap_or_else(|e| e.into_inner());
        Ok(builds
            .values()
            .filter(|b| b.app_slug == app_slug && b.env == env)
            .filter(|b| b.status == BuildStatus::Success && b.image.is_some())
            .max_by_key(|b| b.created_at)
            .cloned())
    }

    async fn update_build_status(
        &self,
        id: &str,
        status: BuildStatus,
        image: Option<&str>,
    ) -> Result<(), ControllerError> {
        let mut builds = self.builds.write().unwrap_or_else(|e| e.into_inner());
        let build = builds
            .get_mut(id)
            .ok_or_else(|| ControllerError::NotFound(format!("build {}", id)))?;
        if build.status.is_terminal() {
            if build.status == status {
                return Ok(());
            }
            return Err(ControllerError::StoreError(format!(
                "build {} is already {:?}",
                id, build.status
            )));
        }
        build.status = status;
        if let Some(image) = image {
            build.image = Some(image.to_string());
        }
        build.updated_at = Utc::now();
        Ok(())
    }

    async fn update_build_deploy_status(
        &self,
        id: &str,
        status: DeployStatus,
    ) -> Result<(), ControllerError> {
        let mut builds = self.builds.write().unwrap_or_else(|e| e.into_inner());
        let build = builds
            .get_mut(id)
            .ok_or_else(|| ControllerError::NotFound(format!("build {}", id)))?;
        build.deploy_status = Some(status);
        build.updated_at = Utc::now();
        Ok(())
    }

    async fn create_release(&self, release: &Release) -> Result<(), ControllerError> {
        let mut releases = self.releases.write().unwrap_or_else(|e| e.into_inner());
        releases.insert(release.id.clone(), release.clone());
        Ok(())
    }

    async fn get_release(&self, id: &str) -> Result<Option<Release>, ControllerError> {
        let releases = self.releases.read().unwrap_or_else(|e| e.into_inner());
        Ok(releases.get(id).cloned())
    }

    async fn list_releases(&self, app_slug: &str) -> Result<Vec<Release>, ControllerError> {
        let releases = self.releases.read().unwrap_or_else(|e| e.into_inner());
        let mut found: Vec<Release> = releases
            .values()
            .filter(|r| r.app_slug == app_slug)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.created_at);
        Ok(found)
    }

    async fn update_release_status(
        &self,
        id: &str,
        status: ReleaseStatus,
    ) -> Result<(), ControllerError> {
        let mut releases = self.releases.write().unwrap_or_else(|e| e.into_inner());
        let release = releases
            .get_mut(id)
            .ok_or_else(|| ControllerError::NotFound(format!("release {}", id)))?;
        release.status = status;
        Ok(())
    }

    async fn set_release_active(&self, id: &str, active: bool) -> Result<(), ControllerError> {
        let mut releases = self.releases.write().unwrap_or_else(|e| e.into_inner());
        let release = releases
            .get_mut(id)
            .ok_or_else(|| ControllerError::NotFound(format!("release {}", id)))?;
        release.active = active;
        Ok(())
    }

    async fn create_webhook(&self, webhook: &Webhook) -> Result<(), ControllerError> {
        let mut webhooks = self.webhooks.write().unwrap_or_else(|e| e.into_inner());
        webhooks.insert(webhook.id.clone(), webhook.clone());
        Ok(())
    }

    async fn get_webhook(&self, id: &str) -> Result<Option<Webhook>, ControllerError> {
        let webhooks = self.webhooks.read().unwrap_or_else(|e| e.into_inner());
        Ok(webhooks.get(id).cloned())
    }

    async fn mark_webhook_triggered(
        &self,
        id: &str,
        outcome: WebhookOutcome,
    ) -> Result<bool, ControllerError> {
        let mut webhooks = self.webhooks.write().unwrap_or_else(|e| e.into_inner());
        let webhook = webhooks
            .get_mut(id)
            .ok_or_else(|| ControllerError::NotFound(format!("webhook {}", id)))?;
        if webhook.outcome.is_some() {
            return Ok(false);
        }
        webhook.outcome = Some(outcome);
        webhook.triggered_at = Some(Utc::now());
        Ok(true)
    }
}
