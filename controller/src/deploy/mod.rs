//! Deploy coordinator
//!
//! Build, generate, persist, roll out. Everything up to the persisted
//! release happens inline; the rollout itself goes through the
//! [`RolloutQueue`], awaited or in the background.

pub mod merge;

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::build::{BuildEngineExt, StartBuildParams};
use crate::errors::ControllerError;
use crate::manifest::naming::{app_version, deployment_name};
use crate::manifest::{GenerateParams, ManifestGenerator};
use crate::models::{
    AppConfig, Build, Cluster, ContainerRegistry, DeployEnvironmentConfig, DeployStatus, Release,
    ReleaseStatus, Webhook, WebhookChannel,
};
use crate::rollout::{RolloutController, RolloutQueue, RolloutRequest};
use crate::storage::layout::StorageLayout;
use crate::store::MetadataStore;
use crate::utils::{generate_build_tag, generate_id, sha256_hash};

pub use self::merge::{resolve_environment, EnvironmentPatch};

fn default_branch() -> String {
    "main".to_string()
}

/// A deploy trigger
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    /// App slug
    pub app: String,
    pub env: String,

    #[serde(default = "default_branch")]
    pub branch: String,

    /// Build tag, generated when absent
    #[serde(default)]
    pub tag: Option<String>,

    /// Deploy this image instead of building one
    #[serde(default)]
    pub image: Option<String>,

    /// Highest-precedence environment overrides
    #[serde(default)]
    pub overrides: Option<EnvironmentPatch>,

    /// Return once the rollout is queued
    #[serde(default)]
    pub deploy_in_background: bool,

    /// Delete the namespace before applying
    #[serde(default)]
    pub fresh: bool,

    #[serde(default)]
    pub consumers: Vec<String>,

    #[serde(default)]
    pub channels: Vec<WebhookChannel>,
}

impl DeployRequest {
    pub fn new(app: &str, env: &str) -> Self {
        Self {
            app: app.to_string(),
            env: env.to_string(),
            branch: default_branch(),
            tag: None,
            image: None,
            overrides: None,
            deploy_in_background: false,
            fresh: false,
            consumers: Vec::new(),
            channels: Vec::new(),
        }
    }
}

/// What a deploy produced
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployOutcome {
    pub build_id: String,
    pub release_id: String,
    pub webhook_id: String,
    pub namespace: String,
    pub app_version: String,
    pub endpoint: Option<String>,

    /// `in_progress` while a background rollout is pending
    pub status: DeployStatus,

    /// Cleanup warnings of a foreground rollout
    pub warnings: Vec<String>,
}

/// A persisted release ready to roll out
struct Prepared {
    rollout: RolloutRequest,
    outcome: DeployOutcome,
}

pub struct DeployCoordinator {
    store: Arc<dyn MetadataStore>,
    builder: Arc<dyn BuildEngineExt>,
    generator: ManifestGenerator,
    controller: Arc<RolloutController>,
    queue: RolloutQueue,
    layout: StorageLayout,
}

impl DeployCoordinator {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        builder: Arc<dyn BuildEngineExt>,
        generator: ManifestGenerator,
        controller: Arc<RolloutController>,
        queue: RolloutQueue,
        layout: StorageLayout,
    ) -> Self {
        Self {
            store,
            builder,
            generator,
            controller,
            queue,
            layout,
        }
    }

    pub fn queue(&self) -> &RolloutQueue {
        &self.queue
    }

    /// Build (unless an image is given) and deploy. A failed build creates
    /// no release and fires no webhook.
    pub async fn build_and_deploy(
        &self,
        request: &DeployRequest,
    ) -> Result<DeployOutcome, ControllerError> {
        let app = self.store.get_app(&request.app).await?;
        // Names are bounded before any build or cluster work
        let name = deployment_name(&app.project_slug, &app.slug)?;
        let tag = request.tag.clone().unwrap_or_else(generate_build_tag);
        app_version(&name, &tag)?;

        let build = match &request.image {
            Some(image) => {
                let build =
                    Build::prebuilt(&app.slug, &app.project_slug, &request.env, image, &tag);
                self.store.create_build(&build).await?;
                info!("Deploying prebuilt image {} as build {}", image, build.slug);
                build
            }
            None => {
                // The build sees the environment without the app config
                // file, which only exists once the source is synced
                let config = resolve_environment(
                    None,
                    app.environment(&request.env),
                    request.overrides.as_ref(),
                );
                let registry = match &config.registry {
                    Some(slug) => self.store.get_registry(slug).await?,
                    None => None,
                };
                let mut build_app = app.clone();
                build_app
                    .deploy_environment
                    .insert(request.env.clone(), config);

                let outcome = self
                    .builder
                    .start_build(StartBuildParams {
                        app: build_app,
                        env: request.env.clone(),
                        branch: request.branch.clone(),
                        tag: Some(tag),
                        registry,
                    })
                    .await?;
                outcome.build
            }
        };

        self.deploy_build(&app, &build, request).await
    }

    /// Deploy a successful build
    pub async fn deploy_build(
        &self,
        app: &AppConfig,
        build: &Build,
        request: &DeployRequest,
    ) -> Result<DeployOutcome, ControllerError> {
        let prepared = match self.prepare(app, build, request).await {
            Ok(prepared) => prepared,
            Err(e) => {
                error!("Deploy of {} ({}) failed: {}", app.slug, request.env, e);
                self.set_deploy_status(&build.id, DeployStatus::Failed).await;
                return Err(e);
            }
        };
        self.set_deploy_status(&build.id, DeployStatus::InProgress)
            .await;

        let Prepared { rollout, mut outcome } = prepared;
        let release_id = rollout.release.id.clone();
        let controller = self.controller.clone();
        let store = self.store.clone();
        let build_id = build.id.clone();
        let job = async move {
            let result = controller.execute(rollout).await;
            let status = match &result {
                Ok(_) => DeployStatus::Success,
                Err(_) => DeployStatus::Failed,
            };
            if let Err(e) = store.update_build_deploy_status(&build_id, status).await {
                error!("Failed to record deploy status of build {}: {}", build_id, e);
            }
            result
        };

        if request.deploy_in_background {
            // The job records its own outcome, the receiver is not needed
            if let Err(e) = self.queue.spawn(job) {
                self.mark_release_failed(&release_id).await;
                self.set_deploy_status(&build.id, DeployStatus::Failed).await;
                return Err(e);
            }
            info!(
                "Rollout of {} queued ({} pending)",
                outcome.app_version,
                self.queue.pending()
            );
            return Ok(outcome);
        }

        let report = self.queue.run(job).await?;
        outcome.status = DeployStatus::Success;
        outcome.warnings = report.warnings.iter().map(ToString::to_string).collect();
        Ok(outcome)
    }

    pub async fn stop_build(&self, app_slug: &str, build_slug: &str) -> Result<(), ControllerError> {
        self.builder.stop_build(app_slug, build_slug).await
    }

    /// Validate, generate and persist. On error nothing is rolled out and
    /// a created release is marked failed.
    async fn prepare(
        &self,
        app: &AppConfig,
        build: &Build,
        request: &DeployRequest,
    ) -> Result<Prepared, ControllerError> {
        if self.queue.is_closed() {
            return Err(ControllerError::ShutdownError(
                "not accepting deploys".to_string(),
            ));
        }
        deployment_name(&app.project_slug, &app.slug)?;

        let source_dir = self.layout.source_dir(&app.slug, &request.env);
        let file_patch = merge::load_app_config_file(&source_dir, &request.env).await?;
        let mut config = resolve_environment(
            file_patch.as_ref(),
            app.environment(&request.env),
            request.overrides.as_ref(),
        );

        let (cluster, registry) = self
            .validate(app, build, &config, request.image.is_none())
            .await?;
        let image = build.image.as_deref().unwrap_or_default();

        let generated = self
            .generator
            .generate(&GenerateParams {
                app,
                env: &request.env,
                config: &config,
                cluster: Some(&cluster),
                registry: Some(&registry),
                image,
                build_tag: &build.tag,
            })
            .await?;
        generated.apply_to(&mut config);

        let release = Release {
            id: generate_id(),
            build_id: build.id.clone(),
            app_slug: app.slug.clone(),
            project_slug: app.project_slug.clone(),
            env: request.env.clone(),
            namespace: generated.namespace.clone(),
            cluster: cluster.slug.clone(),
            endpoint: generated.endpoint.clone(),
            deployment_name: generated.deployment_name.clone(),
            app_version: generated.app_version.clone(),
            manifest_digest: sha256_hash(generated.deployment_yaml.as_bytes()),
            namespace_yaml: generated.namespace_yaml.clone(),
            deployment_yaml: generated.deployment_yaml.clone(),
            status: ReleaseStatus::InProgress,
            active: false,
            created_at: Utc::now(),
        };
        self.store.create_release(&release).await?;

        let webhook = Webhook {
            id: generate_id(),
            release_id: release.id.clone(),
            consumers: request.consumers.clone(),
            channels: request.channels.clone(),
            outcome: None,
            triggered_at: None,
        };
        config.latest_release = Some(release.id.clone());
        if let Err(e) = self.persist(app, &request.env, &config, &webhook).await {
            self.mark_release_failed(&release.id).await;
            return Err(e);
        }
        info!(
            "Release {} of {} ({}) created for {}",
            release.id, app.slug, request.env, release.app_version
        );

        let outcome = DeployOutcome {
            build_id: build.id.clone(),
            release_id: release.id.clone(),
            webhook_id: webhook.id.clone(),
            namespace: release.namespace.clone(),
            app_version: release.app_version.clone(),
            endpoint: release.endpoint.clone(),
            status: DeployStatus::InProgress,
            warnings: Vec::new(),
        };
        let rollout = RolloutRequest {
            release,
            domains: generated.domains,
            cluster,
            registry,
            webhook_id: Some(webhook.id),
            fresh: request.fresh,
        };
        Ok(Prepared { rollout, outcome })
    }

    /// Collect every problem with the deploy inputs into one error
    async fn validate(
        &self,
        app: &AppConfig,
        build: &Build,
        config: &DeployEnvironmentConfig,
        built_from_source: bool,
    ) -> Result<(Cluster, ContainerRegistry), ControllerError> {
        let mut problems = Vec::new();

        let cluster = match &config.cluster {
            Some(slug) => {
                let cluster = self.store.get_cluster(slug).await?;
                if cluster.is_none() {
                    problems.push(format!("cluster {} not found", slug));
                }
                cluster
            }
            None => {
                problems.push("cluster is not set".to_string());
                None
            }
        };
        let registry = match &config.registry {
            Some(slug) => {
                let registry = self.store.get_registry(slug).await?;
                if registry.is_none() {
                    problems.push(format!("registry {} not found", slug));
                }
                registry
            }
            None => {
                problems.push("registry is not set".to_string());
                None
            }
        };
        if config.port.is_none() {
            problems.push("port is not set".to_string());
        }
        // A prebuilt image never reads the image base
        if built_from_source && config.image_url.as_deref().map_or(true, str::is_empty) {
            problems.push("imageUrl is not set".to_string());
        }
        if build.image.as_deref().map_or(true, str::is_empty) {
            problems.push(format!("build {} has no image", build.slug));
        }
        problems.extend(config.validate());

        match (cluster, registry) {
            (Some(cluster), Some(registry)) if problems.is_empty() => Ok((cluster, registry)),
            _ => {
                warn!("Deploy of {} rejected: {}", app.slug, problems.join("; "));
                Err(ControllerError::ValidationError(problems))
            }
        }
    }

    async fn persist(
        &self,
        app: &AppConfig,
        env: &str,
        config: &DeployEnvironmentConfig,
        webhook: &Webhook,
    ) -> Result<(), ControllerError> {
        self.store.create_webhook(webhook).await?;
        self.store.save_environment(&app.slug, env, config).await
    }

    async fn mark_release_failed(&self, release_id: &str) {
        if let Err(e) = self
            .store
            .update_release_status(release_id, ReleaseStatus::Failed)
            .await
        {
            error!("Failed to mark release {} failed: {}", release_id, e);
        }
    }

    async fn set_deploy_status(&self, build_id: &str, status: DeployStatus) {
        if let Err(e) = self.store.update_build_deploy_status(build_id, status).await {
            error!("Failed to record deploy status of build {}: {}", build_id, e);
        }
    }
}
