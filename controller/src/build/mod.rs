//! Build engine
//!
//! Syncs an application's source, builds its image with `docker buildx`
//! and pushes it. Every running build is tracked in the
//! [`BuildProcessRegistry`] so it can be stopped.

pub mod docker;
pub mod git;
pub mod process;
pub mod registry;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::build::docker::{resolve_dockerfile, validate_image_reference, BuildxInvocation};
use crate::build::git::GitSync;
use crate::build::process::run_streamed;
use crate::errors::ControllerError;
use crate::events::{EventSink, Progress};
use crate::manifest::naming::tagged_image;
use crate::models::{AppConfig, Build, BuildStatus, ContainerRegistry};
use crate::storage::layout::StorageLayout;
use crate::storage::settings::BuildSettings;
use crate::store::MetadataStore;
use crate::utils::generate_build_tag;

pub use self::registry::{BuildProcessRegistry, CancelSignal};

/// Build engine options
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub docker_binary: String,
    pub git_binary: String,
    pub builder: Option<String>,
    pub platform: Option<String>,
    pub push: bool,
    pub stop_grace: Duration,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self::from(&BuildSettings::default())
    }
}

impl From<&BuildSettings> for BuildOptions {
    fn from(settings: &BuildSettings) -> Self {
        Self {
            docker_binary: settings.docker_binary.clone(),
            git_binary: settings.git_binary.clone(),
            builder: settings.builder.clone(),
            platform: settings.platform.clone(),
            push: settings.push,
            stop_grace: Duration::from_secs(settings.stop_grace_secs),
        }
    }
}

/// What to build
#[derive(Debug, Clone)]
pub struct StartBuildParams {
    pub app: AppConfig,
    pub env: String,
    pub branch: String,

    /// Build tag, generated when absent
    pub tag: Option<String>,

    /// Registry to authenticate against before pushing
    pub registry: Option<ContainerRegistry>,
}

/// A successful build
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub build: Build,
    pub image: String,
}

#[async_trait]
pub trait BuildEngineExt: Send + Sync {
    /// Build and push an image, returning the finished build
    async fn start_build(&self, params: StartBuildParams) -> Result<BuildOutcome, ControllerError>;

    /// Stop a running build. Unknown or finished builds are a no-op.
    async fn stop_build(&self, app_slug: &str, build_slug: &str) -> Result<(), ControllerError>;
}

/// Docker/git backed build engine
pub struct BuildEngine {
    store: Arc<dyn MetadataStore>,
    registry: Arc<BuildProcessRegistry>,
    sink: Arc<dyn EventSink>,
    layout: StorageLayout,
    options: BuildOptions,
}

impl BuildEngine {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        registry: Arc<BuildProcessRegistry>,
        sink: Arc<dyn EventSink>,
        layout: StorageLayout,
        options: BuildOptions,
    ) -> Self {
        Self {
            store,
            registry,
            sink,
            layout,
            options,
        }
    }

    pub fn process_registry(&self) -> &Arc<BuildProcessRegistry> {
        &self.registry
    }

    async fn set_status(&self, build: &Build, status: BuildStatus, image: Option<&str>) {
        if let Err(e) = self.store.update_build_status(&build.id, status, image).await {
            error!("Failed to mark build {} {:?}: {}", build.slug, status, e);
        }
    }

    /// Everything between `building` and the pushed image
    async fn run_pipeline(
        &self,
        build: &Build,
        params: &StartBuildParams,
        cancel: &mut CancelSignal,
        progress: &Progress,
    ) -> Result<String, ControllerError> {
        self.store
            .update_build_status(&build.id, BuildStatus::Building, None)
            .await?;

        let config = params.app.environment(&params.env).ok_or_else(|| {
            ControllerError::BuildError(format!(
                "app {} has no environment {}",
                params.app.slug, params.env
            ))
        })?;
        let image_base = config.image_url.as_deref().unwrap_or_default();
        validate_image_reference(image_base)?;
        let image = tagged_image(image_base, &build.tag);

        let repo_url = params.app.git_url.as_deref().ok_or_else(|| {
            ControllerError::BuildError(format!("app {} has no git repository", params.app.slug))
        })?;

        let source_dir: PathBuf = self.layout.source_dir(&params.app.slug, &params.env);
        let git = GitSync {
            binary: &self.options.git_binary,
            progress,
            grace: self.options.stop_grace,
        };
        git.sync_repository(repo_url, &params.branch, &source_dir, cancel)
            .await?;

        let dockerfile = resolve_dockerfile(&source_dir, &params.env)?;
        progress.log(format!("Using {}", dockerfile.display()));

        if let Some(registry) = &params.registry {
            if let (Some(username), Some(password)) = (&registry.username, &registry.password) {
                docker::login(
                    &self.options.docker_binary,
                    &registry.host,
                    username,
                    &SecretString::from(password.clone()),
                )
                .await?;
            }
        }

        let cache_from = match self
            .store
            .latest_successful_build(&params.app.slug, &params.env)
            .await
        {
            Ok(previous) => previous.and_then(|b| b.image),
            Err(e) => {
                warn!("No layer cache for {}: {}", build.slug, e);
                None
            }
        };

        if cancel.is_cancelled() {
            return Err(ControllerError::Cancelled(build.slug.clone()));
        }

        let invocation = BuildxInvocation {
            builder: self.options.builder.as_deref(),
            platform: self.options.platform.as_deref(),
            dockerfile: &dockerfile,
            context_dir: &source_dir,
            image: &image,
            cache_from: cache_from.as_deref(),
            push: self.options.push,
        };
        progress.log(format!("Building {}", image));

        let mut command = Command::new(&self.options.docker_binary);
        command.args(invocation.args()).current_dir(&source_dir);
        let status = run_streamed(&mut command, progress, cancel, self.options.stop_grace).await?;
        if !status.success() {
            return Err(ControllerError::BuildError(format!(
                "docker buildx build exited with {}",
                status
            )));
        }

        Ok(image)
    }
}

/// A stop that lands after the pipeline returned still fails the build
fn settle(
    result: Result<String, ControllerError>,
    cancel: &CancelSignal,
    build_slug: &str,
) -> Result<String, ControllerError> {
    match result {
        Ok(_) if cancel.is_cancelled() => {
            warn!("Build {} was stopped after its image was pushed", build_slug);
            Err(ControllerError::Cancelled(build_slug.to_string()))
        }
        other => other,
    }
}

#[async_trait]
impl BuildEngineExt for BuildEngine {
    async fn start_build(&self, params: StartBuildParams) -> Result<BuildOutcome, ControllerError> {
        let tag = params.tag.clone().unwrap_or_else(generate_build_tag);
        let build = Build::new(
            &params.app.slug,
            &params.app.project_slug,
            &params.env,
            &params.branch,
            &tag,
        );

        let mut cancel = self
            .registry
            .register(&build.slug, &build.app_slug, &build.id)?;
        let progress = Progress::new(self.sink.clone(), build.slug.clone());

        if let Err(e) = self.store.create_build(&build).await {
            self.registry.finish(&build.slug);
            return Err(e);
        }
        info!("Starting build {} of {} ({})", build.slug, build.app_slug, build.env);
        progress.log(format!("Build {} started", build.slug));

        let result = self
            .run_pipeline(&build, &params, &mut cancel, &progress)
            .await;
        self.registry.finish(&build.slug);
        let result = settle(result, &cancel, &build.slug);

        match result {
            Ok(image) => {
                self.set_status(&build, BuildStatus::Success, Some(&image))
                    .await;
                progress.finish_ok(format!("Build {} succeeded: {}", build.slug, image));

                let mut build = build;
                build.status = BuildStatus::Success;
                build.image = Some(image.clone());
                Ok(BuildOutcome { build, image })
            }
            Err(e) => {
                self.set_status(&build, BuildStatus::Failed, None).await;
                progress.finish_err(e.summary());
                Err(e)
            }
        }
    }

    async fn stop_build(&self, app_slug: &str, build_slug: &str) -> Result<(), ControllerError> {
        let Some(build_id) = self.registry.cancel(app_slug, build_slug) else {
            warn!("Build {} of {} is not running, nothing to stop", build_slug, app_slug);
            return Ok(());
        };
        info!("Stopping build {} of {}", build_slug, app_slug);

        if let Some(builder) = &self.options.builder {
            docker::stop_builder(&self.options.docker_binary, builder).await;
        }

        if let Err(e) = self
            .store
            .update_build_status(&build_id, BuildStatus::Failed, None)
            .await
        {
            error!("Failed to mark stopped build {} failed: {}", build_slug, e);
        }
        Ok(())
    }
}
