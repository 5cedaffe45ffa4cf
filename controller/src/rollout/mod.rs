//! Rollout controller
//!
//! Drives one release onto its cluster: namespace, pull secret, domain
//! conflict check, apply, readiness wait, promotion and cleanup of
//! superseded objects. Each step is a [`RolloutFsm`] transition reported
//! to the event sink.

pub mod fsm;
pub mod queue;
pub mod readiness;

use std::fmt;
use std::sync::Arc;

use secrecy::SecretString;
use tracing::{debug, error, info, warn};

use crate::cluster::{ClusterContext, ClusterGateway, PullSecret, ResourceKind, Scope};
use crate::errors::ControllerError;
use crate::events::{EventSink, Progress};
use crate::manifest::naming::{stale_selector, version_selector};
use crate::models::{Cluster, ContainerRegistry, Release, ReleaseStatus, WebhookOutcome};
use crate::store::MetadataStore;
use crate::webhook::WebhookDispatcher;

pub use self::fsm::{RolloutEvent, RolloutFsm, RolloutState};
pub use self::queue::RolloutQueue;
pub use self::readiness::{poll_until_ready, Observation, ReadinessOutcome, ReadinessPolicy};

/// Kinds removed once a newer version is live
const CLEANUP_KINDS: [ResourceKind; 3] = [
    ResourceKind::Deployment,
    ResourceKind::Service,
    ResourceKind::Ingress,
];

/// One rollout to perform
#[derive(Debug, Clone)]
pub struct RolloutRequest {
    /// Persisted release carrying the generated manifests
    pub release: Release,

    /// Domains the release serves, checked for conflicts
    pub domains: Vec<String>,

    pub cluster: Cluster,
    pub registry: ContainerRegistry,

    /// Webhook fired on the terminal outcome
    pub webhook_id: Option<String>,

    /// Delete the whole namespace before applying
    pub fresh: bool,
}

/// Stale object that could not be removed. Never escalated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupWarning {
    pub kind: ResourceKind,
    pub namespace: String,
    pub selector: String,
    pub message: String,
}

impl fmt::Display for CleanupWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to delete {} objects matching {} in {}: {}",
            self.kind, self.selector, self.namespace, self.message
        )
    }
}

/// Summary of a successful rollout
#[derive(Debug, Clone)]
pub struct RolloutReport {
    pub release_id: String,
    pub app_version: String,
    pub endpoint: Option<String>,
    pub state: RolloutState,
    pub history: Vec<RolloutState>,
    pub readiness_attempts: u32,
    pub warnings: Vec<CleanupWarning>,
}

/// Outcome of the steps, before the terminal bookkeeping
struct Completed {
    readiness_attempts: u32,
    warnings: Vec<CleanupWarning>,
}

pub struct RolloutController {
    gateway: Arc<dyn ClusterGateway>,
    store: Arc<dyn MetadataStore>,
    webhooks: Arc<dyn WebhookDispatcher>,
    sink: Arc<dyn EventSink>,
    policy: ReadinessPolicy,
}

impl RolloutController {
    pub fn new(
        gateway: Arc<dyn ClusterGateway>,
        store: Arc<dyn MetadataStore>,
        webhooks: Arc<dyn WebhookDispatcher>,
        sink: Arc<dyn EventSink>,
        policy: ReadinessPolicy,
    ) -> Self {
        Self {
            gateway,
            store,
            webhooks,
            sink,
            policy,
        }
    }

    pub fn policy(&self) -> &ReadinessPolicy {
        &self.policy
    }

    /// Run a rollout to its terminal state. The release status is updated
    /// and the webhook fired exactly once, whatever the outcome.
    pub async fn execute(&self, request: RolloutRequest) -> Result<RolloutReport, ControllerError> {
        let release = &request.release;
        let progress = Progress::new(self.sink.clone(), release.id.clone());
        let mut fsm = RolloutFsm::new();
        info!(
            "Rolling out {} to {}/{}",
            release.app_version, release.cluster, release.namespace
        );

        let result = self.drive(&request, &mut fsm, &progress).await;

        let (result, outcome) = match result {
            Ok(completed) => {
                progress.log(fsm.state().describe());
                let summary = match &release.endpoint {
                    Some(endpoint) => format!("{} is live at {}", release.app_version, endpoint),
                    None => format!("{} is live", release.app_version),
                };
                info!("Rollout of {} succeeded", release.app_version);
                progress.finish_ok(summary);

                let report = RolloutReport {
                    release_id: release.id.clone(),
                    app_version: release.app_version.clone(),
                    endpoint: release.endpoint.clone(),
                    state: fsm.state(),
                    history: fsm.history().to_vec(),
                    readiness_attempts: completed.readiness_attempts,
                    warnings: completed.warnings,
                };
                (Ok(report), WebhookOutcome::Success)
            }
            Err(e) => {
                if let Err(transition) = fsm.process(RolloutEvent::Fail(e.to_string())) {
                    debug!("{}", transition);
                }
                // The state before `failed` is where the rollout stopped
                let stopped_in = fsm.history().iter().rev().nth(1).copied();
                error!(
                    "Rollout of {} failed ({:?}): {}",
                    release.app_version, stopped_in, e
                );
                if let Err(store_err) = self
                    .store
                    .update_release_status(&release.id, ReleaseStatus::Failed)
                    .await
                {
                    error!("Failed to mark release {} failed: {}", release.id, store_err);
                }
                progress.finish_err(e.summary());
                (Err(e), WebhookOutcome::Failed)
            }
        };

        if let Some(webhook_id) = &request.webhook_id {
            if let Err(e) = self.webhooks.trigger(webhook_id, outcome).await {
                warn!("Webhook {} for release {}: {}", webhook_id, release.id, e);
            }
        }

        result
    }

    async fn drive(
        &self,
        request: &RolloutRequest,
        fsm: &mut RolloutFsm,
        progress: &Progress,
    ) -> Result<Completed, ControllerError> {
        let release = &request.release;

        advance(fsm, RolloutEvent::Start, progress)?;
        let ctx = self.gateway.authenticate(&request.cluster).await?;

        advance(fsm, RolloutEvent::Authenticated, progress)?;
        self.ensure_namespace(&ctx, release, progress).await?;

        advance(fsm, RolloutEvent::NamespaceReady, progress)?;
        self.ensure_pull_secret(&ctx, &release.namespace, &request.registry, progress)
            .await?;

        advance(fsm, RolloutEvent::PullSecretReady, progress)?;
        self.check_conflicts(&ctx, &release.namespace, &request.domains)
            .await?;

        advance(fsm, RolloutEvent::NoConflict, progress)?;
        if request.fresh {
            self.recreate_namespace(&ctx, request, progress).await?;
        }
        self.gateway
            .apply_manifest(&ctx, &release.deployment_yaml)
            .await?;
        progress.log(format!("Applied {}", release.app_version));

        advance(fsm, RolloutEvent::Applied, progress)?;
        let readiness_attempts = self.await_ready(&ctx, release, progress).await?;

        advance(fsm, RolloutEvent::Ready, progress)?;
        self.promote(release).await?;

        advance(fsm, RolloutEvent::Promoted, progress)?;
        let warnings = self.cleanup(&ctx, release, progress).await;

        advance(fsm, RolloutEvent::CleanedUp, progress)?;
        Ok(Completed {
            readiness_attempts,
            warnings,
        })
    }

    async fn ensure_namespace(
        &self,
        ctx: &ClusterContext,
        release: &Release,
        progress: &Progress,
    ) -> Result<(), ControllerError> {
        if self
            .gateway
            .namespace_exists(ctx, &release.namespace)
            .await?
        {
            debug!("Namespace {} exists", release.namespace);
            return Ok(());
        }
        progress.log(format!("Creating namespace {}", release.namespace));
        self.gateway
            .create_namespace(ctx, &release.namespace, &release.namespace_yaml)
            .await
    }

    async fn ensure_pull_secret(
        &self,
        ctx: &ClusterContext,
        namespace: &str,
        registry: &ContainerRegistry,
        progress: &Progress,
    ) -> Result<(), ControllerError> {
        let (Some(username), Some(password)) = (&registry.username, &registry.password) else {
            debug!("Registry {} has no credentials, no pull secret", registry.slug);
            return Ok(());
        };
        let secret = PullSecret {
            name: registry.pull_secret_name(),
            registry: registry.host.clone(),
            username: username.clone(),
            password: SecretString::from(password.clone()),
        };
        progress.log(format!("Creating image pull secret {}", secret.name));
        self.gateway
            .create_image_pull_secret(ctx, namespace, &secret)
            .await
    }

    /// Fail when an Ingress in another namespace already serves one of our domains
    async fn check_conflicts(
        &self,
        ctx: &ClusterContext,
        namespace: &str,
        domains: &[String],
    ) -> Result<(), ControllerError> {
        if domains.is_empty() {
            return Ok(());
        }

        let ingresses = self
            .gateway
            .list_by_label(ctx, ResourceKind::Ingress, &Scope::AllNamespaces, None)
            .await?;
        for ingress in &ingresses {
            let other_namespace = ingress.metadata.namespace.as_deref().unwrap_or_default();
            if other_namespace == namespace {
                continue;
            }
            for host in ingress.ingress_hosts() {
                if domains.iter().any(|d| d.eq_ignore_ascii_case(&host)) {
                    return Err(ControllerError::ConflictError {
                        domain: host,
                        namespace: other_namespace.to_string(),
                        ingress: ingress.metadata.name.clone(),
                    });
                }
            }
        }
        debug!("No domain conflicts among {} ingresses", ingresses.len());
        Ok(())
    }

    async fn recreate_namespace(
        &self,
        ctx: &ClusterContext,
        request: &RolloutRequest,
        progress: &Progress,
    ) -> Result<(), ControllerError> {
        let namespace = &request.release.namespace;
        warn!("Fresh deploy of {} deletes namespace {}", request.release.app_version, namespace);
        progress.error(format!(
            "Fresh deploy: deleting namespace {}, every workload in it is destroyed",
            namespace
        ));
        self.gateway.delete_namespace(ctx, namespace).await?;
        self.gateway
            .create_namespace(ctx, namespace, &request.release.namespace_yaml)
            .await?;
        self.ensure_pull_secret(ctx, namespace, &request.registry, progress)
            .await
    }

    /// Poll the version's pods, returning the attempts it took
    async fn await_ready(
        &self,
        ctx: &ClusterContext,
        release: &Release,
        progress: &Progress,
    ) -> Result<u32, ControllerError> {
        let selector = version_selector(&release.app_version);
        let scope = Scope::Namespace(release.namespace.clone());

        let gateway = &self.gateway;
        let (selector_ref, scope_ref) = (selector.as_str(), &scope);
        let probe = move || async move {
            let pods = gateway
                .list_by_label(ctx, ResourceKind::Pod, scope_ref, Some(selector_ref))
                .await?;
            Ok::<_, ControllerError>(readiness::observe(&pods))
        };

        match poll_until_ready(&self.policy, probe, tokio::time::sleep).await {
            ReadinessOutcome::Ready { attempts } => {
                progress.log(format!("Pods of {} are ready", release.app_version));
                Ok(attempts)
            }
            ReadinessOutcome::TimedOut { attempts } => {
                progress.error(format!(
                    "Pods of {} not ready after {} checks",
                    release.app_version, attempts
                ));
                let logs = self
                    .collect_logs(ctx, &release.namespace, &selector, progress)
                    .await;
                Err(ControllerError::ReadinessTimeout {
                    version: release.app_version.clone(),
                    waited: self.policy.ceiling(),
                    logs,
                })
            }
            ReadinessOutcome::Failed { reason, .. } => {
                progress.error(format!("Pods of {} failed: {}", release.app_version, reason));
                let logs = self
                    .collect_logs(ctx, &release.namespace, &selector, progress)
                    .await;
                Err(ControllerError::ReadinessFailed {
                    version: release.app_version.clone(),
                    reason,
                    logs,
                })
            }
        }
    }

    /// Container logs, falling back to the previous incarnation when the
    /// current one has none. Emitted line by line.
    async fn collect_logs(
        &self,
        ctx: &ClusterContext,
        namespace: &str,
        selector: &str,
        progress: &Progress,
    ) -> String {
        let mut logs = String::new();
        for previous in [false, true] {
            match self
                .gateway
                .get_pod_logs(ctx, namespace, selector, previous)
                .await
            {
                Ok(text) if !text.trim().is_empty() => {
                    logs = text;
                    break;
                }
                Ok(_) => {}
                Err(e) => warn!("Failed to fetch logs for {} (previous={}): {}", selector, previous, e),
            }
        }

        if logs.is_empty() {
            progress.error("No container logs available");
        } else {
            for line in logs.lines() {
                progress.error(line);
            }
        }
        logs
    }

    /// Make this release the only active one of its app
    async fn promote(&self, release: &Release) -> Result<(), ControllerError> {
        for other in self.store.list_releases(&release.app_slug).await? {
            if other.id != release.id && other.active {
                debug!("Demoting release {}", other.id);
                self.store.set_release_active(&other.id, false).await?;
            }
        }
        self.store.set_release_active(&release.id, true).await?;
        self.store
            .update_release_status(&release.id, ReleaseStatus::Success)
            .await?;
        info!("Release {} is active", release.id);
        Ok(())
    }

    async fn cleanup(
        &self,
        ctx: &ClusterContext,
        release: &Release,
        progress: &Progress,
    ) -> Vec<CleanupWarning> {
        let selector = stale_selector(&release.deployment_name, &release.app_version);
        let mut warnings = Vec::new();

        for kind in CLEANUP_KINDS {
            if let Err(e) = self
                .gateway
                .delete_by_label(ctx, kind, &release.namespace, &selector)
                .await
            {
                let warning = CleanupWarning {
                    kind,
                    namespace: release.namespace.clone(),
                    selector: selector.clone(),
                    message: e.to_string(),
                };
                warn!("Cleanup of {}: {}", release.app_version, warning);
                progress.log(format!("Warning: {}", warning));
                warnings.push(warning);
            }
        }
        warnings
    }
}

/// Transition and report the state entered
fn advance(
    fsm: &mut RolloutFsm,
    event: RolloutEvent,
    progress: &Progress,
) -> Result<(), ControllerError> {
    let state = fsm.process(event).map_err(ControllerError::Internal)?;
    if !state.is_terminal() {
        progress.log(state.describe());
    }
    Ok(())
}
