//! Shared fakes and fixtures

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use dockyard::build::{BuildEngineExt, BuildOutcome, StartBuildParams};
use dockyard::cluster::{
    ClusterContext, ClusterGateway, ClusterObject, PullSecret, ResourceKind, Scope,
};
use dockyard::deploy::DeployCoordinator;
use dockyard::errors::ControllerError;
use dockyard::events::ChannelSink;
use dockyard::manifest::domains::SubdomainAllocator;
use dockyard::manifest::naming::tagged_image;
use dockyard::manifest::ManifestGenerator;
use dockyard::models::{
    AppConfig, Build, BuildStatus, Cluster, ContainerRegistry, DeployEnvironmentConfig, SslMode,
    WebhookOutcome,
};
use dockyard::rollout::{ReadinessPolicy, RolloutController, RolloutQueue};
use dockyard::storage::layout::StorageLayout;
use dockyard::store::{MemoryStore, MetadataStore};
use dockyard::webhook::WebhookDispatcher;

// ================================= CLUSTER ====================================== //

#[derive(Default)]
struct ClusterState {
    calls: Vec<String>,
    namespaces: HashSet<String>,
    ingresses: Vec<ClusterObject>,
    pod_script: VecDeque<Vec<ClusterObject>>,
    default_pods: Vec<ClusterObject>,
    applied: Vec<String>,
    logs: String,
    previous_logs: String,
    fail_auth: bool,
    fail_apply: bool,
    fail_cleanup: bool,
}

/// In-memory cluster recording every gateway call
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<ClusterState>,
}

impl FakeCluster {
    /// A cluster whose pods are always ready
    pub fn healthy() -> Self {
        let cluster = Self::default();
        cluster.set_pods(vec![ready_pod("p-1")]);
        cluster
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut ClusterState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn set_pods(&self, pods: Vec<ClusterObject>) {
        self.with_state(|s| s.default_pods = pods);
    }

    /// Pod listings returned in order before falling back to the default
    pub fn script_pods(&self, script: Vec<Vec<ClusterObject>>) {
        self.with_state(|s| s.pod_script = script.into());
    }

    pub fn add_ingress(&self, ingress: ClusterObject) {
        self.with_state(|s| s.ingresses.push(ingress));
    }

    pub fn add_namespace(&self, namespace: &str) {
        self.with_state(|s| s.namespaces.insert(namespace.to_string()));
    }

    pub fn set_logs(&self, current: &str, previous: &str) {
        self.with_state(|s| {
            s.logs = current.to_string();
            s.previous_logs = previous.to_string();
        });
    }

    pub fn fail_auth(&self) {
        self.with_state(|s| s.fail_auth = true);
    }

    pub fn fail_apply(&self) {
        self.with_state(|s| s.fail_apply = true);
    }

    pub fn fail_cleanup(&self) {
        self.with_state(|s| s.fail_cleanup = true);
    }

    pub fn calls(&self) -> Vec<String> {
        self.with_state(|s| s.calls.clone())
    }

    pub fn applied(&self) -> Vec<String> {
        self.with_state(|s| s.applied.clone())
    }

    /// Calls that change the cluster
    pub fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| {
                ["create_", "delete_", "apply"]
                    .iter()
                    .any(|prefix| c.starts_with(prefix))
            })
            .collect()
    }

    fn record(&self, call: String) {
        self.with_state(|s| s.calls.push(call));
    }
}

#[async_trait]
impl ClusterGateway for FakeCluster {
    async fn authenticate(&self, cluster: &Cluster) -> Result<ClusterContext, ControllerError> {
        self.record(format!("authenticate:{}", cluster.slug));
        if self.with_state(|s| s.fail_auth) {
            return Err(ControllerError::AuthError("credentials rejected".to_string()));
        }
        Ok(ClusterContext {
            cluster_slug: cluster.slug.clone(),
            context: cluster.context.clone(),
            kubeconfig: None,
        })
    }

    async fn namespace_exists(
        &self,
        _ctx: &ClusterContext,
        namespace: &str,
    ) -> Result<bool, ControllerError> {
        self.record(format!("namespace_exists:{}", namespace));
        Ok(self.with_state(|s| s.namespaces.contains(namespace)))
    }

    async fn create_namespace(
        &self,
        _ctx: &ClusterContext,
        namespace: &str,
        _manifest: &str,
    ) -> Result<(), ControllerError> {
        self.record(format!("create_namespace:{}", namespace));
        self.with_state(|s| s.namespaces.insert(namespace.to_string()));
        Ok(())
    }

    async fn delete_namespace(
        &self,
        _ctx: &ClusterContext,
        namespace: &str,
    ) -> Result<(), ControllerError> {
        self.record(format!("delete_namespace:{}", namespace));
        self.with_state(|s| s.namespaces.remove(namespace));
        Ok(())
    }

    async fn create_image_pull_secret(
        &self,
        _ctx: &ClusterContext,
        namespace: &str,
        secret: &PullSecret,
    ) -> Result<(), ControllerError> {
        self.record(format!("create_pull_secret:{}:{}", namespace, secret.name));
        Ok(())
    }

    async fn apply_manifest(
        &self,
        _ctx: &ClusterContext,
        manifest: &str,
    ) -> Result<(), ControllerError> {
        self.record("apply".to_string());
        if self.with_state(|s| s.fail_apply) {
            return Err(ControllerError::ApplyError("admission webhook denied".to_string()));
        }
        self.with_state(|s| s.applied.push(manifest.to_string()));
        Ok(())
    }

    async fn list_by_label(
        &self,
        _ctx: &ClusterContext,
        kind: ResourceKind,
        scope: &Scope,
        selector: Option<&str>,
    ) -> Result<Vec<ClusterObject>, ControllerError> {
        self.record(format!("list:{}:{}", kind, selector.unwrap_or("")));
        Ok(self.with_state(|s| match kind {
            ResourceKind::Ingress => s
                .ingresses
                .iter()
                .filter(|i| match scope {
                    Scope::AllNamespaces => true,
                    Scope::Namespace(ns) => i.metadata.namespace.as_deref() == Some(ns),
                })
                .cloned()
                .collect(),
            ResourceKind::Pod => s
                .pod_script
                .pop_front()
                .unwrap_or_else(|| s.default_pods.clone()),
            _ => Vec::new(),
        }))
    }

    async fn delete_by_label(
        &self,
        _ctx: &ClusterContext,
        kind: ResourceKind,
        namespace: &str,
        selector: &str,
    ) -> Result<(), ControllerError> {
        self.record(format!("delete_by_label:{}:{}:{}", kind, namespace, selector));
        if self.with_state(|s| s.fail_cleanup) {
            return Err(ControllerError::ClusterError("forbidden".to_string()));
        }
        Ok(())
    }

    async fn get_pod_logs(
        &self,
        _ctx: &ClusterContext,
        _namespace: &str,
        selector: &str,
        previous: bool,
    ) -> Result<String, ControllerError> {
        self.record(format!("logs:{}:{}", selector, previous));
        Ok(self.with_state(|s| {
            if previous {
                s.previous_logs.clone()
            } else {
                s.logs.clone()
            }
        }))
    }
}

pub fn ready_pod(name: &str) -> ClusterObject {
    pod(name, "True", None)
}

pub fn crashing_pod(name: &str) -> ClusterObject {
    pod(name, "False", Some("ContainersNotReady"))
}

fn pod(name: &str, status: &str, reason: Option<&str>) -> ClusterObject {
    serde_json::from_value(json!({
        "metadata": {"name": name},
        "status": {"conditions": [{"type": "Ready", "status": status, "reason": reason}]}
    }))
    .unwrap()
}

pub fn ingress(namespace: &str, name: &str, hosts: &[&str]) -> ClusterObject {
    let rules: Vec<_> = hosts.iter().map(|h| json!({"host": h})).collect();
    serde_json::from_value(json!({
        "metadata": {"name": name, "namespace": namespace},
        "spec": {"rules": rules}
    }))
    .unwrap()
}

// ================================ WEBHOOKS ====================================== //

/// Records triggers instead of delivering them
#[derive(Default)]
pub struct RecordingDispatcher {
    triggered: Mutex<Vec<(String, WebhookOutcome)>>,
}

impl RecordingDispatcher {
    pub fn triggered(&self) -> Vec<(String, WebhookOutcome)> {
        self.triggered.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebhookDispatcher for RecordingDispatcher {
    async fn trigger(
        &self,
        webhook_id: &str,
        outcome: WebhookOutcome,
    ) -> Result<(), ControllerError> {
        self.triggered
            .lock()
            .unwrap()
            .push((webhook_id.to_string(), outcome));
        Ok(())
    }
}

// ================================= BUILDS ======================================= //

/// Build engine that "builds" instantly, recording the build in the store
pub struct FakeBuilder {
    store: Arc<MemoryStore>,
    fail_with: Mutex<Option<String>>,
    stopped: Mutex<Vec<(String, String)>>,
}

impl FakeBuilder {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            fail_with: Mutex::new(None),
            stopped: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_with(&self, message: &str) {
        *self.fail_with.lock().unwrap() = Some(message.to_string());
    }

    pub fn stopped(&self) -> Vec<(String, String)> {
        self.stopped.lock().unwrap().clone()
    }
}

#[async_trait]
impl BuildEngineExt for FakeBuilder {
    async fn start_build(
        &self,
        params: StartBuildParams,
    ) -> Result<BuildOutcome, ControllerError> {
        let tag = params.tag.clone().unwrap_or_else(|| "generated".to_string());
        let build = Build::new(
            &params.app.slug,
            &params.app.project_slug,
            &params.env,
            &params.branch,
            &tag,
        );
        self.store.create_build(&build).await?;

        let failure = self.fail_with.lock().unwrap().clone();
        if let Some(message) = failure {
            self.store
                .update_build_status(&build.id, BuildStatus::Failed, None)
                .await?;
            return Err(ControllerError::BuildError(message));
        }

        let image_base = params
            .app
            .environment(&params.env)
            .and_then(|c| c.image_url.clone())
            .unwrap_or_default();
        let image = tagged_image(&image_base, &tag);
        self.store
            .update_build_status(&build.id, BuildStatus::Success, Some(&image))
            .await?;

        let mut build = build;
        build.status = BuildStatus::Success;
        build.image = Some(image.clone());
        Ok(BuildOutcome { build, image })
    }

    async fn stop_build(&self, app_slug: &str, build_slug: &str) -> Result<(), ControllerError> {
        self.stopped
            .lock()
            .unwrap()
            .push((app_slug.to_string(), build_slug.to_string()));
        Ok(())
    }
}

// ================================ ALLOCATOR ===================================== //

pub struct FixedAllocator(pub &'static str);

#[async_trait]
impl SubdomainAllocator for FixedAllocator {
    async fn allocate(&self, label: &str) -> Result<String, ControllerError> {
        Ok(format!("{}.{}", label, self.0))
    }
}

// ================================ FIXTURES ====================================== //

pub fn cluster() -> Cluster {
    Cluster {
        slug: "k1".to_string(),
        name: "Primary".to_string(),
        context: None,
        kubeconfig: None,
    }
}

pub fn registry() -> ContainerRegistry {
    ContainerRegistry {
        slug: "ghcr".to_string(),
        host: "ghcr.io".to_string(),
        username: Some("bot".to_string()),
        password: Some("hunter2".to_string()),
        image_pull_secret: None,
    }
}

pub fn env_config() -> DeployEnvironmentConfig {
    DeployEnvironmentConfig {
        cluster: Some("k1".to_string()),
        registry: Some("ghcr".to_string()),
        image_url: Some("ghcr.io/demo/web".to_string()),
        port: Some(3000),
        ..Default::default()
    }
}

pub fn prod_config() -> DeployEnvironmentConfig {
    DeployEnvironmentConfig {
        domains: vec!["a.com".to_string(), "b.com".to_string()],
        ssl: Some(SslMode::Letsencrypt),
        redirect: true,
        ..env_config()
    }
}

pub fn app(project: &str, slug: &str, envs: &[(&str, DeployEnvironmentConfig)]) -> AppConfig {
    AppConfig {
        name: slug.to_string(),
        slug: slug.to_string(),
        project_slug: project.to_string(),
        git_url: Some(format!("https://git.example.com/{}/{}.git", project, slug)),
        deploy_environment: envs
            .iter()
            .map(|(name, config)| (name.to_string(), config.clone()))
            .collect::<BTreeMap<_, _>>(),
    }
}

/// Readiness bounds small enough for tests
pub fn fast_policy() -> ReadinessPolicy {
    ReadinessPolicy {
        interval: Duration::from_millis(2),
        max_attempts: 6,
        not_ready_threshold: 3,
    }
}

// ================================= HARNESS ====================================== //

/// Coordinator wired to fakes
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub cluster: Arc<FakeCluster>,
    pub webhooks: Arc<RecordingDispatcher>,
    pub builder: Arc<FakeBuilder>,
    pub sink: Arc<ChannelSink>,
    pub controller: Arc<RolloutController>,
    pub queue: RolloutQueue,
    pub coordinator: DeployCoordinator,
    pub workspace: tempfile::TempDir,
}

impl Harness {
    pub fn new(cluster: FakeCluster) -> Self {
        Self::with_allocator(cluster, None)
    }

    pub fn with_allocator(
        fake: FakeCluster,
        allocator: Option<Arc<dyn SubdomainAllocator>>,
    ) -> Self {
        let store = Arc::new(MemoryStore::new());
        store.insert_cluster(cluster());
        store.insert_registry(registry());

        let cluster = Arc::new(fake);
        let webhooks = Arc::new(RecordingDispatcher::default());
        let builder = Arc::new(FakeBuilder::new(store.clone()));
        let sink = Arc::new(ChannelSink::new(4096));
        let controller = Arc::new(RolloutController::new(
            cluster.clone(),
            store.clone(),
            webhooks.clone(),
            sink.clone(),
            fast_policy(),
        ));
        let queue = RolloutQueue::start();
        let workspace = tempfile::tempdir().unwrap();

        let coordinator = DeployCoordinator::new(
            store.clone(),
            builder.clone(),
            ManifestGenerator::new(allocator),
            controller.clone(),
            queue.clone(),
            StorageLayout::new(workspace.path()),
        );

        Self {
            store,
            cluster,
            webhooks,
            builder,
            sink,
            controller,
            queue,
            coordinator,
            workspace,
        }
    }
}
