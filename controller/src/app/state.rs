//! Application state management

use std::sync::Arc;

use futures::future::join_all;
use tracing::info;

use crate::app::options::AppOptions;
use crate::build::{BuildEngine, BuildEngineExt, BuildProcessRegistry};
use crate::cluster::{ClusterGateway, KubectlGateway};
use crate::deploy::DeployCoordinator;
use crate::errors::ControllerError;
use crate::events::{ChannelSink, EventSink};
use crate::manifest::domains::{
    HttpSubdomainAllocator, StaticSubdomainAllocator, SubdomainAllocator,
};
use crate::manifest::ManifestGenerator;
use crate::rollout::{RolloutController, RolloutQueue};
use crate::store::{HttpStore, MemoryStore, MetadataStore};
use crate::webhook::{HttpWebhookDispatcher, WebhookDispatcher};

/// Main application state. One build registry, one rollout queue and one
/// event sink per running instance.
pub struct AppState {
    pub store: Arc<dyn MetadataStore>,
    pub sink: Arc<ChannelSink>,
    pub builds: Arc<BuildProcessRegistry>,
    pub queue: RolloutQueue,
    pub coordinator: Arc<DeployCoordinator>,
}

impl AppState {
    /// Initialize application state
    pub async fn init(options: &AppOptions) -> Result<Self, ControllerError> {
        info!("Initializing application state...");
        options.layout.setup().await?;

        let store: Arc<dyn MetadataStore> = match &options.store.base_url {
            Some(url) => {
                info!("Using metadata store at {}", url);
                Arc::new(HttpStore::new(url, options.store.token.clone())?)
            }
            None => {
                info!("No metadata store configured, using the in-memory store");
                Arc::new(MemoryStore::new())
            }
        };

        let sink = Arc::new(ChannelSink::default());
        let builds = Arc::new(BuildProcessRegistry::new());
        let queue = RolloutQueue::start();

        let builder: Arc<dyn BuildEngineExt> = Arc::new(BuildEngine::new(
            store.clone(),
            builds.clone(),
            sink.clone(),
            options.layout.clone(),
            options.build.clone(),
        ));

        let gateway: Arc<dyn ClusterGateway> = Arc::new(KubectlGateway::new(
            &options.kubectl_binary,
            &options.layout.kubeconfig_dir(),
        ));
        let webhooks: Arc<dyn WebhookDispatcher> = Arc::new(HttpWebhookDispatcher::new(
            store.clone(),
            options.webhooks.max_attempts,
            std::time::Duration::from_millis(options.webhooks.base_delay_ms),
        )?);
        let event_sink: Arc<dyn EventSink> = sink.clone();
        let controller = Arc::new(RolloutController::new(
            gateway,
            store.clone(),
            webhooks,
            event_sink,
            options.readiness.clone(),
        ));

        let generator = ManifestGenerator::new(subdomain_allocator(options)?);
        let coordinator = Arc::new(DeployCoordinator::new(
            store.clone(),
            builder,
            generator,
            controller,
            queue.clone(),
            options.layout.clone(),
        ));

        Ok(Self {
            store,
            sink,
            builds,
            queue,
            coordinator,
        })
    }

    /// Stop accepting rollouts and stop running builds
    pub async fn shutdown(&self) -> Result<(), ControllerError> {
        info!("Shutting down application state...");
        self.queue.close();

        let running = self.builds.running_builds();
        if !running.is_empty() {
            info!("Stopping {} running build(s)", running.len());
        }
        let stops = running
            .iter()
            .map(|(app_slug, build_slug)| self.coordinator.stop_build(app_slug, build_slug));
        for result in join_all(stops).await {
            result?;
        }
        Ok(())
    }
}

fn subdomain_allocator(
    options: &AppOptions,
) -> Result<Option<Arc<dyn SubdomainAllocator>>, ControllerError> {
    let allocator: Option<Arc<dyn SubdomainAllocator>> = match (
        &options.domains.allocator_url,
        &options.domains.base_domain,
    ) {
        (Some(url), _) => Some(Arc::new(HttpSubdomainAllocator::new(url)?)),
        (None, Some(base)) => Some(Arc::new(StaticSubdomainAllocator::new(base))),
        (None, None) => None,
    };
    Ok(allocator)
}
