//! Rollout controller tests

use std::time::Instant;

use chrono::Utc;

use dockyard::cluster::{ClusterObject, ResourceKind};
use dockyard::errors::ControllerError;
use dockyard::events::EventKind;
use dockyard::manifest::{GenerateParams, ManifestGenerator};
use dockyard::models::{
    ContainerRegistry, DeployEnvironmentConfig, Release, ReleaseStatus, WebhookOutcome,
};
use dockyard::rollout::{RolloutRequest, RolloutState};
use dockyard::store::MetadataStore;
use dockyard::utils::sha256_hash;

use crate::common::{
    app, cluster, crashing_pod, env_config, fast_policy, ingress, prod_config, ready_pod,
    registry, FakeCluster, Harness,
};

const STALE: &str = "main-app=demo-web,app!=demo-web-abc123";

/// Persist a release of demo/web and return its rollout request
async fn request(h: &Harness, config: DeployEnvironmentConfig, fresh: bool) -> RolloutRequest {
    let app = app("demo", "web", &[("prod", config.clone())]);
    let cluster = cluster();
    let registry = registry();
    let generated = ManifestGenerator::default()
        .generate(&GenerateParams {
            app: &app,
            env: "prod",
            config: &config,
            cluster: Some(&cluster),
            registry: Some(&registry),
            image: "ghcr.io/demo/web",
            build_tag: "abc123",
        })
        .await
        .unwrap();

    let release = Release {
        id: format!("rel-{}", h.store.list_releases("web").await.unwrap().len() + 1),
        build_id: "build-1".to_string(),
        app_slug: "web".to_string(),
        project_slug: "demo".to_string(),
        env: "prod".to_string(),
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
    h.store.create_release(&release).await.unwrap();

    RolloutRequest {
        release,
        domains: generated.domains,
        cluster,
        registry,
        webhook_id: Some("hook-1".to_string()),
        fresh,
    }
}

async fn release(h: &Harness, id: &str) -> Release {
    h.store.get_release(id).await.unwrap().unwrap()
}

fn position(calls: &[String], prefix: &str) -> usize {
    calls
        .iter()
        .position(|c| c.starts_with(prefix))
        .unwrap_or_else(|| panic!("no call starting with {} in {:?}", prefix, calls))
}

#[tokio::test]
async fn test_rollout_succeeds() {
    let h = Harness::new(FakeCluster::healthy());
    let mut events = h.sink.subscribe();
    let req = request(&h, prod_config(), false).await;
    let id = req.release.id.clone();

    let report = h.controller.execute(req).await.unwrap();
    assert_eq!(report.state, RolloutState::Succeeded);
    assert_eq!(report.app_version, "demo-web-abc123");
    assert_eq!(report.endpoint.as_deref(), Some("https://a.com"));
    assert_eq!(report.readiness_attempts, 1);
    assert!(report.warnings.is_empty());
    assert_eq!(
        report.history,
        vec![
            RolloutState::Pending,
            RolloutState::Authenticating,
            RolloutState::EnsuringNamespace,
            RolloutState::EnsuringPullSecret,
            RolloutState::ConflictCheck,
            RolloutState::Applying,
            RolloutState::AwaitingReady,
            RolloutState::Promoting,
            RolloutState::CleaningUp,
            RolloutState::Succeeded,
        ]
    );

    let calls = h.cluster.calls();
    assert!(position(&calls, "authenticate") < position(&calls, "create_namespace:demo-prod"));
    assert!(
        position(&calls, "create_pull_secret:demo-prod:ghcr-docker-registry-key")
            < position(&calls, "list:ingress")
    );
    assert!(position(&calls, "list:ingress") < position(&calls, "apply"));
    assert!(position(&calls, "apply") < position(&calls, "list:pod:app=demo-web-abc123"));
    for kind in [
        ResourceKind::Deployment,
        ResourceKind::Service,
        ResourceKind::Ingress,
    ] {
        let cleanup = format!("delete_by_label:{}:demo-prod:{}", kind, STALE);
        assert!(calls.contains(&cleanup), "missing {}", cleanup);
    }
    assert_eq!(h.cluster.applied().len(), 1);

    let stored = release(&h, &id).await;
    assert_eq!(stored.status, ReleaseStatus::Success);
    assert!(stored.active);
    assert_eq!(
        h.webhooks.triggered(),
        vec![("hook-1".to_string(), WebhookOutcome::Success)]
    );

    let mut last = None;
    while let Ok(event) = events.try_recv() {
        last = Some(event);
    }
    let last = last.unwrap();
    assert!(last.end);
    assert_eq!(last.kind, EventKind::Log);
    assert_eq!(last.room, id);
    assert!(last.message.contains("demo-web-abc123 is live at https://a.com"));
}

#[tokio::test]
async fn test_domain_conflict_blocks_apply() {
    let cluster = FakeCluster::healthy();
    cluster.add_ingress(ingress("other-team", "shop", &["b.com"]));
    let h = Harness::new(cluster);
    let req = request(&h, prod_config(), false).await;
    let id = req.release.id.clone();

    match h.controller.execute(req).await {
        Err(ControllerError::ConflictError {
            domain,
            namespace,
            ingress,
        }) => {
            assert_eq!(domain, "b.com");
            assert_eq!(namespace, "other-team");
            assert_eq!(ingress, "shop");
        }
        other => panic!("expected conflict, got {:?}", other),
    }
    assert!(!h.cluster.calls().iter().any(|c| c == "apply"));
    assert!(h.cluster.applied().is_empty());

    let stored = release(&h, &id).await;
    assert_eq!(stored.status, ReleaseStatus::Failed);
    assert!(!stored.active);
    assert_eq!(
        h.webhooks.triggered(),
        vec![("hook-1".to_string(), WebhookOutcome::Failed)]
    );
}

#[tokio::test]
async fn test_own_namespace_ingress_is_not_a_conflict() {
    let cluster = FakeCluster::healthy();
    cluster.add_ingress(ingress("demo-prod", "demo-web", &["a.com", "b.com"]));
    let h = Harness::new(cluster);
    let req = request(&h, prod_config(), false).await;

    assert!(h.controller.execute(req).await.is_ok());
}

#[tokio::test]
async fn test_readiness_timeout_is_bounded_and_reports_logs() {
    let cluster = FakeCluster::default();
    // Pending pods never become ready
    cluster.set_pods(vec![ClusterObject::default()]);
    cluster.set_logs("", "listen EADDRINUSE :3000");
    let h = Harness::new(cluster);
    let req = request(&h, env_config(), false).await;
    let id = req.release.id.clone();

    let started = Instant::now();
    let result = h.controller.execute(req).await;
    assert!(started.elapsed() < std::time::Duration::from_secs(5));

    match result {
        Err(ControllerError::ReadinessTimeout {
            version,
            waited,
            logs,
        }) => {
            assert_eq!(version, "demo-web-abc123");
            assert_eq!(waited, h.controller.policy().ceiling());
            assert!(logs.contains("EADDRINUSE"));
        }
        other => panic!("expected readiness timeout, got {:?}", other),
    }

    let calls = h.cluster.calls();
    let polls = calls.iter().filter(|c| c.starts_with("list:pod")).count();
    assert_eq!(polls, fast_policy().max_attempts as usize);
    assert!(calls.contains(&"logs:app=demo-web-abc123:true".to_string()));
    // Nothing is promoted or cleaned up
    assert!(!calls.iter().any(|c| c.starts_with("delete_by_label")));
    let stored = release(&h, &id).await;
    assert_eq!(stored.status, ReleaseStatus::Failed);
    assert!(!stored.active);
}

#[tokio::test]
async fn test_crashing_containers_fail_early() {
    let cluster = FakeCluster::default();
    cluster.set_pods(vec![crashing_pod("p-1")]);
    cluster.set_logs("panic: missing DATABASE_URL", "");
    let h = Harness::new(cluster);
    let req = request(&h, env_config(), false).await;

    match h.controller.execute(req).await {
        Err(ControllerError::ReadinessFailed { logs, .. }) => {
            assert!(logs.contains("DATABASE_URL"));
        }
        other => panic!("expected readiness failure, got {:?}", other),
    }
    let polls = h
        .cluster
        .calls()
        .iter()
        .filter(|c| c.starts_with("list:pod"))
        .count();
    assert_eq!(polls, fast_policy().not_ready_threshold as usize);
}

#[tokio::test]
async fn test_pods_become_ready_after_waiting() {
    let cluster = FakeCluster::healthy();
    cluster.script_pods(vec![
        vec![],
        vec![ClusterObject::default()],
        vec![crashing_pod("p-1")],
        vec![ready_pod("p-1"), ready_pod("p-2")],
    ]);
    let h = Harness::new(cluster);
    let req = request(&h, env_config(), false).await;

    let report = h.controller.execute(req).await.unwrap();
    assert_eq!(report.readiness_attempts, 4);
}

#[tokio::test]
async fn test_cleanup_failures_are_warnings() {
    let cluster = FakeCluster::healthy();
    cluster.fail_cleanup();
    let h = Harness::new(cluster);
    let req = request(&h, env_config(), false).await;
    let id = req.release.id.clone();

    let report = h.controller.execute(req).await.unwrap();
    assert_eq!(report.state, RolloutState::Succeeded);
    assert_eq!(report.warnings.len(), 3);
    assert!(report.warnings[0].to_string().contains(STALE));

    let stored = release(&h, &id).await;
    assert_eq!(stored.status, ReleaseStatus::Success);
    assert!(stored.active);
}

#[tokio::test]
async fn test_auth_failure_changes_nothing() {
    let cluster = FakeCluster::healthy();
    cluster.fail_auth();
    let h = Harness::new(cluster);
    let req = request(&h, env_config(), false).await;

    let result = h.controller.execute(req).await;
    assert!(matches!(result, Err(ControllerError::AuthError(_))));
    assert!(h.cluster.mutations().is_empty());
    assert_eq!(
        h.webhooks.triggered(),
        vec![("hook-1".to_string(), WebhookOutcome::Failed)]
    );
}

#[tokio::test]
async fn test_apply_failure_marks_release_failed() {
    let cluster = FakeCluster::healthy();
    cluster.fail_apply();
    let h = Harness::new(cluster);
    let req = request(&h, env_config(), false).await;
    let id = req.release.id.clone();

    let result = h.controller.execute(req).await;
    assert!(matches!(result, Err(ControllerError::ApplyError(_))));
    assert!(!h.cluster.calls().iter().any(|c| c.starts_with("list:pod")));
    assert_eq!(release(&h, &id).await.status, ReleaseStatus::Failed);
}

#[tokio::test]
async fn test_existing_namespace_and_anonymous_registry() {
    let cluster = FakeCluster::healthy();
    cluster.add_namespace("demo-prod");
    let h = Harness::new(cluster);
    let mut req = request(&h, env_config(), false).await;
    req.registry = ContainerRegistry {
        username: None,
        password: None,
        ..registry()
    };

    h.controller.execute(req).await.unwrap();
    let calls = h.cluster.calls();
    assert!(!calls.iter().any(|c| c.starts_with("create_namespace")));
    assert!(!calls.iter().any(|c| c.starts_with("create_pull_secret")));
    // No domains, no conflict listing
    assert!(!calls.iter().any(|c| c.starts_with("list:ingress")));
}

#[tokio::test]
async fn test_fresh_rollout_recreates_namespace() {
    let cluster = FakeCluster::healthy();
    cluster.add_namespace("demo-prod");
    let h = Harness::new(cluster);
    let req = request(&h, prod_config(), true).await;

    h.controller.execute(req).await.unwrap();
    let calls = h.cluster.calls();
    let deleted = position(&calls, "delete_namespace:demo-prod");
    assert!(position(&calls, "list:ingress") < deleted);
    assert!(deleted < position(&calls, "create_namespace:demo-prod"));
    assert!(position(&calls, "create_namespace:demo-prod") < position(&calls, "apply"));
    let secrets = calls
        .iter()
        .filter(|c| c.starts_with("create_pull_secret"))
        .count();
    assert_eq!(secrets, 2);
}
