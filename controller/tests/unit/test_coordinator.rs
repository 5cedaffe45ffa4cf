//! Deploy coordinator tests

use std::time::Duration;

use dockyard::deploy::merge::APP_CONFIG_FILE;
use dockyard::deploy::{DeployRequest, EnvironmentPatch};
use dockyard::errors::ControllerError;
use dockyard::models::{
    BuildStatus, DeployEnvironmentConfig, DeployStatus, ReleaseStatus, WebhookOutcome,
};
use dockyard::rollout::RolloutQueue;
use dockyard::storage::layout::StorageLayout;
use dockyard::store::MetadataStore;

use crate::common::{app, env_config, prod_config, FakeCluster, Harness};

fn harness_with(config: DeployEnvironmentConfig) -> Harness {
    let h = Harness::new(FakeCluster::healthy());
    h.store.insert_app(app("demo", "web", &[("prod", config)]));
    h
}

fn deploy(tag: &str) -> DeployRequest {
    DeployRequest {
        tag: Some(tag.to_string()),
        ..DeployRequest::new("web", "prod")
    }
}

async fn drain(queue: &RolloutQueue) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while queue.pending() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_build_and_deploy_end_to_end() {
    let h = harness_with(prod_config());

    let outcome = h.coordinator.build_and_deploy(&deploy("abc123")).await.unwrap();
    assert_eq!(outcome.status, DeployStatus::Success);
    assert_eq!(outcome.app_version, "demo-web-abc123");
    assert_eq!(outcome.namespace, "demo-prod");
    assert_eq!(outcome.endpoint.as_deref(), Some("https://a.com"));
    assert!(outcome.warnings.is_empty());

    let calls = h.cluster.calls();
    assert!(calls.contains(&"list:pod:app=demo-web-abc123".to_string()));
    assert!(h.cluster.applied()[0].contains("ghcr.io/demo/web:abc123"));

    let release = h.store.get_release(&outcome.release_id).await.unwrap().unwrap();
    assert_eq!(release.status, ReleaseStatus::Success);
    assert!(release.active);
    assert_eq!(release.build_id, outcome.build_id);

    let builds = h.store.builds_of("web");
    assert_eq!(builds.len(), 1);
    assert_eq!(builds[0].status, BuildStatus::Success);
    assert_eq!(builds[0].deploy_status, Some(DeployStatus::Success));

    assert_eq!(
        h.webhooks.triggered(),
        vec![(outcome.webhook_id.clone(), WebhookOutcome::Success)]
    );
    let webhooks = h.store.webhooks();
    assert_eq!(webhooks.len(), 1);
    assert_eq!(webhooks[0].release_id, outcome.release_id);

    let stored = h.store.get_app("web").await.unwrap();
    let env = stored.environment("prod").unwrap();
    assert_eq!(env.latest_release.as_deref(), Some(outcome.release_id.as_str()));
    assert_eq!(env.deployment_yaml.as_deref(), Some(release.deployment_yaml.as_str()));
}

#[tokio::test]
async fn test_single_active_release() {
    let h = harness_with(env_config());

    let first = h.coordinator.build_and_deploy(&deploy("abc123")).await.unwrap();
    let second = h.coordinator.build_and_deploy(&deploy("def456")).await.unwrap();

    let releases = h.store.list_releases("web").await.unwrap();
    assert_eq!(releases.len(), 2);
    let active: Vec<_> = releases.iter().filter(|r| r.active).collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, second.release_id);

    let first = h.store.get_release(&first.release_id).await.unwrap().unwrap();
    assert!(!first.active);
    assert_eq!(first.status, ReleaseStatus::Success);

    assert!(h
        .cluster
        .calls()
        .contains(&"delete_by_label:deployment:demo-prod:main-app=demo-web,app!=demo-web-def456".to_string()));
}

#[tokio::test]
async fn test_failed_build_creates_no_release() {
    let h = harness_with(env_config());
    h.builder.fail_with("invalid reference format: repository name must be lowercase");

    let result = h.coordinator.build_and_deploy(&deploy("abc123")).await;
    assert!(matches!(result, Err(ControllerError::BuildError(_))));

    assert!(h.store.list_releases("web").await.unwrap().is_empty());
    assert!(h.store.webhooks().is_empty());
    assert!(h.webhooks.triggered().is_empty());
    assert!(h.cluster.calls().is_empty());
    assert_eq!(h.store.builds_of("web")[0].status, BuildStatus::Failed);
}

#[tokio::test]
async fn test_prebuilt_image_skips_the_build() {
    let h = harness_with(env_config());
    let request = DeployRequest {
        image: Some("ghcr.io/demo/web:v1.2.0".to_string()),
        ..deploy("v1")
    };

    let outcome = h.coordinator.build_and_deploy(&request).await.unwrap();
    assert_eq!(outcome.app_version, "demo-web-v1");

    let builds = h.store.builds_of("web");
    assert_eq!(builds.len(), 1);
    assert_eq!(builds[0].image.as_deref(), Some("ghcr.io/demo/web:v1.2.0"));
    // A pinned tag is kept as is
    assert!(h.cluster.applied()[0].contains("ghcr.io/demo/web:v1.2.0"));
}

#[tokio::test]
async fn test_name_too_long_fails_before_any_work() {
    let h = Harness::new(FakeCluster::healthy());
    let project = "p".repeat(40);
    let slug = "a".repeat(30);
    h.store.insert_app(app(&project, &slug, &[("prod", env_config())]));

    let result = h
        .coordinator
        .build_and_deploy(&DeployRequest::new(&slug, "prod"))
        .await;
    assert!(matches!(result, Err(ControllerError::NameTooLong { .. })));
    assert!(h.cluster.calls().is_empty());
    assert!(h.store.builds_of(&slug).is_empty());
}

#[tokio::test]
async fn test_long_tag_fails_before_the_build() {
    let h = harness_with(env_config());
    let tag = "t".repeat(60);

    let result = h.coordinator.build_and_deploy(&deploy(&tag)).await;
    assert!(matches!(result, Err(ControllerError::NameTooLong { limit: 63, .. })));
    assert!(h.store.builds_of("web").is_empty());
    assert!(h.cluster.calls().is_empty());
}

#[tokio::test]
async fn test_validation_reports_every_problem() {
    let h = harness_with(DeployEnvironmentConfig::default());

    match h.coordinator.build_and_deploy(&deploy("abc123")).await {
        Err(ControllerError::ValidationError(problems)) => {
            assert_eq!(problems.len(), 4, "{:?}", problems);
            assert!(problems.contains(&"cluster is not set".to_string()));
            assert!(problems.contains(&"registry is not set".to_string()));
            assert!(problems.contains(&"port is not set".to_string()));
            assert!(problems.contains(&"imageUrl is not set".to_string()));
        }
        other => panic!("expected validation error, got {:?}", other),
    }
    assert!(h.store.list_releases("web").await.unwrap().is_empty());
    assert!(h.webhooks.triggered().is_empty());
    assert!(h.cluster.calls().is_empty());
    assert_eq!(
        h.store.builds_of("web")[0].deploy_status,
        Some(DeployStatus::Failed)
    );
}

#[tokio::test]
async fn test_prebuilt_image_needs_no_image_base() {
    let config = DeployEnvironmentConfig {
        image_url: None,
        ..env_config()
    };
    let h = harness_with(config);
    let request = DeployRequest {
        image: Some("nginx:1.27".to_string()),
        ..deploy("v1")
    };

    let outcome = h.coordinator.build_and_deploy(&request).await.unwrap();
    assert_eq!(outcome.status, DeployStatus::Success);
    assert!(h.cluster.applied()[0].contains("nginx:1.27"));
}

#[tokio::test]
async fn test_unknown_cluster_is_reported() {
    let config = DeployEnvironmentConfig {
        cluster: Some("nowhere".to_string()),
        ..env_config()
    };
    let h = harness_with(config);

    match h.coordinator.build_and_deploy(&deploy("abc123")).await {
        Err(ControllerError::ValidationError(problems)) => {
            assert_eq!(problems, vec!["cluster nowhere not found".to_string()]);
        }
        other => panic!("expected validation error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_background_deploy() {
    let h = harness_with(env_config());
    let request = DeployRequest {
        deploy_in_background: true,
        ..deploy("abc123")
    };

    let outcome = h.coordinator.build_and_deploy(&request).await.unwrap();
    assert_eq!(outcome.status, DeployStatus::InProgress);

    drain(&h.queue).await;
    let release = h.store.get_release(&outcome.release_id).await.unwrap().unwrap();
    assert_eq!(release.status, ReleaseStatus::Success);
    assert!(release.active);
    assert_eq!(
        h.store.builds_of("web")[0].deploy_status,
        Some(DeployStatus::Success)
    );
    assert_eq!(h.webhooks.triggered().len(), 1);
}

#[tokio::test]
async fn test_background_failure_is_recorded() {
    let cluster = FakeCluster::healthy();
    cluster.fail_apply();
    let h = Harness::new(cluster);
    h.store.insert_app(app("demo", "web", &[("prod", env_config())]));
    let request = DeployRequest {
        deploy_in_background: true,
        ..deploy("abc123")
    };

    let outcome = h.coordinator.build_and_deploy(&request).await.unwrap();
    drain(&h.queue).await;

    let release = h.store.get_release(&outcome.release_id).await.unwrap().unwrap();
    assert_eq!(release.status, ReleaseStatus::Failed);
    assert_eq!(
        h.store.builds_of("web")[0].deploy_status,
        Some(DeployStatus::Failed)
    );
    assert_eq!(
        h.webhooks.triggered(),
        vec![(outcome.webhook_id, WebhookOutcome::Failed)]
    );
}

#[tokio::test]
async fn test_closed_queue_rejects_deploys() {
    let h = harness_with(env_config());
    h.queue.close();

    let result = h.coordinator.build_and_deploy(&deploy("abc123")).await;
    assert!(matches!(result, Err(ControllerError::ShutdownError(_))));
    assert!(h.store.list_releases("web").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_layers_file_store_and_request() {
    let h = harness_with(env_config());
    let layout = StorageLayout::new(h.workspace.path());
    let source_dir = layout.source_dir("web", "prod");
    std::fs::create_dir_all(&source_dir).unwrap();
    std::fs::write(
        source_dir.join(APP_CONFIG_FILE),
        r#"{"environments": {"prod": {"replicas": 3, "port": 9000}}}"#,
    )
    .unwrap();

    let request = DeployRequest {
        overrides: Some(EnvironmentPatch {
            domains: Some(vec!["web.example.com".to_string()]),
            ssl: Some(dockyard::models::SslMode::None),
            ..Default::default()
        }),
        ..deploy("abc123")
    };
    let outcome = h.coordinator.build_and_deploy(&request).await.unwrap();
    assert_eq!(outcome.endpoint.as_deref(), Some("http://web.example.com"));

    let bundle = &h.cluster.applied()[0];
    // Replicas from the file, port from the store
    assert!(bundle.contains("replicas: 3"));
    assert!(bundle.contains("containerPort: 3000"));
    assert!(!bundle.contains("9000"));
}

#[tokio::test]
async fn test_unknown_app() {
    let h = Harness::new(FakeCluster::healthy());
    let result = h
        .coordinator
        .build_and_deploy(&DeployRequest::new("ghost", "prod"))
        .await;
    assert!(matches!(result, Err(ControllerError::NotFound(_))));
}

#[tokio::test]
async fn test_stop_build_reaches_the_engine() {
    let h = harness_with(env_config());
    h.coordinator.stop_build("web", "web-abc123").await.unwrap();
    assert_eq!(
        h.builder.stopped(),
        vec![("web".to_string(), "web-abc123".to_string())]
    );
}
