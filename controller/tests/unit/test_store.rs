//! In-memory metadata store tests

use chrono::{Duration, Utc};

use dockyard::errors::ControllerError;
use dockyard::models::{Build, BuildStatus, DeployStatus, Webhook, WebhookOutcome};
use dockyard::store::{MemoryStore, MetadataStore};

use crate::common::{app, env_config};

fn webhook(id: &str) -> Webhook {
    Webhook {
        id: id.to_string(),
        release_id: "rel-1".to_string(),
        consumers: vec!["ops@example.com".to_string()],
        channels: Vec::new(),
        outcome: None,
        triggered_at: None,
    }
}

#[tokio::test]
async fn test_latest_successful_build() {
    let store = MemoryStore::new();

    let mut old = Build::prebuilt("web", "demo", "prod", "ghcr.io/demo/web:1", "1");
    old.created_at = Utc::now() - Duration::minutes(10);
    let new = Build::prebuilt("web", "demo", "prod", "ghcr.io/demo/web:2", "2");
    let failed = Build::new("web", "demo", "prod", "main", "3");
    let other_env = Build::prebuilt("web", "demo", "dev", "ghcr.io/demo/web:4", "4");
    for build in [&old, &new, &failed, &other_env] {
        store.create_build(build).await.unwrap();
    }
    store
        .update_build_status(&failed.id, BuildStatus::Failed, None)
        .await
        .unwrap();

    let latest = store.latest_successful_build("web", "prod").await.unwrap().unwrap();
    assert_eq!(latest.id, new.id);
    assert!(store.latest_successful_build("api", "prod").await.unwrap().is_none());
}

#[tokio::test]
async fn test_terminal_build_status_is_final() {
    let store = MemoryStore::new();
    let build = Build::new("web", "demo", "prod", "main", "abc123");
    store.create_build(&build).await.unwrap();

    store
        .update_build_status(&build.id, BuildStatus::Building, None)
        .await
        .unwrap();
    store
        .update_build_status(&build.id, BuildStatus::Success, Some("ghcr.io/demo/web:abc123"))
        .await
        .unwrap();
    // Same terminal status again is a no-op
    store
        .update_build_status(&build.id, BuildStatus::Success, None)
        .await
        .unwrap();
    assert!(matches!(
        store
            .update_build_status(&build.id, BuildStatus::Failed, None)
            .await,
        Err(ControllerError::StoreError(_))
    ));

    // Deploy status is tracked independently
    store
        .update_build_deploy_status(&build.id, DeployStatus::Failed)
        .await
        .unwrap();
    let stored = store.get_build(&build.id).await.unwrap().unwrap();
    assert_eq!(stored.status, BuildStatus::Success);
    assert_eq!(stored.image.as_deref(), Some("ghcr.io/demo/web:abc123"));
    assert_eq!(stored.deploy_status, Some(DeployStatus::Failed));
}

#[tokio::test]
async fn test_webhook_fires_once() {
    let store = MemoryStore::new();
    store.create_webhook(&webhook("hook-1")).await.unwrap();

    assert!(store
        .mark_webhook_triggered("hook-1", WebhookOutcome::Success)
        .await
        .unwrap());
    assert!(!store
        .mark_webhook_triggered("hook-1", WebhookOutcome::Failed)
        .await
        .unwrap());

    let stored = store.get_webhook("hook-1").await.unwrap().unwrap();
    assert_eq!(stored.outcome, Some(WebhookOutcome::Success));
    assert!(stored.triggered_at.is_some());

    assert!(matches!(
        store
            .mark_webhook_triggered("missing", WebhookOutcome::Success)
            .await,
        Err(ControllerError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_save_environment() {
    let store = MemoryStore::new();
    store.insert_app(app("demo", "web", &[]));

    store.save_environment("web", "prod", &env_config()).await.unwrap();
    let stored = store.get_app("web").await.unwrap();
    assert_eq!(stored.environment("prod"), Some(&env_config()));

    assert!(matches!(
        store.save_environment("api", "prod", &env_config()).await,
        Err(ControllerError::NotFound(_))
    ));
}
