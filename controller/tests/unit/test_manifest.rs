//! Manifest generator tests

use std::sync::Arc;

use serde::Deserialize;

use dockyard::errors::ControllerError;
use dockyard::manifest::ingress::ANNOTATION_SNIPPET;
use dockyard::manifest::{GenerateParams, GeneratedManifests, ManifestGenerator};
use dockyard::models::{DeployEnvironmentConfig, ResourceSize, SslMode};

use crate::common::{app, cluster, env_config, prod_config, registry, FixedAllocator};

async fn generate(
    generator: &ManifestGenerator,
    project: &str,
    slug: &str,
    config: &DeployEnvironmentConfig,
) -> Result<GeneratedManifests, ControllerError> {
    let app = app(project, slug, &[("prod", config.clone())]);
    let cluster = cluster();
    let registry = registry();
    generator
        .generate(&GenerateParams {
            app: &app,
            env: "prod",
            config,
            cluster: Some(&cluster),
            registry: Some(&registry),
            image: "ghcr.io/demo/web",
            build_tag: "abc123",
        })
        .await
}

/// The first document of `kind` in a multi-document bundle
fn document(bundle: &str, kind: &str) -> Option<serde_yaml::Value> {
    serde_yaml::Deserializer::from_str(bundle)
        .map(|doc| serde_yaml::Value::deserialize(doc).unwrap())
        .find(|doc| doc["kind"].as_str() == Some(kind))
}

#[tokio::test]
async fn test_redirect_snippet_for_secondary_domain() {
    let generated = generate(&ManifestGenerator::default(), "demo", "web", &prod_config())
        .await
        .unwrap();

    let ingress = document(&generated.deployment_yaml, "Ingress").unwrap();
    let snippet = ingress["metadata"]["annotations"][ANNOTATION_SNIPPET]
        .as_str()
        .unwrap();
    assert!(snippet.contains("if ($host = 'b.com') { return 301 https://a.com$request_uri; }"));
    assert!(!snippet.contains("'a.com'"));

    let hosts: Vec<&str> = ingress["spec"]["rules"]
        .as_sequence()
        .unwrap()
        .iter()
        .filter_map(|rule| rule["host"].as_str())
        .collect();
    assert_eq!(hosts, vec!["a.com", "b.com"]);
    assert_eq!(generated.endpoint.as_deref(), Some("https://a.com"));
}

#[tokio::test]
async fn test_generation_is_byte_identical() {
    let generator = ManifestGenerator::default();
    let first = generate(&generator, "demo", "web", &prod_config()).await.unwrap();
    let second = generate(&generator, "demo", "web", &prod_config()).await.unwrap();
    assert_eq!(first.namespace_yaml, second.namespace_yaml);
    assert_eq!(first.deployment_yaml, second.deployment_yaml);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_labels_and_names() {
    let generated = generate(&ManifestGenerator::default(), "demo", "web", &env_config())
        .await
        .unwrap();
    assert_eq!(generated.deployment_name, "demo-web");
    assert_eq!(generated.app_version, "demo-web-abc123");
    assert_eq!(generated.namespace, "demo-prod");
    assert_eq!(generated.image, "ghcr.io/demo/web:abc123");
    assert_eq!(generated.version_selector(), "app=demo-web-abc123");

    let deployment = document(&generated.deployment_yaml, "Deployment").unwrap();
    assert_eq!(
        deployment["metadata"]["labels"]["app"].as_str(),
        Some("demo-web-abc123")
    );
    assert_eq!(
        deployment["metadata"]["labels"]["main-app"].as_str(),
        Some("demo-web")
    );
    assert_eq!(deployment["metadata"]["namespace"].as_str(), Some("demo-prod"));

    // No domains and no allocator: no Ingress at all
    assert!(document(&generated.deployment_yaml, "Ingress").is_none());
    assert!(generated.endpoint.is_none());
}

#[tokio::test]
async fn test_resource_tiers_double() {
    fn cpu_millis(generated: &GeneratedManifests) -> u64 {
        let deployment = document(&generated.deployment_yaml, "Deployment").unwrap();
        let cpu = deployment["spec"]["template"]["spec"]["containers"][0]["resources"]["requests"]
            ["cpu"]
            .as_str()
            .unwrap()
            .to_string();
        cpu.trim_end_matches('m').parse().unwrap()
    }

    let generator = ManifestGenerator::default();
    let mut previous = None;
    for tier in 1..=4u8 {
        let config = DeployEnvironmentConfig {
            size: ResourceSize::Tier(tier),
            ..env_config()
        };
        let cpu = cpu_millis(&generate(&generator, "demo", "web", &config).await.unwrap());
        if let Some(previous) = previous {
            assert_eq!(cpu, previous * 2, "tier {}x", tier);
        }
        previous = Some(cpu);
    }
}

#[tokio::test]
async fn test_name_too_long() {
    let project = "p".repeat(40);
    let slug = "a".repeat(30);
    let result = generate(&ManifestGenerator::default(), &project, &slug, &env_config()).await;
    assert!(matches!(result, Err(ControllerError::NameTooLong { limit: 63, .. })));
}

#[tokio::test]
async fn test_allocated_subdomain_without_domains() {
    let generator = ManifestGenerator::new(Some(Arc::new(FixedAllocator("apps.test"))));
    let generated = generate(&generator, "demo", "web", &env_config()).await.unwrap();
    assert_eq!(generated.domains, vec!["demo-web-prod.apps.test"]);
    assert_eq!(generated.ssl, Some(SslMode::Letsencrypt));
    assert_eq!(
        generated.endpoint.as_deref(),
        Some("https://demo-web-prod.apps.test")
    );
    assert!(document(&generated.deployment_yaml, "Ingress").is_some());
}

#[tokio::test]
async fn test_missing_inputs_reported_together() {
    let config = DeployEnvironmentConfig {
        domains: vec!["a.com".to_string()],
        ..Default::default()
    };
    let app = app("demo", "web", &[]);
    let result = ManifestGenerator::default()
        .generate(&GenerateParams {
            app: &app,
            env: "prod",
            config: &config,
            cluster: None,
            registry: None,
            image: "",
            build_tag: "abc123",
        })
        .await;

    match result {
        Err(ControllerError::ValidationError(problems)) => {
            assert!(problems.iter().any(|p| p.contains("cluster")));
            assert!(problems.iter().any(|p| p.contains("registry")));
            assert!(problems.iter().any(|p| p.contains("port")));
            assert!(problems.iter().any(|p| p.contains("image")));
            assert!(problems.iter().any(|p| p.contains("ssl")));
        }
        other => panic!("expected validation error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_redirect_turned_off_drops_inherited_snippet() {
    let generator = ManifestGenerator::default();
    let first = generate(&generator, "demo", "web", &prod_config()).await.unwrap();

    let mut with_tuning = document(&first.deployment_yaml, "Ingress").unwrap();
    with_tuning["metadata"]["annotations"]["nginx.ingress.kubernetes.io/proxy-read-timeout"] =
        serde_yaml::Value::from("600");
    let config = DeployEnvironmentConfig {
        redirect: false,
        inherit_ingress: true,
        deployment_yaml: Some(serde_yaml::to_string(&with_tuning).unwrap()),
        ..prod_config()
    };
    let second = generate(&generator, "demo", "web", &config).await.unwrap();

    assert!(!second.deployment_yaml.contains("return 301"));
    let ingress = document(&second.deployment_yaml, "Ingress").unwrap();
    let annotations = &ingress["metadata"]["annotations"];
    assert!(annotations.get(ANNOTATION_SNIPPET).is_none());
    assert_eq!(
        annotations["nginx.ingress.kubernetes.io/proxy-read-timeout"].as_str(),
        Some("600")
    );
}
