//! Manifest generation
//!
//! Turns a deploy environment into a Namespace document and a
//! multi-document bundle of Ingress, Service, Deployment and claims.
//! Generation is pure apart from subdomain allocation: identical inputs
//! yield byte-identical YAML.

pub mod domains;
pub mod ingress;
pub mod naming;
pub mod objects;
pub mod resources;
pub mod workload;

use std::sync::Arc;

use tracing::{debug, info};

use crate::errors::ControllerError;
use crate::manifest::domains::SubdomainAllocator;
use crate::manifest::ingress::{build_ingress, previous_annotations, IngressParams};
use crate::manifest::naming::{
    app_version, default_namespace, deployment_name, object_labels, tagged_image,
};
use crate::manifest::objects::{
    to_multi_document_yaml, BundleDocument, Labels, Namespace, ObjectMeta,
};
use crate::manifest::workload::{build_claims, build_deployment, build_service, WorkloadParams};
use crate::models::{AppConfig, Cluster, ContainerRegistry, DeployEnvironmentConfig, SslMode};

/// Inputs of one generation
#[derive(Debug, Clone)]
pub struct GenerateParams<'a> {
    pub app: &'a AppConfig,
    pub env: &'a str,

    /// Effective environment; its `deployment_yaml` is the previous bundle
    pub config: &'a DeployEnvironmentConfig,

    pub cluster: Option<&'a Cluster>,
    pub registry: Option<&'a ContainerRegistry>,

    /// Image reference, tagged with `build_tag` unless already pinned
    pub image: &'a str,
    pub build_tag: &'a str,
}

/// Generated documents and the names derived along the way
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedManifests {
    pub namespace: String,
    pub deployment_name: String,
    pub app_version: String,
    pub image: String,

    /// Final domains, including an allocated subdomain
    pub domains: Vec<String>,
    pub ssl: Option<SslMode>,

    /// Public URL of the primary domain
    pub endpoint: Option<String>,

    pub namespace_yaml: String,
    pub deployment_yaml: String,
}

impl GeneratedManifests {
    /// Selector matching the pods of this version
    pub fn version_selector(&self) -> String {
        naming::version_selector(&self.app_version)
    }

    /// Write the generated artifacts back onto the environment so the next
    /// deploy can inherit from them
    pub fn apply_to(&self, config: &mut DeployEnvironmentConfig) {
        config.namespace_yaml = Some(self.namespace_yaml.clone());
        config.deployment_yaml = Some(self.deployment_yaml.clone());
        config.domains = self.domains.clone();
        config.ssl = self.ssl;
    }
}

/// Manifest generator
#[derive(Clone, Default)]
pub struct ManifestGenerator {
    allocator: Option<Arc<dyn SubdomainAllocator>>,
}

impl ManifestGenerator {
    pub fn new(allocator: Option<Arc<dyn SubdomainAllocator>>) -> Self {
        Self { allocator }
    }

    pub async fn generate(
        &self,
        params: &GenerateParams<'_>,
    ) -> Result<GeneratedManifests, ControllerError> {
        let app = params.app;
        let config = params.config;

        // Name bounds are checked before anything else
        let deployment_name = deployment_name(&app.project_slug, &app.slug)?;
        let app_version = app_version(&deployment_name, params.build_tag)?;

        let mut problems = Vec::new();
        if params.cluster.is_none() {
            problems.push("cluster is not set".to_string());
        }
        if params.registry.is_none() {
            problems.push("registry is not set".to_string());
        }
        if config.port.is_none() {
            problems.push("port is not set".to_string());
        }
        if params.image.trim().is_empty() {
            problems.push("image is not set".to_string());
        }
        problems.extend(config.validate());
        let (Some(registry), Some(port), true) =
            (params.registry, config.port, problems.is_empty())
        else {
            return Err(ControllerError::ValidationError(problems));
        };

        let namespace = config
            .namespace
            .clone()
            .unwrap_or_else(|| default_namespace(&app.project_slug, params.env));

        let (domains, ssl) = self.resolve_domains(&deployment_name, params).await?;

        let labels = object_labels(&app_version, &deployment_name, &app.project_slug, params.env);
        let image = tagged_image(params.image, params.build_tag);

        let inherited = match (&config.deployment_yaml, config.inherit_ingress) {
            (Some(previous), true) => previous_annotations(previous)?,
            _ => None,
        };

        let ingress = build_ingress(&IngressParams {
            deployment_name: &deployment_name,
            namespace: &namespace,
            labels: &labels,
            domains: &domains,
            ssl: ssl.unwrap_or(SslMode::None),
            tls_secret: config.tls_secret.as_deref(),
            ingress_class: config.ingress_class.as_deref(),
            redirect: config.redirect,
            port,
            inherited,
        });

        let pull_secret = registry.pull_secret_name();
        let workload = WorkloadParams {
            deployment_name: &deployment_name,
            version: &app_version,
            namespace: &namespace,
            labels: &labels,
            image: &image,
            port,
            replicas: config.replicas,
            resources: resources::requirements(config.size),
            env_vars: &config.env_vars,
            pull_secret: &pull_secret,
            volumes: &config.volumes,
        };

        let documents: Vec<BundleDocument> = [
            ingress.map(BundleDocument::Ingress),
            Some(BundleDocument::Service(build_service(&workload))),
            Some(BundleDocument::Deployment(build_deployment(&workload))),
        ]
        .into_iter()
        .flatten()
        .chain(
            build_claims(&workload)
                .into_iter()
                .map(BundleDocument::PersistentVolumeClaim),
        )
        .collect();

        let namespace_yaml = serde_yaml::to_string(&namespace_document(
            &namespace,
            &app.project_slug,
            params.env,
        ))?;
        let deployment_yaml = to_multi_document_yaml(&documents)?;

        let endpoint = domains.first().map(|domain| {
            let scheme = if ssl.is_some_and(|s| s.is_tls()) {
                "https"
            } else {
                "http"
            };
            format!("{}://{}", scheme, domain)
        });

        info!(
            "Generated {} documents for {} in namespace {}",
            documents.len(),
            app_version,
            namespace
        );

        Ok(GeneratedManifests {
            namespace,
            deployment_name,
            app_version,
            image,
            domains,
            ssl,
            endpoint,
            namespace_yaml,
            deployment_yaml,
        })
    }

    /// Configured domains, or a freshly allocated platform subdomain
    async fn resolve_domains(
        &self,
        deployment_name: &str,
        params: &GenerateParams<'_>,
    ) -> Result<(Vec<String>, Option<SslMode>), ControllerError> {
        let config = params.config;
        if !config.domains.is_empty() {
            return Ok((config.domains.clone(), config.ssl));
        }

        let Some(allocator) = &self.allocator else {
            debug!("No domains for {}, generating a cluster-internal workload", deployment_name);
            return Ok((Vec::new(), config.ssl));
        };

        let label = format!("{}-{}", deployment_name, params.env);
        let domain = allocator.allocate(&label).await?;
        Ok((
            vec![domain],
            Some(config.ssl.unwrap_or(SslMode::Letsencrypt)),
        ))
    }
}

fn namespace_document(name: &str, project: &str, env: &str) -> Namespace {
    let labels = Labels::from([
        ("project".to_string(), project.to_string()),
        ("env".to_string(), env.to_string()),
    ]);
    Namespace {
        api_version: "v1".to_string(),
        kind: "Namespace".to_string(),
        metadata: ObjectMeta::named(name, None, &labels),
    }
}
