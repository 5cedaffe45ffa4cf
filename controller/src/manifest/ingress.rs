//! Ingress synthesis and annotation inheritance

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::debug;

use crate::errors::ControllerError;
use crate::manifest::objects::{
    HttpIngressPath, HttpIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTls, Labels, ObjectMeta, ServiceBackendPort,
};
use crate::models::SslMode;

pub const DEFAULT_INGRESS_CLASS: &str = "nginx";
pub const CLUSTER_ISSUER: &str = "letsencrypt-prod";

pub const ANNOTATION_BODY_SIZE: &str = "nginx.ingress.kubernetes.io/proxy-body-size";
pub const ANNOTATION_SSL_REDIRECT: &str = "nginx.ingress.kubernetes.io/ssl-redirect";
pub const ANNOTATION_SNIPPET: &str = "nginx.ingress.kubernetes.io/configuration-snippet";
pub const ANNOTATION_ISSUER: &str = "cert-manager.io/cluster-issuer";

/// Everything the Ingress depends on
#[derive(Debug, Clone)]
pub struct IngressParams<'a> {
    pub deployment_name: &'a str,
    pub namespace: &'a str,
    pub labels: &'a Labels,
    pub domains: &'a [String],
    pub ssl: SslMode,
    pub tls_secret: Option<&'a str>,
    pub ingress_class: Option<&'a str>,
    pub redirect: bool,
    pub port: u16,

    /// Annotations of the previously applied Ingress, when inheriting
    pub inherited: Option<BTreeMap<String, String>>,
}

/// Build the Ingress, or `None` for a cluster-internal environment
pub fn build_ingress(params: &IngressParams<'_>) -> Option<Ingress> {
    if params.domains.is_empty() {
        return None;
    }

    let mut metadata = ObjectMeta::named(
        params.deployment_name,
        Some(params.namespace),
        params.labels,
    );
    metadata.annotations = annotations(params);

    let tls = tls_secret_name(params)
        .map(|secret_name| {
            vec![IngressTls {
                hosts: params.domains.to_vec(),
                secret_name,
            }]
        })
        .unwrap_or_default();

    let rules = params
        .domains
        .iter()
        .map(|host| IngressRule {
            host: host.clone(),
            http: HttpIngressRuleValue {
                paths: vec![HttpIngressPath {
                    path: "/".to_string(),
                    path_type: "Prefix".to_string(),
                    backend: IngressBackend {
                        service: IngressServiceBackend {
                            name: params.deployment_name.to_string(),
                            port: ServiceBackendPort {
                                number: params.port,
                            },
                        },
                    },
                }],
            },
        })
        .collect();

    Some(Ingress {
        api_version: "networking.k8s.io/v1".to_string(),
        kind: "Ingress".to_string(),
        metadata,
        spec: IngressSpec {
            ingress_class_name: Some(
                params
                    .ingress_class
                    .unwrap_or(DEFAULT_INGRESS_CLASS)
                    .to_string(),
            ),
            tls,
            rules,
        },
    })
}

fn tls_secret_name(params: &IngressParams<'_>) -> Option<String> {
    match params.ssl {
        SslMode::Letsencrypt => Some(format!("tls-{}", params.deployment_name)),
        SslMode::Custom => params.tls_secret.map(str::to_string),
        SslMode::None => None,
    }
}

const GENERATED_ANNOTATIONS: [&str; 4] = [
    ANNOTATION_BODY_SIZE,
    ANNOTATION_SSL_REDIRECT,
    ANNOTATION_ISSUER,
    ANNOTATION_SNIPPET,
];

/// Inherited annotations first, generated ones layered on top
fn annotations(params: &IngressParams<'_>) -> BTreeMap<String, String> {
    let mut annotations = params.inherited.clone().unwrap_or_default();
    // Keys this generator owns never carry over from a previous bundle
    for key in GENERATED_ANNOTATIONS {
        annotations.remove(key);
    }

    annotations.insert(ANNOTATION_BODY_SIZE.to_string(), "50m".to_string());
    annotations.insert(
        ANNOTATION_SSL_REDIRECT.to_string(),
        params.ssl.is_tls().to_string(),
    );
    if params.ssl == SslMode::Letsencrypt {
        annotations.insert(ANNOTATION_ISSUER.to_string(), CLUSTER_ISSUER.to_string());
    }
    if let Some(snippet) = redirect_snippet(params.domains, params.redirect, params.ssl) {
        annotations.insert(ANNOTATION_SNIPPET.to_string(), snippet);
    }
    annotations
}

/// nginx snippet sending every secondary domain to the primary one with a 301
pub fn redirect_snippet(domains: &[String], redirect: bool, ssl: SslMode) -> Option<String> {
    let (primary, secondary) = domains.split_first()?;
    if !redirect || secondary.is_empty() {
        return None;
    }
    let scheme = if ssl.is_tls() { "https" } else { "http" };
    let rules: Vec<String> = secondary
        .iter()
        .map(|domain| {
            format!(
                "if ($host = '{}') {{ return 301 {}://{}$request_uri; }}",
                domain, scheme, primary
            )
        })
        .collect();
    Some(rules.join("\n"))
}

#[derive(Debug, Deserialize)]
struct PartialObject {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    metadata: Option<PartialMeta>,
}

#[derive(Debug, Deserialize)]
struct PartialMeta {
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

/// Annotations of the first Ingress in a previously applied bundle
pub fn previous_annotations(
    bundle: &str,
) -> Result<Option<BTreeMap<String, String>>, ControllerError> {
    for document in serde_yaml::Deserializer::from_str(bundle) {
        let object = Option::<PartialObject>::deserialize(document)?;
        let Some(object) = object else {
            continue;
        };
        if object.kind.as_deref() == Some("Ingress") {
            let annotations = object.metadata.map(|m| m.annotations).unwrap_or_default();
            debug!("Inheriting {} ingress annotations", annotations.len());
            return Ok(Some(annotations));
        }
    }
    Ok(None)
}
