//! Application and deploy environment models

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// An application and its deploy environments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Display name
    pub name: String,

    /// Unique application slug
    pub slug: String,

    /// Slug of the owning project
    pub project_slug: String,

    /// Source repository, absent for image-only applications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_url: Option<String>,

    /// Deploy environments keyed by name ("dev", "prod", ...)
    #[serde(default)]
    pub deploy_environment: BTreeMap<String, DeployEnvironmentConfig>,
}

impl AppConfig {
    pub fn environment(&self, env: &str) -> Option<&DeployEnvironmentConfig> {
        self.deploy_environment.get(env)
    }
}

/// TLS mode of an environment's ingress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SslMode {
    /// Certificate issued by cert-manager
    Letsencrypt,
    /// Certificate provided in a pre-existing secret
    Custom,
    /// Plain HTTP
    None,
}

impl SslMode {
    pub fn is_tls(&self) -> bool {
        !matches!(self, SslMode::None)
    }
}

/// Container resource tier, "1x" through "10x", or "none" for unbounded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ResourceSize {
    None,
    Tier(u8),
}

impl ResourceSize {
    pub const MAX_TIER: u8 = 10;

    /// Scale factor relative to "1x": 2^(n-1)
    pub fn multiplier(&self) -> Option<u64> {
        match self {
            ResourceSize::None => None,
            ResourceSize::Tier(n) => Some(1u64 << (n - 1)),
        }
    }

    /// All bounded tiers in ascending order
    pub fn tiers() -> impl Iterator<Item = ResourceSize> {
        (1..=Self::MAX_TIER).map(ResourceSize::Tier)
    }
}

impl Default for ResourceSize {
    fn default() -> Self {
        ResourceSize::Tier(1)
    }
}

impl fmt::Display for ResourceSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceSize::None => write!(f, "none"),
            ResourceSize::Tier(n) => write!(f, "{}x", n),
        }
    }
}

impl FromStr for ResourceSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        if s == "none" {
            return Ok(ResourceSize::None);
        }
        let tier = s
            .strip_suffix('x')
            .and_then(|n| n.parse::<u8>().ok())
            .filter(|n| (1..=Self::MAX_TIER).contains(n))
            .ok_or_else(|| format!("Invalid resource size: {} (expected 1x..10x or none)", s))?;
        Ok(ResourceSize::Tier(tier))
    }
}

impl TryFrom<String> for ResourceSize {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResourceSize> for String {
    fn from(size: ResourceSize) -> Self {
        size.to_string()
    }
}

/// Environment variable injected into the container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

/// Node-local persistent volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolume {
    pub name: String,

    /// Requested capacity, e.g. "5Gi"
    pub size: String,

    pub mount_path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,

    /// Hostname of the node the volume lives on
    pub node: String,
}

/// Per-environment deployment configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployEnvironmentConfig {
    /// Target cluster slug
    #[serde(default)]
    pub cluster: Option<String>,

    /// Container registry slug
    #[serde(default)]
    pub registry: Option<String>,

    /// Image repository without tag, e.g. "registry.example.com/team/web"
    #[serde(default)]
    pub image_url: Option<String>,

    /// Port the container listens on
    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default = "default_replicas")]
    pub replicas: u32,

    #[serde(default)]
    pub size: ResourceSize,

    #[serde(default)]
    pub domains: Vec<String>,

    #[serde(default)]
    pub ssl: Option<SslMode>,

    /// Secret holding the certificate when `ssl` is custom
    #[serde(default)]
    pub tls_secret: Option<String>,

    #[serde(default)]
    pub ingress_class: Option<String>,

    #[serde(default)]
    pub cdn: bool,

    /// Redirect secondary domains to the primary one
    #[serde(default)]
    pub redirect: bool,

    /// Layer the previous Ingress annotations under the generated ones
    #[serde(default)]
    pub inherit_ingress: bool,

    /// Namespace override, defaults to `<project>-<env>`
    #[serde(default)]
    pub namespace: Option<String>,

    #[serde(default)]
    pub env_vars: Vec<EnvVar>,

    #[serde(default)]
    pub volumes: Vec<PersistentVolume>,

    /// Last applied Namespace document
    #[serde(default)]
    pub namespace_yaml: Option<String>,

    /// Last applied Ingress/Service/Deployment/PVC bundle
    #[serde(default)]
    pub deployment_yaml: Option<String>,

    /// Id of the latest release
    #[serde(default)]
    pub latest_release: Option<String>,
}

fn default_replicas() -> u32 {
    1
}

impl Default for DeployEnvironmentConfig {
    fn default() -> Self {
        Self {
            cluster: None,
            registry: None,
            image_url: None,
            port: None,
            replicas: default_replicas(),
            size: ResourceSize::default(),
            domains: Vec::new(),
            ssl: None,
            tls_secret: None,
            ingress_class: None,
            cdn: false,
            redirect: false,
            inherit_ingress: false,
            namespace: None,
            env_vars: Vec::new(),
            volumes: Vec::new(),
            namespace_yaml: None,
            deployment_yaml: None,
            latest_release: None,
        }
    }
}

impl DeployEnvironmentConfig {
    /// Check the domain/TLS invariants, returning every violation found
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !self.domains.is_empty() && self.ssl.is_none() {
            problems.push("ssl must be set when domains are configured".to_string());
        }
        if self.ssl == Some(SslMode::Custom)
            && self.tls_secret.as_deref().map_or(true, str::is_empty)
        {
            problems.push("tlsSecret is required when ssl is \"custom\"".to_string());
        }
        if self.domains.iter().any(|d| d.trim().is_empty()) {
            problems.push("domains must not contain empty entries".to_string());
        }
        problems
    }
}
