//! Effective environment resolution
//!
//! Precedence, lowest first: built-in defaults, the app config file checked
//! into the repository, the metadata store, the deploy request overrides.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::ControllerError;
use crate::models::{DeployEnvironmentConfig, EnvVar, PersistentVolume, ResourceSize, SslMode};

/// Name of the app config file at the repository root
pub const APP_CONFIG_FILE: &str = "dockyard.json";

/// Partial environment. Absent fields leave the lower layer untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvironmentPatch {
    pub cluster: Option<String>,
    pub registry: Option<String>,
    pub image_url: Option<String>,
    pub port: Option<u16>,
    pub replicas: Option<u32>,
    pub size: Option<ResourceSize>,
    pub domains: Option<Vec<String>>,
    pub ssl: Option<SslMode>,
    pub tls_secret: Option<String>,
    pub ingress_class: Option<String>,
    pub cdn: Option<bool>,
    pub redirect: Option<bool>,
    pub inherit_ingress: Option<bool>,
    pub namespace: Option<String>,

    /// Merged by name, a later layer replaces same-named variables
    pub env_vars: Option<Vec<EnvVar>>,

    pub volumes: Option<Vec<PersistentVolume>>,
}

impl EnvironmentPatch {
    /// Layer this patch over `config`
    pub fn apply(&self, config: &mut DeployEnvironmentConfig) {
        if let Some(value) = &self.cluster {
            config.cluster = Some(value.clone());
        }
        if let Some(value) = &self.registry {
            config.registry = Some(value.clone());
        }
        if let Some(value) = &self.image_url {
            config.image_url = Some(value.clone());
        }
        if let Some(ssl) = self.ssl {
            config.ssl = Some(ssl);
        }
        if let Some(value) = &self.tls_secret {
            config.tls_secret = Some(value.clone());
        }
        if let Some(value) = &self.ingress_class {
            config.ingress_class = Some(value.clone());
        }
        if let Some(value) = &self.namespace {
            config.namespace = Some(value.clone());
        }
        if let Some(port) = self.port {
            config.port = Some(port);
        }
        if let Some(value) = self.replicas {
            config.replicas = value;
        }
        if let Some(value) = self.size {
            config.size = value;
        }
        if let Some(value) = self.cdn {
            config.cdn = value;
        }
        if let Some(value) = self.redirect {
            config.redirect = value;
        }
        if let Some(value) = self.inherit_ingress {
            config.inherit_ingress = value;
        }
        if let Some(value) = &self.domains {
            config.domains = value.clone();
        }
        if let Some(value) = &self.volumes {
            config.volumes = value.clone();
        }
        if let Some(vars) = &self.env_vars {
            merge_env_vars(&mut config.env_vars, vars);
        }
    }

    /// Patch view of a stored environment. Fields still at their default
    /// value are treated as unset so they do not mask the app config file.
    pub fn from_stored(config: &DeployEnvironmentConfig) -> Self {
        let defaults = DeployEnvironmentConfig::default();
        let changed = |value: bool, default: bool| (value != default).then_some(value);

        Self {
            cluster: config.cluster.clone(),
            registry: config.registry.clone(),
            image_url: config.image_url.clone(),
            port: config.port,
            replicas: (config.replicas != defaults.replicas).then_some(config.replicas),
            size: (config.size != defaults.size).then_some(config.size),
            domains: (!config.domains.is_empty()).then(|| config.domains.clone()),
            ssl: config.ssl,
            tls_secret: config.tls_secret.clone(),
            ingress_class: config.ingress_class.clone(),
            cdn: changed(config.cdn, defaults.cdn),
            redirect: changed(config.redirect, defaults.redirect),
            inherit_ingress: changed(config.inherit_ingress, defaults.inherit_ingress),
            namespace: config.namespace.clone(),
            env_vars: (!config.env_vars.is_empty()).then(|| config.env_vars.clone()),
            volumes: (!config.volumes.is_empty()).then(|| config.volumes.clone()),
        }
    }
}

fn merge_env_vars(base: &mut Vec<EnvVar>, overrides: &[EnvVar]) {
    for var in overrides {
        match base.iter_mut().find(|existing| existing.name == var.name) {
            Some(existing) => existing.value = var.value.clone(),
            None => base.push(var.clone()),
        }
    }
}

/// The app config file: environments keyed by name
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfigFile {
    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentPatch>,
}

/// Read the patch of `env` from the app config file in `source_dir`.
/// A missing file or environment yields `None`.
pub async fn load_app_config_file(
    source_dir: &Path,
    env: &str,
) -> Result<Option<EnvironmentPatch>, ControllerError> {
    let path = source_dir.join(APP_CONFIG_FILE);
    if !path.exists() {
        return Ok(None);
    }

    let content = tokio::fs::read_to_string(&path).await?;
    let mut file: AppConfigFile = serde_json::from_str(&content).map_err(|e| {
        ControllerError::ConfigError(format!("{}: {}", path.display(), e))
    })?;
    debug!("Loaded app config file {}", path.display());
    Ok(file.environments.remove(env))
}

/// Effective environment of a deploy
pub fn resolve_environment(
    file: Option<&EnvironmentPatch>,
    stored: Option<&DeployEnvironmentConfig>,
    request: Option<&EnvironmentPatch>,
) -> DeployEnvironmentConfig {
    let stored_patch = stored.map(EnvironmentPatch::from_stored);

    let mut config = DeployEnvironmentConfig::default();
    for layer in [file, stored_patch.as_ref(), request].into_iter().flatten() {
        layer.apply(&mut config);
    }

    // Generated artifacts only ever come from the store
    if let Some(stored) = stored {
        config.namespace_yaml = stored.namespace_yaml.clone();
        config.deployment_yaml = stored.deployment_yaml.clone();
        config.latest_release = stored.latest_release.clone();
    }
    config
}
