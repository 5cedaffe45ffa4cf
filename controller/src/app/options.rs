//! Application configuration options

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::build::BuildOptions;
use crate::rollout::ReadinessPolicy;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{DomainSettings, Settings, StoreSettings, WebhookSettings};

/// Settings file used when `--settings` is not given
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/dockyard/settings.json";

/// Parsed command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliArgs {
    values: HashMap<String, String>,
}

impl CliArgs {
    /// Accepts `--key=value` pairs and bare `--flag`s, ignores the rest
    pub fn parse<I>(args: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut values = HashMap::new();
        for arg in args {
            if let Some((key, value)) = arg.split_once('=') {
                values.insert(key.trim_start_matches('-').to_string(), value.to_string());
            } else if arg.starts_with("--") {
                values.insert(arg.trim_start_matches('-').to_string(), "true".to_string());
            }
        }
        Self { values }
    }

    pub fn flag(&self, name: &str) -> bool {
        self.values.get(name).is_some_and(|v| v == "true")
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn settings_path(&self) -> PathBuf {
        PathBuf::from(self.value("settings").unwrap_or(DEFAULT_SETTINGS_PATH))
    }
}

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    pub lifecycle: LifecycleOptions,

    /// Workspace paths
    pub layout: StorageLayout,

    /// Metadata store, in-memory when no URL is set
    pub store: StoreSettings,

    /// Enable local HTTP server
    pub enable_server: bool,

    pub server: ServerOptions,

    pub readiness: ReadinessPolicy,

    pub build: BuildOptions,

    pub domains: DomainSettings,

    pub webhooks: WebhookSettings,

    pub kubectl_binary: String,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for AppOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            layout: StorageLayout::new(&settings.workspace_dir),
            store: settings.store.clone(),
            enable_server: settings.server.enabled,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            readiness: ReadinessPolicy {
                interval: settings.rollout.poll_interval(),
                max_attempts: settings.rollout.max_poll_attempts,
                not_ready_threshold: settings.rollout.not_ready_threshold,
            },
            build: BuildOptions::from(&settings.build),
            domains: settings.domains.clone(),
            webhooks: settings.webhooks.clone(),
            kubectl_binary: settings.kubectl_binary.clone(),
        }
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown, queued rollouts included
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(300),
        }
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8089,
        }
    }
}
