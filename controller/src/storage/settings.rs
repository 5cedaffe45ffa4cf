//! Settings file management

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::ControllerError;
use crate::logs::LogLevel;

/// Control plane settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines instead of plain text
    #[serde(default)]
    pub log_json: bool,

    /// Directory for rolling log files, stdout only when absent
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Metadata store configuration
    #[serde(default)]
    pub store: StoreSettings,

    /// Local HTTP server
    #[serde(default)]
    pub server: ServerSettings,

    /// Root of checkouts and kubeconfigs
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: PathBuf,

    #[serde(default)]
    pub rollout: RolloutSettings,

    #[serde(default)]
    pub build: BuildSettings,

    #[serde(default)]
    pub domains: DomainSettings,

    #[serde(default)]
    pub webhooks: WebhookSettings,

    /// kubectl executable
    #[serde(default = "default_kubectl")]
    pub kubectl_binary: String,
}

fn default_true() -> bool {
    true
}

fn default_workspace_dir() -> PathBuf {
    PathBuf::from("/var/lib/dockyard")
}

fn default_kubectl() -> String {
    "kubectl".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_dir: None,
            store: StoreSettings::default(),
            server: ServerSettings::default(),
            workspace_dir: default_workspace_dir(),
            rollout: RolloutSettings::default(),
            build: BuildSettings::default(),
            domains: DomainSettings::default(),
            webhooks: WebhookSettings::default(),
            kubectl_binary: default_kubectl(),
        }
    }
}

impl Settings {
    /// Load settings, falling back to defaults when the file does not exist
    pub async fn load(path: &Path) -> Result<Self, ControllerError> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                let settings = serde_json::from_str(&content).map_err(|e| {
                    ControllerError::ConfigError(format!("{}: {}", path.display(), e))
                })?;
                Ok(settings)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No settings at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Metadata store settings. The in-memory store is used when no URL is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub token: Option<String>,
}

/// Local HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8089
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Readiness polling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutSettings {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,

    /// Consecutive `ContainersNotReady` observations treated as a failure
    #[serde(default = "default_not_ready_threshold")]
    pub not_ready_threshold: u32,
}

fn default_poll_interval() -> u64 {
    10
}

fn default_max_poll_attempts() -> u32 {
    24
}

fn default_not_ready_threshold() -> u32 {
    5
}

impl RolloutSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for RolloutSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            max_poll_attempts: default_max_poll_attempts(),
            not_ready_threshold: default_not_ready_threshold(),
        }
    }
}

/// Container build settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSettings {
    #[serde(default = "default_docker")]
    pub docker_binary: String,

    #[serde(default = "default_git")]
    pub git_binary: String,

    /// buildx builder instance, the default builder when absent
    #[serde(default)]
    pub builder: Option<String>,

    /// Target platform, e.g. "linux/amd64"
    #[serde(default)]
    pub platform: Option<String>,

    /// Push after building, `--load` into the local daemon otherwise
    #[serde(default = "default_true")]
    pub push: bool,

    /// Time between SIGTERM and SIGKILL when stopping a build
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,
}

fn default_docker() -> String {
    "docker".to_string()
}

fn default_git() -> String {
    "git".to_string()
}

fn default_stop_grace() -> u64 {
    10
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            docker_binary: default_docker(),
            git_binary: default_git(),
            builder: None,
            platform: None,
            push: true,
            stop_grace_secs: default_stop_grace(),
        }
    }
}

/// Platform subdomains
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainSettings {
    /// Subdomains are `<name>.<base_domain>`
    #[serde(default)]
    pub base_domain: Option<String>,

    /// DNS service handing out subdomains, preferred over `base_domain`
    #[serde(default)]
    pub allocator_url: Option<String>,
}

/// Webhook delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSettings {
    #[serde(default = "default_webhook_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_webhook_delay")]
    pub base_delay_ms: u64,
}

fn default_webhook_attempts() -> u32 {
    3
}

fn default_webhook_delay() -> u64 {
    500
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_webhook_attempts(),
            base_delay_ms: default_webhook_delay(),
        }
    }
}
