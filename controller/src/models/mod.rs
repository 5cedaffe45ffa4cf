//! Domain models shared by the generator, the rollout controller and the coordinator

pub mod app;
pub mod build;
pub mod cluster;
pub mod release;
pub mod webhook;

pub use app::{
    AppConfig, DeployEnvironmentConfig, EnvVar, PersistentVolume, ResourceSize, SslMode,
};
pub use build::{Build, BuildStatus, DeployStatus};
pub use cluster::{Cluster, ContainerRegistry};
pub use release::{Release, ReleaseStatus};
pub use webhook::{Webhook, WebhookChannel, WebhookOutcome};
