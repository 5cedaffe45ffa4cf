//! Dockyard control plane library
//!
//! Builds application images, renders their Kubernetes manifests and rolls
//! them out with readiness gating and blue/green cleanup.

pub mod app;
pub mod build;
pub mod cluster;
pub mod deploy;
pub mod errors;
pub mod events;
pub mod logs;
pub mod manifest;
pub mod models;
pub mod rollout;
pub mod server;
pub mod storage;
pub mod store;
pub mod utils;
pub mod webhook;
