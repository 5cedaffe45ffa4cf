//! Server state

use std::sync::Arc;

use crate::deploy::DeployCoordinator;

/// Server state shared across handlers
pub struct ServerState {
    pub coordinator: Arc<DeployCoordinator>,
}

impl ServerState {
    pub fn new(coordinator: Arc<DeployCoordinator>) -> Self {
        Self { coordinator }
    }
}
