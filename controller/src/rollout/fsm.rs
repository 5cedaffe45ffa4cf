//! Finite state machine of one rollout

use std::fmt;

use serde::{Deserialize, Serialize};

/// Rollout phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RolloutState {
    /// Created, nothing done yet
    Pending,

    /// Resolving cluster credentials
    Authenticating,

    EnsuringNamespace,

    EnsuringPullSecret,

    /// Looking for other namespaces serving our domains
    ConflictCheck,

    /// Applying the bundle
    Applying,

    /// Polling the new pods
    AwaitingReady,

    /// Marking the release active
    Promoting,

    /// Deleting superseded objects
    CleaningUp,

    Succeeded,

    Failed,
}

impl RolloutState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RolloutState::Succeeded | RolloutState::Failed)
    }

    /// Message reported when entering the state
    pub fn describe(&self) -> &'static str {
        match self {
            RolloutState::Pending => "Rollout queued",
            RolloutState::Authenticating => "Authenticating against the cluster",
            RolloutState::EnsuringNamespace => "Ensuring the namespace exists",
            RolloutState::EnsuringPullSecret => "Ensuring the image pull secret",
            RolloutState::ConflictCheck => "Checking for domain conflicts",
            RolloutState::Applying => "Applying manifests",
            RolloutState::AwaitingReady => "Waiting for pods to become ready",
            RolloutState::Promoting => "Promoting the release",
            RolloutState::CleaningUp => "Cleaning up previous versions",
            RolloutState::Succeeded => "Rollout succeeded",
            RolloutState::Failed => "Rollout failed",
        }
    }
}

impl fmt::Display for RolloutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RolloutState::Pending => "pending",
            RolloutState::Authenticating => "authenticating",
            RolloutState::EnsuringNamespace => "ensuring-namespace",
            RolloutState::EnsuringPullSecret => "ensuring-pull-secret",
            RolloutState::ConflictCheck => "conflict-check",
            RolloutState::Applying => "applying",
            RolloutState::AwaitingReady => "awaiting-ready",
            RolloutState::Promoting => "promoting",
            RolloutState::CleaningUp => "cleaning-up",
            RolloutState::Succeeded => "succeeded",
            RolloutState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Rollout event
#[derive(Debug, Clone)]
pub enum RolloutEvent {
    Start,
    Authenticated,
    NamespaceReady,
    PullSecretReady,
    NoConflict,
    Applied,
    Ready,
    Promoted,
    CleanedUp,

    /// Any step failed
    Fail(String),
}

/// Rollout FSM
#[derive(Debug, Clone)]
pub struct RolloutFsm {
    state: RolloutState,
    error: Option<String>,
    history: Vec<RolloutState>,
}

impl RolloutFsm {
    pub fn new() -> Self {
        Self {
            state: RolloutState::Pending,
            error: None,
            history: vec![RolloutState::Pending],
        }
    }

    pub fn state(&self) -> RolloutState {
        self.state
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Every state visited, in order
    pub fn history(&self) -> &[RolloutState] {
        &self.history
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: RolloutEvent) -> Result<RolloutState, String> {
        use RolloutEvent as E;
        use RolloutState as S;

        let new_state = match (self.state, &event) {
            (S::Pending, E::Start) => S::Authenticating,
            (S::Authenticating, E::Authenticated) => S::EnsuringNamespace,
            (S::EnsuringNamespace, E::NamespaceReady) => S::EnsuringPullSecret,
            (S::EnsuringPullSecret, E::PullSecretReady) => S::ConflictCheck,
            (S::ConflictCheck, E::NoConflict) => S::Applying,
            (S::Applying, E::Applied) => S::AwaitingReady,
            (S::AwaitingReady, E::Ready) => S::Promoting,
            (S::Promoting, E::Promoted) => S::CleaningUp,
            (S::CleaningUp, E::CleanedUp) => S::Succeeded,

            (state, E::Fail(err)) if !state.is_terminal() => {
                self.error = Some(err.clone());
                S::Failed
            }

            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        self.history.push(new_state);
        Ok(new_state)
    }
}

impl Default for RolloutFsm {
    fn default() -> Self {
        Self::new()
    }
}
