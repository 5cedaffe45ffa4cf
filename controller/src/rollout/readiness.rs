//! Bounded readiness polling

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cluster::{ClusterObject, PodReadiness};
use crate::errors::ControllerError;

/// Reason reported by kubelet while containers fail their probes or crash
pub const CONTAINERS_NOT_READY: &str = "ContainersNotReady";

/// Polling bounds
#[derive(Debug, Clone)]
pub struct ReadinessPolicy {
    pub interval: Duration,
    pub max_attempts: u32,

    /// Consecutive `ContainersNotReady` observations escalated to failure
    pub not_ready_threshold: u32,
}

impl ReadinessPolicy {
    /// Upper bound of the time spent polling
    pub fn ceiling(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_attempts: 24,
            not_ready_threshold: 5,
        }
    }
}

/// One look at the pods of a version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// At least one pod and every pod is ready
    Ready,
    /// Pods missing or still starting
    Waiting,
    /// A pod reports `ContainersNotReady`
    ContainersNotReady,
}

/// Classify a pod listing
pub fn observe(pods: &[ClusterObject]) -> Observation {
    if pods.is_empty() {
        return Observation::Waiting;
    }

    let mut all_ready = true;
    let mut containers_not_ready = false;
    for pod in pods {
        match pod.pod_readiness() {
            PodReadiness::Ready => {}
            PodReadiness::NotReady { reason } => {
                all_ready = false;
                if reason.as_deref() == Some(CONTAINERS_NOT_READY) {
                    containers_not_ready = true;
                }
            }
        }
    }

    if all_ready {
        Observation::Ready
    } else if containers_not_ready {
        Observation::ContainersNotReady
    } else {
        Observation::Waiting
    }
}

/// Result of a polling session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessOutcome {
    Ready { attempts: u32 },
    TimedOut { attempts: u32 },
    Failed { reason: String, attempts: u32 },
}

/// Probe until ready, at most `max_attempts` times with `interval` between
/// probes. The `ContainersNotReady` streak belongs to this session and
/// resets on any other observation. Probe errors count as waiting.
pub async fn poll_until_ready<P, PF, S, SF>(
    policy: &ReadinessPolicy,
    mut probe: P,
    sleep_fn: S,
) -> ReadinessOutcome
where
    P: FnMut() -> PF,
    PF: Future<Output = Result<Observation, ControllerError>>,
    S: Fn(Duration) -> SF,
    SF: Future<Output = ()>,
{
    let mut streak = 0;

    for attempt in 1..=policy.max_attempts {
        let observation = match probe().await {
            Ok(observation) => observation,
            Err(e) => {
                warn!("Readiness probe failed (attempt {}): {}", attempt, e);
                Observation::Waiting
            }
        };
        debug!("Readiness attempt {}/{}: {:?}", attempt, policy.max_attempts, observation);

        match observation {
            Observation::Ready => return ReadinessOutcome::Ready { attempts: attempt },
            Observation::ContainersNotReady => {
                streak += 1;
                if streak >= policy.not_ready_threshold {
                    return ReadinessOutcome::Failed {
                        reason: format!(
                            "containers not ready in {} consecutive checks",
                            streak
                        ),
                        attempts: attempt,
                    };
                }
            }
            Observation::Waiting => streak = 0,
        }

        if attempt < policy.max_attempts {
            sleep_fn(policy.interval).await;
        }
    }

    ReadinessOutcome::TimedOut {
        attempts: policy.max_attempts,
    }
}
