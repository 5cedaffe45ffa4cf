//! Tracking of running build processes

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::watch;
use tracing::debug;

use crate::errors::ControllerError;

/// Receiving half of a build's cancellation flag
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the build is cancelled. Pends forever when the build
    /// finished without being cancelled.
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

struct TrackedBuild {
    build_id: String,
    app_slug: String,
    cancel: watch::Sender<bool>,
}

/// One entry per running build, keyed by build slug.
///
/// Created once per process and shared by the build engine and the HTTP
/// surface; tests create isolated instances.
#[derive(Default)]
pub struct BuildProcessRegistry {
    builds: Mutex<HashMap<String, TrackedBuild>>,
}

impl BuildProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a build. A second build under an active slug is rejected.
    pub fn register(
        &self,
        build_slug: &str,
        app_slug: &str,
        build_id: &str,
    ) -> Result<CancelSignal, ControllerError> {
        let mut builds = self.builds.lock().unwrap_or_else(|e| e.into_inner());
        if builds.contains_key(build_slug) {
            return Err(ControllerError::BuildError(format!(
                "build {} is already running",
                build_slug
            )));
        }

        let (tx, rx) = watch::channel(false);
        builds.insert(
            build_slug.to_string(),
            TrackedBuild {
                build_id: build_id.to_string(),
                app_slug: app_slug.to_string(),
                cancel: tx,
            },
        );
        debug!("Tracking build {}", build_slug);
        Ok(CancelSignal { rx })
    }

    /// Signal cancellation and stop tracking. Returns the build id, or `None`
    /// when no such build of `app_slug` is running.
    pub fn cancel(&self, app_slug: &str, build_slug: &str) -> Option<String> {
        let mut builds = self.builds.lock().unwrap_or_else(|e| e.into_inner());
        if builds.get(build_slug)?.app_slug != app_slug {
            return None;
        }
        let tracked = builds.remove(build_slug)?;
        tracked.cancel.send_replace(true);
        Some(tracked.build_id)
    }

    /// Stop tracking a build that ended on its own
    pub fn finish(&self, build_slug: &str) {
        let mut builds = self.builds.lock().unwrap_or_else(|e| e.into_inner());
        if builds.remove(build_slug).is_some() {
            debug!("Build {} no longer tracked", build_slug);
        }
    }

    pub fn is_running(&self, build_slug: &str) -> bool {
        let builds = self.builds.lock().unwrap_or_else(|e| e.into_inner());
        builds.contains_key(build_slug)
    }

    pub fn running(&self) -> usize {
        let builds = self.builds.lock().unwrap_or_else(|e| e.into_inner());
        builds.len()
    }

    /// `(app slug, build slug)` of every running build
    pub fn running_builds(&self) -> Vec<(String, String)> {
        let builds = self.builds.lock().unwrap_or_else(|e| e.into_inner());
        builds
            .iter()
            .map(|(slug, tracked)| (tracked.app_slug.clone(), slug.clone()))
            .collect()
    }
}
