//! Source checkout

use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::build::process::run_streamed;
use crate::build::registry::CancelSignal;
use crate::errors::ControllerError;
use crate::events::Progress;

/// Git invocation settings shared by every step of a sync
pub struct GitSync<'a> {
    pub binary: &'a str,
    pub progress: &'a Progress,
    pub grace: Duration,
}

impl GitSync<'_> {
    async fn git(
        &self,
        dir: Option<&Path>,
        args: &[&str],
        cancel: &mut CancelSignal,
    ) -> Result<bool, ControllerError> {
        let mut command = Command::new(self.binary);
        if let Some(dir) = dir {
            command.current_dir(dir);
        }
        command.args(args);
        let status = run_streamed(&mut command, self.progress, cancel, self.grace).await?;
        Ok(status.success())
    }

    async fn clone_repository(
        &self,
        repo_url: &str,
        branch: &str,
        target_dir: &Path,
        cancel: &mut CancelSignal,
    ) -> Result<(), ControllerError> {
        if let Some(parent) = target_dir.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let target = target_dir.to_string_lossy().to_string();
        let cloned = self
            .git(
                None,
                &[
                    "clone",
                    "--branch",
                    branch,
                    "--single-branch",
                    repo_url,
                    target.as_str(),
                ],
                cancel,
            )
            .await?;
        if !cloned {
            return Err(ControllerError::BuildError(format!(
                "git clone of {} ({}) failed",
                repo_url, branch
            )));
        }
        Ok(())
    }

    /// Clone the repository, or fast-forward an existing checkout with
    /// `pull --rebase`. A checkout that cannot be rebased is deleted and
    /// cloned again.
    pub async fn sync_repository(
        &self,
        repo_url: &str,
        branch: &str,
        target_dir: &Path,
        cancel: &mut CancelSignal,
    ) -> Result<(), ControllerError> {
        info!(
            "Syncing Git repository: {} (branch: {}) to {}",
            repo_url,
            branch,
            target_dir.display()
        );

        if !target_dir.join(".git").exists() {
            debug!("No checkout at {}, cloning", target_dir.display());
            self.progress.log(format!("Cloning {} ({})", repo_url, branch));
            return self
                .clone_repository(repo_url, branch, target_dir, cancel)
                .await;
        }

        self.progress.log(format!("Pulling {} ({})", repo_url, branch));
        let dir = Some(target_dir);
        let updated = self.git(dir, &["fetch", "origin", branch], cancel).await?
            && self.git(dir, &["checkout", branch], cancel).await?
            && self
                .git(dir, &["pull", "--rebase", "origin", branch], cancel)
                .await?;

        if !updated {
            warn!("Could not update {}, recloning", target_dir.display());
            self.progress.log("Checkout diverged, recloning");
            let _ = self.git(dir, &["rebase", "--abort"], cancel).await;
            tokio::fs::remove_dir_all(target_dir).await?;
            self.clone_repository(repo_url, branch, target_dir, cancel)
                .await?;
        }

        info!("Successfully synced Git repository");
        Ok(())
    }
}
