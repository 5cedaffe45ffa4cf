//! Container image builds with `docker buildx`

use std::path::{Path, PathBuf};
use std::process::Stdio;

use secrecy::{ExposeSecret, SecretString};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::errors::ControllerError;

/// Pick the Dockerfile of a checkout, `Dockerfile.<env>` first
pub fn resolve_dockerfile(source_dir: &Path, env: &str) -> Result<PathBuf, ControllerError> {
    let candidates = [
        source_dir.join(format!("Dockerfile.{}", env)),
        source_dir.join("Dockerfile"),
    ];
    candidates
        .into_iter()
        .find(|path| path.is_file())
        .ok_or_else(|| {
            ControllerError::BuildError(format!(
                "no Dockerfile.{} or Dockerfile in {}",
                env,
                source_dir.display()
            ))
        })
}

/// Reject references docker would refuse, before any work is done
pub fn validate_image_reference(image: &str) -> Result<(), ControllerError> {
    let valid = !image.is_empty()
        && !image.starts_with('/')
        && !image.ends_with('/')
        && !image.contains("//")
        && image
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "._-/:@".contains(c));
    if !valid {
        return Err(ControllerError::BuildError(format!(
            "invalid image reference \"{}\"",
            image
        )));
    }
    Ok(())
}

/// Inputs of one `buildx build`
#[derive(Debug, Clone)]
pub struct BuildxInvocation<'a> {
    pub builder: Option<&'a str>,
    pub platform: Option<&'a str>,
    pub dockerfile: &'a Path,
    pub context_dir: &'a Path,
    pub image: &'a str,

    /// Image of the previous successful build, reused as layer cache
    pub cache_from: Option<&'a str>,
    pub push: bool,
}

impl BuildxInvocation<'_> {
    pub fn args(&self) -> Vec<String> {
        let mut args = vec!["buildx".to_string(), "build".to_string()];
        if let Some(builder) = self.builder {
            args.extend(["--builder".to_string(), builder.to_string()]);
        }
        if let Some(platform) = self.platform {
            args.extend(["--platform".to_string(), platform.to_string()]);
        }
        args.extend([
            "--file".to_string(),
            self.dockerfile.display().to_string(),
            "--tag".to_string(),
            self.image.to_string(),
        ]);
        if let Some(cache_from) = self.cache_from {
            args.extend([
                "--cache-from".to_string(),
                format!("type=registry,ref={}", cache_from),
            ]);
        }
        // Inline cache metadata lets the next build reuse this image
        args.extend([
            "--cache-to".to_string(),
            "type=inline".to_string(),
            if self.push { "--push" } else { "--load" }.to_string(),
            self.context_dir.display().to_string(),
        ]);
        args
    }
}

/// `docker login` with the password piped through stdin
pub async fn login(
    docker_binary: &str,
    host: &str,
    username: &str,
    password: &SecretString,
) -> Result<(), ControllerError> {
    debug!("Logging in to {}", host);
    let mut child = Command::new(docker_binary)
        .args(["login", host, "-u", username, "--password-stdin"])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(password.expose_secret().as_bytes())
            .await?;
    }
    let output = child.wait_with_output().await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ControllerError::BuildError(format!(
            "docker login to {} failed: {}",
            host,
            stderr.trim()
        )));
    }
    info!("Authenticated with registry {}", host);
    Ok(())
}

/// Stop a buildx builder so in-flight build steps are torn down
pub async fn stop_builder(docker_binary: &str, builder: &str) {
    let status = Command::new(docker_binary)
        .args(["buildx", "stop", builder])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match status {
        Ok(status) if status.success() => debug!("Stopped builder {}", builder),
        Ok(status) => warn!("docker buildx stop {} exited with {}", builder, status),
        Err(e) => warn!("Failed to run docker buildx stop {}: {}", builder, e),
    }
}
