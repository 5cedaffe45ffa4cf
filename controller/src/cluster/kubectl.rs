//! `kubectl`-backed cluster gateway

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::cluster::{ClusterContext, ClusterGateway, ClusterObject, PullSecret, ResourceKind, Scope};
use crate::errors::ControllerError;
use crate::models::Cluster;

/// Runs `kubectl` against kubeconfigs materialized under `config_dir`
pub struct KubectlGateway {
    binary: String,
    config_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct ObjectList {
    #[serde(default)]
    items: Vec<ClusterObject>,
}

impl KubectlGateway {
    pub fn new(binary: &str, config_dir: &Path) -> Self {
        Self {
            binary: binary.to_string(),
            config_dir: config_dir.to_path_buf(),
        }
    }

    fn base_args(ctx: &ClusterContext) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(kubeconfig) = &ctx.kubeconfig {
            args.push(format!("--kubeconfig={}", kubeconfig.display()));
        }
        if let Some(context) = &ctx.context {
            args.push(format!("--context={}", context));
        }
        args
    }

    /// Run kubectl, optionally feeding `stdin`
    async fn run(
        &self,
        ctx: &ClusterContext,
        args: &[&str],
        stdin: Option<&str>,
    ) -> Result<Output, ControllerError> {
        let mut command = Command::new(&self.binary);
        command
            .args(Self::base_args(ctx))
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        debug!("{} {}", self.binary, args.join(" "));

        let Some(input) = stdin else {
            command.stdin(Stdio::null());
            return Ok(command.output().await?);
        };

        let mut child = command.stdin(Stdio::piped()).spawn()?;
        if let Some(mut pipe) = child.stdin.take() {
            pipe.write_all(input.as_bytes()).await?;
            // Dropping the pipe closes stdin so kubectl sees EOF
        }
        Ok(child.wait_with_output().await?)
    }

    /// Run kubectl and return stdout, mapping a non-zero exit with `on_error`
    async fn run_checked(
        &self,
        ctx: &ClusterContext,
        args: &[&str],
        stdin: Option<&str>,
        on_error: fn(String) -> ControllerError,
    ) -> Result<String, ControllerError> {
        let output = self.run(ctx, args, stdin).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(on_error(format!("kubectl {}: {}", args.join(" "), stderr)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// `.dockerconfigjson` Secret for a registry, in JSON (a subset of YAML)
fn pull_secret_manifest(namespace: &str, secret: &PullSecret) -> String {
    let password = secret.password.expose_secret();
    let auth = STANDARD.encode(format!("{}:{}", secret.username, password));
    let docker_config = json!({
        "auths": {
            secret.registry.as_str(): {
                "username": secret.username,
                "password": password,
                "auth": auth,
            }
        }
    });

    json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "type": "kubernetes.io/dockerconfigjson",
        "metadata": {"name": secret.name, "namespace": namespace},
        "data": {".dockerconfigjson": STANDARD.encode(docker_config.to_string())},
    })
    .to_string()
}

#[async_trait]
impl ClusterGateway for KubectlGateway {
    async fn authenticate(&self, cluster: &Cluster) -> Result<ClusterContext, ControllerError> {
        let kubeconfig = match &cluster.kubeconfig {
            Some(text) => {
                tokio::fs::create_dir_all(&self.config_dir).await?;
                let path = self.config_dir.join(format!("{}.yaml", cluster.slug));
                tokio::fs::write(&path, text).await?;
                Some(path)
            }
            None => None,
        };

        let ctx = ClusterContext {
            cluster_slug: cluster.slug.clone(),
            context: cluster.context.clone(),
            kubeconfig,
        };

        self.run_checked(&ctx, &["cluster-info"], None, ControllerError::AuthError)
            .await?;
        info!("Authenticated against cluster {}", cluster.slug);
        Ok(ctx)
    }

    async fn namespace_exists(
        &self,
        ctx: &ClusterContext,
        namespace: &str,
    ) -> Result<bool, ControllerError> {
        let output = self
            .run(ctx, &["get", "namespace", namespace, "-o", "name"], None)
            .await?;
        if output.status.success() {
            return Ok(true);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("NotFound") || stderr.contains("not found") {
            return Ok(false);
        }
        Err(ControllerError::ClusterError(stderr.trim().to_string()))
    }

    async fn create_namespace(
        &self,
        ctx: &ClusterContext,
        namespace: &str,
        manifest: &str,
    ) -> Result<(), ControllerError> {
        self.run_checked(
            ctx,
            &["apply", "-f", "-"],
            Some(manifest),
            ControllerError::ClusterError,
        )
        .await?;
        info!("Created namespace {}", namespace);
        Ok(())
    }

    async fn delete_namespace(
        &self,
        ctx: &ClusterContext,
        namespace: &str,
    ) -> Result<(), ControllerError> {
        warn!("Deleting namespace {} and everything in it", namespace);
        self.run_checked(
            ctx,
            &["delete", "namespace", namespace, "--ignore-not-found", "--wait=true"],
            None,
            ControllerError::ClusterError,
        )
        .await?;
        Ok(())
    }

    async fn create_image_pull_secret(
        &self,
        ctx: &ClusterContext,
        namespace: &str,
        secret: &PullSecret,
    ) -> Result<(), ControllerError> {
        let manifest = pull_secret_manifest(namespace, secret);
        self.run_checked(
            ctx,
            &["apply", "-f", "-"],
            Some(&manifest),
            ControllerError::ClusterError,
        )
        .await?;
        debug!("Image pull secret {} ready in {}", secret.name, namespace);
        Ok(())
    }

    async fn apply_manifest(
        &self,
        ctx: &ClusterContext,
        manifest: &str,
    ) -> Result<(), ControllerError> {
        let stdout = self
            .run_checked(
                ctx,
                &["apply", "-f", "-"],
                Some(manifest),
                ControllerError::ApplyError,
            )
            .await?;
        for line in stdout.lines() {
            debug!("{}", line);
        }
        Ok(())
    }

    async fn list_by_label(
        &self,
        ctx: &ClusterContext,
        kind: ResourceKind,
        scope: &Scope,
        selector: Option<&str>,
    ) -> Result<Vec<ClusterObject>, ControllerError> {
        let mut args = vec!["get", kind.as_str()];
        match scope {
            Scope::Namespace(namespace) => args.extend(["-n", namespace.as_str()]),
            Scope::AllNamespaces => args.push("-A"),
        }
        if let Some(selector) = selector {
            args.extend(["-l", selector]);
        }
        args.extend(["-o", "json"]);

        let stdout = self
            .run_checked(ctx, &args, None, ControllerError::ClusterError)
            .await?;
        let list: ObjectList = serde_json::from_str(&stdout)?;
        Ok(list.items)
    }

    async fn delete_by_label(
        &self,
        ctx: &ClusterContext,
        kind: ResourceKind,
        namespace: &str,
        selector: &str,
    ) -> Result<(), ControllerError> {
        self.run_checked(
            ctx,
            &[
                "delete",
                kind.as_str(),
                "-n",
                namespace,
                "-l",
                selector,
                "--ignore-not-found",
            ],
            None,
            ControllerError::ClusterError,
        )
        .await?;
        Ok(())
    }

    async fn get_pod_logs(
        &self,
        ctx: &ClusterContext,
        namespace: &str,
        selector: &str,
        previous: bool,
    ) -> Result<String, ControllerError> {
        let mut args = vec![
            "logs",
            "-n",
            namespace,
            "-l",
            selector,
            "--all-containers",
            "--tail=200",
        ];
        if previous {
            args.push("--previous");
        }
        self.run_checked(ctx, &args, None, ControllerError::ClusterError)
            .await
    }
}
