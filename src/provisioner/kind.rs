//! Local provisioner backed by docker networks and kind clusters
//!
//! The "VPC" is a user-defined docker bridge network and the cluster is a kind
//! cluster attached to it through `KIND_EXPERIMENTAL_DOCKER_NETWORK`.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use super::CloudProvisioner;
use crate::config::EnvironmentConfig;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::{Error, Result};

const DEFAULT_IMAGE_DEST: &str = "/opt/podvm/podvm.qcow2";
const DEFAULT_WORKERS: u32 = 1;

/// Provisioner for the `kind` cloud provider
#[derive(Debug, Clone, Default)]
pub struct KindProvisioner {
    network_retry: RetryConfig,
}

impl KindProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the backoff used when removing the docker network
    pub fn with_network_retry(mut self, retry: RetryConfig) -> Self {
        self.network_retry = retry;
        self
    }
}

/// Kind cluster config with one control plane and `workers` worker nodes.
fn kind_config(workers: u32) -> String {
    let mut config = String::from(
        "kind: Cluster\napiVersion: kind.x-k8s.io/v1alpha4\nnodes:\n- role: control-plane\n",
    );
    for _ in 0..workers {
        config.push_str("- role: worker\n");
    }
    config
}

fn worker_count(cfg: &EnvironmentConfig) -> Result<u32> {
    match cfg.property("KIND_WORKERS") {
        Some(raw) => raw.parse().map_err(|_| {
            Error::provisioning("cluster", format!("KIND_WORKERS must be a number, got '{}'", raw))
        }),
        None => Ok(DEFAULT_WORKERS),
    }
}

fn network_create_args(cfg: &EnvironmentConfig) -> Vec<String> {
    let mut args = vec!["network".to_string(), "create".to_string()];
    if let Some(subnet) = cfg.property("VPC_SUBNET") {
        args.push(format!("--subnet={}", subnet));
    }
    args.push(cfg.vpc_name.clone());
    args
}

fn cluster_create_args(cfg: &EnvironmentConfig) -> Vec<String> {
    vec![
        "create".to_string(),
        "cluster".to_string(),
        "--name".to_string(),
        cfg.cluster_name.clone(),
        "--kubeconfig".to_string(),
        cfg.kubeconfig.to_string_lossy().into_owned(),
        "--config".to_string(),
        "-".to_string(),
    ]
}

fn control_plane_node(cfg: &EnvironmentConfig) -> String {
    format!("{}-control-plane", cfg.cluster_name)
}

fn image_destination(cfg: &EnvironmentConfig) -> &str {
    cfg.property("PODVM_IMAGE_DEST").unwrap_or(DEFAULT_IMAGE_DEST)
}

fn is_missing_network(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("no such network") || stderr.contains("not found")
}

/// Run a command to completion, returning stderr on failure.
async fn run(program: &str, args: &[String]) -> std::result::Result<(), String> {
    debug!(program, ?args, "running command");
    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| format!("failed to run {}: {}", program, e))?;

    if output.status.success() {
        Ok(())
    } else {
        Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
    }
}

#[async_trait]
impl CloudProvisioner for KindProvisioner {
    async fn create_vpc(&self, cfg: &EnvironmentConfig) -> Result<()> {
        info!(network = %cfg.vpc_name, "creating docker network");
        run("docker", &network_create_args(cfg)).await.map_err(|stderr| {
            Error::provisioning("vpc", format!("docker network create failed: {}", stderr))
        })
    }

    async fn create_cluster(&self, cfg: &EnvironmentConfig) -> Result<()> {
        let workers = worker_count(cfg)?;
        info!(cluster = %cfg.cluster_name, workers, "creating kind cluster");

        let mut child = Command::new("kind")
            .args(cluster_create_args(cfg))
            .env("KIND_EXPERIMENTAL_DOCKER_NETWORK", &cfg.vpc_name)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(kind_config(workers).as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(Error::provisioning(
                "cluster",
                format!(
                    "kind create cluster failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        Ok(())
    }

    async fn upload_image(&self, image: &Path, cfg: &EnvironmentConfig) -> Result<()> {
        if !tokio::fs::try_exists(image).await? {
            return Err(Error::provisioning(
                "podvm-image",
                format!("image {} does not exist", image.display()),
            ));
        }

        let node = control_plane_node(cfg);
        let dest = image_destination(cfg);
        let dest_dir = Path::new(dest)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| "/".to_string());
        info!(image = %image.display(), node = %node, dest, "uploading pod VM image");

        let mkdir = vec![
            "exec".to_string(),
            node.clone(),
            "mkdir".to_string(),
            "-p".to_string(),
            dest_dir,
        ];
        run("docker", &mkdir).await.map_err(|stderr| {
            Error::provisioning("podvm-image", format!("mkdir on {} failed: {}", node, stderr))
        })?;

        let copy = vec![
            "cp".to_string(),
            image.to_string_lossy().into_owned(),
            format!("{}:{}", node, dest),
        ];
        run("docker", &copy).await.map_err(|stderr| {
            Error::provisioning("podvm-image", format!("docker cp failed: {}", stderr))
        })
    }

    async fn delete_cluster(&self, cfg: &EnvironmentConfig) -> Result<()> {
        info!(cluster = %cfg.cluster_name, "deleting kind cluster");
        let args = vec![
            "delete".to_string(),
            "cluster".to_string(),
            "--name".to_string(),
            cfg.cluster_name.clone(),
        ];
        run("kind", &args).await.map_err(|stderr| {
            Error::teardown("cluster", format!("kind delete cluster failed: {}", stderr))
        })
    }

    async fn delete_vpc(&self, cfg: &EnvironmentConfig) -> Result<()> {
        info!(network = %cfg.vpc_name, "deleting docker network");
        let args = vec!["network".to_string(), "rm".to_string(), cfg.vpc_name.clone()];
        let args = &args;

        retry_with_backoff(&self.network_retry, "docker network rm", move || async move {
            match run("docker", args).await {
                Ok(()) => Ok(()),
                Err(stderr) if is_missing_network(&stderr) => {
                    debug!(network = %cfg.vpc_name, "network already gone");
                    Ok(())
                }
                Err(stderr) => Err(stderr),
            }
        })
        .await
        .map_err(|stderr| Error::teardown("vpc", format!("docker network rm failed: {}", stderr)))
    }
}
