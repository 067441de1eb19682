//! Peer pods workload deployment
//!
//! The workload is installed from a per-provider kustomize overlay and is
//! considered deployed once the cloud-api-adaptor DaemonSet reports every
//! scheduled pod as ready.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DaemonSet;
use kube::api::Api;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
#[cfg(test)]
use mockall::automock;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::{CloudProviderId, EnvironmentConfig};
use crate::{Error, Result};

pub const PEER_PODS_NAMESPACE: &str = "confidential-containers-system";
pub const PEER_PODS_DAEMONSET: &str = "cloud-api-adaptor-daemonset";

const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Installs the workload under test into a reachable cluster.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkloadDeployer: Send + Sync {
    async fn deploy(&self, cfg: &EnvironmentConfig) -> Result<()>;
}

/// Outcome of one readiness probe: `Some` when ready, `None` to poll again,
/// `Err` to give up with that message.
pub type PollResult<T> = std::result::Result<Option<T>, String>;

/// Poll `check_fn` every `interval` until it yields a value, fails, or `timeout` passes.
pub async fn wait_with_timeout<T, F, Fut>(
    timeout: Duration,
    interval: Duration,
    description: &str,
    mut check_fn: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PollResult<T>>,
{
    let start = Instant::now();

    loop {
        match check_fn().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => debug!("Waiting for {}...", description),
            Err(e) => {
                return Err(Error::deployment(format!(
                    "error waiting for {}: {}",
                    description, e
                )))
            }
        }

        if start.elapsed() >= timeout {
            return Err(Error::deployment(format!(
                "timeout waiting for {}",
                description
            )));
        }
        tokio::time::sleep(interval).await;
    }
}

/// Whether every scheduled pod of the DaemonSet is ready.
pub fn daemonset_ready(ds: &DaemonSet) -> bool {
    ds.status
        .as_ref()
        .map(|s| s.desired_number_scheduled > 0 && s.number_ready == s.desired_number_scheduled)
        .unwrap_or(false)
}

/// Deploys peer pods with `kubectl apply -k <overlays>/<provider>`.
#[derive(Debug, Clone)]
pub struct PeerPodsDeployer {
    provider: CloudProviderId,
    overlays_dir: PathBuf,
    rollout_timeout: Duration,
}

impl PeerPodsDeployer {
    pub fn new(provider: CloudProviderId, overlays_dir: PathBuf, rollout_timeout: Duration) -> Self {
        Self {
            provider,
            overlays_dir,
            rollout_timeout,
        }
    }

    /// Overlay directory for this deployer's provider
    pub fn overlay(&self) -> PathBuf {
        self.overlays_dir.join(self.provider.as_str())
    }

    fn apply_args(&self, cfg: &EnvironmentConfig) -> Vec<String> {
        vec![
            "--kubeconfig".to_string(),
            cfg.kubeconfig.to_string_lossy().into_owned(),
            "apply".to_string(),
            "-k".to_string(),
            self.overlay().to_string_lossy().into_owned(),
        ]
    }

    async fn client(cfg: &EnvironmentConfig) -> Result<Client> {
        let kubeconfig = Kubeconfig::read_from(&cfg.kubeconfig).map_err(|e| {
            Error::deployment(format!(
                "failed to read kubeconfig {}: {}",
                cfg.kubeconfig.display(),
                e
            ))
        })?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| Error::deployment(format!("failed to load kubeconfig: {}", e)))?;
        Ok(Client::try_from(config)?)
    }

    async fn wait_for_rollout(&self, client: Client) -> Result<()> {
        let daemonsets: Api<DaemonSet> = Api::namespaced(client, PEER_PODS_NAMESPACE);
        let description = format!("daemonset {}/{}", PEER_PODS_NAMESPACE, PEER_PODS_DAEMONSET);

        wait_with_timeout(self.rollout_timeout, POLL_INTERVAL, &description, || {
            let daemonsets = daemonsets.clone();
            async move {
                match daemonsets.get(PEER_PODS_DAEMONSET).await {
                    Ok(ds) if daemonset_ready(&ds) => Ok(Some(())),
                    Ok(_) => Ok(None),
                    Err(kube::Error::Api(e)) if e.code == 401 || e.code == 403 => {
                        Err(e.message)
                    }
                    Err(e) => {
                        debug!(error = %e, "daemonset not available yet");
                        Ok(None)
                    }
                }
            }
        })
        .await
    }
}

#[async_trait]
impl WorkloadDeployer for PeerPodsDeployer {
    async fn deploy(&self, cfg: &EnvironmentConfig) -> Result<()> {
        let overlay = self.overlay();
        if !tokio::fs::try_exists(&overlay).await? {
            return Err(Error::deployment(format!(
                "no peer pods overlay for provider {} at {}",
                self.provider,
                overlay.display()
            )));
        }

        info!(overlay = %overlay.display(), "applying peer pods manifests");
        let output = Command::new("kubectl")
            .args(self.apply_args(cfg))
            .kill_on_drop(true)
            .output()
            .await?;
        if !output.status.success() {
            return Err(Error::deployment(format!(
                "kubectl apply failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        info!("waiting for cloud-api-adaptor to be ready");
        let client = Self::client(cfg).await?;
        self.wait_for_rollout(client).await
    }
}
