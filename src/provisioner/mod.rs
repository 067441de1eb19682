//! Cloud provisioner abstraction
//!
//! Each supported cloud provider implements [`CloudProvisioner`] to create and
//! destroy the infrastructure a test run needs. The implementation is selected
//! once, from the `CLOUD_PROVIDER` identifier, when the run is constructed.
//!
//! # Supported Providers
//!
//! - [`KindProvisioner`] - docker network plus kind cluster on the local host

mod kind;

pub use kind::KindProvisioner;

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::config::{CloudProviderId, EnvironmentConfig};
use crate::{Error, Result};

/// Infrastructure operations for one cloud provider.
///
/// Calls are not retried by the caller; an implementation that wants retries
/// must do them itself. Dropping the returned future cancels the call.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CloudProvisioner: Send + Sync {
    /// Create the network the cluster is attached to
    async fn create_vpc(&self, cfg: &EnvironmentConfig) -> Result<()>;

    /// Create the cluster and write its kubeconfig to `cfg.kubeconfig`
    async fn create_cluster(&self, cfg: &EnvironmentConfig) -> Result<()>;

    /// Upload a pod VM image so peer pods can boot from it
    async fn upload_image(&self, image: &Path, cfg: &EnvironmentConfig) -> Result<()>;

    async fn delete_cluster(&self, cfg: &EnvironmentConfig) -> Result<()>;

    async fn delete_vpc(&self, cfg: &EnvironmentConfig) -> Result<()>;
}

/// Cloud providers with a provisioner implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Kind,
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kind" => Ok(Self::Kind),
            other => Err(Error::configuration(format!(
                "unsupported cloud provider '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kind => write!(f, "kind"),
        }
    }
}

/// Get a provisioner instance for the cloud provider.
pub fn create_provisioner(provider: &CloudProviderId) -> Result<Arc<dyn CloudProvisioner>> {
    match provider.as_str().parse::<ProviderKind>()? {
        ProviderKind::Kind => Ok(Arc::new(KindProvisioner::new())),
    }
}
