//! Peer pods e2e environment lifecycle
//!
//! Provisions (or adopts) a cluster for a cloud provider, deploys the peer
//! pods workload, runs a conformance suite against it and tears everything
//! down again.
//!
//! # Example
//!
//! ```text
//! let settings = config::from_process_env(None)?;
//! let provisioner = create_provisioner(&settings.provider)?;
//! let report = Orchestrator::new(settings, Some(provisioner), deployer)?
//!     .run(&runner)
//!     .await;
//! std::process::exit(report.exit_code());
//! ```

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod phase;
pub mod provisioner;
pub mod report;
pub mod retry;
pub mod runner;
pub mod workload;

pub use config::{CloudProviderId, EnvironmentConfig, ProvisioningMode, RunSettings};
pub use error::{Error, Result};
pub use orchestrator::{launch, LifecycleState, Orchestrator};
pub use provisioner::{create_provisioner, CloudProvisioner};
pub use report::{RunReport, TestStatus};
pub use runner::{TestOutcome, TestRunner};
pub use workload::WorkloadDeployer;
