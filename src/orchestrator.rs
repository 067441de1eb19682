//! Environment lifecycle orchestration
//!
//! A run is: setup phases in a fixed order, the test suite (only when setup
//! succeeded), then teardown exactly once regardless of what happened before.
//!
//! Setup order:
//! 1. `vpc`, `cluster`: managed mode only
//! 2. `podvm-image`: whenever an image path is configured
//! 3. `peer-pods`: always
//!
//! Teardown runs every declared rollback in reverse: `cluster` then `vpc` in
//! managed mode, or the manual-removal advisory in bring-your-own mode.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tracing::{error, info, warn};

use crate::config::{CloudProviderId, ProvisioningMode, RunSettings};
use crate::phase::{step, Phase, PhaseList};
use crate::provisioner::CloudProvisioner;
use crate::report::{RunReport, TestStatus};
use crate::runner::TestRunner;
use crate::workload::WorkloadDeployer;
use crate::{Error, Result};

pub const PHASE_VPC: &str = "vpc";
pub const PHASE_CLUSTER: &str = "cluster";
pub const PHASE_PODVM_IMAGE: &str = "podvm-image";
pub const PHASE_PEER_PODS: &str = "peer-pods";

/// Where a run currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    VpcReady,
    ClusterReady,
    ImageUploaded,
    WorkloadDeployed,
    TestsRunning,
    TornDown,
}

impl LifecycleState {
    /// State reached once the named setup phase completes
    fn after_phase(phase: &str) -> Option<Self> {
        match phase {
            PHASE_VPC => Some(Self::VpcReady),
            PHASE_CLUSTER => Some(Self::ClusterReady),
            PHASE_PODVM_IMAGE => Some(Self::ImageUploaded),
            PHASE_PEER_PODS => Some(Self::WorkloadDeployed),
            _ => None,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

fn advance(state: &mut LifecycleState, next: LifecycleState) {
    info!(from = %state, to = %next, "lifecycle transition");
    *state = next;
}

/// Keep phase-specific errors, wrap anything else as a provisioning failure.
fn as_provisioning(phase: &str, e: Error) -> Error {
    match e {
        e @ (Error::Provisioning { .. } | Error::Timeout { .. }) => e,
        other => Error::provisioning(phase, other.to_string()),
    }
}

fn as_deployment(e: Error) -> Error {
    match e {
        e @ (Error::Deployment(_) | Error::Timeout { .. }) => e,
        other => Error::deployment(other.to_string()),
    }
}

/// Owns the settings, phases and state of a single run.
pub struct Orchestrator {
    settings: RunSettings,
    phases: PhaseList,
    state: LifecycleState,
}

impl Orchestrator {
    /// Build the phase list for the configured mode.
    ///
    /// A provisioner must be supplied whenever the settings need one; it is
    /// ignored otherwise.
    pub fn new(
        settings: RunSettings,
        provisioner: Option<Arc<dyn CloudProvisioner>>,
        deployer: Arc<dyn WorkloadDeployer>,
    ) -> Result<Self> {
        let provisioner = match (settings.needs_provisioner(), provisioner) {
            (true, Some(p)) => Some(p),
            (true, None) => {
                return Err(Error::configuration(format!(
                    "a provisioner for cloud provider {} is required",
                    settings.provider
                )))
            }
            (false, _) => None,
        };

        let mut phases = PhaseList::new();

        if let (ProvisioningMode::Managed, Some(p)) = (settings.mode, &provisioner) {
            phases.push(vpc_phase(p.clone()));
            phases.push(cluster_phase(p.clone()));
        }

        if let (Some(image), Some(p)) = (&settings.podvm_image, &provisioner) {
            phases.push(image_phase(p.clone(), image.clone()));
        }

        phases.push(peer_pods_phase(deployer, settings.mode));

        Ok(Self {
            settings,
            phases,
            state: LifecycleState::Uninitialized,
        })
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn phase_names(&self) -> Vec<&str> {
        self.phases.names()
    }

    /// Phases that will be rolled back, in teardown order
    pub fn teardown_names(&self) -> Vec<&str> {
        self.phases.rollback_names()
    }

    /// Set up, run the suite, and tear down. Consumes the orchestrator so a
    /// run (and its teardown) happens at most once.
    pub async fn run(mut self, runner: &dyn TestRunner) -> RunReport {
        let start = Instant::now();
        let deadline = self.settings.phase_timeout;

        info!(
            provider = %self.settings.provider,
            mode = %self.settings.mode,
            phases = ?self.phases.names(),
            teardown = ?self.phases.rollback_names(),
            "starting environment setup"
        );

        let state = &mut self.state;
        let setup = self
            .phases
            .run_forward(&self.settings.env, deadline, |phase| {
                if let Some(next) = LifecycleState::after_phase(phase) {
                    advance(state, next);
                }
            })
            .await;
        let reached = self.state;

        let tests = match &setup.failure {
            Some(failure) => {
                error!(phase = %failure.phase, error = %failure.error, "setup failed, skipping tests");
                TestStatus::NotRun
            }
            None => {
                advance(&mut self.state, LifecycleState::TestsRunning);
                match runner.run(&self.settings.env).await {
                    Ok(outcome) => TestStatus::Completed(outcome),
                    Err(e) => {
                        error!(error = %e, "test suite could not be run");
                        TestStatus::Errored(e)
                    }
                }
            }
        };

        let teardown = self.phases.run_rollback(&self.settings.env, deadline).await;
        if let Some(failure) = &teardown.failure {
            warn!(phase = %failure.phase, error = %failure.error, "teardown incomplete");
        }
        advance(&mut self.state, LifecycleState::TornDown);

        RunReport {
            setup,
            tests,
            teardown,
            reached,
            final_state: self.state,
            elapsed: start.elapsed(),
        }
    }
}

/// Build the provisioner (when needed) and deployer for `settings`, then run.
///
/// An unsupported provider fails here, before any provisioner, deployer or
/// runner call is made.
pub async fn launch<P, D>(
    settings: RunSettings,
    provisioner_for: P,
    deployer_for: D,
    runner: &dyn TestRunner,
) -> Result<RunReport>
where
    P: FnOnce(&CloudProviderId) -> Result<Arc<dyn CloudProvisioner>>,
    D: FnOnce(&CloudProviderId) -> Arc<dyn WorkloadDeployer>,
{
    let provisioner = if settings.needs_provisioner() {
        Some(provisioner_for(&settings.provider)?)
    } else {
        None
    };
    let deployer = deployer_for(&settings.provider);

    let orchestrator = Orchestrator::new(settings, provisioner, deployer)?;
    info!(
        kubeconfig = %orchestrator.settings().env.kubeconfig.display(),
        "environment resolved"
    );
    Ok(orchestrator.run(runner).await)
}

fn vpc_phase(p: Arc<dyn CloudProvisioner>) -> Phase {
    let create = p.clone();
    Phase::new(
        PHASE_VPC,
        step(move |cfg| {
            let p = create.clone();
            async move { p.create_vpc(cfg).await.map_err(|e| as_provisioning(PHASE_VPC, e)) }.boxed()
        }),
    )
    .with_rollback(step(move |cfg| {
        let p = p.clone();
        async move { p.delete_vpc(cfg).await }.boxed()
    }))
}

fn cluster_phase(p: Arc<dyn CloudProvisioner>) -> Phase {
    let create = p.clone();
    Phase::new(
        PHASE_CLUSTER,
        step(move |cfg| {
            let p = create.clone();
            async move {
                p.create_cluster(cfg)
                    .await
                    .map_err(|e| as_provisioning(PHASE_CLUSTER, e))
            }
            .boxed()
        }),
    )
    .with_rollback(step(move |cfg| {
        let p = p.clone();
        async move { p.delete_cluster(cfg).await }.boxed()
    }))
}

fn image_phase(p: Arc<dyn CloudProvisioner>, image: PathBuf) -> Phase {
    Phase::new(
        PHASE_PODVM_IMAGE,
        step(move |cfg| {
            let p = p.clone();
            let image = image.clone();
            async move {
                p.upload_image(&image, cfg)
                    .await
                    .map_err(|e| as_provisioning(PHASE_PODVM_IMAGE, e))
            }
            .boxed()
        }),
    )
}

fn peer_pods_phase(deployer: Arc<dyn WorkloadDeployer>, mode: ProvisioningMode) -> Phase {
    let phase = Phase::new(
        PHASE_PEER_PODS,
        step(move |cfg| {
            let deployer = deployer.clone();
            async move { deployer.deploy(cfg).await.map_err(as_deployment) }.boxed()
        }),
    );

    // Managed clusters take the workload with them when deleted.
    match mode {
        ProvisioningMode::Managed => phase,
        ProvisioningMode::BringYourOwn => phase.with_rollback(step(|cfg| {
            async move {
                warn!(
                    kubeconfig = %cfg.kubeconfig.display(),
                    "cluster was not provisioned by this run: remove the peer pods installation manually"
                );
                Ok::<_, Error>(())
            }
            .boxed()
        })),
    }
}
