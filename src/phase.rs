//! Ordered, failable setup phases with declared rollbacks.
//!
//! Forward steps run strictly in declaration order and stop at the first
//! failure. Rollbacks are a finalizer: every declared rollback runs in reverse
//! declaration order no matter how far the forward pass got, stopping at the
//! first rollback that fails.

use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{info, warn};

use crate::config::EnvironmentConfig;
use crate::{Error, Result};

/// Future returned by a phase step
pub type StepFuture<'a> = BoxFuture<'a, Result<()>>;

/// A forward or rollback action over the run's environment
pub type Step = Box<dyn for<'a> Fn(&'a EnvironmentConfig) -> StepFuture<'a> + Send + Sync>;

/// Box a closure as a [`Step`], pinning down its higher-ranked signature.
pub fn step<F>(f: F) -> Step
where
    F: for<'a> Fn(&'a EnvironmentConfig) -> StepFuture<'a> + Send + Sync + 'static,
{
    Box::new(f)
}

/// One named phase of the lifecycle
pub struct Phase {
    name: String,
    forward: Step,
    rollback: Option<Step>,
}

impl Phase {
    pub fn new(name: impl Into<String>, forward: Step) -> Self {
        Self {
            name: name.into(),
            forward,
            rollback: None,
        }
    }

    pub fn with_rollback(mut self, rollback: Step) -> Self {
        self.rollback = Some(rollback);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_rollback(&self) -> bool {
        self.rollback.is_some()
    }
}

/// A phase that did not complete
#[derive(Debug)]
pub struct PhaseFailure {
    pub phase: String,
    pub error: Error,
}

/// Outcome of a forward or rollback pass
#[derive(Debug, Default)]
pub struct PhaseReport {
    /// Phases whose step completed, in execution order
    pub completed: Vec<String>,
    pub failure: Option<PhaseFailure>,
}

impl PhaseReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Ordered list of phases executed by a single run
#[derive(Default)]
pub struct PhaseList {
    phases: Vec<Phase>,
}

impl PhaseList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, phase: Phase) {
        self.phases.push(phase);
    }

    pub fn names(&self) -> Vec<&str> {
        self.phases.iter().map(Phase::name).collect()
    }

    /// Names of phases that declare a rollback, in teardown order
    pub fn rollback_names(&self) -> Vec<&str> {
        self.phases
            .iter()
            .rev()
            .filter(|p| p.has_rollback())
            .map(Phase::name)
            .collect()
    }

    /// Run forward steps in order, each bounded by `deadline`.
    ///
    /// `on_complete` is called with the phase name after each successful step.
    pub async fn run_forward<C>(
        &self,
        cfg: &EnvironmentConfig,
        deadline: Duration,
        mut on_complete: C,
    ) -> PhaseReport
    where
        C: FnMut(&str),
    {
        let mut report = PhaseReport::default();

        for phase in &self.phases {
            info!(phase = %phase.name, "starting setup phase");
            match run_bounded(&phase.name, (phase.forward)(cfg), deadline).await {
                Ok(()) => {
                    on_complete(&phase.name);
                    report.completed.push(phase.name.clone());
                }
                Err(error) => {
                    warn!(phase = %phase.name, error = %error, "setup phase failed");
                    report.failure = Some(PhaseFailure {
                        phase: phase.name.clone(),
                        error,
                    });
                    break;
                }
            }
        }

        report
    }

    /// Run every declared rollback in reverse order, each bounded by `deadline`.
    ///
    /// Failures are reported as [`Error::Teardown`] and abort the remaining rollbacks.
    pub async fn run_rollback(&self, cfg: &EnvironmentConfig, deadline: Duration) -> PhaseReport {
        let mut report = PhaseReport::default();

        for phase in self.phases.iter().rev() {
            let Some(rollback) = &phase.rollback else {
                continue;
            };

            info!(phase = %phase.name, "starting teardown phase");
            match run_bounded(&phase.name, rollback(cfg), deadline).await {
                Ok(()) => report.completed.push(phase.name.clone()),
                Err(e) => {
                    let error = match e {
                        e @ Error::Teardown { .. } => e,
                        other => Error::teardown(&phase.name, other.to_string()),
                    };
                    warn!(phase = %phase.name, error = %error, "teardown phase failed");
                    report.failure = Some(PhaseFailure {
                        phase: phase.name.clone(),
                        error,
                    });
                    break;
                }
            }
        }

        report
    }
}

async fn run_bounded(name: &str, fut: StepFuture<'_>, deadline: Duration) -> Result<()> {
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            phase: name.to_string(),
            after: deadline,
        }),
    }
}
