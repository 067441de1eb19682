//! Run outcome and exit status aggregation.
//!
//! The exit status is the test suite's own status. Teardown problems are
//! reported next to it but never change it.

use std::time::Duration;

use tracing::{error, info, warn};

use crate::orchestrator::LifecycleState;
use crate::phase::PhaseReport;
use crate::runner::TestOutcome;
use crate::Error;

/// What happened to the test suite
#[derive(Debug)]
pub enum TestStatus {
    /// Setup failed, so the suite was skipped
    NotRun,
    Completed(TestOutcome),
    /// The suite could not be started
    Errored(Error),
}

/// Everything a finished run reports
#[derive(Debug)]
pub struct RunReport {
    pub setup: PhaseReport,
    pub tests: TestStatus,
    pub teardown: PhaseReport,
    /// Last state reached before teardown began
    pub reached: LifecycleState,
    pub final_state: LifecycleState,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn setup_error(&self) -> Option<&Error> {
        self.setup.failure.as_ref().map(|f| &f.error)
    }

    pub fn teardown_error(&self) -> Option<&Error> {
        self.teardown.failure.as_ref().map(|f| &f.error)
    }

    /// Process exit code: the suite's code, or 1 when it never produced one.
    pub fn exit_code(&self) -> i32 {
        match &self.tests {
            TestStatus::Completed(outcome) => outcome.code,
            TestStatus::NotRun | TestStatus::Errored(_) => 1,
        }
    }

    pub fn log_summary(&self) {
        info!("========================================");
        match self.setup_error() {
            None => info!("  setup     OK    {}", self.setup.completed.join(", ")),
            Some(e) => error!("  setup     FAIL  {}", e),
        }
        match &self.tests {
            TestStatus::NotRun => warn!("  tests     SKIP"),
            TestStatus::Completed(o) if o.passed() => info!("  tests     PASS"),
            TestStatus::Completed(o) => error!("  tests     FAIL  exit code {}", o.code),
            TestStatus::Errored(e) => error!("  tests     FAIL  {}", e),
        }
        match self.teardown_error() {
            None => info!("  teardown  OK    {}", self.teardown.completed.join(", ")),
            Some(e) => warn!("  teardown  FAIL  {}", e),
        }
        info!("----------------------------------------");
        info!(
            "  exit code {} ({:.1}s total)",
            self.exit_code(),
            self.elapsed.as_secs_f64()
        );
        info!("========================================");
    }
}
