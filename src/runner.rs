//! Test suite execution
//!
//! The suite runs between setup and teardown as a single blocking operation.
//! Whatever parallelism it uses internally is its own business.

use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use crate::config::{CloudProviderId, EnvironmentConfig, CLOUD_PROVIDER_ENV, KUBECONFIG_ENV};
use crate::{Error, Result};

/// Status reported by the test suite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestOutcome {
    pub code: i32,
}

impl TestOutcome {
    pub const PASSED: Self = Self { code: 0 };

    pub fn from_code(code: i32) -> Self {
        Self { code }
    }

    pub fn passed(&self) -> bool {
        self.code == 0
    }

    /// Map a process exit status; termination by signal counts as failure.
    pub fn from_status(status: ExitStatus) -> Self {
        Self {
            code: status.code().unwrap_or(1),
        }
    }
}

/// Runs the conformance suite against a ready environment.
#[async_trait]
pub trait TestRunner: Send + Sync {
    /// `Err` means the suite could not be run at all.
    async fn run(&self, cfg: &EnvironmentConfig) -> Result<TestOutcome>;
}

/// Runs the suite as an external command with the environment's kubeconfig.
#[derive(Debug, Clone)]
pub struct CommandTestRunner {
    program: String,
    args: Vec<String>,
    provider: CloudProviderId,
}

impl CommandTestRunner {
    /// Build from a full command line; the first element is the program.
    pub fn new(command: Vec<String>, provider: CloudProviderId) -> Result<Self> {
        let mut command = command.into_iter();
        let program = command
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::configuration("no test command given"))?;
        Ok(Self {
            program,
            args: command.collect(),
            provider,
        })
    }
}

#[async_trait]
impl TestRunner for CommandTestRunner {
    async fn run(&self, cfg: &EnvironmentConfig) -> Result<TestOutcome> {
        info!(program = %self.program, args = ?self.args, "running test suite");
        let status = Command::new(&self.program)
            .args(&self.args)
            .env(KUBECONFIG_ENV, &cfg.kubeconfig)
            .env(CLOUD_PROVIDER_ENV, self.provider.as_str())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| Error::command_failed(format!("failed to start {}: {}", self.program, e)))?;
        Ok(TestOutcome::from_status(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn env() -> EnvironmentConfig {
        EnvironmentConfig {
            kubeconfig: PathBuf::from("/tmp/pp-kubeconfig"),
            cluster_name: "pp".to_string(),
            vpc_name: "pp-net".to_string(),
            region: None,
            properties: BTreeMap::new(),
        }
    }

    fn sh(script: &str) -> CommandTestRunner {
        CommandTestRunner::new(
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            CloudProviderId::new("acme"),
        )
        .unwrap()
    }

    #[test]
    fn empty_command_is_rejected() {
        let err = CommandTestRunner::new(vec![], CloudProviderId::new("acme")).unwrap_err();
        assert!(err.is_fatal_preflight());
        assert!(CommandTestRunner::new(vec![String::new()], CloudProviderId::new("acme")).is_err());
    }

    #[test]
    fn outcome_passed_only_on_zero() {
        assert!(TestOutcome::PASSED.passed());
        assert!(!TestOutcome::from_code(2).passed());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn suite_exit_code_is_reported() {
        assert_eq!(sh("exit 0").run(&env()).await.unwrap(), TestOutcome::PASSED);
        assert_eq!(sh("exit 3").run(&env()).await.unwrap(), TestOutcome::from_code(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn suite_sees_kubeconfig_and_provider() {
        let outcome = sh(r#"[ "$KUBECONFIG" = /tmp/pp-kubeconfig ] && [ "$CLOUD_PROVIDER" = acme ]"#)
            .run(&env())
            .await
            .unwrap();
        assert!(outcome.passed());
    }

    #[tokio::test]
    async fn missing_program_is_an_error() {
        let runner = CommandTestRunner::new(
            vec!["/nonexistent/test-suite".to_string()],
            CloudProviderId::new("acme"),
        )
        .unwrap();
        assert!(runner.run(&env()).await.is_err());
    }
}
