//! Error types for the peer pods test environment

use std::time::Duration;

use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while resolving, provisioning, exercising or tearing down
/// a test environment.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Pre-flight misconfiguration; nothing has been created yet
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A cloud provisioner call failed during setup
    #[error("provisioning error in phase {phase}: {message}")]
    Provisioning { phase: String, message: String },

    /// The peer pods workload could not be deployed
    #[error("deployment error: {0}")]
    Deployment(String),

    /// A cleanup call failed
    #[error("teardown error in phase {phase}: {message}")]
    Teardown { phase: String, message: String },

    /// A phase exceeded its deadline
    #[error("phase {phase} timed out after {after:?}")]
    Timeout { phase: String, after: Duration },

    /// An external command exited unsuccessfully
    #[error("command failed: {0}")]
    CommandFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),
}

impl Error {
    /// Create a configuration error with the given message
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a provisioning error for the named phase
    pub fn provisioning(phase: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Provisioning {
            phase: phase.into(),
            message: msg.into(),
        }
    }

    /// Create a deployment error with the given message
    pub fn deployment(msg: impl Into<String>) -> Self {
        Self::Deployment(msg.into())
    }

    /// Create a teardown error for the named phase
    pub fn teardown(phase: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Teardown {
            phase: phase.into(),
            message: msg.into(),
        }
    }

    /// Create a command failure with the given message
    pub fn command_failed(msg: impl Into<String>) -> Self {
        Self::CommandFailed(msg.into())
    }

    /// Configuration errors stop the process before any infrastructure or test action.
    pub fn is_fatal_preflight(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_preflight_fatal() {
        let err = Error::configuration("CLOUD_PROVIDER should be exported in the environment");
        assert!(err.is_fatal_preflight());
        assert!(err.to_string().starts_with("configuration error"));
        assert!(err.to_string().contains("CLOUD_PROVIDER"));
    }

    #[test]
    fn setup_and_teardown_errors_name_their_phase() {
        let err = Error::provisioning("cluster", "kind create cluster failed");
        assert!(!err.is_fatal_preflight());
        assert_eq!(
            err.to_string(),
            "provisioning error in phase cluster: kind create cluster failed"
        );

        let err = Error::teardown("vpc", "network has active endpoints");
        assert!(err.to_string().contains("phase vpc"));
        assert!(!err.is_fatal_preflight());
    }

    #[test]
    fn timeout_reports_deadline() {
        let err = Error::Timeout {
            phase: "peer-pods".to_string(),
            after: Duration::from_secs(5),
        };
        assert_eq!(err.to_string(), "phase peer-pods timed out after 5s");
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "kind: not found");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(!err.is_fatal_preflight());
    }
}
