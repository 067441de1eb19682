//! Run configuration resolved from the process environment.
//!
//! Recognized variables:
//! - `CLOUD_PROVIDER`: required, selects the cloud provisioner
//! - `TEST_E2E_PROVISION`: `yes`/`true`/`1` enables managed provisioning
//! - `TEST_E2E_PODVM_IMAGE`: optional pod VM image to upload
//! - `TEST_PROVISION_FILE`: optional YAML map of provider properties
//! - `TEST_E2E_PHASE_TIMEOUT`: per-phase deadline in seconds
//!
//! The kubeconfig resolution chain (bring-your-own mode only, highest priority first):
//! 1. Explicit `--kubeconfig` flag
//! 2. `KUBECONFIG` environment variable
//! 3. `~/.kube/config`, if it exists

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::{Error, Result};

pub const CLOUD_PROVIDER_ENV: &str = "CLOUD_PROVIDER";
pub const PROVISION_ENV: &str = "TEST_E2E_PROVISION";
pub const PODVM_IMAGE_ENV: &str = "TEST_E2E_PODVM_IMAGE";
pub const PROVISION_FILE_ENV: &str = "TEST_PROVISION_FILE";
pub const PHASE_TIMEOUT_ENV: &str = "TEST_E2E_PHASE_TIMEOUT";
pub const KUBECONFIG_ENV: &str = "KUBECONFIG";

const DEFAULT_CLUSTER_NAME: &str = "peer-pods-e2e";
const DEFAULT_PHASE_TIMEOUT: Duration = Duration::from_secs(1800);

/// Whether this run owns the cloud infrastructure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningMode {
    /// Create the VPC and cluster during setup, destroy them during teardown
    Managed,
    /// Use an existing cluster reached through a resolved kubeconfig
    BringYourOwn,
}

impl fmt::Display for ProvisioningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Managed => write!(f, "managed"),
            Self::BringYourOwn => write!(f, "bring-your-own"),
        }
    }
}

/// Opaque cloud provider identifier taken from `CLOUD_PROVIDER`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudProviderId(String);

impl CloudProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CloudProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Access configuration and provider parameters for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentConfig {
    /// Kubeconfig used to reach the cluster. In managed mode the provisioner
    /// writes it while creating the cluster.
    pub kubeconfig: PathBuf,
    pub cluster_name: String,
    pub vpc_name: String,
    pub region: Option<String>,
    /// Free-form provider properties from the provision file
    pub properties: BTreeMap<String, String>,
}

impl EnvironmentConfig {
    /// Look up a provider property by key
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Everything resolved before the orchestrator is constructed.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub provider: CloudProviderId,
    pub mode: ProvisioningMode,
    pub podvm_image: Option<PathBuf>,
    pub phase_timeout: Duration,
    pub env: EnvironmentConfig,
}

impl RunSettings {
    /// A provisioner is needed to manage infrastructure or to upload an image.
    pub fn needs_provisioner(&self) -> bool {
        self.mode == ProvisioningMode::Managed || self.podvm_image.is_some()
    }
}

/// Resolve settings from the real process environment.
pub fn from_process_env(explicit_kubeconfig: Option<&str>) -> Result<RunSettings> {
    resolve(
        |key| std::env::var(key).ok(),
        explicit_kubeconfig,
        dirs::home_dir().as_deref(),
    )
}

/// Resolve settings from an arbitrary variable lookup.
///
/// `home` is the directory probed for `.kube/config` as the last kubeconfig candidate.
pub fn resolve<F>(lookup: F, explicit_kubeconfig: Option<&str>, home: Option<&Path>) -> Result<RunSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    let provider = non_empty(CLOUD_PROVIDER_ENV)
        .map(CloudProviderId::new)
        .ok_or_else(|| {
            Error::configuration("CLOUD_PROVIDER should be exported in the environment")
        })?;

    let mode = match lookup(PROVISION_ENV) {
        Some(v) if is_affirmative(&v) => ProvisioningMode::Managed,
        _ => ProvisioningMode::BringYourOwn,
    };

    let podvm_image = non_empty(PODVM_IMAGE_ENV).map(PathBuf::from);

    let phase_timeout = match non_empty(PHASE_TIMEOUT_ENV) {
        Some(raw) => parse_phase_timeout(&raw)?,
        None => DEFAULT_PHASE_TIMEOUT,
    };

    let properties = match non_empty(PROVISION_FILE_ENV) {
        Some(path) => load_properties(Path::new(&path))?,
        None => BTreeMap::new(),
    };

    let cluster_name = properties
        .get("CLUSTER_NAME")
        .cloned()
        .unwrap_or_else(|| DEFAULT_CLUSTER_NAME.to_string());
    let vpc_name = properties
        .get("VPC_NAME")
        .cloned()
        .unwrap_or_else(|| format!("{}-net", cluster_name));
    let region = properties.get("REGION").cloned();

    let kubeconfig = match mode {
        ProvisioningMode::Managed => managed_kubeconfig_path(&cluster_name),
        ProvisioningMode::BringYourOwn => {
            resolve_kubeconfig(explicit_kubeconfig, lookup(KUBECONFIG_ENV), home)
                .ok_or_else(|| Error::configuration("Unable to find a kubeconfig file"))?
        }
    };

    debug!(
        provider = %provider,
        mode = %mode,
        kubeconfig = %kubeconfig.display(),
        "resolved run settings"
    );

    Ok(RunSettings {
        provider,
        mode,
        podvm_image,
        phase_timeout,
        env: EnvironmentConfig {
            kubeconfig,
            cluster_name,
            vpc_name,
            region,
            properties,
        },
    })
}

/// Values accepted as "on" for the provisioning flag.
pub fn is_affirmative(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "yes" | "true" | "1"
    )
}

/// Resolve a kubeconfig path using the priority chain.
///
/// Explicit and environment candidates are taken as given; only the default
/// per-user location is checked for existence.
pub fn resolve_kubeconfig(
    explicit: Option<&str>,
    env_value: Option<String>,
    home: Option<&Path>,
) -> Option<PathBuf> {
    if let Some(path) = explicit.filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }

    if let Some(path) = env_value.filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }

    let default = home?.join(".kube").join("config");
    default.is_file().then_some(default)
}

/// Where the managed-mode provisioner writes the new cluster's kubeconfig.
fn managed_kubeconfig_path(cluster_name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{}-kubeconfig", cluster_name))
}

fn parse_phase_timeout(raw: &str) -> Result<Duration> {
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => Err(Error::configuration(format!(
            "{} must be a positive number of seconds, got '{}'",
            PHASE_TIMEOUT_ENV, raw
        ))),
        Ok(secs) => Ok(Duration::from_secs(secs)),
    }
}

/// Load provider properties from a YAML mapping of scalar values.
fn load_properties(path: &Path) -> Result<BTreeMap<String, String>> {
    let data = std::fs::read_to_string(path).map_err(|e| {
        Error::configuration(format!("failed to read {}: {}", path.display(), e))
    })?;
    let raw: BTreeMap<String, serde_yaml::Value> = serde_yaml::from_str(&data).map_err(|e| {
        Error::configuration(format!("failed to parse {}: {}", path.display(), e))
    })?;

    raw.into_iter()
        .map(|(key, value)| {
            let value = match value {
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                _ => {
                    return Err(Error::configuration(format!(
                        "property {} in {} must be a scalar",
                        key,
                        path.display()
                    )))
                }
            };
            Ok((key, value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_provider_is_fatal() {
        let err = resolve(lookup_from(&[(PROVISION_ENV, "yes")]), None, None).unwrap_err();
        assert!(err.is_fatal_preflight());
        assert!(err.to_string().contains("CLOUD_PROVIDER"));
    }

    #[test]
    fn empty_provider_counts_as_missing() {
        let err = resolve(lookup_from(&[(CLOUD_PROVIDER_ENV, "")]), Some("/k"), None).unwrap_err();
        assert!(err.is_fatal_preflight());
    }

    #[rstest]
    #[case("yes", true)]
    #[case("YES", true)]
    #[case(" true ", true)]
    #[case("1", true)]
    #[case("no", false)]
    #[case("", false)]
    #[case("y", false)]
    fn affirmative_values(#[case] value: &str, #[case] expected: bool) {
        assert_eq!(is_affirmative(value), expected);
    }

    #[test]
    fn managed_mode_skips_kubeconfig_resolution() {
        let settings = resolve(
            lookup_from(&[(CLOUD_PROVIDER_ENV, "kind"), (PROVISION_ENV, "yes")]),
            None,
            None,
        )
        .unwrap();

        assert_eq!(settings.mode, ProvisioningMode::Managed);
        assert!(settings.needs_provisioner());
        assert_eq!(settings.env.cluster_name, "peer-pods-e2e");
        assert_eq!(settings.env.vpc_name, "peer-pods-e2e-net");
        assert!(settings
            .env
            .kubeconfig
            .ends_with("peer-pods-e2e-kubeconfig"));
    }

    #[test]
    fn bring_your_own_without_kubeconfig_is_fatal() {
        let home = tempfile::tempdir().unwrap();
        let err = resolve(
            lookup_from(&[(CLOUD_PROVIDER_ENV, "acme")]),
            None,
            Some(home.path()),
        )
        .unwrap_err();
        assert!(err.is_fatal_preflight());
        assert!(err.to_string().contains("kubeconfig"));
    }

    #[test]
    fn bring_your_own_uses_kubeconfig_env() {
        let settings = resolve(
            lookup_from(&[(CLOUD_PROVIDER_ENV, "acme"), (KUBECONFIG_ENV, "/tmp/kc")]),
            None,
            None,
        )
        .unwrap();
        assert_eq!(settings.mode, ProvisioningMode::BringYourOwn);
        assert!(!settings.needs_provisioner());
        assert_eq!(settings.env.kubeconfig, PathBuf::from("/tmp/kc"));
    }

    #[test]
    fn image_requires_provisioner_in_either_mode() {
        let settings = resolve(
            lookup_from(&[
                (CLOUD_PROVIDER_ENV, "acme"),
                (PODVM_IMAGE_ENV, "/images/podvm.qcow2"),
            ]),
            Some("/explicit"),
            None,
        )
        .unwrap();
        assert_eq!(settings.mode, ProvisioningMode::BringYourOwn);
        assert_eq!(
            settings.podvm_image.as_deref(),
            Some(Path::new("/images/podvm.qcow2"))
        );
        assert!(settings.needs_provisioner());
    }

    #[test]
    fn resolve_kubeconfig_explicit_wins() {
        let result = resolve_kubeconfig(Some("/explicit"), Some("/env".to_string()), None);
        assert_eq!(result, Some(PathBuf::from("/explicit")));
    }

    #[test]
    fn resolve_kubeconfig_env_before_default() {
        let home = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(home.path().join(".kube")).unwrap();
        std::fs::write(home.path().join(".kube/config"), "apiVersion: v1").unwrap();

        let result = resolve_kubeconfig(None, Some("/env".to_string()), Some(home.path()));
        assert_eq!(result, Some(PathBuf::from("/env")));
    }

    #[test]
    fn resolve_kubeconfig_falls_back_to_home() {
        let home = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(home.path().join(".kube")).unwrap();
        std::fs::write(home.path().join(".kube/config"), "apiVersion: v1").unwrap();

        let result = resolve_kubeconfig(Some(""), Some(String::new()), Some(home.path()));
        assert_eq!(result, Some(home.path().join(".kube/config")));
    }

    #[test]
    fn resolve_kubeconfig_none_when_default_missing() {
        let home = tempfile::tempdir().unwrap();
        assert_eq!(resolve_kubeconfig(None, None, Some(home.path())), None);
        assert_eq!(resolve_kubeconfig(None, None, None), None);
    }

    #[test]
    fn provision_file_sets_names_and_properties() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("provision.yaml");
        std::fs::write(
            &file,
            "CLUSTER_NAME: pp-ci\nREGION: us-south\nVPC_SUBNET: 10.88.0.0/16\nWORKERS: 2\n",
        )
        .unwrap();

        let settings = resolve(
            lookup_from(&[
                (CLOUD_PROVIDER_ENV, "kind"),
                (PROVISION_ENV, "yes"),
                (PROVISION_FILE_ENV, file.to_str().unwrap()),
            ]),
            None,
            None,
        )
        .unwrap();

        assert_eq!(settings.env.cluster_name, "pp-ci");
        assert_eq!(settings.env.vpc_name, "pp-ci-net");
        assert_eq!(settings.env.region.as_deref(), Some("us-south"));
        assert_eq!(settings.env.property("VPC_SUBNET"), Some("10.88.0.0/16"));
        assert_eq!(settings.env.property("WORKERS"), Some("2"));
    }

    #[test]
    fn unreadable_provision_file_is_fatal() {
        let err = resolve(
            lookup_from(&[
                (CLOUD_PROVIDER_ENV, "kind"),
                (PROVISION_FILE_ENV, "/nonexistent/provision.yaml"),
            ]),
            Some("/kc"),
            None,
        )
        .unwrap_err();
        assert!(err.is_fatal_preflight());
    }

    #[test]
    fn nested_property_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("provision.yaml");
        std::fs::write(&file, "SUBNETS:\n  - a\n  - b\n").unwrap();
        let err = load_properties(&file).unwrap_err();
        assert!(err.to_string().contains("SUBNETS"));
    }

    #[rstest]
    #[case("0")]
    #[case("abc")]
    #[case("-5")]
    fn invalid_phase_timeout_is_fatal(#[case] raw: &str) {
        let err = resolve(
            lookup_from(&[(CLOUD_PROVIDER_ENV, "acme"), (PHASE_TIMEOUT_ENV, raw)]),
            Some("/kc"),
            None,
        )
        .unwrap_err();
        assert!(err.is_fatal_preflight());
    }

    #[test]
    fn phase_timeout_defaults_and_overrides() {
        let settings = resolve(lookup_from(&[(CLOUD_PROVIDER_ENV, "acme")]), Some("/kc"), None).unwrap();
        assert_eq!(settings.phase_timeout, DEFAULT_PHASE_TIMEOUT);

        let settings = resolve(
            lookup_from(&[(CLOUD_PROVIDER_ENV, "acme"), (PHASE_TIMEOUT_ENV, "90")]),
            Some("/kc"),
            None,
        )
        .unwrap();
        assert_eq!(settings.phase_timeout, Duration::from_secs(90));
    }
}
