//! Peer pods e2e runner
//!
//! Sets up the test environment, runs the given test command against it and
//! tears the environment down. The exit code is the test command's.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use peerpods_e2e::runner::CommandTestRunner;
use peerpods_e2e::workload::PeerPodsDeployer;
use peerpods_e2e::{config, create_provisioner, launch, CloudProviderId, Result, WorkloadDeployer};

/// Provision a peer pods test environment and run a test suite against it
#[derive(Parser, Debug)]
#[command(name = "peerpods-e2e", version, about, long_about = None)]
struct Cli {
    /// Kubeconfig of an existing cluster (takes precedence over KUBECONFIG)
    #[arg(long)]
    kubeconfig: Option<String>,

    /// Directory containing one kustomize overlay per cloud provider
    #[arg(long, env = "PEERPODS_OVERLAYS_DIR", default_value = "install/overlays")]
    overlays_dir: PathBuf,

    /// Seconds to wait for the cloud-api-adaptor DaemonSet to become ready
    #[arg(long, default_value = "600")]
    rollout_timeout_secs: u64,

    /// Test suite command, given after `--`
    #[arg(last = true, required = true)]
    test_command: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => u8::try_from(code).map(ExitCode::from).unwrap_or(ExitCode::FAILURE),
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let settings = config::from_process_env(cli.kubeconfig.as_deref())?;
    let runner = CommandTestRunner::new(cli.test_command, settings.provider.clone())?;

    let overlays_dir = cli.overlays_dir;
    let rollout_timeout = Duration::from_secs(cli.rollout_timeout_secs);
    let deployer_for = |provider: &CloudProviderId| -> Arc<dyn WorkloadDeployer> {
        Arc::new(PeerPodsDeployer::new(provider.clone(), overlays_dir, rollout_timeout))
    };

    let report = launch(settings, create_provisioner, deployer_for, &runner).await?;
    report.log_summary();
    Ok(report.exit_code())
}
