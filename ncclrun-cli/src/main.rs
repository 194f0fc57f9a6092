//! ncclrun CLI
//!
//! Submits a multi-node NCCL benchmark to Run:ai, captures the output of
//! every pod into `.logs/`, and exits with a code describing the outcome.

mod summary;

use anyhow::{Context, Result};
use clap::Parser;
use ncclrun_runner::{BenchmarkProfile, RunCoordinator, RunRequest, RunnerConfig};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ncclrun")]
#[command(about = "Run multi-node NCCL tests in a Run:ai environment", long_about = None)]
#[command(after_help = "Examples:\n  ncclrun --project test --workers 2\n  ncclrun --project my-project --nodes 4 --profile hpc-benchmarks")]
struct Cli {
    /// Run:ai project name
    #[arg(long, env = "NCCLRUN_PROJECT")]
    project: String,

    /// Number of worker nodes to use (each node has 8 GPUs)
    #[arg(long, visible_alias = "nodes", value_parser = clap::value_parser!(u32).range(1..))]
    workers: u32,

    /// Set NCCL_DEBUG=INFO and NCCL_DEBUG_SUBSYS=INIT,NET in the job
    #[arg(long)]
    debug: bool,

    /// Benchmark profile: standard, b200 or hpc-benchmarks
    #[arg(long, env = "NCCLRUN_PROFILE", default_value_t = BenchmarkProfile::default())]
    profile: BenchmarkProfile,

    /// Directory for pod log files [default: .logs]
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Seconds to wait for the launcher and all worker pods [default: 300]
    #[arg(long, value_name = "SECONDS")]
    discovery_timeout: Option<u64>,

    /// Hard deadline for the whole run in seconds [default: 3600]
    #[arg(long, value_name = "SECONDS")]
    run_timeout: Option<u64>,

    /// Print the run result as JSON instead of the summary
    #[arg(long)]
    json: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Environment configuration with the explicit flags applied on top
    fn runner_config(&self) -> Result<RunnerConfig> {
        let mut config = RunnerConfig::from_env().context("Invalid NCCLRUN_* environment")?;

        if let Some(dir) = &self.log_dir {
            config.log_dir = dir.clone();
        }
        if let Some(secs) = self.discovery_timeout {
            config.discovery_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.run_timeout {
            config.run_timeout = Duration::from_secs(secs);
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    fn request(&self) -> RunRequest {
        RunRequest {
            project: self.project.clone(),
            workers: self.workers,
            profile: self.profile,
            debug: self.debug,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for the summary
    let default_filter = if cli.verbose {
        "ncclrun=debug,ncclrun_runner=debug,ncclrun_cluster=debug"
    } else {
        "ncclrun=info,ncclrun_runner=info,ncclrun_cluster=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = cli.runner_config()?;
    info!(
        "Loaded configuration: log_dir={}, discovery_timeout={:?}, run_timeout={:?}",
        config.log_dir.display(),
        config.discovery_timeout,
        config.run_timeout
    );

    let log_dir = config.log_dir.clone();
    let coordinator = RunCoordinator::from_config(config);

    // Ctrl-C stops the run; captured logs are kept
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping the run");
                cancel.cancel();
            }
        }
    });

    let result = coordinator.run(&cli.request(), &cancel).await;

    if cli.json {
        let json = serde_json::to_string_pretty(&result).context("Failed to serialize run result")?;
        println!("{}", json);
    } else {
        summary::print_summary(&result, &log_dir);
    }

    std::process::exit(result.exit_code());
}
