//! Runner configuration
//!
//! Defines all tunable parameters of a benchmark run: polling intervals,
//! deadlines, reconnection policy, and the names of the cluster tools.

use anyhow::Context;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Runner configuration
///
/// Defaults suit a production cluster; tests shrink every duration to
/// milliseconds.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Directory receiving one log file per pod
    pub log_dir: PathBuf,

    /// How often pods are listed during discovery and while the job runs
    pub poll_interval: Duration,

    /// Maximum time to wait for the full pod topology
    pub discovery_timeout: Duration,

    /// Hard deadline for the whole run
    pub run_timeout: Duration,

    /// How long worker captures may keep running after the launcher ends
    pub worker_grace: Duration,

    /// How long a cancelled capture may take to stop before it is abandoned
    pub cancel_grace: Duration,

    /// Reconnection attempts per pod after a log stream disconnects
    pub max_reconnects: u32,

    /// Fixed delay between reconnection attempts
    pub reconnect_backoff: Duration,

    /// Prefix turning a project name into its namespace
    pub namespace_prefix: String,

    /// Label key carrying the job name on every pod of the job
    pub pod_label: String,

    /// Run:ai command line binary
    pub runai_bin: String,

    /// kubectl binary
    pub kubectl_bin: String,
}

impl RunnerConfig {
    /// Creates a new configuration with defaults
    pub fn new() -> Self {
        Self {
            log_dir: PathBuf::from(".logs"),
            poll_interval: Duration::from_secs(5),
            discovery_timeout: Duration::from_secs(300), // 5 minutes
            run_timeout: Duration::from_secs(3600),      // 1 hour
            worker_grace: Duration::from_secs(30),
            cancel_grace: Duration::from_secs(10),
            max_reconnects: 3,
            reconnect_backoff: Duration::from_secs(2),
            namespace_prefix: "runai-".to_string(),
            pod_label: "app".to_string(),
            runai_bin: "runai".to_string(),
            kubectl_bin: "kubectl".to_string(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Every variable is optional; unset ones keep their default.
    /// Durations are given in seconds.
    /// - NCCLRUN_LOG_DIR (default: .logs)
    /// - NCCLRUN_POLL_INTERVAL (default: 5)
    /// - NCCLRUN_DISCOVERY_TIMEOUT (default: 300)
    /// - NCCLRUN_RUN_TIMEOUT (default: 3600)
    /// - NCCLRUN_WORKER_GRACE (default: 30)
    /// - NCCLRUN_CANCEL_GRACE (default: 10)
    /// - NCCLRUN_MAX_RECONNECTS (default: 3)
    /// - NCCLRUN_RECONNECT_BACKOFF (default: 2)
    /// - NCCLRUN_NAMESPACE_PREFIX (default: runai-)
    /// - NCCLRUN_POD_LABEL (default: app)
    /// - NCCLRUN_RUNAI_BIN (default: runai)
    /// - NCCLRUN_KUBECTL_BIN (default: kubectl)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary variable source
    ///
    /// A variable that is set but cannot be parsed is an error rather than
    /// silently falling back to the default.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new();

        if let Some(dir) = lookup("NCCLRUN_LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }

        let seconds = |key: &str, default: Duration| -> anyhow::Result<Duration> {
            Ok(parse_var::<u64>(&lookup, key)?
                .map(Duration::from_secs)
                .unwrap_or(default))
        };

        config.poll_interval = seconds("NCCLRUN_POLL_INTERVAL", config.poll_interval)?;
        config.discovery_timeout = seconds("NCCLRUN_DISCOVERY_TIMEOUT", config.discovery_timeout)?;
        config.run_timeout = seconds("NCCLRUN_RUN_TIMEOUT", config.run_timeout)?;
        config.worker_grace = seconds("NCCLRUN_WORKER_GRACE", config.worker_grace)?;
        config.cancel_grace = seconds("NCCLRUN_CANCEL_GRACE", config.cancel_grace)?;
        config.reconnect_backoff = seconds("NCCLRUN_RECONNECT_BACKOFF", config.reconnect_backoff)?;

        if let Some(max) = parse_var::<u32>(&lookup, "NCCLRUN_MAX_RECONNECTS")? {
            config.max_reconnects = max;
        }

        if let Some(prefix) = lookup("NCCLRUN_NAMESPACE_PREFIX") {
            config.namespace_prefix = prefix;
        }
        if let Some(label) = lookup("NCCLRUN_POD_LABEL") {
            config.pod_label = label;
        }
        if let Some(bin) = lookup("NCCLRUN_RUNAI_BIN") {
            config.runai_bin = bin;
        }
        if let Some(bin) = lookup("NCCLRUN_KUBECTL_BIN") {
            config.kubectl_bin = bin;
        }

        Ok(config)
    }

    /// Namespace holding the pods of jobs submitted to `project`
    pub fn namespace_for(&self, project: &str) -> String {
        format!("{}{}", self.namespace_prefix, project)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.log_dir.as_os_str().is_empty() {
            anyhow::bail!("log_dir cannot be empty");
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.discovery_timeout.is_zero() {
            anyhow::bail!("discovery_timeout must be greater than 0");
        }

        if self.run_timeout.is_zero() {
            anyhow::bail!("run_timeout must be greater than 0");
        }

        if self.discovery_timeout > self.run_timeout {
            anyhow::bail!("discovery_timeout cannot exceed run_timeout");
        }

        if self.pod_label.is_empty() {
            anyhow::bail!("pod_label cannot be empty");
        }

        if self.runai_bin.is_empty() || self.kubectl_bin.is_empty() {
            anyhow::bail!("tool binaries cannot be empty");
        }

        Ok(())
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("Invalid value for {}: '{}'", key, raw))
        })
        .transpose()
}
