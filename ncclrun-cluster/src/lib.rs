//! ncclrun Cluster Client
//!
//! Typed access to the tools that operate the GPU cluster: the Run:ai
//! scheduler CLI for submitting MPI jobs and `kubectl` for watching their pods.
//!
//! The runner only talks to the cluster through the traits defined here, which
//! keeps the orchestration logic testable against in-memory fakes.
//!
//! # Example
//!
//! ```no_run
//! use ncclrun_cluster::{Kubectl, PodLister};
//!
//! #[tokio::main]
//! async fn main() -> ncclrun_cluster::Result<()> {
//!     let kubectl = Kubectl::new("kubectl", "app");
//!     for pod in kubectl.list_pods("runai-test", "nccl-test1").await? {
//!         println!("{} {}", pod.name, pod.phase);
//!     }
//!     Ok(())
//! }
//! ```

mod command;
pub mod error;
pub mod kubectl;
pub mod runai;

// Re-export commonly used types
pub use error::{ClusterError, Result};
pub use kubectl::Kubectl;
pub use runai::RunaiCli;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ncclrun_core::domain::job::JobSpec;
use ncclrun_core::domain::pod::PodPhase;

/// Acknowledgement of an accepted submission
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitReceipt {
    /// Workload UID extracted from the scheduler's output, if it printed one
    pub reference: Option<String>,
}

/// A pod as reported by the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodInfo {
    pub name: String,
    pub phase: PodPhase,
}

/// One line of pod output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// Raw bytes of the line without its newline; pods may print anything
    pub content: Vec<u8>,
    /// When the platform recorded the line, if it said so
    pub timestamp: Option<DateTime<Utc>>,
}

impl LogLine {
    pub fn new(content: impl Into<Vec<u8>>, timestamp: Option<DateTime<Utc>>) -> Self {
        Self {
            content: content.into(),
            timestamp,
        }
    }
}

/// Workload scheduler operations
#[async_trait]
pub trait JobScheduler: Send + Sync {
    /// Selects the project subsequent submissions go to
    async fn configure_project(&self, project: &str) -> Result<()>;

    /// Lists existing workloads, one raw line per entry
    async fn list_workloads(&self) -> Result<Vec<String>>;

    /// Submits the job described by `spec`
    ///
    /// Called at most once per run: a retried submission could create a second
    /// job holding the same GPUs.
    async fn submit(&self, spec: &JobSpec) -> Result<SubmitReceipt>;
}

/// Pod listing
#[async_trait]
pub trait PodLister: Send + Sync {
    /// Lists the pods labeled with `job` in `namespace`
    async fn list_pods(&self, namespace: &str, job: &str) -> Result<Vec<PodInfo>>;
}

/// Pod log streaming
#[async_trait]
pub trait LogStreamer: Send + Sync {
    /// Attaches to a pod's console output
    ///
    /// With `since`, only output the platform recorded at or after that
    /// instant is returned. `since` is a platform timestamp taken from a
    /// previous [`LogLine`], never the local clock.
    async fn follow(
        &self,
        namespace: &str,
        pod: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Box<dyn LogStream>>;
}

/// An open log follow
#[async_trait]
pub trait LogStream: Send {
    /// Next line of output
    ///
    /// `Ok(None)` means the stream closed normally because the pod finished.
    /// An error means the stream was cut off and may be resumed with a new follow.
    async fn next_line(&mut self) -> Result<Option<LogLine>>;
}
