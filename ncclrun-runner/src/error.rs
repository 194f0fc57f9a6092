//! Error types for the run stages

use ncclrun_cluster::ClusterError;
use ncclrun_core::domain::pod::PodSet;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The job could not be handed to the scheduler
///
/// Always fatal for the run and never retried.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("Failed to configure project '{project}': {diagnostic}")]
    ConfigureProject { project: String, diagnostic: String },

    #[error("Failed to submit job '{job}': {diagnostic}")]
    Submit { job: String, diagnostic: String },
}

impl SubmissionError {
    /// Raw diagnostic text printed by the scheduler
    pub fn diagnostic(&self) -> &str {
        match self {
            Self::ConfigureProject { diagnostic, .. } | Self::Submit { diagnostic, .. } => diagnostic,
        }
    }
}

/// The expected pod topology was not observed
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Timed out after {waited:?} waiting for pods ({} observed)", .observed.len())]
    TimedOut { observed: PodSet, waited: Duration },

    #[error("Discovery cancelled ({} pods observed)", .observed.len())]
    Cancelled { observed: PodSet },
}

impl DiscoveryError {
    /// Pods seen before discovery gave up
    pub fn observed(&self) -> &PodSet {
        match self {
            Self::TimedOut { observed, .. } | Self::Cancelled { observed } => observed,
        }
    }

    pub fn into_observed(self) -> PodSet {
        match self {
            Self::TimedOut { observed, .. } | Self::Cancelled { observed } => observed,
        }
    }
}

/// Failure of one pod's log capture
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Attaching to or reading the log stream failed
    #[error("{0}")]
    Stream(#[from] ClusterError),

    /// The log file could not be written
    #[error("Log file {}: {source}", .path.display())]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CaptureError {
    pub fn file_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileIo {
            path: path.into(),
            source,
        }
    }

    /// Whether a new attach attempt could help
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Stream(_))
    }
}
