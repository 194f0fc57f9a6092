//! Run result types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use super::pod::{PodPhase, PodRole};

/// Status of one pod's log capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureStatus {
    Streaming,
    Completed,
    Errored,
    Cancelled,
    /// The pod never had output to follow during the run
    NotStarted,
}

impl CaptureStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, CaptureStatus::Streaming)
    }
}

impl fmt::Display for CaptureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CaptureStatus::Streaming => "streaming",
            CaptureStatus::Completed => "completed",
            CaptureStatus::Errored => "errored",
            CaptureStatus::Cancelled => "cancelled",
            CaptureStatus::NotStarted => "not started",
        };
        f.write_str(label)
    }
}

/// Stage of a run that decided its failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureStage {
    Submission,
    Discovery,
    Launcher,
    Capture,
    Timeout,
    Cancelled,
}

impl FailureStage {
    /// Process exit code reported for a failure in this stage
    pub fn exit_code(self) -> i32 {
        match self {
            FailureStage::Submission => 2,
            FailureStage::Discovery => 3,
            FailureStage::Launcher => 4,
            FailureStage::Capture => 5,
            FailureStage::Timeout => 124, // Standard timeout exit code
            FailureStage::Cancelled => 130,
        }
    }
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureStage::Submission => "submission",
            FailureStage::Discovery => "discovery",
            FailureStage::Launcher => "launcher",
            FailureStage::Capture => "capture",
            FailureStage::Timeout => "timeout",
            FailureStage::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Overall classification of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    Succeeded,
    Failed { stage: FailureStage, message: String },
}

/// Final state of one pod in the run summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodReport {
    pub role: PodRole,
    pub name: String,
    /// Last phase observed on the cluster
    pub phase: PodPhase,
    pub capture: CaptureStatus,
    pub log_path: Option<PathBuf>,
    pub bytes_written: u64,
    pub error: Option<String>,
}

/// Aggregate result of one benchmark run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    /// Allocated job name, absent if the run failed before allocation finished
    pub job_name: Option<String>,
    pub pods: Vec<PodReport>,
    pub outcome: RunOutcome,
    pub elapsed: Duration,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RunOutcome::Succeeded)
    }

    pub fn failed_stage(&self) -> Option<FailureStage> {
        match &self.outcome {
            RunOutcome::Succeeded => None,
            RunOutcome::Failed { stage, .. } => Some(*stage),
        }
    }

    /// Exit code for the command line: zero only on full success
    pub fn exit_code(&self) -> i32 {
        self.failed_stage().map(FailureStage::exit_code).unwrap_or(0)
    }
}
