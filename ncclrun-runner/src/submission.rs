//! Job submission
//!
//! Hands a fully built [`JobSpec`] to the scheduler. Submission happens
//! exactly once per run: the scheduler may have accepted the job even when the
//! command reports an error, so a retry could start a second job on the same
//! GPUs.

use chrono::Utc;
use ncclrun_cluster::JobScheduler;
use ncclrun_core::domain::job::{JobHandle, JobSpec};
use std::sync::Arc;
use tracing::{error, info};

use crate::error::SubmissionError;

/// Submits benchmark jobs through a [`JobScheduler`]
pub struct SubmissionClient {
    scheduler: Arc<dyn JobScheduler>,
    namespace_prefix: String,
}

impl SubmissionClient {
    /// Creates a new submission client
    ///
    /// # Arguments
    /// * `scheduler` - The scheduler receiving the job
    /// * `namespace_prefix` - Prefix turning a project name into its namespace
    pub fn new(scheduler: Arc<dyn JobScheduler>, namespace_prefix: impl Into<String>) -> Self {
        Self {
            scheduler,
            namespace_prefix: namespace_prefix.into(),
        }
    }

    /// Selects the project that subsequent listings and submissions target
    pub async fn configure_project(&self, project: &str) -> Result<(), SubmissionError> {
        self.scheduler
            .configure_project(project)
            .await
            .map_err(|e| {
                error!("Failed to configure project {}: {}", project, e);
                SubmissionError::ConfigureProject {
                    project: project.to_string(),
                    diagnostic: e.diagnostic(),
                }
            })
    }

    /// Submits `spec` to `project`
    ///
    /// Returns the handle of the accepted job. Any failure is final.
    pub async fn submit(&self, project: &str, spec: &JobSpec) -> Result<JobHandle, SubmissionError> {
        let receipt = self.scheduler.submit(spec).await.map_err(|e| {
            error!("Submission of {} failed: {}", spec.name, e);
            SubmissionError::Submit {
                job: spec.name.clone(),
                diagnostic: e.diagnostic(),
            }
        })?;

        let handle = JobHandle {
            name: spec.name.clone(),
            project: project.to_string(),
            namespace: format!("{}{}", self.namespace_prefix, project),
            submitted_at: Utc::now(),
            reference: receipt.reference,
        };

        info!(
            "Job {} accepted in namespace {}",
            handle.name, handle.namespace
        );

        Ok(handle)
    }
}
