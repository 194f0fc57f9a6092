//! Run:ai command line client
//!
//! Wraps the `runai` binary for project selection, workload listing and MPI
//! job submission. The translation of a [`JobSpec`] into `runai mpi submit`
//! arguments is a pure function so it can be checked without a cluster.

use async_trait::async_trait;
use ncclrun_core::domain::job::JobSpec;
use tracing::{debug, info};
use uuid::Uuid;

use crate::command;
use crate::error::Result;
use crate::{JobScheduler, SubmitReceipt};

/// `runai` binary invoked through the command line
#[derive(Debug, Clone)]
pub struct RunaiCli {
    program: String,
}

impl RunaiCli {
    /// Creates a client invoking `program` (usually `runai`)
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Default for RunaiCli {
    fn default() -> Self {
        Self::new("runai")
    }
}

/// Arguments for `runai mpi submit` describing `spec`
///
/// Order follows the scheduler's documented flag layout: identity and image,
/// topology and resources, launcher, networking, then environment.
pub fn submit_args(spec: &JobSpec) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "mpi".into(),
        "submit".into(),
        spec.name.clone(),
        "-i".into(),
        spec.image.clone(),
        "--workers".into(),
        spec.workers.to_string(),
        "--gpu-devices-request".into(),
        spec.resources.gpus.to_string(),
    ];

    for (resource, quantity) in &spec.resources.extended {
        args.push("--extended-resource".into());
        args.push(format!("{}={}", resource, quantity));
    }

    if spec.large_shm {
        args.push("--large-shm".into());
    }
    if spec.interactive {
        args.push("--stdin".into());
        args.push("--tty".into());
    }

    args.push("--master-command".into());
    args.push(spec.launcher.command.clone());
    args.push("--master-args".into());
    args.push(spec.launcher_args());

    args.push("--image-pull-policy".into());
    args.push(spec.image_pull_policy.clone());

    if let Some(annotation) = spec.networks_annotation() {
        args.push("--annotation".into());
        args.push(annotation);
    }

    for (key, value) in spec.effective_env() {
        args.push("-e".into());
        args.push(format!("{}={}", key, value));
    }

    args
}

/// Workload UID printed by `runai mpi submit`, if the output carries one
///
/// Tokens may be quoted or end in punctuation, e.g. `(uid: 5f0c...)`.
pub fn parse_submit_reference(stdout: &str) -> Option<String> {
    stdout
        .split_whitespace()
        .map(|token| token.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '-'))
        .find_map(|token| Uuid::parse_str(token).ok())
        .map(|uid| uid.hyphenated().to_string())
}

/// Arguments for selecting the active project
pub fn configure_project_args(project: &str) -> Vec<String> {
    vec!["config".into(), "project".into(), project.to_string()]
}

/// Arguments for listing MPI training workloads
pub fn list_workloads_args() -> Vec<String> {
    vec!["training".into(), "mpi".into(), "list".into()]
}

#[async_trait]
impl JobScheduler for RunaiCli {
    async fn configure_project(&self, project: &str) -> Result<()> {
        info!("Configuring Run:ai project: {}", project);
        let stdout = command::run(&self.program, &configure_project_args(project)).await?;
        if !stdout.trim().is_empty() {
            debug!("runai config stdout: {}", stdout.trim());
        }
        Ok(())
    }

    async fn list_workloads(&self) -> Result<Vec<String>> {
        let stdout = command::run(&self.program, &list_workloads_args()).await?;
        Ok(stdout.lines().map(str::to_string).collect())
    }

    async fn submit(&self, spec: &JobSpec) -> Result<SubmitReceipt> {
        let args = submit_args(spec);
        info!(
            "Submitting {} with {} worker(s) ({} total processes)",
            spec.name,
            spec.workers,
            spec.total_processes()
        );
        debug!("Command: {}", command::render(&self.program, &args));

        let stdout = command::run(&self.program, &args).await?;
        if !stdout.trim().is_empty() {
            debug!("runai submit stdout: {}", stdout.trim());
        }

        Ok(SubmitReceipt {
            reference: parse_submit_reference(&stdout),
        })
    }
}
