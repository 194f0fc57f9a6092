//! Job domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Environment entries added to every job submitted in debug mode
pub const DEBUG_ENV: [(&str, &str); 2] = [("NCCL_DEBUG", "INFO"), ("NCCL_DEBUG_SUBSYS", "INIT,NET")];

/// Annotation key used by Multus to attach secondary networks to a pod
pub const NETWORKS_ANNOTATION: &str = "k8s.v1.cni.cncf.io/networks";

/// Immutable description of one benchmark job
///
/// Built once per run from a benchmark profile and handed to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub image: String,
    pub workers: u32,
    pub resources: WorkerResources,
    /// Secondary network attachments, `namespace/network` each
    pub networks: Vec<String>,
    pub launcher: LauncherSpec,
    pub env: BTreeMap<String, String>,
    pub debug: bool,
    pub image_pull_policy: String,
    pub large_shm: bool,
    pub interactive: bool,
}

/// Per-worker resource requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerResources {
    pub gpus: u32,
    /// Extended hardware resources, e.g. `nvidia.com/resibp24s0` -> 1
    pub extended: BTreeMap<String, u32>,
}

/// Command run by the launcher pod
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LauncherSpec {
    pub command: String,
    /// Arguments placed before `-np`
    pub args: Vec<String>,
    /// Benchmark program and its arguments, placed last
    pub program: Vec<String>,
    /// Emit `-x NAME` for each environment entry
    pub forward_env: bool,
}

impl JobSpec {
    /// Total number of MPI ranks: one per GPU on every worker
    pub fn total_processes(&self) -> u32 {
        self.workers * self.resources.gpus
    }

    /// Environment passed to the job, including the debug entries
    pub fn effective_env(&self) -> BTreeMap<String, String> {
        let mut env = self.env.clone();
        if self.debug {
            for (key, value) in DEBUG_ENV {
                env.insert(key.to_string(), value.to_string());
            }
        }
        env
    }

    /// The launcher argument string handed to `mpirun`
    pub fn launcher_args(&self) -> String {
        let mut parts: Vec<String> = self.launcher.args.clone();
        parts.push("-np".to_string());
        parts.push(self.total_processes().to_string());

        if self.launcher.forward_env {
            for key in self.effective_env().keys() {
                parts.push("-x".to_string());
                parts.push(key.clone());
            }
        }

        parts.extend(self.launcher.program.iter().cloned());
        parts.join(" ")
    }

    /// Value of the network attachment annotation, if any networks are requested
    pub fn networks_annotation(&self) -> Option<String> {
        if self.networks.is_empty() {
            None
        } else {
            Some(format!("{}={}", NETWORKS_ANNOTATION, self.networks.join(",")))
        }
    }
}

/// A job accepted by the scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub name: String,
    pub project: String,
    pub namespace: String,
    pub submitted_at: chrono::DateTime<chrono::Utc>,
    /// Workload UID reported by the scheduler, when it prints one
    pub reference: Option<String>,
}
