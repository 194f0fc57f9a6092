//! Pod domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a pod inside an MPI job, inferred from its name
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PodRole {
    Launcher,
    Worker(u32),
}

impl PodRole {
    /// Classifies a pod of `job` by name
    ///
    /// `<job>-launcher-*` is the launcher, `<job>-worker-<i>` and
    /// `<job>-worker-<i>-*` are worker `i`. Anything else is not part of the job.
    pub fn from_pod_name(job: &str, pod: &str) -> Option<Self> {
        let rest = pod.strip_prefix(job)?.strip_prefix('-')?;

        if let Some(suffix) = rest.strip_prefix("launcher") {
            return (suffix.is_empty() || suffix.starts_with('-')).then_some(PodRole::Launcher);
        }

        let index = rest.strip_prefix("worker-")?;
        let index = index.split('-').next()?;
        index.parse::<u32>().ok().map(PodRole::Worker)
    }
}

impl fmt::Display for PodRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PodRole::Launcher => write!(f, "launcher"),
            PodRole::Worker(index) => write!(f, "worker[{}]", index),
        }
    }
}

/// Kubernetes pod phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Parses the `status.phase` string reported by the API server
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PodPhase::Succeeded | PodPhase::Failed)
    }

    /// Whether the pod's containers have started and produced output that can be followed
    pub fn has_output(self) -> bool {
        matches!(self, PodPhase::Running | PodPhase::Succeeded | PodPhase::Failed)
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One member of a job's pod set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodDescriptor {
    pub role: PodRole,
    pub name: String,
    pub phase: PodPhase,
}

/// Snapshot of the classified pods of a job
///
/// Every poll produces a new set; a set is never updated in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSet {
    pods: Vec<PodDescriptor>,
}

impl PodSet {
    /// Builds a set from raw `(name, phase)` pairs, keeping only pods of `job`
    pub fn classify<I>(job: &str, pods: I) -> Self
    where
        I: IntoIterator<Item = (String, PodPhase)>,
    {
        let mut pods: Vec<PodDescriptor> = pods
            .into_iter()
            .filter_map(|(name, phase)| {
                PodRole::from_pod_name(job, &name).map(|role| PodDescriptor { role, name, phase })
            })
            .collect();
        pods.sort_by(|a, b| a.role.cmp(&b.role).then_with(|| a.name.cmp(&b.name)));
        Self { pods }
    }

    pub fn is_empty(&self) -> bool {
        self.pods.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pods.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PodDescriptor> {
        self.pods.iter()
    }

    pub fn get(&self, name: &str) -> Option<&PodDescriptor> {
        self.pods.iter().find(|pod| pod.name == name)
    }

    pub fn launchers(&self) -> impl Iterator<Item = &PodDescriptor> {
        self.pods.iter().filter(|pod| pod.role == PodRole::Launcher)
    }

    pub fn workers(&self) -> impl Iterator<Item = &PodDescriptor> {
        self.pods
            .iter()
            .filter(|pod| matches!(pod.role, PodRole::Worker(_)))
    }

    /// The launcher pod, when exactly one is present
    pub fn launcher(&self) -> Option<&PodDescriptor> {
        let mut launchers = self.launchers();
        let first = launchers.next()?;
        launchers.next().is_none().then_some(first)
    }

    /// Merges a newer snapshot over this one
    ///
    /// Pods present in `newer` take its phase; pods that vanished from the
    /// listing keep their last observed state.
    pub fn merged_with(&self, newer: &PodSet) -> PodSet {
        let mut pods = newer.pods.clone();
        for pod in &self.pods {
            if newer.get(&pod.name).is_none() {
                pods.push(pod.clone());
            }
        }
        pods.sort_by(|a, b| a.role.cmp(&b.role).then_with(|| a.name.cmp(&b.name)));
        PodSet { pods }
    }
}
