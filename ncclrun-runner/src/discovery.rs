//! Pod discovery
//!
//! Polls the cluster for the pods of a freshly submitted job until the full
//! topology (one launcher and every worker) is visible or the deadline passes.
//! The transition logic lives in [`next_state`] so it can be tested without a
//! clock or a cluster.

use ncclrun_cluster::PodLister;
use ncclrun_core::domain::pod::{PodRole, PodSet};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::DiscoveryError;

/// Progress of pod discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    /// No pod of the job has been seen yet
    Waiting,
    /// Some but not all expected pods exist
    PartiallyReady,
    /// One launcher and all workers exist
    Ready,
    /// The deadline passed before the topology was complete
    TimedOut,
}

impl DiscoveryState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DiscoveryState::Ready | DiscoveryState::TimedOut)
    }
}

/// Whether `pods` is exactly one launcher plus workers `0..workers`
///
/// Phases are not considered: a pod that exists is part of the topology.
pub fn is_complete_topology(pods: &PodSet, workers: u32) -> bool {
    if pods.launchers().count() != 1 {
        return false;
    }

    let indices: Vec<u32> = pods
        .iter()
        .filter_map(|pod| match pod.role {
            PodRole::Worker(index) => Some(index),
            PodRole::Launcher => None,
        })
        .collect();
    let distinct: BTreeSet<u32> = indices.iter().copied().collect();

    indices.len() == workers as usize
        && distinct.len() == indices.len()
        && distinct.iter().all(|&index| index < workers)
}

/// Computes the state after one poll
///
/// # Arguments
/// * `current` - State before the poll
/// * `observation` - Classified pods, or `None` when the listing failed
/// * `workers` - Expected number of workers
/// * `deadline_passed` - Whether the discovery deadline has elapsed
pub fn next_state(
    current: DiscoveryState,
    observation: Option<&PodSet>,
    workers: u32,
    deadline_passed: bool,
) -> DiscoveryState {
    if current.is_terminal() {
        return current;
    }

    if observation.is_some_and(|pods| is_complete_topology(pods, workers)) {
        return DiscoveryState::Ready;
    }

    if deadline_passed {
        return DiscoveryState::TimedOut;
    }

    match observation {
        Some(pods) if !pods.is_empty() => DiscoveryState::PartiallyReady,
        // A failed or empty listing changes nothing
        _ => current,
    }
}

/// Polls a [`PodLister`] until the job's topology is complete
pub struct DiscoveryPoller {
    lister: Arc<dyn PodLister>,
    interval: Duration,
    timeout: Duration,
}

impl DiscoveryPoller {
    /// Creates a new discovery poller
    pub fn new(lister: Arc<dyn PodLister>, interval: Duration, timeout: Duration) -> Self {
        Self {
            lister,
            interval,
            timeout,
        }
    }

    /// Runs discovery for `job` in `namespace`
    ///
    /// Returns the complete pod set, or an error carrying whatever was
    /// observed when the deadline passed or `cancel` fired.
    pub async fn run(
        &self,
        namespace: &str,
        job: &str,
        workers: u32,
        cancel: &CancellationToken,
    ) -> Result<PodSet, DiscoveryError> {
        info!(
            "Waiting for pods of {} in {} (1 launcher + {} workers, timeout {:?})",
            job, namespace, workers, self.timeout
        );

        let deadline = Instant::now() + self.timeout;
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut state = DiscoveryState::Waiting;
        let mut observed = PodSet::default();

        loop {
            let deadline_passed = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Discovery of {} cancelled in state {:?}", job, state);
                    return Err(DiscoveryError::Cancelled { observed });
                }
                _ = time::sleep_until(deadline) => true,
                _ = ticker.tick() => false,
            };

            let observation = if deadline_passed {
                None
            } else {
                self.poll_once(namespace, job).await
            };

            if let Some(pods) = &observation {
                debug!("Observed {} pod(s) of {}", pods.len(), job);
                observed = pods.clone();
            }

            let deadline_passed = deadline_passed || Instant::now() >= deadline;
            let next = next_state(state, observation.as_ref(), workers, deadline_passed);
            if next != state {
                info!("Discovery of {}: {:?} -> {:?}", job, state, next);
                state = next;
            }

            match state {
                DiscoveryState::Ready => {
                    info!("Found {} pod(s) of {}", observed.len(), job);
                    return Ok(observed);
                }
                DiscoveryState::TimedOut => {
                    warn!(
                        "Timed out after {:?} waiting for pods of {} ({} observed)",
                        self.timeout,
                        job,
                        observed.len()
                    );
                    return Err(DiscoveryError::TimedOut {
                        observed,
                        waited: self.timeout,
                    });
                }
                DiscoveryState::Waiting | DiscoveryState::PartiallyReady => {}
            }
        }
    }

    /// Lists and classifies the job's pods; a failed listing is logged and skipped
    async fn poll_once(&self, namespace: &str, job: &str) -> Option<PodSet> {
        match self.lister.list_pods(namespace, job).await {
            Ok(pods) => Some(PodSet::classify(
                job,
                pods.into_iter().map(|pod| (pod.name, pod.phase)),
            )),
            Err(e) => {
                warn!("Failed to list pods of {}: {}", job, e);
                None
            }
        }
    }
}
