//! Run coordination
//!
//! Drives one benchmark run: allocate a name, submit, discover the pods,
//! capture their output, wait for the launcher to finish, and condense
//! everything into a [`RunResult`]. The coordinator owns the run deadline and
//! always returns a result, whatever stage fails.

use chrono::{DateTime, Local};
use ncclrun_cluster::{JobScheduler, Kubectl, LogStreamer, PodLister, RunaiCli};
use ncclrun_core::domain::job::JobHandle;
use ncclrun_core::domain::pod::{PodPhase, PodRole, PodSet};
use ncclrun_core::domain::run::{CaptureStatus, FailureStage, PodReport, RunOutcome, RunResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::allocator;
use crate::capture::{self, CaptureManager, CaptureReport, ReconnectPolicy};
use crate::config::RunnerConfig;
use crate::discovery::DiscoveryPoller;
use crate::error::DiscoveryError;
use crate::profile::BenchmarkProfile;
use crate::submission::SubmissionClient;

/// What to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub project: String,
    /// Number of worker nodes
    pub workers: u32,
    pub profile: BenchmarkProfile,
    pub debug: bool,
}

/// Orchestrates benchmark runs against the cluster
pub struct RunCoordinator {
    config: RunnerConfig,
    scheduler: Arc<dyn JobScheduler>,
    lister: Arc<dyn PodLister>,
    streamer: Arc<dyn LogStreamer>,
}

/// Partial outcome of the stages, completed into a [`RunResult`] by `run`
struct Progress {
    job_name: Option<String>,
    pods: Vec<PodReport>,
    outcome: RunOutcome,
}

impl Progress {
    fn stopped(job_name: Option<String>, outcome: RunOutcome) -> Self {
        Self {
            job_name,
            pods: Vec::new(),
            outcome,
        }
    }
}

impl RunCoordinator {
    /// Creates a coordinator using the given cluster collaborators
    pub fn new(
        config: RunnerConfig,
        scheduler: Arc<dyn JobScheduler>,
        lister: Arc<dyn PodLister>,
        streamer: Arc<dyn LogStreamer>,
    ) -> Self {
        Self {
            config,
            scheduler,
            lister,
            streamer,
        }
    }

    /// Creates a coordinator driving the `runai` and `kubectl` binaries
    pub fn from_config(config: RunnerConfig) -> Self {
        let scheduler = Arc::new(RunaiCli::new(config.runai_bin.clone()));
        let kubectl = Arc::new(Kubectl::new(
            config.kubectl_bin.clone(),
            config.pod_label.clone(),
        ));
        Self::new(config, scheduler, kubectl.clone(), kubectl)
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Performs one run
    ///
    /// Cancelling `cancel` stops discovery and capture and yields a
    /// `Cancelled` outcome. The result reflects what was actually captured.
    pub async fn run(&self, request: &RunRequest, cancel: &CancellationToken) -> RunResult {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let started_at = Local::now();

        info!(
            "Starting run {} (profile {}, {} worker(s), project {})",
            run_id, request.profile, request.workers, request.project
        );

        let watchdog = Watchdog::start(cancel, self.config.run_timeout);
        let progress = self.drive(request, started_at, &watchdog).await;
        drop(watchdog);

        let result = RunResult {
            run_id,
            job_name: progress.job_name,
            pods: progress.pods,
            outcome: progress.outcome,
            elapsed: started.elapsed(),
        };

        match &result.outcome {
            RunOutcome::Succeeded => info!("Run {} succeeded in {:?}", run_id, result.elapsed),
            RunOutcome::Failed { stage, message } => {
                warn!("Run {} failed at {} stage: {}", run_id, stage, message)
            }
        }

        result
    }

    async fn drive(
        &self,
        request: &RunRequest,
        started_at: DateTime<Local>,
        watchdog: &Watchdog,
    ) -> Progress {
        let submission = SubmissionClient::new(
            Arc::clone(&self.scheduler),
            self.config.namespace_prefix.clone(),
        );

        // Allocation
        if let Err(e) = submission.configure_project(&request.project).await {
            return Progress::stopped(None, failed(FailureStage::Submission, e.to_string()));
        }
        let name = allocator::allocate(self.scheduler.as_ref(), request.profile.base_name()).await;
        let spec = request.profile.build(&name, request.workers, request.debug);

        if let Some(outcome) = watchdog.interruption() {
            return Progress::stopped(Some(name), outcome);
        }

        // Submission
        let handle = match submission.submit(&request.project, &spec).await {
            Ok(handle) => handle,
            Err(e) => {
                return Progress::stopped(Some(name), failed(FailureStage::Submission, e.to_string()));
            }
        };

        if let Err(e) = capture::ensure_log_dir(&self.config.log_dir).await {
            // Every session will report the same file error for its pod
            warn!("{}", e);
        }

        // Discovery
        let poller = DiscoveryPoller::new(
            Arc::clone(&self.lister),
            self.config.poll_interval,
            self.config.discovery_timeout,
        );
        let (pods, discovery_failure) = match poller
            .run(&handle.namespace, &handle.name, request.workers, watchdog.token())
            .await
        {
            Ok(pods) => (pods, None),
            Err(DiscoveryError::TimedOut { observed, waited }) if observed.is_empty() => {
                return Progress::stopped(
                    Some(name),
                    failed(
                        FailureStage::Discovery,
                        format!("no pods of {} appeared within {:?}", handle.name, waited),
                    ),
                );
            }
            Err(e @ DiscoveryError::TimedOut { .. }) => {
                let message = e.to_string();
                warn!("Continuing with partial capture: {}", message);
                (e.into_observed(), Some(message))
            }
            Err(e @ DiscoveryError::Cancelled { .. }) => {
                let outcome = watchdog
                    .interruption()
                    .unwrap_or_else(|| failed(FailureStage::Cancelled, e.to_string()));
                return Progress {
                    job_name: Some(name),
                    pods: pod_reports(e.observed(), &[]),
                    outcome,
                };
            }
        };

        // Capture and completion
        let mut manager = CaptureManager::new(
            Arc::clone(&self.streamer),
            handle.namespace.clone(),
            handle.name.clone(),
            self.config.log_dir.clone(),
            started_at,
            ReconnectPolicy {
                max_reconnects: self.config.max_reconnects,
                backoff: self.config.reconnect_backoff,
            },
            watchdog.token().child_token(),
        );
        start_captures(&mut manager, &pods);

        let (pods, launcher_done) = self
            .await_completion(&handle, pods, &mut manager, watchdog)
            .await;

        let grace = if launcher_done {
            info!(
                "Giving worker captures {:?} to drain",
                self.config.worker_grace
            );
            self.config.worker_grace
        } else {
            Duration::ZERO
        };
        let captures = manager.finish(grace, self.config.cancel_grace).await;
        let reports = pod_reports(&pods, &captures);

        // A run whose launcher ended in time is judged on its own merits
        let interruption = if launcher_done {
            None
        } else {
            watchdog.interruption()
        };

        Progress {
            job_name: Some(name),
            outcome: decide_outcome(interruption, discovery_failure, &pods, &reports),
            pods: reports,
        }
    }

    /// Re-lists pods every poll interval until the launcher ends
    ///
    /// Returns the last known pod set and whether the launcher finished, as
    /// opposed to the run being interrupted.
    async fn await_completion(
        &self,
        handle: &JobHandle,
        mut pods: PodSet,
        manager: &mut CaptureManager,
        watchdog: &Watchdog,
    ) -> (PodSet, bool) {
        let mut ticker = time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Discovery just listed the pods
        ticker.tick().await;

        loop {
            if let Some(phase) = launcher_final_phase(&pods) {
                info!("Launcher of {} finished: {}", handle.name, phase);
                return (pods, true);
            }

            tokio::select! {
                biased;
                _ = watchdog.token().cancelled() => return (pods, false),
                _ = ticker.tick() => {}
            }

            match self.lister.list_pods(&handle.namespace, &handle.name).await {
                Ok(listing) => {
                    let fresh = PodSet::classify(
                        &handle.name,
                        listing.into_iter().map(|pod| (pod.name, pod.phase)),
                    );
                    pods = pods.merged_with(&fresh);
                    start_captures(manager, &pods);
                    debug!(
                        "{}/{} capture(s) of {} finished",
                        manager.finished_count(),
                        manager.session_count(),
                        handle.name
                    );
                }
                Err(e) => warn!("Failed to list pods of {}: {}", handle.name, e),
            }
        }
    }
}

/// Starts capture for every pod that has output and no session yet
fn start_captures(manager: &mut CaptureManager, pods: &PodSet) {
    for pod in pods.iter().filter(|pod| pod.phase.has_output()) {
        if manager.add_pod(&pod.name) {
            info!(
                "Capturing {} {} -> {}",
                pod.role,
                pod.name,
                manager.log_path(&pod.name).display()
            );
        }
    }
}

/// Final phase of the launcher, once every launcher pod has terminated
///
/// `Failed` wins if any launcher failed.
fn launcher_final_phase(pods: &PodSet) -> Option<PodPhase> {
    let mut launchers = pods.launchers().peekable();
    launchers.peek()?;

    let mut phase = PodPhase::Succeeded;
    for launcher in launchers {
        if !launcher.phase.is_terminal() {
            return None;
        }
        if launcher.phase == PodPhase::Failed {
            phase = PodPhase::Failed;
        }
    }
    Some(phase)
}

/// One report per known pod; pods without a session are `NotStarted`
fn pod_reports(pods: &PodSet, captures: &[CaptureReport]) -> Vec<PodReport> {
    pods.iter()
        .map(|pod| match captures.iter().find(|capture| capture.pod == pod.name) {
            Some(capture) => PodReport {
                role: pod.role,
                name: pod.name.clone(),
                phase: pod.phase,
                capture: capture.status,
                log_path: Some(capture.path.clone()),
                bytes_written: capture.bytes,
                error: capture.error.clone(),
            },
            None => PodReport {
                role: pod.role,
                name: pod.name.clone(),
                phase: pod.phase,
                capture: CaptureStatus::NotStarted,
                log_path: None,
                bytes_written: 0,
                error: None,
            },
        })
        .collect()
}

/// Whether a pod's capture falls short of a complete log
///
/// Worker captures are expected to be cancelled once the launcher is done.
fn capture_incomplete(report: &PodReport) -> bool {
    match report.role {
        PodRole::Launcher => report.capture != CaptureStatus::Completed,
        PodRole::Worker(_) => matches!(
            report.capture,
            CaptureStatus::Errored | CaptureStatus::NotStarted
        ),
    }
}

/// Names the stage that decided the run
///
/// An incomplete topology outranks the run deadline: a job missing a worker
/// typically hangs in `mpirun` until the deadline passes. Only the operator
/// cancelling outranks it.
fn decide_outcome(
    interruption: Option<RunOutcome>,
    discovery_failure: Option<String>,
    pods: &PodSet,
    reports: &[PodReport],
) -> RunOutcome {
    if let Some(message) = discovery_failure {
        let captured = reports
            .iter()
            .filter(|report| report.capture != CaptureStatus::NotStarted)
            .count();
        let mut message = format!("{}; captured {} pod(s) on a best-effort basis", message, captured);

        match interruption {
            Some(RunOutcome::Failed {
                stage: FailureStage::Cancelled,
                message: reason,
            }) => return failed(FailureStage::Cancelled, reason),
            Some(RunOutcome::Failed { message: reason, .. }) => {
                message = format!("{}; {}", message, reason);
            }
            Some(RunOutcome::Succeeded) | None => {}
        }
        return failed(FailureStage::Discovery, message);
    }

    if let Some(outcome) = interruption {
        return outcome;
    }

    if launcher_final_phase(pods) == Some(PodPhase::Failed) {
        return failed(FailureStage::Launcher, "launcher pod failed".to_string());
    }

    let incomplete: Vec<&str> = reports
        .iter()
        .filter(|report| capture_incomplete(report))
        .map(|report| report.name.as_str())
        .collect();
    if !incomplete.is_empty() {
        return failed(
            FailureStage::Capture,
            format!("incomplete capture for {}", incomplete.join(", ")),
        );
    }

    RunOutcome::Succeeded
}

fn failed(stage: FailureStage, message: String) -> RunOutcome {
    RunOutcome::Failed { stage, message }
}

/// Enforces the run deadline
///
/// Owns the run's cancellation token, a child of the operator's token. When
/// the deadline passes the token is cancelled and the run is marked expired.
struct Watchdog {
    run: CancellationToken,
    expired: CancellationToken,
    limit: Duration,
    task: JoinHandle<()>,
}

impl Watchdog {
    fn start(operator: &CancellationToken, limit: Duration) -> Self {
        let run = operator.child_token();
        let expired = CancellationToken::new();

        let task = tokio::spawn({
            let run = run.clone();
            let expired = expired.clone();
            async move {
                tokio::select! {
                    _ = time::sleep(limit) => {
                        warn!("Run deadline of {:?} exceeded", limit);
                        expired.cancel();
                        run.cancel();
                    }
                    _ = run.cancelled() => {}
                }
            }
        });

        Self {
            run,
            expired,
            limit,
            task,
        }
    }

    fn token(&self) -> &CancellationToken {
        &self.run
    }

    /// Outcome of an interrupted run, if it was interrupted
    fn interruption(&self) -> Option<RunOutcome> {
        if self.expired.is_cancelled() {
            Some(failed(
                FailureStage::Timeout,
                format!("run exceeded its deadline of {:?}", self.limit),
            ))
        } else if self.run.is_cancelled() {
            Some(failed(
                FailureStage::Cancelled,
                "run cancelled by operator".to_string(),
            ))
        } else {
            None
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.task.abort();
    }
}
