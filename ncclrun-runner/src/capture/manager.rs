//! Supervision of all capture sessions of a job

use chrono::{DateTime, Local};
use ncclrun_cluster::LogStreamer;
use ncclrun_core::domain::run::CaptureStatus;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{log_file_name, CaptureReport, CaptureSession, ReconnectPolicy};

/// Runs one capture session per pod and collects their reports
///
/// Sessions only talk back through an mpsc channel, so the manager itself
/// needs no locking and is driven entirely by its owner.
pub struct CaptureManager {
    streamer: Arc<dyn LogStreamer>,
    namespace: String,
    job: String,
    log_dir: PathBuf,
    started_at: DateTime<Local>,
    policy: ReconnectPolicy,
    cancel: CancellationToken,
    tasks: HashMap<String, JoinHandle<()>>,
    paths: HashMap<String, PathBuf>,
    reports_tx: mpsc::UnboundedSender<CaptureReport>,
    reports_rx: mpsc::UnboundedReceiver<CaptureReport>,
    reports: HashMap<String, CaptureReport>,
}

impl CaptureManager {
    /// Creates a manager for the pods of `job`
    ///
    /// # Arguments
    /// * `streamer` - Source of pod output
    /// * `namespace` - Namespace of the job's pods
    /// * `job` - Job name, used in log file names
    /// * `log_dir` - Directory receiving the log files
    /// * `started_at` - Run start time, used in log file names
    /// * `policy` - Reconnection policy applied to every session
    /// * `cancel` - Cancelling this token stops every session
    pub fn new(
        streamer: Arc<dyn LogStreamer>,
        namespace: impl Into<String>,
        job: impl Into<String>,
        log_dir: impl Into<PathBuf>,
        started_at: DateTime<Local>,
        policy: ReconnectPolicy,
        cancel: CancellationToken,
    ) -> Self {
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        Self {
            streamer,
            namespace: namespace.into(),
            job: job.into(),
            log_dir: log_dir.into(),
            started_at,
            policy,
            cancel,
            tasks: HashMap::new(),
            paths: HashMap::new(),
            reports_tx,
            reports_rx,
            reports: HashMap::new(),
        }
    }

    /// Path of the log file for `pod`
    pub fn log_path(&self, pod: &str) -> PathBuf {
        self.log_dir
            .join(log_file_name(&self.job, pod, self.started_at))
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Starts capturing `pod`
    ///
    /// Running sessions are not disturbed. Returns `false` when the pod
    /// already has a session, in which case nothing happens.
    pub fn add_pod(&mut self, pod: &str) -> bool {
        if self.tasks.contains_key(pod) {
            debug!("Pod {} already has a capture session", pod);
            return false;
        }

        let path = self.log_path(pod);
        let session = CaptureSession::new(
            Arc::clone(&self.streamer),
            self.namespace.clone(),
            pod,
            path.clone(),
            self.policy,
            self.cancel.child_token(),
        );

        let reports = self.reports_tx.clone();
        let handle = tokio::spawn(async move {
            let report = session.run().await;
            // The receiver only goes away once the manager has given up on this task
            let _ = reports.send(report);
        });

        self.tasks.insert(pod.to_string(), handle);
        self.paths.insert(pod.to_string(), path);
        true
    }

    pub fn contains(&self, pod: &str) -> bool {
        self.tasks.contains_key(pod)
    }

    /// Number of pods with a session, finished or not
    pub fn session_count(&self) -> usize {
        self.tasks.len()
    }

    /// Number of sessions that have reported a terminal status so far
    pub fn finished_count(&mut self) -> usize {
        while let Ok(report) = self.reports_rx.try_recv() {
            debug!("Capture of {} ended: {}", report.pod, report.status);
            self.reports.insert(report.pod.clone(), report);
        }
        self.reports.len()
    }

    /// Waits for every session to reach a terminal status
    ///
    /// Sessions get `grace` to end on their own. The rest are then cancelled
    /// and get `cancel_grace` to stop; any still running after that are
    /// aborted and reported as cancelled. Reports are sorted by pod name.
    pub async fn finish(self, grace: Duration, cancel_grace: Duration) -> Vec<CaptureReport> {
        let Self {
            cancel,
            tasks,
            paths,
            reports_tx,
            mut reports_rx,
            mut reports,
            ..
        } = self;
        drop(reports_tx);

        let expected = tasks.len();
        if !wait_for_reports(&mut reports_rx, &mut reports, expected, grace).await {
            info!(
                "Cancelling {} capture(s) still running after {:?}",
                expected - reports.len(),
                grace
            );
            cancel.cancel();

            if !wait_for_reports(&mut reports_rx, &mut reports, expected, cancel_grace).await {
                warn!(
                    "{} capture(s) did not stop within {:?}, abandoning them",
                    expected - reports.len(),
                    cancel_grace
                );
            }
        }

        for (pod, handle) in tasks {
            if reports.contains_key(&pod) {
                continue;
            }

            let (status, error) = if handle.is_finished() {
                (
                    CaptureStatus::Errored,
                    "capture task ended without reporting".to_string(),
                )
            } else {
                handle.abort();
                (
                    CaptureStatus::Cancelled,
                    format!("capture abandoned after {:?}", cancel_grace),
                )
            };

            let path = paths.get(&pod).cloned().unwrap_or_default();
            // Every received line was flushed, so the file size is what was captured
            let bytes = tokio::fs::metadata(&path)
                .await
                .map(|meta| meta.len())
                .unwrap_or(0);

            reports.insert(
                pod.clone(),
                CaptureReport {
                    pod,
                    path,
                    status,
                    bytes,
                    reconnects: 0,
                    error: Some(error),
                },
            );
        }

        let mut reports: Vec<CaptureReport> = reports.into_values().collect();
        reports.sort_by(|a, b| a.pod.cmp(&b.pod));
        reports
    }
}

/// Collects reports until `expected` are in or `limit` elapses
///
/// Returns whether all expected reports arrived.
async fn wait_for_reports(
    rx: &mut mpsc::UnboundedReceiver<CaptureReport>,
    reports: &mut HashMap<String, CaptureReport>,
    expected: usize,
    limit: Duration,
) -> bool {
    let collect = async {
        while reports.len() < expected {
            match rx.recv().await {
                Some(report) => {
                    reports.insert(report.pod.clone(), report);
                }
                None => break,
            }
        }
    };
    let _ = time::timeout(limit, collect).await;
    reports.len() >= expected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeStreamer, StreamScript};

    fn manager(streamer: Arc<FakeStreamer>, dir: &Path, cancel: CancellationToken) -> CaptureManager {
        CaptureManager::new(
            streamer,
            "runai-test",
            "nccl-test1",
            dir,
            Local::now(),
            ReconnectPolicy {
                max_reconnects: 1,
                backoff: Duration::from_millis(5),
            },
            cancel,
        )
    }

    const PODS: [&str; 3] = [
        "nccl-test1-launcher-abc",
        "nccl-test1-worker-0",
        "nccl-test1-worker-1",
    ];

    #[tokio::test]
    async fn test_one_failing_stream_does_not_affect_others() {
        let tmp = tempfile::tempdir().unwrap();
        let streamer = Arc::new(FakeStreamer::new());
        streamer.default_script(StreamScript::closing(&["out of band", "bus bandwidth"]));
        streamer.script("nccl-test1-worker-1", StreamScript::disconnecting(&[]));
        streamer.script("nccl-test1-worker-1", StreamScript::disconnecting(&[]));

        let mut manager = manager(streamer, tmp.path(), CancellationToken::new());
        for pod in PODS {
            assert!(manager.add_pod(pod));
        }

        let reports = manager
            .finish(Duration::from_secs(5), Duration::from_secs(1))
            .await;

        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| r.status.is_terminal()));
        for report in &reports {
            if report.pod == "nccl-test1-worker-1" {
                assert_eq!(report.status, CaptureStatus::Errored);
                assert_eq!(report.reconnects, 1);
            } else {
                assert_eq!(report.status, CaptureStatus::Completed);
                assert!(std::fs::metadata(&report.path).unwrap().len() > 0);
            }
        }
    }

    #[tokio::test]
    async fn test_add_pod_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let streamer = Arc::new(FakeStreamer::new());
        streamer.default_script(StreamScript::closing(&["line"]));

        let mut manager = manager(streamer.clone(), tmp.path(), CancellationToken::new());
        assert!(manager.add_pod("nccl-test1-worker-0"));
        assert!(!manager.add_pod("nccl-test1-worker-0"));
        assert!(manager.contains("nccl-test1-worker-0"));
        assert_eq!(manager.session_count(), 1);

        let reports = manager
            .finish(Duration::from_secs(5), Duration::from_secs(1))
            .await;
        assert_eq!(reports.len(), 1);
        assert_eq!(streamer.follows("nccl-test1-worker-0").len(), 1);
    }

    #[tokio::test]
    async fn test_late_pod_joins_running_sessions() {
        let tmp = tempfile::tempdir().unwrap();
        let streamer = Arc::new(FakeStreamer::new());
        streamer.script(PODS[0], StreamScript::hanging(&["launcher up"]));
        streamer.script(PODS[1], StreamScript::closing(&["worker 0 done"]));

        let mut manager = manager(streamer, tmp.path(), CancellationToken::new());
        manager.add_pod(PODS[0]);
        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.add_pod(PODS[1]);

        let reports = manager
            .finish(Duration::from_millis(100), Duration::from_secs(1))
            .await;
        let status: HashMap<&str, CaptureStatus> =
            reports.iter().map(|r| (r.pod.as_str(), r.status)).collect();
        assert_eq!(status[PODS[0]], CaptureStatus::Cancelled);
        assert_eq!(status[PODS[1]], CaptureStatus::Completed);
    }

    #[tokio::test]
    async fn test_log_paths_are_pairwise_distinct() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(Arc::new(FakeStreamer::new()), tmp.path(), CancellationToken::new());

        let paths: std::collections::HashSet<PathBuf> =
            PODS.iter().map(|pod| manager.log_path(pod)).collect();
        assert_eq!(paths.len(), PODS.len());
        assert!(paths.iter().all(|path| path.starts_with(tmp.path())));
    }

    // Two workers: one stays free to drive timers while the other is stuck
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unresponsive_session_is_abandoned() {
        let tmp = tempfile::tempdir().unwrap();
        let streamer = Arc::new(FakeStreamer::new());
        streamer.script(
            PODS[1],
            StreamScript::stalling(&["# Out of bounds values : 0 OK"], Duration::from_millis(800)),
        );

        let mut manager = manager(streamer, tmp.path(), CancellationToken::new());
        manager.add_pod(PODS[1]);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = std::time::Instant::now();
        let reports = manager
            .finish(Duration::ZERO, Duration::from_millis(50))
            .await;
        assert!(started.elapsed() < Duration::from_millis(500));

        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert_eq!(report.status, CaptureStatus::Cancelled);
        assert!(report.error.as_deref().unwrap().contains("abandoned"));
        // The line received before the stall was flushed and is counted
        assert_eq!(report.bytes, "# Out of bounds values : 0 OK\n".len() as u64);
        assert_eq!(
            std::fs::read_to_string(&report.path).unwrap(),
            "# Out of bounds values : 0 OK\n"
        );
    }

    #[tokio::test]
    async fn test_parent_cancellation_reaches_sessions() {
        let tmp = tempfile::tempdir().unwrap();
        let streamer = Arc::new(FakeStreamer::new());
        streamer.default_script(StreamScript::hanging(&[]));

        let cancel = CancellationToken::new();
        let mut manager = manager(streamer, tmp.path(), cancel.child_token());
        for pod in PODS {
            manager.add_pod(pod);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.finished_count(), 0);

        cancel.cancel();
        let reports = manager
            .finish(Duration::from_secs(5), Duration::from_secs(1))
            .await;
        assert!(reports.iter().all(|r| r.status == CaptureStatus::Cancelled));
    }
}
