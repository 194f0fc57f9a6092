//! In-memory stand-ins for the cluster tools

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use ncclrun_cluster::{
    ClusterError, JobScheduler, LogLine, LogStream, LogStreamer, PodInfo, PodLister, Result,
    SubmitReceipt,
};
use ncclrun_core::domain::job::JobSpec;
use ncclrun_core::domain::pod::PodPhase;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

pub fn pod(name: &str, phase: PodPhase) -> PodInfo {
    PodInfo {
        name: name.to_string(),
        phase,
    }
}

fn failure(command: &str, message: &str) -> ClusterError {
    ClusterError::command_failed(command, Some(1), message)
}

/// Scheduler recording every call
#[derive(Default)]
pub struct FakeScheduler {
    workloads: Vec<String>,
    listing_error: Option<String>,
    configure_error: Option<String>,
    submit_error: Option<String>,
    receipt: Option<String>,
    calls: Mutex<Vec<String>>,
}

impl FakeScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workloads(mut self, lines: &[&str]) -> Self {
        self.workloads = lines.iter().map(|line| line.to_string()).collect();
        self
    }

    pub fn with_listing_error(mut self, message: &str) -> Self {
        self.listing_error = Some(message.to_string());
        self
    }

    pub fn with_configure_error(mut self, message: &str) -> Self {
        self.configure_error = Some(message.to_string());
        self
    }

    pub fn with_submit_error(mut self, message: &str) -> Self {
        self.submit_error = Some(message.to_string());
        self
    }

    pub fn with_receipt(mut self, reference: &str) -> Self {
        self.receipt = Some(reference.to_string());
        self
    }

    /// Calls in order, e.g. `["configure test", "list", "submit nccl-test1"]`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Names of the jobs passed to `submit`
    pub fn submitted(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|call| call.strip_prefix("submit "))
            .map(str::to_string)
            .collect()
    }

    pub fn submit_attempts(&self) -> usize {
        self.submitted().len()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl JobScheduler for FakeScheduler {
    async fn configure_project(&self, project: &str) -> Result<()> {
        self.record(format!("configure {}", project));
        match &self.configure_error {
            Some(message) => Err(failure("runai config project", message)),
            None => Ok(()),
        }
    }

    async fn list_workloads(&self) -> Result<Vec<String>> {
        self.record("list".to_string());
        match &self.listing_error {
            Some(message) => Err(failure("runai training mpi list", message)),
            None => Ok(self.workloads.clone()),
        }
    }

    async fn submit(&self, spec: &JobSpec) -> Result<SubmitReceipt> {
        self.record(format!("submit {}", spec.name));
        match &self.submit_error {
            Some(message) => Err(failure("runai mpi submit", message)),
            None => Ok(SubmitReceipt {
                reference: self.receipt.clone(),
            }),
        }
    }
}

/// Pod lister replaying queued listings
///
/// Once the queue is empty the last successful listing is repeated.
#[derive(Default)]
pub struct FakeLister {
    queue: Mutex<VecDeque<std::result::Result<Vec<PodInfo>, String>>>,
    last: Mutex<Vec<PodInfo>>,
    calls: Mutex<usize>,
}

impl FakeLister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, pods: Vec<PodInfo>) {
        self.queue.lock().unwrap().push_back(Ok(pods));
    }

    pub fn push_error(&self, message: &str) {
        self.queue.lock().unwrap().push_back(Err(message.to_string()));
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl PodLister for FakeLister {
    async fn list_pods(&self, _namespace: &str, _job: &str) -> Result<Vec<PodInfo>> {
        *self.calls.lock().unwrap() += 1;
        let next = self.queue.lock().unwrap().pop_front();
        match next {
            Some(Ok(pods)) => {
                *self.last.lock().unwrap() = pods.clone();
                Ok(pods)
            }
            Some(Err(message)) => Err(failure("kubectl get pods", &message)),
            None => Ok(self.last.lock().unwrap().clone()),
        }
    }
}

/// How a scripted stream ends after its lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// Clean end, as when the pod terminates
    Close,
    /// Abnormal end of the follow process
    Disconnect,
    /// Never ends on its own
    Hang,
    /// Blocks its worker thread without yielding, then closes
    Stall(Duration),
}

/// Platform timestamp the scripted line at `index` carries
pub fn script_time(index: usize) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 17, 8, 0, 0).unwrap() + chrono::Duration::seconds(index as i64)
}

#[derive(Debug, Clone)]
pub struct StreamScript {
    lines: Vec<LogLine>,
    end: StreamEnd,
}

impl StreamScript {
    fn new(lines: &[&str], end: StreamEnd) -> Self {
        let raw: Vec<&[u8]> = lines.iter().map(|line| line.as_bytes()).collect();
        Self::from_raw(&raw, end)
    }

    fn from_raw(lines: &[&[u8]], end: StreamEnd) -> Self {
        Self {
            lines: lines
                .iter()
                .enumerate()
                .map(|(index, line)| LogLine::new(line.to_vec(), Some(script_time(index))))
                .collect(),
            end,
        }
    }

    pub fn closing_raw(lines: &[&[u8]]) -> Self {
        Self::from_raw(lines, StreamEnd::Close)
    }

    pub fn stalling(lines: &[&str], stall: Duration) -> Self {
        Self::new(lines, StreamEnd::Stall(stall))
    }

    /// Lines as printed by a platform that does not report timestamps
    pub fn without_timestamps(mut self) -> Self {
        for line in &mut self.lines {
            line.timestamp = None;
        }
        self
    }

    pub fn closing(lines: &[&str]) -> Self {
        Self::new(lines, StreamEnd::Close)
    }

    pub fn disconnecting(lines: &[&str]) -> Self {
        Self::new(lines, StreamEnd::Disconnect)
    }

    pub fn hanging(lines: &[&str]) -> Self {
        Self::new(lines, StreamEnd::Hang)
    }
}

/// Log streamer serving scripted streams per pod
///
/// Each follow of a pod takes its next queued script, falling back to the
/// default script. Without either, attaching fails.
#[derive(Default)]
pub struct FakeStreamer {
    scripts: Mutex<HashMap<String, VecDeque<StreamScript>>>,
    default: Mutex<Option<StreamScript>>,
    follows: Mutex<Vec<(String, Option<DateTime<Utc>>)>>,
}

impl FakeStreamer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, pod: &str, script: StreamScript) {
        self.scripts
            .lock()
            .unwrap()
            .entry(pod.to_string())
            .or_default()
            .push_back(script);
    }

    pub fn default_script(&self, script: StreamScript) {
        *self.default.lock().unwrap() = Some(script);
    }

    /// `since` arguments of every follow of `pod`, in order
    pub fn follows(&self, pod: &str) -> Vec<Option<DateTime<Utc>>> {
        self.follows
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == pod)
            .map(|(_, since)| *since)
            .collect()
    }
}

#[async_trait]
impl LogStreamer for FakeStreamer {
    async fn follow(
        &self,
        _namespace: &str,
        pod: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Box<dyn LogStream>> {
        self.follows.lock().unwrap().push((pod.to_string(), since));

        let queued = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(pod)
            .and_then(|queue| queue.pop_front());
        let script = queued.or_else(|| self.default.lock().unwrap().clone());

        match script {
            Some(script) => Ok(Box::new(FakeStream {
                pod: pod.to_string(),
                lines: script.lines.into(),
                end: script.end,
            })),
            None => Err(ClusterError::StreamDisconnected {
                pod: pod.to_string(),
                message: "container not found".to_string(),
            }),
        }
    }
}

struct FakeStream {
    pod: String,
    lines: VecDeque<LogLine>,
    end: StreamEnd,
}

#[async_trait]
impl LogStream for FakeStream {
    async fn next_line(&mut self) -> Result<Option<LogLine>> {
        if let Some(line) = self.lines.pop_front() {
            return Ok(Some(line));
        }

        match self.end {
            StreamEnd::Close => Ok(None),
            StreamEnd::Disconnect => Err(ClusterError::StreamDisconnected {
                pod: self.pod.clone(),
                message: "unexpected EOF".to_string(),
            }),
            StreamEnd::Hang => std::future::pending().await,
            StreamEnd::Stall(stall) => {
                std::thread::sleep(stall);
                Ok(None)
            }
        }
    }
}
