//! kubectl command line client
//!
//! Lists the pods of a job and follows pod logs. Log follows run
//! `kubectl logs -f --timestamps` as a child process whose stdout is read as
//! raw bytes, one line at a time; the child is killed when the stream is
//! dropped.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use ncclrun_core::domain::pod::PodPhase;
use serde::Deserialize;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::command;
use crate::error::{ClusterError, Result};
use crate::{LogLine, LogStream, LogStreamer, PodInfo, PodLister};

/// `kubectl` binary invoked through the command line
#[derive(Debug, Clone)]
pub struct Kubectl {
    program: String,
    /// Label key whose value is the job name, e.g. `app`
    label: String,
}

impl Kubectl {
    pub fn new(program: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            label: label.into(),
        }
    }
}

impl Default for Kubectl {
    fn default() -> Self {
        Self::new("kubectl", "app")
    }
}

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<PodItem>,
}

#[derive(Debug, Deserialize)]
struct PodItem {
    metadata: PodMetadata,
    #[serde(default)]
    status: Option<PodStatus>,
}

#[derive(Debug, Deserialize)]
struct PodMetadata {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PodStatus {
    #[serde(default)]
    phase: Option<String>,
}

/// Parses `kubectl get pods -o json` output
pub fn parse_pod_list(json: &str) -> Result<Vec<PodInfo>> {
    let list: PodList = serde_json::from_str(json)
        .map_err(|e| ClusterError::ParseError(format!("Invalid pod list: {}", e)))?;

    Ok(list
        .items
        .into_iter()
        .map(|item| PodInfo {
            name: item.metadata.name,
            phase: item
                .status
                .and_then(|status| status.phase)
                .map(|phase| PodPhase::parse(&phase))
                .unwrap_or(PodPhase::Unknown),
        })
        .collect())
}

/// Arguments for listing the pods labeled with `job`
pub fn get_pods_args(namespace: &str, label: &str, job: &str) -> Vec<String> {
    vec![
        "get".into(),
        "pods".into(),
        "-n".into(),
        namespace.to_string(),
        "-l".into(),
        format!("{}={}", label, job),
        "-o".into(),
        "json".into(),
    ]
}

/// Arguments for following a pod's logs, optionally only after `since`
///
/// Lines are prefixed with the platform's timestamp so a reconnect can resume
/// on the cluster's clock. `since` is truncated to whole seconds, which may
/// repeat lines but never skips any.
pub fn logs_args(namespace: &str, pod: &str, since: Option<DateTime<Utc>>) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "logs".into(),
        "-f".into(),
        pod.to_string(),
        "-n".into(),
        namespace.to_string(),
        "--timestamps".into(),
    ];
    if let Some(since) = since {
        args.push(format!(
            "--since-time={}",
            since.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
    }
    args
}

/// Splits the RFC 3339 prefix written by `--timestamps` off a raw line
///
/// A line without a parseable prefix is kept whole, with no timestamp.
pub fn split_timestamp(mut raw: Vec<u8>) -> LogLine {
    let prefix = raw.iter().position(|&b| b == b' ').and_then(|end| {
        let text = std::str::from_utf8(&raw[..end]).ok()?;
        let at = DateTime::parse_from_rfc3339(text).ok()?;
        Some((end, at.with_timezone(&Utc)))
    });

    match prefix {
        Some((end, at)) => {
            raw.drain(..=end);
            LogLine::new(raw, Some(at))
        }
        None => LogLine::new(raw, None),
    }
}

#[async_trait]
impl PodLister for Kubectl {
    async fn list_pods(&self, namespace: &str, job: &str) -> Result<Vec<PodInfo>> {
        let stdout = command::run(&self.program, &get_pods_args(namespace, &self.label, job)).await?;
        parse_pod_list(&stdout)
    }
}

#[async_trait]
impl LogStreamer for Kubectl {
    async fn follow(
        &self,
        namespace: &str,
        pod: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Box<dyn LogStream>> {
        let args = logs_args(namespace, pod, since);
        debug!("Following logs: {}", command::render(&self.program, &args));

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ClusterError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| ClusterError::StreamDisconnected {
            pod: pod.to_string(),
            message: "stdout of log follow process missing".to_string(),
        })?;

        // Drain stderr concurrently so a chatty follow process never blocks on a full pipe
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut text = String::new();
                let _ = stderr.read_to_string(&mut text).await;
                text
            })
        });

        Ok(Box::new(KubectlLogStream::new(pod, child, stdout, stderr_task)))
    }
}

/// Live output of one `kubectl logs -f` process
struct KubectlLogStream {
    pod: String,
    child: Child,
    stdout: BufReader<ChildStdout>,
    stderr_task: Option<JoinHandle<String>>,
    finished: bool,
}

impl KubectlLogStream {
    fn new(
        pod: &str,
        child: Child,
        stdout: ChildStdout,
        stderr_task: Option<JoinHandle<String>>,
    ) -> Self {
        Self {
            pod: pod.to_string(),
            child,
            stdout: BufReader::new(stdout),
            stderr_task,
            finished: false,
        }
    }

    /// Classifies the end of stdout by the follow process's exit status
    async fn close(&mut self) -> Result<Option<LogLine>> {
        self.finished = true;
        let status = self.child.wait().await?;

        let stderr = match self.stderr_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if status.success() {
            Ok(None)
        } else {
            Err(ClusterError::StreamDisconnected {
                pod: self.pod.clone(),
                message: if stderr.trim().is_empty() {
                    format!("follow process exited with {}", status)
                } else {
                    stderr.trim().to_string()
                },
            })
        }
    }
}

#[async_trait]
impl LogStream for KubectlLogStream {
    async fn next_line(&mut self) -> Result<Option<LogLine>> {
        if self.finished {
            return Ok(None);
        }

        let mut raw = Vec::new();
        match self.stdout.read_until(b'\n', &mut raw).await {
            Ok(0) => self.close().await,
            Ok(_) => {
                if raw.last() == Some(&b'\n') {
                    raw.pop();
                }
                Ok(Some(split_timestamp(raw)))
            }
            Err(e) => {
                self.finished = true;
                Err(ClusterError::StreamDisconnected {
                    pod: self.pod.clone(),
                    message: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_pod_list() {
        let json = r#"{
            "apiVersion": "v1",
            "items": [
                {"metadata": {"name": "nccl-test1-launcher-abcde"}, "status": {"phase": "Running"}},
                {"metadata": {"name": "nccl-test1-worker-0"}, "status": {"phase": "Pending"}},
                {"metadata": {"name": "nccl-test1-worker-1"}}
            ],
            "kind": "List"
        }"#;

        let pods = parse_pod_list(json).unwrap();
        assert_eq!(pods.len(), 3);
        assert_eq!(pods[0].name, "nccl-test1-launcher-abcde");
        assert_eq!(pods[0].phase, PodPhase::Running);
        assert_eq!(pods[1].phase, PodPhase::Pending);
        assert_eq!(pods[2].phase, PodPhase::Unknown);
    }

    #[test]
    fn test_parse_empty_and_invalid_pod_list() {
        assert!(parse_pod_list(r#"{"items": []}"#).unwrap().is_empty());
        assert!(matches!(
            parse_pod_list("error: the server doesn't have a resource type"),
            Err(ClusterError::ParseError(_))
        ));
    }

    #[test]
    fn test_get_pods_args() {
        assert_eq!(
            get_pods_args("runai-test", "app", "nccl-test1"),
            vec!["get", "pods", "-n", "runai-test", "-l", "app=nccl-test1", "-o", "json"]
        );
    }

    #[test]
    fn test_logs_args_with_since_time() {
        assert_eq!(
            logs_args("runai-test", "pod-a", None),
            vec!["logs", "-f", "pod-a", "-n", "runai-test"]
        );

        let since = Utc.with_ymd_and_hms(2026, 10, 17, 8, 30, 0).unwrap()
            + chrono::Duration::milliseconds(750);
        let args = logs_args("runai-test", "pod-a", Some(since));
        assert_eq!(args.last().unwrap(), "--since-time=2026-10-17T08:30:00Z");
    }

    #[test]
    fn test_split_timestamp() {
        let line = split_timestamp(b"2026-10-17T08:30:01.123456789Z #  size  count".to_vec());
        assert_eq!(line.content, b"#  size  count");
        assert_eq!(
            line.timestamp,
            Some(
                Utc.with_ymd_and_hms(2026, 10, 17, 8, 30, 1).unwrap()
                    + chrono::Duration::nanoseconds(123_456_789)
            )
        );

        let empty = split_timestamp(b"2026-10-17T08:30:02Z ".to_vec());
        assert!(empty.content.is_empty());
        assert!(empty.timestamp.is_some());

        let plain = split_timestamp(b"NCCL INFO Bootstrap".to_vec());
        assert_eq!(plain.content, b"NCCL INFO Bootstrap");
        assert_eq!(plain.timestamp, None);

        let binary = split_timestamp(b"\xff\xfe garbage".to_vec());
        assert_eq!(binary.content, b"\xff\xfe garbage");
        assert_eq!(binary.timestamp, None);
    }

    #[cfg(unix)]
    fn scripted_stream(pod: &str, script: &str) -> KubectlLogStream {
        // Child standing in for `kubectl logs -f`
        let mut child = Command::new("sh")
            .args(["-c", script])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let stdout = child.stdout.take().unwrap();
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut text = String::new();
                let _ = stderr.read_to_string(&mut text).await;
                text
            })
        });
        KubectlLogStream::new(pod, child, stdout, stderr_task)
    }

    #[cfg(unix)]
    async fn content(stream: &mut KubectlLogStream) -> Option<Vec<u8>> {
        stream.next_line().await.unwrap().map(|line| line.content)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_follow_reads_lines_until_clean_exit() {
        let mut stream = scripted_stream(
            "pod-a",
            "echo '2026-10-17T08:30:00.5Z one'; echo '2026-10-17T08:30:01.5Z two'",
        );

        let first = stream.next_line().await.unwrap().unwrap();
        assert_eq!(first.content, b"one");
        assert_eq!(
            first.timestamp,
            Some(Utc.with_ymd_and_hms(2026, 10, 17, 8, 30, 0).unwrap() + chrono::Duration::milliseconds(500))
        );
        assert_eq!(content(&mut stream).await, Some(b"two".to_vec()));
        assert_eq!(content(&mut stream).await, None);
        assert_eq!(content(&mut stream).await, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_follow_keeps_non_utf8_output() {
        let mut stream = scripted_stream("pod-a", r"printf 'ok\n\377bad\nmore\n'");

        assert_eq!(content(&mut stream).await, Some(b"ok".to_vec()));
        assert_eq!(content(&mut stream).await, Some(b"\xffbad".to_vec()));
        assert_eq!(content(&mut stream).await, Some(b"more".to_vec()));
        // A clean exit is a closed stream, not a disconnect
        assert_eq!(content(&mut stream).await, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_follow_keeps_unterminated_last_line() {
        let mut stream = scripted_stream("pod-a", "printf 'first\\nlast'");

        assert_eq!(content(&mut stream).await, Some(b"first".to_vec()));
        assert_eq!(content(&mut stream).await, Some(b"last".to_vec()));
        assert_eq!(content(&mut stream).await, None);
    }

    #[tokio::test]
    async fn test_follow_missing_program() {
        let kubectl = Kubectl::new("ncclrun-definitely-not-installed", "app");
        let result = kubectl.follow("ns", "pod", None).await;
        assert!(matches!(result, Err(ClusterError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_follow_reports_disconnect_on_failure() {
        let mut stream = scripted_stream(
            "pod-b",
            "echo partial; echo 'connection reset' >&2; exit 1",
        );

        assert_eq!(content(&mut stream).await, Some(b"partial".to_vec()));
        match stream.next_line().await {
            Err(ClusterError::StreamDisconnected { pod, message }) => {
                assert_eq!(pod, "pod-b");
                assert_eq!(message, "connection reset");
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
