//! A single pod's capture session

use chrono::{DateTime, Utc};
use ncclrun_cluster::{LogLine, LogStream, LogStreamer};
use ncclrun_core::domain::run::CaptureStatus;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{CaptureReport, ReconnectPolicy};
use crate::error::CaptureError;

/// Follows one pod's output into one file
///
/// The session owns its file for its whole lifetime and flushes it after
/// every line, so whatever was received is on disk even if the task is later
/// aborted. Output is copied byte for byte.
///
/// Reconnects resume from the platform timestamp of the last line received.
/// Without any timestamp the whole log is requested again.
pub struct CaptureSession {
    streamer: Arc<dyn LogStreamer>,
    namespace: String,
    pod: String,
    path: PathBuf,
    policy: ReconnectPolicy,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct Progress {
    bytes: u64,
    reconnects: u32,
    /// Platform timestamp of the last line that carried one
    last_line_at: Option<DateTime<Utc>>,
}

impl CaptureSession {
    pub fn new(
        streamer: Arc<dyn LogStreamer>,
        namespace: impl Into<String>,
        pod: impl Into<String>,
        path: PathBuf,
        policy: ReconnectPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            streamer,
            namespace: namespace.into(),
            pod: pod.into(),
            path,
            policy,
            cancel,
        }
    }

    /// Runs the session to a terminal status
    pub async fn run(self) -> CaptureReport {
        info!(
            "Starting log capture for pod {} -> {}",
            self.pod,
            self.path.display()
        );

        let mut progress = Progress::default();

        let outcome = match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
        {
            Ok(file) => {
                let mut writer = BufWriter::new(file);
                let outcome = self.follow(&mut writer, &mut progress).await;
                let flushed = writer
                    .flush()
                    .await
                    .map_err(|e| CaptureError::file_io(&self.path, e));
                outcome.and_then(|status| flushed.map(|_| status))
            }
            Err(e) => Err(CaptureError::file_io(&self.path, e)),
        };

        let (status, error) = match outcome {
            Ok(status) => {
                info!(
                    "Log capture for pod {} {} ({} bytes)",
                    self.pod, status, progress.bytes
                );
                (status, None)
            }
            Err(e) => {
                warn!("Log capture for pod {} failed: {}", self.pod, e);
                (CaptureStatus::Errored, Some(e.to_string()))
            }
        };

        CaptureReport {
            pod: self.pod,
            path: self.path,
            status,
            bytes: progress.bytes,
            reconnects: progress.reconnects,
            error,
        }
    }

    /// Attaches to the pod and copies output, reconnecting on disconnects
    async fn follow(
        &self,
        writer: &mut BufWriter<File>,
        progress: &mut Progress,
    ) -> Result<CaptureStatus, CaptureError> {
        loop {
            let attached = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(CaptureStatus::Cancelled),
                attached = self.streamer.follow(&self.namespace, &self.pod, progress.last_line_at) => attached,
            };

            let failure = match attached {
                Ok(stream) => match self.copy(stream, writer, progress).await {
                    Err(e) if e.is_retryable() => e,
                    other => return other,
                },
                Err(e) => CaptureError::Stream(e),
            };

            if progress.reconnects >= self.policy.max_reconnects {
                warn!(
                    "Giving up on logs of pod {} after {} reconnect(s)",
                    self.pod, progress.reconnects
                );
                return Err(failure);
            }

            progress.reconnects += 1;
            warn!(
                "{}; reconnecting in {:?} (attempt {}/{})",
                failure, self.policy.backoff, progress.reconnects, self.policy.max_reconnects
            );

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(CaptureStatus::Cancelled),
                _ = tokio::time::sleep(self.policy.backoff) => {}
            }
        }
    }

    /// Copies lines from `stream` until it closes, fails or the session is cancelled
    async fn copy(
        &self,
        mut stream: Box<dyn LogStream>,
        writer: &mut BufWriter<File>,
        progress: &mut Progress,
    ) -> Result<CaptureStatus, CaptureError> {
        loop {
            let line = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Log capture for pod {} cancelled", self.pod);
                    return Ok(CaptureStatus::Cancelled);
                }
                line = stream.next_line() => line?,
            };

            let Some(line) = line else {
                return Ok(CaptureStatus::Completed);
            };

            self.write_line(writer, &line).await?;
            progress.bytes += line.content.len() as u64 + 1;
            if line.timestamp.is_some() {
                progress.last_line_at = line.timestamp;
            }
        }
    }

    async fn write_line(&self, writer: &mut BufWriter<File>, line: &LogLine) -> Result<(), CaptureError> {
        let written = async {
            writer.write_all(&line.content).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        };
        written
            .await
            .map_err(|e| CaptureError::file_io(&self.path, e))
    }
}
