//! Concurrent log capture
//!
//! Every pod of a job gets its own capture session: a tokio task that follows
//! the pod's console output and appends it to a dedicated file. Sessions share
//! nothing; each reports its terminal status to the [`CaptureManager`] over a
//! channel.

mod manager;
mod session;

pub use manager::CaptureManager;
pub use session::CaptureSession;

use chrono::{DateTime, Local};
use ncclrun_core::domain::run::CaptureStatus;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::CaptureError;

/// Terminal state of one capture session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureReport {
    pub pod: String,
    pub path: PathBuf,
    pub status: CaptureStatus,
    /// Bytes appended to the log file by this session
    pub bytes: u64,
    pub reconnects: u32,
    pub error: Option<String>,
}

/// How a session recovers from stream disconnects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_reconnects: u32,
    pub backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_reconnects: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

/// File name of a pod's log: `<job>_<pod>_<YYYYmmdd_HHMMSS>.log`
pub fn log_file_name(job: &str, pod: &str, started_at: DateTime<Local>) -> String {
    format!("{}_{}_{}.log", job, pod, started_at.format("%Y%m%d_%H%M%S"))
}

/// Creates the log directory if it does not exist yet
pub async fn ensure_log_dir(dir: &Path) -> Result<(), CaptureError> {
    if tokio::fs::try_exists(dir).await.unwrap_or(false) {
        return Ok(());
    }

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| CaptureError::file_io(dir, e))?;
    info!("Created log directory {}", dir.display());
    Ok(())
}
