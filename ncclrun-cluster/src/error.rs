//! Error types for the cluster client

use thiserror::Error;

/// Result type alias for cluster operations
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Errors that can occur when talking to the cluster tools
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The tool could not be started at all
    #[error("Failed to execute '{program}': {source}")]
    Spawn {
        /// Program that was invoked
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The tool ran and exited unsuccessfully
    #[error("'{command}' failed (exit code {}): {stderr}", exit_code_label(.code))]
    CommandFailed {
        /// Command line that was run
        command: String,
        /// Exit code, absent when killed by a signal
        code: Option<i32>,
        /// Diagnostic output of the tool
        stderr: String,
    },

    /// Output of the tool could not be understood
    #[error("Failed to parse output: {0}")]
    ParseError(String),

    /// A log follow stream ended abnormally
    #[error("Log stream for pod {pod} disconnected: {message}")]
    StreamDisconnected {
        /// Pod whose stream ended
        pod: String,
        /// Diagnostic output of the follow process
        message: String,
    },

    /// Reading from a running tool failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_code_label(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "none".to_string())
}

impl ClusterError {
    /// Create a command failure from the rendered command line and its output
    pub fn command_failed(command: impl Into<String>, code: Option<i32>, stderr: impl Into<String>) -> Self {
        Self::CommandFailed {
            command: command.into(),
            code,
            stderr: stderr.into(),
        }
    }

    /// Raw diagnostic text of the failure, as printed by the tool when available
    pub fn diagnostic(&self) -> String {
        match self {
            Self::CommandFailed { stderr, .. } => stderr.clone(),
            Self::StreamDisconnected { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}
