//! Helpers for invoking the cluster command line tools

use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::error::{ClusterError, Result};

/// Renders a command line for logs and error messages
pub(crate) fn render(program: &str, args: &[String]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        if arg.contains(' ') {
            line.push('"');
            line.push_str(arg);
            line.push('"');
        } else {
            line.push_str(arg);
        }
    }
    line
}

/// Runs a command to completion and returns its stdout
///
/// A non-zero exit becomes [`ClusterError::CommandFailed`] carrying stderr.
pub(crate) async fn run(program: &str, args: &[String]) -> Result<String> {
    let command_line = render(program, args);
    debug!("Running: {}", command_line);

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| ClusterError::Spawn {
            program: program.to_string(),
            source,
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    if !stderr.trim().is_empty() {
        debug!("{} stderr: {}", program, stderr.trim());
    }

    if !output.status.success() {
        return Err(ClusterError::command_failed(
            command_line,
            output.status.code(),
            stderr.trim(),
        ));
    }

    Ok(stdout)
}
