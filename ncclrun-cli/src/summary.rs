//! Run summary
//!
//! Prints the final state of every pod and names the stage that failed.

use colored::*;
use ncclrun_core::domain::run::{CaptureStatus, PodReport, RunOutcome, RunResult};
use std::path::Path;

/// Print the summary of a finished run
pub fn print_summary(result: &RunResult, log_dir: &Path) {
    println!();
    println!("{}", "Run Summary:".bold());
    println!("  Run ID:    {}", result.run_id.to_string().dimmed());
    println!(
        "  Job:       {}",
        result.job_name.as_deref().unwrap_or("-").cyan()
    );
    println!("  Elapsed:   {}s", result.elapsed.as_secs());

    match &result.outcome {
        RunOutcome::Succeeded => println!("  Outcome:   {}", "✓ succeeded".green()),
        RunOutcome::Failed { stage, message } => {
            println!(
                "  Outcome:   {}",
                format!("✗ failed at {} stage", stage).red()
            );
            println!("  Reason:    {}", message);
        }
    }
    println!("  Exit Code: {}", result.exit_code());

    if result.pods.is_empty() {
        println!("\n{}", "No pods were captured.".yellow());
        return;
    }

    println!("\n{}", "Pods:".bold());
    for pod in &result.pods {
        print_pod(pod);
    }

    println!("\nLogs are saved in: {}/", log_dir.display());
}

fn print_pod(pod: &PodReport) {
    println!(
        "  {} {:<10} {}",
        "▸".cyan(),
        pod.role.to_string(),
        pod.name
    );
    println!(
        "    Phase: {}  Capture: {}  Written: {}",
        pod.phase,
        colorize_capture(pod.capture),
        format_bytes(pod.bytes_written)
    );
    if let Some(path) = &pod.log_path {
        println!("    Log:   {}", path.display().to_string().dimmed());
    }
    if let Some(error) = &pod.error {
        println!("    Error: {}", error.red());
    }
}

/// Colorize capture status for display
fn colorize_capture(status: CaptureStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        CaptureStatus::Streaming => label.cyan(),
        CaptureStatus::Completed => label.green(),
        CaptureStatus::Errored => label.red(),
        CaptureStatus::Cancelled => label.dimmed(),
        CaptureStatus::NotStarted => label.yellow(),
    }
}

/// Human readable byte count, e.g. `12.3 KiB`
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}
