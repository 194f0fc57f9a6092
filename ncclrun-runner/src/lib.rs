//! ncclrun Runner
//!
//! Orchestrates a multi-node NCCL benchmark on a Run:ai cluster.
//!
//! Architecture:
//! - Configuration: tunables from defaults and `NCCLRUN_*` environment variables
//! - Profiles: the job descriptions of the supported benchmarks
//! - Allocator: collision-free job names
//! - Submission: hands the job to the scheduler exactly once
//! - Discovery: polls until the launcher and every worker pod exist
//! - Capture: one log-follow task per pod, each writing its own file
//! - Coordinator: drives the stages under a deadline and reports the result
//!
//! All cluster access goes through the traits of `ncclrun-cluster`.

pub mod allocator;
pub mod capture;
pub mod config;
pub mod coordinator;
pub mod discovery;
pub mod error;
pub mod profile;
pub mod submission;

#[cfg(test)]
mod testing;

pub use config::RunnerConfig;
pub use coordinator::{RunCoordinator, RunRequest};
pub use profile::BenchmarkProfile;
