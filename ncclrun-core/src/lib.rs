//! ncclrun Core
//!
//! Domain types shared by the ncclrun crates.
//!
//! This crate contains:
//! - Job types: the benchmark job description and the handle of a submitted job
//! - Pod types: roles, phases and classified pod snapshots
//! - Run types: per-pod capture reports and the final run result

pub mod domain;
