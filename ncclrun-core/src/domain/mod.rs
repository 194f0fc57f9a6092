//! Core domain types
//!
//! These types describe a benchmark run from submission to the final summary.
//! They are produced by the runner and read by the command line front end.

pub mod job;
pub mod pod;
pub mod run;
