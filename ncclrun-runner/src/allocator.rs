//! Job naming
//!
//! Picks a job name that does not collide with any existing workload, so
//! repeated runs can be told apart in the scheduler and in the log directory.

use chrono::{DateTime, Local};
use ncclrun_cluster::JobScheduler;
use std::collections::HashSet;
use tracing::{info, warn};

/// Lowest `<base><N>` (N >= 1) not present in `listing`
///
/// A name is in use when a whitespace-separated token of the listing equals it
/// exactly, so `nccl-test1` is never mistaken for `nccl-test10`.
pub fn next_job_name(base: &str, listing: &[String]) -> String {
    let in_use: HashSet<&str> = listing
        .iter()
        .flat_map(|line| line.split_whitespace())
        .collect();

    let mut n: u64 = 1;
    loop {
        let candidate = format!("{}{}", base, n);
        if !in_use.contains(candidate.as_str()) {
            return candidate;
        }
        n += 1;
    }
}

/// Name used when the workload listing is unavailable
pub fn fallback_job_name(base: &str, at: DateTime<Local>) -> String {
    format!("{}-{}", base, at.format("%Y%m%d%H%M%S"))
}

/// Allocates a job name from the scheduler's current workload listing
///
/// Never fails: when the listing cannot be obtained the run proceeds with a
/// timestamped name instead.
pub async fn allocate(scheduler: &dyn JobScheduler, base: &str) -> String {
    match scheduler.list_workloads().await {
        Ok(listing) => {
            let name = next_job_name(base, &listing);
            info!("Allocated job name {}", name);
            name
        }
        Err(e) => {
            let name = fallback_job_name(base, Local::now());
            warn!("Could not list existing workloads ({}), using {}", e, name);
            name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeScheduler;
    use chrono::TimeZone;

    fn listing(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|line| line.to_string()).collect()
    }

    #[test]
    fn test_first_name_on_empty_listing() {
        assert_eq!(next_job_name("nccl-test", &[]), "nccl-test1");
    }

    #[test]
    fn test_skips_names_in_use() {
        let listing = listing(&[
            "WORKLOAD     TYPE  STATUS     PROJECT",
            "nccl-test1   MPI   Completed  test",
            "nccl-test2   MPI   Running    test",
        ]);
        assert_eq!(next_job_name("nccl-test", &listing), "nccl-test3");
    }

    #[test]
    fn test_fills_lowest_gap() {
        let listing = listing(&["nccl-test1 MPI Completed", "nccl-test3 MPI Running"]);
        assert_eq!(next_job_name("nccl-test", &listing), "nccl-test2");
    }

    #[test]
    fn test_exact_token_match() {
        // nccl-test10 does not occupy nccl-test1, and substrings of other
        // tokens do not count either
        let listing = listing(&["nccl-test10 MPI Running", "my-nccl-test1 MPI Running"]);
        assert_eq!(next_job_name("nccl-test", &listing), "nccl-test1");
    }

    #[test]
    fn test_never_returns_name_in_listing() {
        let listing: Vec<String> = (1..=50)
            .filter(|n| n % 7 != 0)
            .map(|n| format!("hpc-bench{} MPI Completed", n))
            .collect();
        let name = next_job_name("hpc-bench", &listing);
        assert_eq!(name, "hpc-bench7");
        assert!(listing
            .iter()
            .all(|line| !line.split_whitespace().any(|token| token == name)));
    }

    #[test]
    fn test_idempotent_for_unchanged_listing() {
        let listing = listing(&["nccl-test1 MPI Completed"]);
        assert_eq!(
            next_job_name("nccl-test", &listing),
            next_job_name("nccl-test", &listing)
        );
    }

    #[test]
    fn test_fallback_name() {
        let at = Local.with_ymd_and_hms(2026, 1, 15, 9, 5, 7).unwrap();
        assert_eq!(fallback_job_name("nccl-test", at), "nccl-test-20260115090507");
    }

    #[tokio::test]
    async fn test_allocate_uses_listing() {
        let scheduler = FakeScheduler::new().with_workloads(&["nccl-test1 MPI Running"]);
        assert_eq!(allocate(&scheduler, "nccl-test").await, "nccl-test2");
    }

    #[tokio::test]
    async fn test_allocate_falls_back_when_listing_fails() {
        let scheduler = FakeScheduler::new().with_listing_error("connection refused");
        let name = allocate(&scheduler, "nccl-test").await;
        assert!(name.starts_with("nccl-test-"));
        assert_eq!(name.len(), "nccl-test-".len() + 14);
    }
}
