//! Benchmark profiles
//!
//! Each profile is a validated recipe for a B200 cluster with eight
//! InfiniBand adapters per node: container image, network attachments, NCCL
//! tuning and the benchmark command line.

use ncclrun_core::domain::job::{JobSpec, LauncherSpec, WorkerResources};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// GPUs requested on every worker
pub const GPUS_PER_WORKER: u32 = 8;

/// InfiniBand interfaces of a node, in the order they are attached
const IB_INTERFACES: [&str; 8] = [
    "ibp192s0", "ibp206s0", "ibp154s0", "ibp220s0", "ibp24s0", "ibp64s0", "ibp79s0", "ibp94s0",
];

const NCCL_TESTS_IMAGE: &str = "docker.io/deepops/nccl-tests:2312";
const HPC_BENCHMARKS_IMAGE: &str = "nvcr.io/nvidia/hpc-benchmarks:25.02";

const MPIRUN_ARGS: [&str; 5] = ["--allow-run-as-root", "--bind-to", "none", "-map-by", "slot"];

const NCCL_TESTS_PROGRAM: [&str; 17] = [
    "-mca", "pml", "ob1", "-mca", "btl", "self,tcp", "all_reduce_perf_mpi", "-b", "1G", "-e",
    "16G", "-f", "2", "-n", "100", "-g", "1",
];

const HPC_BENCHMARKS_PROGRAM: [&str; 9] = [
    "all_reduce_perf_mpi", "-b", "1G", "-f", "2", "-g", "8", "-e", "32G",
];

const STANDARD_ENV: [(&str, &str); 5] = [
    ("CUDA_DEVICE_MAX_CONNECTIONS", "1"),
    ("NCCL_SOCKET_IFNAME", "eth0"),
    ("NCCL_ASYNC_ERROR_HANDLING", "1"),
    ("NCCL_IB_QPS_PER_CONNECTION", "2"),
    ("NCCL_IB_SPLIT_DATA_ON_QPS", "0"),
];

const B200_ENV: [(&str, &str); 19] = [
    ("CUDA_DEVICE_MAX_CONNECTIONS", "1"),
    ("NCCL_DEBUG", "INFO"),
    ("NCCL_DEBUG_SUBSYS", "INIT,NET"),
    ("NCCL_IB_DISABLE", "0"),
    ("NCCL_IB_HCA", "mlx5"),
    ("NCCL_IB_QPS_PER_CONNECTION", "2"),
    ("NCCL_IB_SPLIT_DATA_ON_QPS", "0"),
    ("NCCL_IB_ADAPTIVE_ROUTING", "1"),
    ("NCCL_IB_SL", "1"),
    ("NCCL_IB_PCI_RELAXED_ORDERING", "1"),
    ("NCCL_CROSS_NIC", "1"),
    ("NCCL_MIN_NCHANNELS", "16"),
    ("NCCL_P2P_NET_CHUNKSIZE", "524288"),
    ("NCCL_BUFFSIZE", "8388608"),
    ("NCCL_NET_GDR_LEVEL", "5"),
    ("NCCL_NVLS_ENABLE", "1"),
    ("NCCL_ALGO", "RING"),
    ("NCCL_SOCKET_IFNAME", "eth0"),
    ("NCCL_ASYNC_ERROR_HANDLING", "1"),
];

const HPC_BENCHMARKS_ENV: [(&str, &str); 9] = [
    ("NCCL_NVLS_ENABLE", "1"),
    ("NCCL_IB_ADAPTIVE_ROUTING", "1"),
    ("NCCL_IB_SL", "1"),
    ("NCCL_IB_QPS_PER_CONNECTION", "2"),
    ("NCCL_IB_SPLIT_DATA_ON_QPS", "0"),
    ("NCCL_IB_HCA", "mlx5_15,mlx5_10,mlx5_14,mlx5_13,mlx5_8,mlx5_7,mlx5_9,mlx5_4"),
    ("NCCL_SOCKET_IFNAME", "eth0"),
    ("NCCL_ALGO", "RING"),
    ("UCX_TLS", "rc"),
];

/// A benchmark recipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BenchmarkProfile {
    /// nccl-tests over the default secondary networks with minimal tuning
    Standard,
    /// nccl-tests over SR-IOV networks with the tuned B200 environment
    #[default]
    B200,
    /// NVIDIA HPC Benchmarks container
    HpcBenchmarks,
}

impl BenchmarkProfile {
    pub const ALL: [BenchmarkProfile; 3] = [
        BenchmarkProfile::Standard,
        BenchmarkProfile::B200,
        BenchmarkProfile::HpcBenchmarks,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BenchmarkProfile::Standard => "standard",
            BenchmarkProfile::B200 => "b200",
            BenchmarkProfile::HpcBenchmarks => "hpc-benchmarks",
        }
    }

    /// Prefix of the job names allocated for this profile
    pub fn base_name(self) -> &'static str {
        match self {
            BenchmarkProfile::Standard | BenchmarkProfile::B200 => "nccl-test",
            BenchmarkProfile::HpcBenchmarks => "hpc-bench",
        }
    }

    pub fn image(self) -> &'static str {
        match self {
            BenchmarkProfile::Standard | BenchmarkProfile::B200 => NCCL_TESTS_IMAGE,
            BenchmarkProfile::HpcBenchmarks => HPC_BENCHMARKS_IMAGE,
        }
    }

    /// Builds the job description for `workers` nodes
    pub fn build(self, name: &str, workers: u32, debug: bool) -> JobSpec {
        let extended = IB_INTERFACES
            .iter()
            .map(|iface| (format!("nvidia.com/res{}", iface), 1))
            .collect();

        let networks = IB_INTERFACES
            .iter()
            .map(|iface| match self {
                BenchmarkProfile::B200 => format!("network-operator/{}-sriovnet", iface),
                BenchmarkProfile::Standard | BenchmarkProfile::HpcBenchmarks => {
                    format!("default/{}", iface)
                }
            })
            .collect();

        let (env, program, forward_env) = match self {
            BenchmarkProfile::Standard => (STANDARD_ENV.as_slice(), NCCL_TESTS_PROGRAM.as_slice(), false),
            BenchmarkProfile::B200 => (B200_ENV.as_slice(), NCCL_TESTS_PROGRAM.as_slice(), true),
            BenchmarkProfile::HpcBenchmarks => {
                (HPC_BENCHMARKS_ENV.as_slice(), HPC_BENCHMARKS_PROGRAM.as_slice(), true)
            }
        };

        JobSpec {
            name: name.to_string(),
            image: self.image().to_string(),
            workers,
            resources: WorkerResources {
                gpus: GPUS_PER_WORKER,
                extended,
            },
            networks,
            launcher: LauncherSpec {
                command: "mpirun".to_string(),
                args: to_strings(&MPIRUN_ARGS),
                program: to_strings(program),
                forward_env,
            },
            env: env
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect::<BTreeMap<_, _>>(),
            debug,
            image_pull_policy: "IfNotPresent".to_string(),
            large_shm: true,
            interactive: true,
        }
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

impl fmt::Display for BenchmarkProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BenchmarkProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BenchmarkProfile::ALL
            .into_iter()
            .find(|profile| profile.name() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = BenchmarkProfile::ALL.iter().map(|p| p.name()).collect();
                format!("unknown profile '{}' (expected one of: {})", s, known.join(", "))
            })
    }
}
