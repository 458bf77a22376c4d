#![warn(missing_docs)]
//! isobench CPU - Topology and Isolation
//!
//! CPU facts and process placement for low-jitter benchmarking:
//! - Range-list and bitmask codecs for CPU sets
//! - Discovery of kernel-isolated CPUs (sysfs, then `isolcpus=`)
//! - Best-effort CPU pinning and priority elevation, with an optional
//!   capability layer for platforms lacking native calls

mod affinity;
mod capability;
mod isolation;
mod priority;
mod topology;

pub use affinity::{
    AffinityError, AffinityMechanism, AffinityOutcome, apply_affinity, current_affinity,
};
pub use capability::{
    Capabilities, CapabilityFailure, CapabilityLayer, CapabilityOutcome, CrateCapabilities,
};
pub use isolation::{SystemPaths, isolated_cpus, isolated_cpus_in, isolcpus_parameter};
pub use priority::{PriorityError, PriorityOutcome, elevate_priority};
pub use topology::{
    ABSENT_LIST_SENTINEL, CpuMask, CpuSet, MAX_CPU_ID, TopologyError, format_cpu_infos, format_cpu_list,
    format_cpu_mask, format_cpus_as_mask, logical_cpu_count, parse_cpu_list, parse_cpu_mask,
};
