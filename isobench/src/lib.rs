#![warn(missing_docs)]
//! # isobench
//!
//! Process-isolated benchmark measurement engine with CPU isolation support.
//!
//! isobench provides the measurement core of a benchmark suite:
//! - **Calibration**: picks a loop count so that one sample lasts long enough
//!   to dwarf timer resolution
//! - **Worker Tasks**: one isolated unit of measurement work producing samples
//!   and accumulating metadata
//! - **Command Benchmarks**: external commands timed inside a separate harness
//!   process, excluding its start-up cost
//! - **CPU Isolation**: discovery of kernel-isolated CPUs, range-list and
//!   bitmask codecs, best-effort pinning and priority elevation
//!
//! ## Quick Start
//!
//! ```ignore
//! use isobench::prelude::*;
//!
//! let mut task = WorkerTask::from_callable("sum", || (0..1000u64).sum::<u64>());
//! task.calibrate_loops(&CalibrationConfig::default(), None)?;
//! let sample = task.compute()?;
//! ```
//!
//! ## Command Benchmarks
//!
//! ```ignore
//! let entry = HarnessEntry::current_exe()?;
//! let bench = CommandBench::new(entry, vec!["sleep".into(), "0.01".into()]);
//! let mut task = WorkerTask::command("sleep", bench);
//! task.calibrate_loops(&CalibrationConfig::default(), None)?;
//! let sample = task.compute()?;
//! ```

// Re-export core types
pub use isobench_core::{
    COMMAND_KEY, COMMAND_MAX_RSS_KEY, CalibrationConfig, CalibrationError, Callable,
    CapturedOutput, CommandBench, CommandError, CommandRunner, FnTask, HARNESS_FLAG,
    HarnessEntry, HarnessError, LOOPS_KEY, MEM_MAX_RSS_KEY, Measurement, Metadata, MetadataValue,
    Metric, ProcessRunner, Sample, TaskError, TaskFunc, TrackingMode, WorkerTask, calibrate_loops,
    harness_main,
};

// Re-export CPU control
pub use isobench_cpu::{
    AffinityError, AffinityOutcome, CapabilityLayer, CpuMask, CpuSet, PriorityError,
    PriorityOutcome, SystemPaths, TopologyError, apply_affinity, current_affinity,
    elevate_priority, format_cpu_list, format_cpu_mask, format_cpus_as_mask, isolated_cpus,
    isolated_cpus_in, parse_cpu_list, parse_cpu_mask,
};

// Re-export the harness protocol
pub use isobench_ipc::{ReportError, TimingReport};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        CalibrationConfig, CommandBench, CpuSet, HarnessEntry, Metric, Sample, TrackingMode,
        WorkerTask,
    };
}

/// Run the isobench CLI.
///
/// Call this from a binary's `main()`; it also serves harness mode:
/// ```ignore
/// fn main() -> anyhow::Result<()> {
///     isobench::run()
/// }
/// ```
pub use isobench_cli::run;
