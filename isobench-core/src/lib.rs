//! isobench Core - Worker Runtime
//!
//! This crate provides the measurement side of isobench:
//! - Loop-count calibration against a target time window
//! - `WorkerTask`, one isolated unit of measurement work producing samples
//! - Command benchmarking through a separate harness process
//! - The harness entry itself, run inside that child process

mod calibrate;
mod command;
mod harness;
mod measure;
mod task;

pub use calibrate::{
    CalibrationConfig, CalibrationError, DEFAULT_MAX_POWER, DEFAULT_MAX_TIME, DEFAULT_MIN_TIME,
    calibrate_loops,
};
pub use command::{
    COMMAND_KEY, COMMAND_MAX_RSS_KEY, CapturedOutput, CommandBench, CommandError, CommandRunner,
    HARNESS_FLAG, HarnessEntry, ProcessRunner, shell_join, shell_quote,
};
pub use harness::{HarnessArgs, HarnessError, children_peak_rss, harness_main, run_loops};
pub use measure::{Timer, format_loops, format_number, format_seconds, time_loops};
pub use task::{
    Callable, FnTask, LOOPS_KEY, MEM_MAX_RSS_KEY, Measurement, Metadata, MetadataValue, Metric,
    Sample, TaskError, TaskFunc, TrackingMode, WorkerTask,
};
