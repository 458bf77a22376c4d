#![warn(missing_docs)]
//! isobench IPC Protocol
//!
//! Line-oriented text protocol between a command worker task and its harness
//! entry. The harness entry is a separate process, so the only channels are
//! its exit status and its captured standard output/error.
//!
//! Invocation: `[harness-entry..., <loops>, <command>...]`
//!
//! Report: one line of elapsed seconds, optionally followed by one line of
//! peak memory in bytes.

mod report;

pub use report::{ReportError, TimingReport};

/// Exit status used by the harness entry for invalid arguments
pub const USAGE_EXIT_CODE: i32 = 2;
