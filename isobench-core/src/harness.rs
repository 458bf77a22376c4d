//! Harness Entry
//!
//! Runs inside the short-lived child spawned by a command worker task:
//!
//! ```text
//! isobench --isobench-process-time <loops> <command>...
//! ```
//!
//! The command runs `loops` times back to back with its standard streams
//! nulled. Only that loop is timed. Stdout is the report channel, so nothing
//! else may be written to it.

use crate::measure::Timer;
use isobench_ipc::{TimingReport, USAGE_EXIT_CODE};
use std::ffi::OsString;
use std::io::Write;
use std::process::{Command, Stdio};
use thiserror::Error;

/// Errors that stop the harness before a report is written
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("{0}\nusage: isobench --isobench-process-time <loops> <command> [args...]")]
    Usage(String),

    #[error("failed to run {program:?}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command failed with exit code {code}")]
    CommandFailed { code: i32 },
}

impl HarnessError {
    /// Process exit status for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            HarnessError::Usage(_) => USAGE_EXIT_CODE,
            HarnessError::Spawn { .. } => 1,
            HarnessError::CommandFailed { code } => *code,
        }
    }
}

/// Parsed harness arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessArgs {
    pub loops: u64,
    pub command: Vec<OsString>,
}

impl HarnessArgs {
    /// Parse `[loops, command...]`
    pub fn parse<I>(args: I) -> Result<Self, HarnessError>
    where
        I: IntoIterator<Item = OsString>,
    {
        let mut args = args.into_iter();
        let loops = args
            .next()
            .ok_or_else(|| HarnessError::Usage("missing loop count".to_string()))?;
        let loops = loops
            .to_str()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|&n| n >= 1)
            .ok_or_else(|| HarnessError::Usage(format!("invalid loop count {loops:?}")))?;

        let command: Vec<OsString> = args.collect();
        if command.is_empty() {
            return Err(HarnessError::Usage("missing command".to_string()));
        }

        Ok(Self { loops, command })
    }
}

/// Run the command `loops` times and measure the whole loop.
pub fn run_loops(args: &HarnessArgs) -> Result<TimingReport, HarnessError> {
    let (program, rest) = args
        .command
        .split_first()
        .ok_or_else(|| HarnessError::Usage("missing command".to_string()))?;

    let timer = Timer::start();
    for _ in 0..args.loops {
        let status = Command::new(program)
            .args(rest)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|source| HarnessError::Spawn {
                program: program.to_string_lossy().into_owned(),
                source,
            })?;
        if !status.success() {
            // Killed by a signal maps to 1
            return Err(HarnessError::CommandFailed {
                code: status.code().unwrap_or(1),
            });
        }
    }
    let elapsed = timer.elapsed_secs();

    let report = TimingReport::new(elapsed);
    Ok(match children_peak_rss() {
        Some(bytes) if bytes > 0 => report.with_peak_memory(bytes),
        _ => report,
    })
}

/// Harness entry point. Returns the process exit status.
pub fn harness_main<I>(args: I) -> i32
where
    I: IntoIterator<Item = OsString>,
{
    let result = HarnessArgs::parse(args).and_then(|args| run_loops(&args));
    match result {
        Ok(report) => {
            let mut stdout = std::io::stdout().lock();
            match write!(stdout, "{report}").and_then(|()| stdout.flush()) {
                Ok(()) => 0,
                Err(e) => {
                    eprintln!("failed to write report: {e}");
                    1
                }
            }
        }
        Err(e) => {
            eprintln!("{e}");
            e.exit_code()
        }
    }
}

/// Peak resident set size of waited-for children, in bytes
#[cfg(unix)]
pub fn children_peak_rss() -> Option<u64> {
    let mut usage = std::mem::MaybeUninit::<libc::rusage>::zeroed();
    let ret = unsafe { libc::getrusage(libc::RUSAGE_CHILDREN, usage.as_mut_ptr()) };
    if ret != 0 {
        return None;
    }
    let max_rss = unsafe { usage.assume_init() }.ru_maxrss;
    let max_rss = u64::try_from(max_rss).ok()?;

    // Linux and the BSDs report KiB, macOS reports bytes
    if cfg!(target_os = "macos") {
        Some(max_rss)
    } else {
        Some(max_rss * 1024)
    }
}

#[cfg(not(unix))]
pub fn children_peak_rss() -> Option<u64> {
    None
}
