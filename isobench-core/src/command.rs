//! Command Worker Task
//!
//! Benchmarks an external command as a black box. The parent never times the
//! command itself: it spawns the harness entry, which runs the command `loops`
//! times inside its own process lifetime and reports the elapsed time of that
//! loop. Process start-up cost of the harness is therefore excluded.

use crate::task::{Measurement, Metadata, TaskError, TaskFunc, WorkerTask};
use isobench_ipc::{ReportError, TimingReport};
use std::ffi::{OsStr, OsString};
use std::process::{Command, Stdio};
use thiserror::Error;

/// Hidden flag that switches the `isobench` binary into harness mode
pub const HARNESS_FLAG: &str = "--isobench-process-time";

/// Metadata key holding the shell-quoted command line
pub const COMMAND_KEY: &str = "command";

/// Metadata key holding the running maximum of harness memory samples
pub const COMMAND_MAX_RSS_KEY: &str = "command_max_rss";

/// Errors from running one command sample
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn {program:?}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{}", execution_message(*code, output))]
    Execution { code: Option<i32>, output: String },

    #[error("malformed harness output ({reason}): {output:?}")]
    MalformedOutput {
        reason: ReportError,
        output: String,
    },
}

fn execution_message(code: Option<i32>, output: &str) -> String {
    let status = match code {
        Some(code) => format!("exit code {code}"),
        None => "a signal".to_string(),
    };
    if output.trim().is_empty() {
        format!("command failed with {status}")
    } else {
        format!("command failed with {status}:\n{}", output.trim_end())
    }
}

// ─── Runner ──────────────────────────────────────────────────────────────────

/// Exit status and combined stdout/stderr of a finished child
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedOutput {
    /// Exit code, `None` when the child was killed by a signal
    pub code: Option<i32>,
    /// Standard output and standard error, interleaved
    pub output: String,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Spawns a child process and waits for it
pub trait CommandRunner {
    fn run(&mut self, argv: &[OsString]) -> Result<CapturedOutput, CommandError>;
}

/// [`CommandRunner`] backed by `std::process`
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&mut self, argv: &[OsString]) -> Result<CapturedOutput, CommandError> {
        let (program, args) = argv.split_first().ok_or_else(|| CommandError::Spawn {
            program: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty argv"),
        })?;
        let spawn_error = |source| CommandError::Spawn {
            program: program.to_string_lossy().into_owned(),
            source,
        };

        tracing::debug!("spawning {:?}", argv);

        let mut command = Command::new(program);
        command.args(args).stdin(Stdio::null());
        let (code, output) = run_captured(command).map_err(spawn_error)?;

        Ok(CapturedOutput {
            code,
            output: String::from_utf8_lossy(&output).into_owned(),
        })
    }
}

/// Run `command` with stdout and stderr sharing one pipe.
#[cfg(unix)]
fn run_captured(mut command: Command) -> std::io::Result<(Option<i32>, Vec<u8>)> {
    use std::fs::File;
    use std::io::Read;
    use std::os::unix::io::FromRawFd;

    let (read_fd, write_fd) = create_pipe()?;
    // Both ends are owned from here on and closed on drop
    let mut reader = unsafe { File::from_raw_fd(read_fd) };
    let writer = unsafe { File::from_raw_fd(write_fd) };

    command
        .stdout(Stdio::from(writer.try_clone()?))
        .stderr(Stdio::from(writer));
    let mut child = command.spawn()?;
    // Release the parent's copies of the write end so EOF arrives on exit
    drop(command);

    let mut output = Vec::new();
    let read = reader.read_to_end(&mut output);
    let status = child.wait()?;
    read?;

    Ok((status.code(), output))
}

#[cfg(not(unix))]
fn run_captured(mut command: Command) -> std::io::Result<(Option<i32>, Vec<u8>)> {
    let out = command.output()?;
    let mut output = out.stdout;
    output.extend_from_slice(&out.stderr);
    Ok((out.status.code(), output))
}

/// Pipe with both ends close-on-exec, set atomically at creation
#[cfg(any(target_os = "linux", target_os = "android"))]
fn create_pipe() -> std::io::Result<(libc::c_int, libc::c_int)> {
    let mut fds = [0 as libc::c_int; 2];
    let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok((fds[0], fds[1]))
}

#[cfg(all(unix, not(any(target_os = "linux", target_os = "android"))))]
fn create_pipe() -> std::io::Result<(libc::c_int, libc::c_int)> {
    let mut fds = [0 as libc::c_int; 2];
    let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    for &fd in &fds {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFD);
            libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
        }
    }
    Ok((fds[0], fds[1]))
}

// ─── Harness entry ───────────────────────────────────────────────────────────

/// Argument prefix that launches the harness entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessEntry {
    argv: Vec<OsString>,
}

impl HarnessEntry {
    /// Use an explicit argument prefix
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
        }
    }

    /// The running executable in harness mode
    pub fn current_exe() -> std::io::Result<Self> {
        let exe = std::env::current_exe()?;
        Ok(Self::new([exe.into_os_string(), OsString::from(HARNESS_FLAG)]))
    }

    pub fn argv(&self) -> &[OsString] {
        &self.argv
    }

    /// Full invocation: `[entry..., loops, command...]`
    pub fn invocation(&self, loops: u64, command: &[OsString]) -> Vec<OsString> {
        let mut argv = Vec::with_capacity(self.argv.len() + 1 + command.len());
        argv.extend(self.argv.iter().cloned());
        argv.push(OsString::from(loops.to_string()));
        argv.extend(command.iter().cloned());
        argv
    }
}

// ─── Command benchmark ───────────────────────────────────────────────────────

/// Measurement function running a command through the harness entry
#[derive(Debug)]
pub struct CommandBench<R = ProcessRunner> {
    entry: HarnessEntry,
    command: Vec<OsString>,
    runner: R,
}

impl CommandBench<ProcessRunner> {
    pub fn new(entry: HarnessEntry, command: Vec<OsString>) -> Self {
        Self::with_runner(entry, command, ProcessRunner)
    }
}

impl<R: CommandRunner> CommandBench<R> {
    /// Use a custom runner
    pub fn with_runner(entry: HarnessEntry, command: Vec<OsString>, runner: R) -> Self {
        Self {
            entry,
            command,
            runner,
        }
    }

    pub fn command(&self) -> &[OsString] {
        &self.command
    }

    /// Run the harness once and decode its report
    pub fn run_once(&mut self, loops: u64) -> Result<TimingReport, CommandError> {
        let argv = self.entry.invocation(loops, &self.command);
        let captured = self.runner.run(&argv)?;

        if !captured.success() {
            return Err(CommandError::Execution {
                code: captured.code,
                output: captured.output,
            });
        }

        TimingReport::parse(&captured.output).map_err(|reason| CommandError::MalformedOutput {
            reason,
            output: captured.output,
        })
    }
}

impl<R: CommandRunner> TaskFunc for CommandBench<R> {
    fn measure(&mut self, loops: u64, metadata: &mut Metadata) -> Result<Measurement, TaskError> {
        let report = self.run_once(loops)?;
        // A zero sample means the platform could not measure memory
        let peak_memory = report.peak_memory.filter(|&bytes| bytes > 0);
        if let Some(bytes) = peak_memory {
            metadata.update_max(COMMAND_MAX_RSS_KEY, bytes);
        }
        Ok(Measurement {
            elapsed_secs: report.elapsed_secs,
            peak_memory,
        })
    }
}

impl<R: CommandRunner> WorkerTask<CommandBench<R>> {
    /// Build a command worker task.
    ///
    /// Records the shell-quoted command line under [`COMMAND_KEY`].
    pub fn command(name: impl Into<String>, bench: CommandBench<R>) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert(COMMAND_KEY, shell_join(bench.command()));
        WorkerTask::new(name, bench, metadata)
    }
}

/// Quote each argument for a POSIX shell and join them with spaces
pub fn shell_join(args: &[OsString]) -> String {
    args.iter()
        .map(|arg| shell_quote(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Quote one argument for a POSIX shell
pub fn shell_quote(arg: &OsStr) -> String {
    let arg = arg.to_string_lossy();
    let safe = |c: char| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c);
    if !arg.is_empty() && arg.chars().all(safe) {
        arg.into_owned()
    } else {
        format!("'{}'", arg.replace('\'', r#"'"'"'"#))
    }
}
