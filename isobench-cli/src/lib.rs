#![warn(missing_docs)]
//! isobench CLI Library
//!
//! Command-line front end for the isobench measurement engine. The same
//! binary doubles as the harness entry of command worker tasks: when invoked
//! with the hidden `--isobench-process-time` flag it times a command instead
//! of parsing the regular command line.
//!
//! # Example
//!
//! ```ignore
//! fn main() -> anyhow::Result<()> {
//!     isobench_cli::run()
//! }
//! ```

mod config;
mod startup;

pub use config::*;
pub use startup::*;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use isobench_core::{
    CommandBench, HARNESS_FLAG, HarnessEntry, Metadata, Metric, Sample, TrackingMode,
    WorkerTask, format_loops, format_number, format_seconds, harness_main, shell_join,
};
use isobench_cpu::{
    CapabilityLayer, CpuSet, SystemPaths, current_affinity, format_cpus_as_mask,
    isolated_cpus_in, logical_cpu_count, parse_cpu_list,
};
use serde::Serialize;
use std::ffi::OsString;
use std::io::Write;

/// Default number of samples computed by `isobench command`
pub const DEFAULT_SAMPLES: usize = 3;

/// isobench CLI arguments
#[derive(Parser, Debug)]
#[command(name = "isobench")]
#[command(author, version, about = "isobench - process-isolated command benchmarking")]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Benchmark an external command
    Command(CommandArgs),
    /// Show CPU count, isolated CPUs and current affinity
    Cpus,
    /// Print a default isobench.toml
    Init,
}

/// Arguments of `isobench command`
#[derive(Args, Debug, Clone)]
pub struct CommandArgs {
    /// Fixed loop count (skips calibration)
    #[arg(long)]
    pub loops: Option<u64>,

    /// Number of samples to compute
    #[arg(long, short = 'n', default_value_t = DEFAULT_SAMPLES)]
    pub samples: usize,

    /// Report peak memory instead of elapsed time
    #[arg(long)]
    pub track_memory: bool,

    /// Emit JSON with metadata instead of one line per sample
    #[arg(long)]
    pub json: bool,

    /// Pin to these CPUs (range list, e.g. "2-3")
    #[arg(long, value_parser = parse_affinity)]
    pub affinity: Option<CpuSet>,

    /// Raise scheduling priority before measuring
    #[arg(long)]
    pub elevate_priority: bool,

    /// Task name (defaults to the command line)
    #[arg(long)]
    pub name: Option<String>,

    /// Command and arguments to benchmark
    #[arg(last = true, required = true)]
    pub command: Vec<OsString>,
}

fn parse_affinity(s: &str) -> Result<CpuSet, String> {
    match parse_cpu_list(s) {
        Ok(Some(cpus)) if !cpus.is_empty() => Ok(cpus),
        Ok(_) => Err("empty CPU list".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

/// Run the isobench CLI with the process arguments.
///
/// Harness mode is detected before clap sees the arguments, so the measured
/// command's own flags pass through untouched. In harness mode this function
/// does not return.
pub fn run() -> anyhow::Result<()> {
    let args: Vec<OsString> = std::env::args_os().collect();
    if let Some(harness_args) = harness_mode_args(&args) {
        std::process::exit(harness_main(harness_args.iter().cloned()));
    }

    let cli = Cli::parse_from(args);
    run_with_cli(cli)
}

/// Arguments after the harness flag, when `args` requests harness mode
pub fn harness_mode_args(args: &[OsString]) -> Option<&[OsString]> {
    match args {
        [_, flag, rest @ ..] if flag == HARNESS_FLAG => Some(rest),
        _ => None,
    }
}

/// Run the isobench CLI with pre-parsed arguments.
pub fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    init_logging(cli.verbose);

    // Discover isobench.toml configuration (CLI flags override)
    let config = IsoConfig::discover().unwrap_or_default();

    match cli.command {
        Commands::Command(ref args) => {
            let stdout = std::io::stdout();
            run_command(args, &config, &mut stdout.lock())
        }
        Commands::Cpus => print_cpus(&SystemPaths::default(), &mut std::io::stdout().lock()),
        Commands::Init => {
            print!("{}", IsoConfig::default_toml());
            Ok(())
        }
    }
}

/// Install the stderr logger; stdout is reserved for results.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        "isobench=debug"
    } else {
        "isobench=info"
    };
    // A second install (e.g. repeated calls in one process) keeps the first
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Result of `isobench command`, as emitted with `--json`
#[derive(Debug, Serialize)]
pub struct CommandReport {
    /// Task name
    pub name: String,
    /// Loop count used by every sample
    pub loops: u64,
    /// Task metadata after the last sample
    pub metadata: Metadata,
    /// One entry per computed sample
    pub samples: Vec<Sample>,
}

/// Benchmark a command: set up the process, calibrate, then sample.
pub fn run_command(
    args: &CommandArgs,
    config: &IsoConfig,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    let settings = CpuSettings {
        affinity: match &args.affinity {
            Some(cpus) => Some(cpus.clone()),
            None => config.affinity()?,
        },
        use_isolated: config.cpu.use_isolated,
        elevate_priority: args.elevate_priority || config.cpu.elevate_priority,
    };
    configure_process(&settings, &SystemPaths::default(), &CapabilityLayer::detect())?;

    let entry = match config.harness_entry() {
        Some(entry) => entry,
        None => HarnessEntry::current_exe().context("cannot locate the isobench executable")?,
    };
    let report = measure_command(args, config, entry)?;

    if args.json {
        serde_json::to_writer_pretty(&mut *out, &report)?;
        writeln!(out)?;
    } else {
        for sample in &report.samples {
            writeln!(out, "{}", format_sample(sample))?;
        }
    }
    Ok(())
}

/// Build the command task and compute `args.samples` samples.
pub fn measure_command(
    args: &CommandArgs,
    config: &IsoConfig,
    entry: HarnessEntry,
) -> anyhow::Result<CommandReport> {
    anyhow::ensure!(!args.command.is_empty(), "no command given");
    anyhow::ensure!(args.samples >= 1, "--samples must be at least 1");

    let name = args
        .name
        .clone()
        .unwrap_or_else(|| shell_join(&args.command));
    let bench = CommandBench::new(entry, args.command.clone());
    let mode = if args.track_memory || config.command.track_memory {
        TrackingMode::Memory
    } else {
        TrackingMode::Timing
    };
    let mut task = WorkerTask::command(name, bench).with_mode(mode);

    let metadata = task.metadata_mut();
    metadata.insert("date", chrono::Local::now().to_rfc3339());
    if let Some(count) = logical_cpu_count() {
        metadata.insert("cpu_count", count as u64);
    }
    if let Some(cpus) = current_affinity() {
        metadata.insert("cpu_affinity", cpus.to_string());
    }

    match args.loops.or(config.command.loops) {
        Some(loops) => task.set_loops(loops),
        None => {
            let calibration = config.calibration_config()?;
            let mut stderr = std::io::stderr();
            task.calibrate_loops(&calibration, Some(&mut stderr as &mut dyn Write))
                .context("calibration failed")?;
        }
    }
    tracing::info!("{}: {}", task.name(), format_loops(task.loops()));

    let pb = ProgressBar::new(args.samples as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb.set_message(task.name().to_string());

    let mut samples = Vec::with_capacity(args.samples);
    for _ in 0..args.samples {
        let sample = match task.compute() {
            Ok(sample) => sample,
            Err(e) => {
                pb.abandon();
                return Err(e).with_context(|| format!("benchmark {:?} failed", task.name()));
            }
        };
        samples.push(sample);
        pb.inc(1);
    }
    pb.finish_and_clear();

    Ok(CommandReport {
        name: task.name().to_string(),
        loops: task.loops(),
        metadata: task.metadata().clone(),
        samples,
    })
}

/// One human-readable line per sample
pub fn format_sample(sample: &Sample) -> String {
    match sample.metric {
        Metric::Seconds(secs) => match sample.per_loop() {
            Some(per_loop) => format!(
                "{} per loop ({} in {})",
                format_seconds(per_loop),
                format_seconds(secs),
                format_loops(sample.loops)
            ),
            None => format_seconds(secs),
        },
        Metric::Bytes(bytes) => format!("{} bytes", format_number(bytes)),
    }
}

/// Print CPU facts for `isobench cpus`
pub fn print_cpus(paths: &SystemPaths, out: &mut dyn Write) -> anyhow::Result<()> {
    match logical_cpu_count() {
        Some(count) => writeln!(out, "Logical CPUs: {count}")?,
        None => writeln!(out, "Logical CPUs: unknown")?,
    }
    match isolated_cpus_in(paths) {
        Some(cpus) => writeln!(out, "Isolated CPUs: {} ({})", cpus, cpus.len())?,
        None => writeln!(out, "Isolated CPUs: undetermined")?,
    }
    match current_affinity() {
        Some(cpus) => writeln!(
            out,
            "Affinity: {} (mask {})",
            cpus,
            format_cpus_as_mask(&cpus)
        )?,
        None => writeln!(out, "Affinity: unknown")?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os(items: &[&str]) -> Vec<OsString> {
        items.iter().map(OsString::from).collect()
    }

    #[test]
    fn test_harness_mode_detection() {
        let args = os(&["isobench", HARNESS_FLAG, "5", "ls", "--help"]);
        assert_eq!(harness_mode_args(&args), Some(&args[2..]));

        assert_eq!(harness_mode_args(&os(&["isobench", "cpus"])), None);
        assert_eq!(harness_mode_args(&os(&["isobench"])), None);
    }

    #[test]
    fn test_parse_command_subcommand() {
        let cli = Cli::parse_from([
            "isobench",
            "command",
            "--loops",
            "10",
            "--samples",
            "5",
            "--affinity",
            "0-1",
            "--",
            "sleep",
            "--weird-flag",
        ]);
        let Commands::Command(args) = cli.command else {
            panic!("expected command subcommand");
        };
        assert_eq!(args.loops, Some(10));
        assert_eq!(args.samples, 5);
        assert_eq!(args.affinity, Some(CpuSet::from([0, 1])));
        assert_eq!(args.command, os(&["sleep", "--weird-flag"]));
        assert!(!args.json);
    }

    #[test]
    fn test_command_requires_argv() {
        assert!(Cli::try_parse_from(["isobench", "command"]).is_err());
        assert!(Cli::try_parse_from(["isobench", "command", "--affinity", "", "--", "x"]).is_err());
    }

    #[test]
    fn test_format_sample() {
        let sample = Sample {
            metric: Metric::Seconds(0.5),
            loops: 1000,
        };
        assert_eq!(
            format_sample(&sample),
            "500 us per loop (500 ms in 1,000 loops)"
        );

        let sample = Sample {
            metric: Metric::Bytes(4_194_304),
            loops: 1,
        };
        assert_eq!(format_sample(&sample), "4,194,304 bytes");
    }

    #[test]
    fn test_print_cpus_undetermined() {
        let root = tempfile::tempdir().unwrap();
        let mut out = Vec::new();
        print_cpus(&SystemPaths::with_root(root.path()), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Isolated CPUs: undetermined"));
        assert!(text.starts_with("Logical CPUs: "));
    }

    #[test]
    fn test_print_cpus_isolated() {
        let root = tempfile::tempdir().unwrap();
        let paths = SystemPaths::with_root(root.path());
        let file = paths.isolated_cpus_file();
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, "2-3\n").unwrap();

        let mut out = Vec::new();
        print_cpus(&paths, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Isolated CPUs: 2-3 (2)"));
    }

    #[cfg(unix)]
    #[test]
    fn test_measure_command_with_stand_in_harness() {
        // `sh -c <script> sh <loops> <command...>` stands in for the harness entry
        let entry = HarnessEntry::new(["sh", "-c", "printf '0.25\\n2048\\n'", "sh"]);
        let args = CommandArgs {
            loops: Some(4),
            samples: 2,
            track_memory: false,
            json: true,
            affinity: None,
            elevate_priority: false,
            name: Some("stub".to_string()),
            command: os(&["true"]),
        };
        let report = measure_command(&args, &IsoConfig::default(), entry).unwrap();
        assert_eq!(report.name, "stub");
        assert_eq!(report.loops, 4);
        assert_eq!(report.samples.len(), 2);
        assert_eq!(report.samples[0].metric, Metric::Seconds(0.25));
        assert_eq!(report.metadata.get_int("command_max_rss"), Some(2048));
        assert!(report.metadata.get("date").is_some());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["metadata"]["command"], "true");
        assert_eq!(json["samples"][1]["loops"], 4);
    }
}
