//! CPU Isolation Discovery
//!
//! Finds the set of CPUs the kernel keeps away from general scheduling.
//!
//! Two sources are consulted in order:
//! 1. `/sys/devices/system/cpu/isolated` (Linux 4.2+)
//! 2. the `isolcpus=` parameter of `/proc/cmdline` (older kernels)
//!
//! When neither yields a list the answer is *undetermined* (`None`), which
//! callers must not read as "no CPU is isolated".

use crate::topology::{CpuSet, parse_cpu_list};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Roots of the kernel introspection filesystems.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemPaths {
    /// Mount point of sysfs (normally `/sys`)
    pub sysfs: PathBuf,
    /// Mount point of procfs (normally `/proc`)
    pub procfs: PathBuf,
}

impl Default for SystemPaths {
    fn default() -> Self {
        Self {
            sysfs: PathBuf::from("/sys"),
            procfs: PathBuf::from("/proc"),
        }
    }
}

impl SystemPaths {
    /// Paths rooted under `root` (`<root>/sys`, `<root>/proc`)
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            sysfs: root.join("sys"),
            procfs: root.join("proc"),
        }
    }

    /// The sysfs file listing isolated CPUs
    pub fn isolated_cpus_file(&self) -> PathBuf {
        self.sysfs.join("devices/system/cpu/isolated")
    }

    /// The kernel boot command line
    pub fn cmdline_file(&self) -> PathBuf {
        self.procfs.join("cmdline")
    }
}

/// Isolated CPUs of the running system, or `None` if undetermined.
pub fn isolated_cpus() -> Option<CpuSet> {
    isolated_cpus_in(&SystemPaths::default())
}

/// Isolated CPUs as seen through the given introspection roots.
pub fn isolated_cpus_in(paths: &SystemPaths) -> Option<CpuSet> {
    let sysfs_file = paths.isolated_cpus_file();
    if let Some(line) = read_first_line(&sysfs_file) {
        if let Some(cpus) = decode_or_warn(&line, &sysfs_file) {
            tracing::debug!("Isolated CPUs from {}: {}", sysfs_file.display(), cpus);
            return Some(cpus);
        }
    }

    let cmdline_file = paths.cmdline_file();
    if let Some(cmdline) = read_first_line(&cmdline_file) {
        if let Some(value) = isolcpus_parameter(&cmdline) {
            let cpus = decode_or_warn(&value, &cmdline_file)?;
            tracing::debug!("Isolated CPUs from isolcpus={}: {}", value, cpus);
            return Some(cpus);
        }
    }

    tracing::debug!("Isolated CPUs undetermined");
    None
}

/// Extract the CPU list of the `isolcpus=` boot parameter.
///
/// Kernel flags that may precede the list (`isolcpus=nohz,domain,2-3`) are
/// dropped so only the CPU list remains.
pub fn isolcpus_parameter(cmdline: &str) -> Option<String> {
    static ISOLCPUS: OnceLock<Regex> = OnceLock::new();
    let re = ISOLCPUS.get_or_init(|| Regex::new(r"\bisolcpus=([^ ]+)").expect("valid regex"));

    let value = re.captures(cmdline)?.get(1)?.as_str();
    let list: Vec<&str> = value
        .split(',')
        .skip_while(|token| token.starts_with(|c: char| c.is_ascii_alphabetic()))
        .collect();
    Some(list.join(","))
}

fn decode_or_warn(text: &str, source: &Path) -> Option<CpuSet> {
    match parse_cpu_list(text) {
        Ok(cpus) => cpus,
        Err(e) => {
            tracing::warn!("Ignoring malformed CPU list in {}: {}", source.display(), e);
            None
        }
    }
}

/// First line of a file, or `None` if it cannot be read or is blank.
fn read_first_line(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let line = content.lines().next()?.trim().to_string();
    if line.is_empty() { None } else { Some(line) }
}
