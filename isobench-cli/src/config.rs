//! Configuration loading from isobench.toml
//!
//! isobench configuration can be specified in an `isobench.toml` file in the project root.
//! The configuration is automatically discovered by walking up from the current directory.

use anyhow::Context;
use isobench_core::{CalibrationConfig, DEFAULT_MAX_POWER, HarnessEntry};
use isobench_cpu::{CpuSet, parse_cpu_list};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the configuration file looked up by [`IsoConfig::discover`]
pub const CONFIG_FILE: &str = "isobench.toml";

/// isobench configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IsoConfig {
    /// Loop-count calibration
    #[serde(default)]
    pub calibration: CalibrationSection,
    /// CPU placement and scheduling
    #[serde(default)]
    pub cpu: CpuSection,
    /// Command benchmarking
    #[serde(default)]
    pub command: CommandSection,
}

/// Calibration window (`[calibration]`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationSection {
    /// A trial at least this long is accepted (e.g., "90ms")
    #[serde(default = "default_min_time")]
    pub min_time: String,
    /// A trial this long or longer steps back one power (e.g., "1s")
    #[serde(default = "default_max_time")]
    pub max_time: String,
    /// Number of powers of ten tried
    #[serde(default = "default_max_power")]
    pub max_power: u32,
}

impl Default for CalibrationSection {
    fn default() -> Self {
        Self {
            min_time: default_min_time(),
            max_time: default_max_time(),
            max_power: default_max_power(),
        }
    }
}

fn default_min_time() -> String {
    "90ms".to_string()
}
fn default_max_time() -> String {
    "1s".to_string()
}
fn default_max_power() -> u32 {
    DEFAULT_MAX_POWER
}

/// CPU placement (`[cpu]`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuSection {
    /// Explicit CPU list (e.g., "2-3"); takes precedence over isolated CPUs
    #[serde(default)]
    pub affinity: Option<String>,
    /// Pin to the kernel's isolated CPUs when no explicit list is given
    #[serde(default = "default_use_isolated")]
    pub use_isolated: bool,
    /// Ask for the highest scheduling priority
    #[serde(default)]
    pub elevate_priority: bool,
}

impl Default for CpuSection {
    fn default() -> Self {
        Self {
            affinity: None,
            use_isolated: default_use_isolated(),
            elevate_priority: false,
        }
    }
}

fn default_use_isolated() -> bool {
    true
}

/// Command benchmarking (`[command]`)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CommandSection {
    /// Report peak memory instead of elapsed time
    #[serde(default)]
    pub track_memory: bool,
    /// Fixed loop count; calibrate when unset
    #[serde(default)]
    pub loops: Option<u64>,
    /// Argument prefix replacing the built-in harness entry
    #[serde(default)]
    pub harness: Option<Vec<String>>,
}

impl IsoConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self =
            toml::from_str(&content).with_context(|| format!("invalid {}", path.display()))?;
        Ok(config)
    }

    /// Try to discover and load configuration by walking up from current directory
    pub fn discover() -> Option<Self> {
        let dir = std::env::current_dir().ok()?;
        let path = Self::find_from(dir)?;
        match Self::load(&path) {
            Ok(config) => {
                tracing::debug!("loaded configuration from {}", path.display());
                Some(config)
            }
            Err(e) => {
                tracing::warn!("ignoring configuration: {:#}", e);
                None
            }
        }
    }

    /// Walk up from `dir` looking for [`CONFIG_FILE`]
    pub fn find_from(mut dir: PathBuf) -> Option<PathBuf> {
        loop {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                return Some(config_path);
            }
            if !dir.pop() {
                return None;
            }
        }
    }

    /// Calibration settings as used by the core
    pub fn calibration_config(&self) -> anyhow::Result<CalibrationConfig> {
        let config = CalibrationConfig {
            min_time: Duration::from_nanos(Self::parse_duration(&self.calibration.min_time)?),
            max_time: Duration::from_nanos(Self::parse_duration(&self.calibration.max_time)?),
            max_power: self.calibration.max_power,
        };
        config.validate()?;
        Ok(config)
    }

    /// Explicit affinity list, if configured
    pub fn affinity(&self) -> anyhow::Result<Option<CpuSet>> {
        match &self.cpu.affinity {
            Some(list) => parse_cpu_list(list)
                .with_context(|| format!("invalid [cpu] affinity {list:?}")),
            None => Ok(None),
        }
    }

    /// Harness entry override, if configured
    pub fn harness_entry(&self) -> Option<HarnessEntry> {
        self.command
            .harness
            .as_ref()
            .filter(|argv| !argv.is_empty())
            .map(|argv| HarnessEntry::new(argv.iter().cloned()))
    }

    /// Generate a default configuration as TOML string
    pub fn default_toml() -> String {
        r#"# isobench Configuration

[calibration]
# A calibration trial at least this long is accepted
min_time = "90ms"
# A trial at least this long steps back one power of ten
max_time = "1s"
# Loop counts tried: 10^0 .. 10^(max_power - 1)
max_power = 10

[cpu]
# Pin to these CPUs (range list, uncomment to enable)
# affinity = "2-3"
# Otherwise pin to the kernel's isolated CPUs when there are any
use_isolated = true
# Ask for the highest scheduling priority
elevate_priority = false

[command]
# Report peak memory (bytes) instead of elapsed seconds
track_memory = false
# Fixed loop count, skipping calibration (uncomment to enable)
# loops = 100
# Custom harness entry argument prefix (uncomment to enable)
# harness = ["isobench", "--isobench-process-time"]
"#
        .to_string()
    }

    /// Parse duration string (e.g., "3s", "500ms", "2m") to nanoseconds
    pub fn parse_duration(s: &str) -> anyhow::Result<u64> {
        let s = s.trim();
        if s.is_empty() {
            return Err(anyhow::anyhow!("Empty duration string"));
        }

        // Find where the number ends and unit begins
        let (num_part, unit_part) = s
            .char_indices()
            .find(|(_, c)| c.is_alphabetic())
            .map(|(i, _)| s.split_at(i))
            .unwrap_or((s, "s"));

        let value: f64 = num_part
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid duration number: {}", num_part))?;
        if !value.is_finite() || value < 0.0 {
            return Err(anyhow::anyhow!("Invalid duration: {}", s));
        }

        let multiplier: u64 = match unit_part.to_lowercase().as_str() {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" | "" => 1_000_000_000,
            "m" | "min" => 60_000_000_000,
            _ => return Err(anyhow::anyhow!("Unknown duration unit: {}", unit_part)),
        };

        Ok((value * multiplier as f64).round() as u64)
    }
}
