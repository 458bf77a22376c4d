//! Timing Report Lines
//!
//! The harness entry reports back on its standard output:
//!
//! ```text
//! <elapsed seconds, float>\n
//! [<peak memory bytes, integer>\n]
//! ```
//!
//! Anything after the second line is diagnostic noise and ignored.

use std::fmt;
use thiserror::Error;

/// Errors that can occur while reading a timing report
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReportError {
    /// The output was empty
    #[error("no timing line in harness output")]
    MissingElapsed,

    /// The first line is not a finite non-negative float
    #[error("invalid elapsed time {line:?} (expected a non-negative float)")]
    InvalidElapsed {
        /// Offending line
        line: String,
    },

    /// The second line is not a non-negative integer
    #[error("invalid peak memory {line:?} (expected a non-negative integer)")]
    InvalidMemory {
        /// Offending line
        line: String,
    },
}

/// One report written by the harness entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingReport {
    /// Wall-clock seconds for the whole measured loop
    pub elapsed_secs: f64,
    /// Peak resident memory of the measured command, in bytes
    pub peak_memory: Option<u64>,
}

impl TimingReport {
    /// Create a timing-only report
    pub fn new(elapsed_secs: f64) -> Self {
        Self {
            elapsed_secs,
            peak_memory: None,
        }
    }

    /// Attach a peak memory sample
    pub fn with_peak_memory(mut self, bytes: u64) -> Self {
        self.peak_memory = Some(bytes);
        self
    }

    /// Parse the report from captured output.
    pub fn parse(output: &str) -> Result<Self, ReportError> {
        let mut lines = output.lines();

        let first = lines.next().ok_or(ReportError::MissingElapsed)?.trim();
        let elapsed_secs = first
            .parse::<f64>()
            .ok()
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .ok_or_else(|| ReportError::InvalidElapsed {
                line: first.to_string(),
            })?;

        let peak_memory = match lines.next() {
            Some(line) => {
                let line = line.trim();
                Some(line.parse::<u64>().map_err(|_| ReportError::InvalidMemory {
                    line: line.to_string(),
                })?)
            }
            None => None,
        };

        Ok(Self {
            elapsed_secs,
            peak_memory,
        })
    }
}

impl fmt::Display for TimingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.elapsed_secs)?;
        if let Some(bytes) = self.peak_memory {
            writeln!(f, "{bytes}")?;
        }
        Ok(())
    }
}
