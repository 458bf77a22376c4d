//! Loop-count Calibration
//!
//! Picks how many times a workload is repeated inside one timed sample.
//! Loop counts `10^0, 10^1, ...` are tried in turn until a trial lasts at
//! least `min_time`. Too few loops leave the sample dominated by timer
//! resolution; too many waste wall-clock time.
//!
//! If a trial overshoots `max_time` the search steps back one power (never
//! below `10^1`) and returns that count without timing it again.

use crate::measure::{format_loops, format_seconds};
use std::io::Write;
use std::time::Duration;
use thiserror::Error;

/// Default lower bound of the target window: 90% of 100 ms
pub const DEFAULT_MIN_TIME: Duration = Duration::from_millis(90);

/// Default upper bound of the target window
pub const DEFAULT_MAX_TIME: Duration = Duration::from_secs(1);

/// Default number of powers of ten tried (`10^0` to `10^9`)
pub const DEFAULT_MAX_POWER: u32 = 10;

/// Largest power of ten representable as a `u64` loop count, plus one
const POWER_LIMIT: u32 = 20;

/// Errors that abort calibration
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("trial with {loops} loops failed: {source}")]
    Trial {
        loops: u64,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("invalid calibration window: {0}")]
    InvalidWindow(String),
}

/// Target window and search bound for calibration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationConfig {
    /// A trial at least this long is accepted
    pub min_time: Duration,
    /// A trial at least this long triggers the step-back branch
    pub max_time: Duration,
    /// Powers of ten tried: `10^0 .. 10^(max_power - 1)`
    pub max_power: u32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            min_time: DEFAULT_MIN_TIME,
            max_time: DEFAULT_MAX_TIME,
            max_power: DEFAULT_MAX_POWER,
        }
    }
}

impl CalibrationConfig {
    /// Check the window is non-empty and the bound fits in a `u64` loop count.
    pub fn validate(&self) -> Result<(), CalibrationError> {
        if self.min_time >= self.max_time {
            return Err(CalibrationError::InvalidWindow(format!(
                "min_time ({:?}) must be shorter than max_time ({:?})",
                self.min_time, self.max_time
            )));
        }
        if self.max_power == 0 || self.max_power > POWER_LIMIT {
            return Err(CalibrationError::InvalidWindow(format!(
                "max_power must be between 1 and {POWER_LIMIT}, got {}",
                self.max_power
            )));
        }
        Ok(())
    }
}

/// Choose a loop count for `trial`.
///
/// `trial(loops)` runs the workload `loops` times and returns the elapsed
/// seconds. When `stream` is given, one line per trial and one line for the
/// final choice are written to it.
///
/// If no trial reaches `min_time` within `max_power` powers, the last count
/// tried is returned.
pub fn calibrate_loops<F, E>(
    mut trial: F,
    config: &CalibrationConfig,
    mut stream: Option<&mut dyn Write>,
) -> Result<u64, CalibrationError>
where
    F: FnMut(u64) -> Result<f64, E>,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    config.validate()?;

    let min_secs = config.min_time.as_secs_f64();
    let max_secs = config.max_time.as_secs_f64();
    let mut loops = 1;

    for power in 0..config.max_power {
        loops = 10u64.pow(power);
        let secs = trial(loops).map_err(|e| CalibrationError::Trial {
            loops,
            source: e.into(),
        })?;

        tracing::debug!("calibration 10^{}: {} loops took {:.6}s", power, loops, secs);
        if let Some(out) = stream.as_mut() {
            // Diagnostics are best effort
            let _ = writeln!(out, "10^{power} loops: {}", format_seconds(secs));
        }

        if secs >= max_secs {
            // Step back once, unverified
            loops = 10u64.pow(power.saturating_sub(1).max(1));
            break;
        }
        if secs >= min_secs {
            break;
        }
    }

    tracing::debug!("calibration: use {}", format_loops(loops));
    if let Some(out) = stream.as_mut() {
        let _ = writeln!(out, "calibration: use {}", format_loops(loops));
    }

    Ok(loops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    /// Trial whose duration grows linearly with the loop count
    fn linear(secs_per_loop: f64) -> impl FnMut(u64) -> Result<f64, Infallible> {
        move |loops| Ok(loops as f64 * secs_per_loop)
    }

    #[test]
    fn test_linear_workload() {
        // 100 loops = 0.01s (too short), 1000 loops = 0.1s (accepted)
        let loops = calibrate_loops(linear(1e-4), &CalibrationConfig::default(), None).unwrap();
        assert_eq!(loops, 1000);
    }

    #[test]
    fn test_slow_workload_accepts_single_loop() {
        let loops = calibrate_loops(linear(0.5), &CalibrationConfig::default(), None).unwrap();
        assert_eq!(loops, 1);
    }

    #[test]
    fn test_step_back_clamps_to_ten() {
        // The very first trial already overshoots max_time
        let loops = calibrate_loops(linear(5.0), &CalibrationConfig::default(), None).unwrap();
        assert_eq!(loops, 10);
    }

    #[test]
    fn test_step_back_is_not_reverified() {
        // Jumps from far too short at 100 loops straight past max_time at 1000;
        // 100 is returned even though it never reached min_time.
        let trial = |loops: u64| -> Result<f64, Infallible> {
            Ok(if loops >= 1000 { 2.0 } else { 0.001 })
        };
        let loops = calibrate_loops(trial, &CalibrationConfig::default(), None).unwrap();
        assert_eq!(loops, 100);
    }

    #[test]
    fn test_trials_are_ascending_powers() {
        let mut tried = Vec::new();
        let trial = |loops: u64| -> Result<f64, Infallible> {
            tried.push(loops);
            Ok(loops as f64 * 1e-4)
        };
        calibrate_loops(trial, &CalibrationConfig::default(), None).unwrap();
        assert_eq!(tried, vec![1, 10, 100, 1000]);
    }

    #[test]
    fn test_exhausted_search_returns_last_count() {
        let config = CalibrationConfig {
            max_power: 3,
            ..Default::default()
        };
        let loops = calibrate_loops(linear(1e-9), &config, None).unwrap();
        assert_eq!(loops, 100);
    }

    #[test]
    fn test_trial_failure_aborts() {
        let trial = |loops: u64| -> Result<f64, std::io::Error> {
            if loops == 10 {
                Err(std::io::Error::other("workload crashed"))
            } else {
                Ok(1e-6)
            }
        };
        let err = calibrate_loops(trial, &CalibrationConfig::default(), None).unwrap_err();
        match err {
            CalibrationError::Trial { loops, source } => {
                assert_eq!(loops, 10);
                assert_eq!(source.to_string(), "workload crashed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_diagnostics_written_to_stream() {
        let mut out = Vec::new();
        let loops = calibrate_loops(
            linear(1e-4),
            &CalibrationConfig::default(),
            Some(&mut out as &mut dyn Write),
        )
        .unwrap();
        assert_eq!(loops, 1000);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "10^0 loops: 100 us",
                "10^1 loops: 1.00 ms",
                "10^2 loops: 10.0 ms",
                "10^3 loops: 100 ms",
                "calibration: use 1,000 loops",
            ]
        );
    }

    #[test]
    fn test_invalid_window() {
        let config = CalibrationConfig {
            min_time: Duration::from_secs(2),
            max_time: Duration::from_secs(1),
            max_power: 10,
        };
        assert!(matches!(
            calibrate_loops(linear(1.0), &config, None),
            Err(CalibrationError::InvalidWindow(_))
        ));

        let config = CalibrationConfig {
            max_power: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
