//! Timing and formatting helpers
//!
//! All timed regions use the monotonic clock (`std::time::Instant`).
//! Durations cross process boundaries as float seconds, so helpers here work
//! in seconds rather than nanoseconds.

use std::time::{Duration, Instant};

// ─── Timer ───────────────────────────────────────────────────────────────────

/// Timer for measuring a repeated loop
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer
    #[inline(always)]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Elapsed time since start
    #[inline(always)]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Elapsed time since start, in seconds
    #[inline(always)]
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

/// Run `f` `loops` times back to back and return the elapsed seconds.
///
/// Results are passed through `black_box` so the optimizer cannot drop the work.
#[inline]
pub fn time_loops<T, F>(loops: u64, mut f: F) -> f64
where
    F: FnMut() -> T,
{
    let timer = Timer::start();
    for _ in 0..loops {
        std::hint::black_box(f());
    }
    timer.elapsed_secs()
}

// ─── Formatting ──────────────────────────────────────────────────────────────

/// Format seconds with an adaptive unit (`sec`, `ms`, `us`, `ns`).
pub fn format_seconds(secs: f64) -> String {
    const UNITS: [(&str, f64); 4] = [("sec", 1.0), ("ms", 1e3), ("us", 1e6), ("ns", 1e9)];

    let (unit, value) = UNITS
        .iter()
        .map(|&(unit, scale)| (unit, secs * scale))
        .find(|&(_, value)| value >= 1.0)
        .unwrap_or(("ns", secs * 1e9));

    if value >= 100.0 {
        format!("{value:.0} {unit}")
    } else if value >= 10.0 {
        format!("{value:.1} {unit}")
    } else {
        format!("{value:.2} {unit}")
    }
}

/// Format an integer with thousands separators (`1,000,000`).
pub fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Format a loop count with its unit (`1 loop`, `1,000 loops`).
pub fn format_loops(loops: u64) -> String {
    if loops == 1 {
        "1 loop".to_string()
    } else {
        format!("{} loops", format_number(loops))
    }
}
