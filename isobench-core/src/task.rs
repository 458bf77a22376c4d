//! Worker Tasks
//!
//! A worker task is one unit of measurement work: a name, a metadata map
//! that accumulates facts across samples, and a measurement function run at
//! a fixed loop count. Each call to [`WorkerTask::compute`] produces exactly
//! one [`Sample`].
//!
//! Tasks run either in timing mode (the sample is elapsed seconds) or in
//! memory-tracking mode (the sample is peak memory in bytes). In memory mode a
//! measurement that yields no memory figure is an error, never a zero.

use crate::calibrate::{CalibrationConfig, CalibrationError, calibrate_loops};
use crate::command::CommandError;
use crate::measure::time_loops;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use thiserror::Error;

/// Metadata key holding the loop count of each sample
pub const LOOPS_KEY: &str = "loops";

/// Metadata key holding the running maximum of memory samples
pub const MEM_MAX_RSS_KEY: &str = "mem_max_rss";

/// Errors raised while computing a sample
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("task {task:?} requested memory tracking but no memory sample was produced")]
    MissingMetric { task: String },

    #[error("workload failed: {0}")]
    Workload(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl TaskError {
    /// Wrap an arbitrary workload failure
    pub fn workload<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        TaskError::Workload(error.into())
    }
}

/// A metadata value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Int(u64),
    Float(f64),
    Text(String),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Int(v) => write!(f, "{v}"),
            MetadataValue::Float(v) => write!(f, "{v}"),
            MetadataValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<u64> for MetadataValue {
    fn from(v: u64) -> Self {
        MetadataValue::Int(v)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::Text(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::Text(v.to_string())
    }
}

/// Ordered metadata map attached to a task
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Metadata {
    entries: BTreeMap<String, MetadataValue>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key`, replacing any previous value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.entries.get(key)
    }

    /// Integer value of `key`, if it holds one
    pub fn get_int(&self, key: &str) -> Option<u64> {
        match self.entries.get(key) {
            Some(MetadataValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<MetadataValue> {
        self.entries.remove(key)
    }

    /// Keep the larger of the stored integer and `value`.
    ///
    /// The stored value never decreases. A non-integer value under `key` is
    /// replaced.
    pub fn update_max(&mut self, key: &str, value: u64) -> u64 {
        let max = self.get_int(key).map_or(value, |current| current.max(value));
        self.entries.insert(key.to_string(), MetadataValue::Int(max));
        max
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetadataValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Raw result of one run of a measurement function
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    /// Wall-clock seconds for all loops
    pub elapsed_secs: f64,
    /// Peak memory in bytes, when the workload could sample it
    pub peak_memory: Option<u64>,
}

impl Measurement {
    pub fn timing(elapsed_secs: f64) -> Self {
        Self {
            elapsed_secs,
            peak_memory: None,
        }
    }
}

/// What a task reports as its sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrackingMode {
    /// Elapsed seconds
    #[default]
    Timing,
    /// Peak memory in bytes
    Memory,
}

/// The single scalar metric of a sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Total elapsed seconds for all loops
    Seconds(f64),
    /// Peak memory in bytes
    Bytes(u64),
}

/// One computed sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    pub metric: Metric,
    /// Loop count the workload ran at
    pub loops: u64,
}

impl Sample {
    /// Seconds per loop for timing samples; `None` for memory samples
    pub fn per_loop(&self) -> Option<f64> {
        match self.metric {
            Metric::Seconds(secs) if self.loops > 0 => Some(secs / self.loops as f64),
            _ => None,
        }
    }
}

/// A measurement function run at a given loop count
pub trait TaskFunc {
    /// Run the workload `loops` times and report what was observed.
    ///
    /// Implementations may record facts in `metadata`; cumulative facts must
    /// accumulate (e.g. via [`Metadata::update_max`]) rather than overwrite.
    fn measure(&mut self, loops: u64, metadata: &mut Metadata) -> Result<Measurement, TaskError>;
}

/// Adapts a closure into a [`TaskFunc`]
pub struct FnTask<F>(pub F);

impl<F> TaskFunc for FnTask<F>
where
    F: FnMut(u64, &mut Metadata) -> Result<Measurement, TaskError>,
{
    fn measure(&mut self, loops: u64, metadata: &mut Metadata) -> Result<Measurement, TaskError> {
        (self.0)(loops, metadata)
    }
}

/// An isolated unit of measurement work
pub struct WorkerTask<F> {
    name: String,
    metadata: Metadata,
    func: F,
    loops: u64,
    mode: TrackingMode,
    value: Option<Sample>,
}

impl<F: TaskFunc> WorkerTask<F> {
    /// Create a task running `func` once per sample
    pub fn new(name: impl Into<String>, func: F, metadata: Metadata) -> Self {
        let mut task = Self {
            name: name.into(),
            metadata,
            func,
            loops: 1,
            mode: TrackingMode::Timing,
            value: None,
        };
        task.set_loops(1);
        task
    }

    /// Set the loop count used by subsequent samples
    pub fn set_loops(&mut self, loops: u64) {
        self.loops = loops.max(1);
        self.metadata.insert(LOOPS_KEY, self.loops);
    }

    /// Builder form of [`set_loops`](Self::set_loops)
    pub fn with_loops(mut self, loops: u64) -> Self {
        self.set_loops(loops);
        self
    }

    pub fn set_mode(&mut self, mode: TrackingMode) {
        self.mode = mode;
    }

    /// Builder form of [`set_mode`](Self::set_mode)
    pub fn with_mode(mut self, mode: TrackingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn loops(&self) -> u64 {
        self.loops
    }

    pub fn mode(&self) -> TrackingMode {
        self.mode
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// The most recent sample
    pub fn value(&self) -> Option<Sample> {
        self.value
    }

    /// Run the measurement function once and record its result.
    ///
    /// Safe to call repeatedly, one call per sample.
    pub fn compute(&mut self) -> Result<Sample, TaskError> {
        let measurement = self.func.measure(self.loops, &mut self.metadata)?;

        match self.mode {
            TrackingMode::Timing => {
                let sample = Sample {
                    metric: Metric::Seconds(measurement.elapsed_secs),
                    loops: self.loops,
                };
                self.value = Some(sample);
                Ok(sample)
            }
            TrackingMode::Memory => match measurement.peak_memory {
                Some(bytes) => Ok(self.set_memory_value(bytes)),
                None => Err(TaskError::MissingMetric {
                    task: self.name.clone(),
                }),
            },
        }
    }

    /// Record a memory metric as this task's sample.
    ///
    /// Also keeps [`MEM_MAX_RSS_KEY`] at the largest value seen.
    pub fn set_memory_value(&mut self, bytes: u64) -> Sample {
        self.metadata.update_max(MEM_MAX_RSS_KEY, bytes);
        let sample = Sample {
            metric: Metric::Bytes(bytes),
            loops: self.loops,
        };
        self.value = Some(sample);
        sample
    }

    /// Calibrate the loop count against this task's own measurement function
    /// and adopt it.
    ///
    /// Trials run against scratch metadata, so the task's metadata and last
    /// value are left untouched apart from the new loop count.
    pub fn calibrate_loops(
        &mut self,
        config: &CalibrationConfig,
        stream: Option<&mut dyn Write>,
    ) -> Result<u64, CalibrationError> {
        let func = &mut self.func;
        let loops = calibrate_loops(
            |loops| {
                let mut scratch = Metadata::new();
                func.measure(loops, &mut scratch)
                    .map(|measurement| measurement.elapsed_secs)
            },
            config,
            stream,
        )?;
        self.set_loops(loops);
        Ok(loops)
    }
}

impl<W> WorkerTask<FnTask<W>>
where
    W: FnMut(u64, &mut Metadata) -> Result<Measurement, TaskError>,
{
    /// Build a task from a measurement closure
    pub fn from_fn(name: impl Into<String>, func: W) -> Self {
        WorkerTask::new(name, FnTask(func), Metadata::new())
    }
}

/// In-process workload timed as a plain Rust closure
pub struct Callable<W>(W);

impl<W, T> TaskFunc for Callable<W>
where
    W: FnMut() -> T,
{
    fn measure(&mut self, loops: u64, _metadata: &mut Metadata) -> Result<Measurement, TaskError> {
        Ok(Measurement::timing(time_loops(loops, &mut self.0)))
    }
}

impl<W> WorkerTask<Callable<W>> {
    /// Build an in-process task timing `workload` repeated `loops` times.
    ///
    /// The workload's return value is passed through `black_box`.
    pub fn from_callable<T>(name: impl Into<String>, workload: W) -> Self
    where
        W: FnMut() -> T,
    {
        WorkerTask::new(name, Callable(workload), Metadata::new())
    }
}

impl<F> fmt::Debug for WorkerTask<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerTask")
            .field("name", &self.name)
            .field("loops", &self.loops)
            .field("mode", &self.mode)
            .field("metadata", &self.metadata)
            .field("value", &self.value)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Measurement function replaying a fixed script of results
    fn scripted(
        script: Vec<Measurement>,
    ) -> impl FnMut(u64, &mut Metadata) -> Result<Measurement, TaskError> {
        let mut script = script.into_iter();
        move |_loops, _metadata| {
            script
                .next()
                .ok_or_else(|| TaskError::workload("script exhausted"))
        }
    }

    #[test]
    fn test_timing_sample() {
        let mut task = WorkerTask::from_fn("t", scripted(vec![Measurement::timing(0.5)]))
            .with_loops(10);
        let sample = task.compute().unwrap();
        assert_eq!(sample.metric, Metric::Seconds(0.5));
        assert_eq!(sample.loops, 10);
        assert_eq!(sample.per_loop(), Some(0.05));
        assert_eq!(task.value(), Some(sample));
        assert_eq!(task.metadata().get_int(LOOPS_KEY), Some(10));
    }

    #[test]
    fn test_memory_mode_uses_memory_sample() {
        let script = vec![
            Measurement {
                elapsed_secs: 0.1,
                peak_memory: Some(4096),
            },
            Measurement {
                elapsed_secs: 0.1,
                peak_memory: Some(2048),
            },
        ];
        let mut task = WorkerTask::from_fn("m", scripted(script)).with_mode(TrackingMode::Memory);

        assert_eq!(task.compute().unwrap().metric, Metric::Bytes(4096));
        assert_eq!(task.compute().unwrap().metric, Metric::Bytes(2048));
        // Running maximum never decreases
        assert_eq!(task.metadata().get_int(MEM_MAX_RSS_KEY), Some(4096));
    }

    #[test]
    fn test_memory_mode_missing_metric() {
        let mut task = WorkerTask::from_fn("m", scripted(vec![Measurement::timing(0.1)]))
            .with_mode(TrackingMode::Memory);
        let err = task.compute().unwrap_err();
        assert!(matches!(err, TaskError::MissingMetric { ref task } if task == "m"));
        assert_eq!(task.value(), None);
    }

    #[test]
    fn test_workload_failure_propagates() {
        let mut task = WorkerTask::from_fn("empty", scripted(Vec::new()));
        assert!(matches!(task.compute(), Err(TaskError::Workload(_))));
    }

    #[test]
    fn test_update_max() {
        let mut metadata = Metadata::new();
        assert_eq!(metadata.update_max("rss", 10), 10);
        assert_eq!(metadata.update_max("rss", 5), 10);
        assert_eq!(metadata.update_max("rss", 20), 20);

        metadata.insert("name", "text");
        assert_eq!(metadata.update_max("name", 3), 3);
    }

    #[test]
    fn test_metadata_serializes_as_map() {
        let mut metadata = Metadata::new();
        metadata.insert("command", "sleep 1");
        metadata.insert("loops", 100u64);
        let json = serde_json::to_string(&metadata).unwrap();
        assert_eq!(json, r#"{"command":"sleep 1","loops":100}"#);
    }

    #[test]
    fn test_calibrate_then_compute() {
        let mut task = WorkerTask::from_fn("linear", |loops, metadata: &mut Metadata| {
            metadata.update_max("touched", 1);
            Ok(Measurement::timing(loops as f64 * 1e-4))
        });

        let loops = task
            .calibrate_loops(&CalibrationConfig::default(), None)
            .unwrap();
        assert_eq!(loops, 1000);
        assert_eq!(task.loops(), 1000);
        // Calibration trials do not leak into the task's metadata
        assert_eq!(task.metadata().get("touched"), None);

        let sample = task.compute().unwrap();
        assert_eq!(sample.loops, 1000);
        assert_eq!(task.metadata().get_int("touched"), Some(1));
    }

    #[test]
    fn test_callable_task() {
        let mut calls = 0u64;
        let sample = {
            let mut task = WorkerTask::from_callable("count", || {
                calls += 1;
            })
            .with_loops(50);
            task.compute().unwrap()
        };
        assert_eq!(calls, 50);
        assert!(matches!(sample.metric, Metric::Seconds(secs) if secs >= 0.0));
    }
}
