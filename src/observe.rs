//! Observation ports: the timer and counter contracts the core emits into.
//!
//! The host supplies implementations wired to its metrics pipeline; when it
//! passes nothing, the registry substitutes the null implementations.
//! Observation is best-effort and never affects correctness or error paths.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Records elapsed time under a set of string labels.
///
/// Remote layers bracket every backend call with `start`/`done`, labeling
/// with `(layer_name, operation, outcome)`.
pub trait Timer: Send + Sync {
    /// Capture the start instant of an operation.
    fn start(&self) -> Instant {
        Instant::now()
    }

    /// Record the elapsed time since `started` under `labels`.
    fn done(&self, started: Instant, labels: &[&str]);
}

/// Increments a labeled counter.
///
/// The coordinator counts hits per layer, full misses, and data hotness.
pub trait Counter: Send + Sync {
    fn inc(&self, labels: &[&str]);
}

/// Timer that discards every observation.
#[derive(Debug, Default)]
pub struct NullTimer;

impl NullTimer {
    pub fn new() -> Self {
        Self
    }
}

impl Timer for NullTimer {
    fn done(&self, _started: Instant, _labels: &[&str]) {}
}

/// Counter that discards every observation.
#[derive(Debug, Default)]
pub struct NullCounter;

impl NullCounter {
    pub fn new() -> Self {
        Self
    }
}

impl Counter for NullCounter {
    fn inc(&self, _labels: &[&str]) {}
}

/// In-process counter that remembers every increment.
///
/// Suitable for tests and for small hosts without a metrics pipeline.
#[derive(Debug, Default)]
pub struct RecordingCounter {
    events: Mutex<Vec<Vec<String>>>,
}

impl RecordingCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of increments recorded under exactly `labels`.
    pub fn count_of(&self, labels: &[&str]) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.iter().map(String::as_str).eq(labels.iter().copied()))
            .count()
    }

    /// Total number of increments recorded.
    pub fn total(&self) -> usize {
        self.events.lock().len()
    }

    /// Snapshot of every recorded label set, in order.
    pub fn events(&self) -> Vec<Vec<String>> {
        self.events.lock().clone()
    }
}

impl Counter for RecordingCounter {
    fn inc(&self, labels: &[&str]) {
        self.events
            .lock()
            .push(labels.iter().map(|label| label.to_string()).collect());
    }
}

/// In-process timer that remembers every observation.
#[derive(Debug, Default)]
pub struct RecordingTimer {
    observations: Mutex<Vec<(Duration, Vec<String>)>>,
}

impl RecordingTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of observations recorded under exactly `labels`.
    pub fn count_of(&self, labels: &[&str]) -> usize {
        self.observations
            .lock()
            .iter()
            .filter(|(_, event)| event.iter().map(String::as_str).eq(labels.iter().copied()))
            .count()
    }

    /// Total number of observations recorded.
    pub fn total(&self) -> usize {
        self.observations.lock().len()
    }
}

impl Timer for RecordingTimer {
    fn done(&self, started: Instant, labels: &[&str]) {
        self.observations.lock().push((
            started.elapsed(),
            labels.iter().map(|label| label.to_string()).collect(),
        ));
    }
}
