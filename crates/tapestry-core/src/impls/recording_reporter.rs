//! RecordingReporter - イベントをメモリに記録する SynthesisReporter

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;

use crate::domain::ObjectKey;
use crate::ports::SynthesisReporter;

/// Point-in-time copy of what a [`RecordingReporter`] has seen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReporterSnapshot {
    pub syntheses_started: u64,
    pub worker_timeouts: u64,
    pub latencies_ms: Vec<u64>,
}

#[derive(Debug, Default)]
pub struct RecordingReporter {
    syntheses_started: AtomicU64,
    worker_timeouts: AtomicU64,
    latencies: Mutex<Vec<Duration>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn syntheses_started(&self) -> u64 {
        self.syntheses_started.load(Ordering::Relaxed)
    }

    pub fn worker_timeouts(&self) -> u64 {
        self.worker_timeouts.load(Ordering::Relaxed)
    }

    pub fn latencies(&self) -> Vec<Duration> {
        self.latencies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn snapshot(&self) -> ReporterSnapshot {
        ReporterSnapshot {
            syntheses_started: self.syntheses_started(),
            worker_timeouts: self.worker_timeouts(),
            latencies_ms: self
                .latencies()
                .iter()
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
                .collect(),
        }
    }
}

impl SynthesisReporter for RecordingReporter {
    fn synthesis_started(&self, _composition: &ObjectKey) {
        self.syntheses_started.fetch_add(1, Ordering::Relaxed);
    }

    fn worker_timed_out(&self, _composition: &ObjectKey) {
        self.worker_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    fn synthesis_latency(&self, _composition: &ObjectKey, latency: Duration) {
        self.latencies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(latency);
    }
}
