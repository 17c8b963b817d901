//! Latency and request telemetry
//!
//! Each worker keeps its own samples; the runner merges them at the end of the
//! run. Every sample is also emitted through the `metrics` facade so a
//! Prometheus snapshot can be rendered alongside the report.

use metrics::{counter, histogram};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::tracker::ErrorTracker;

/// Stage name for a whole journey iteration
pub const FULL_FLOW: &str = "full_flow";

/// Latency samples for one stage
#[derive(Debug, Clone, Default)]
pub struct LatencyStats {
    pub samples: Vec<Duration>,
}

impl LatencyStats {
    pub fn new() -> Self {
        Self {
            samples: Vec::new(),
        }
    }

    pub fn record(&mut self, latency: Duration) {
        self.samples.push(latency);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Calculate percentile (0-100)
    pub fn percentile(&self, p: f64) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }

        let mut sorted = self.samples.clone();
        sorted.sort();

        let idx = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }

    pub fn p90(&self) -> Option<Duration> {
        self.percentile(90.0)
    }

    pub fn p95(&self) -> Option<Duration> {
        self.percentile(95.0)
    }

    pub fn p99(&self) -> Option<Duration> {
        self.percentile(99.0)
    }

    pub fn mean(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let total: Duration = self.samples.iter().sum();
        Some(total / self.samples.len() as u32)
    }

    pub fn min(&self) -> Option<Duration> {
        self.samples.iter().min().copied()
    }

    pub fn max(&self) -> Option<Duration> {
        self.samples.iter().max().copied()
    }

    pub fn merge(&mut self, other: LatencyStats) {
        self.samples.extend(other.samples);
    }

    /// Trend summary in milliseconds: avg, min, med, max, p90, p95, p99
    pub fn trend(&self) -> Option<Trend> {
        let ms = |d: Duration| d.as_secs_f64() * 1000.0;
        Some(Trend {
            count: self.samples.len(),
            avg_ms: ms(self.mean()?),
            min_ms: ms(self.min()?),
            med_ms: ms(self.percentile(50.0)?),
            max_ms: ms(self.max()?),
            p90_ms: ms(self.p90()?),
            p95_ms: ms(self.p95()?),
            p99_ms: ms(self.p99()?),
        })
    }
}

/// Summary statistics of a stage, in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trend {
    pub count: usize,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub med_ms: f64,
    pub max_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

/// Outcome of one HTTP exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpSample {
    pub elapsed: Duration,
    /// Status >= 400 or no response at all
    pub failed: bool,
}

/// Per-worker latency telemetry
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    stages: BTreeMap<String, LatencyStats>,
    http_durations: LatencyStats,
    http_total: u64,
    http_failed: u64,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the duration of a completed call under its stage name
    pub fn record_stage(&mut self, stage: &str, duration: Duration) {
        histogram!("storyload_stage_duration_ms", "stage" => stage.to_string())
            .record(duration.as_secs_f64() * 1000.0);
        self.stages
            .entry(stage.to_string())
            .or_default()
            .record(duration);
    }

    pub fn record_http(&mut self, sample: HttpSample) {
        histogram!("storyload_http_req_duration_ms").record(sample.elapsed.as_secs_f64() * 1000.0);
        counter!("storyload_http_reqs_total").increment(1);
        if sample.failed {
            counter!("storyload_http_req_failed_total").increment(1);
        }

        self.http_durations.record(sample.elapsed);
        self.http_total += 1;
        if sample.failed {
            self.http_failed += 1;
        }
    }

    pub fn stage(&self, stage: &str) -> Option<&LatencyStats> {
        self.stages.get(stage)
    }

    pub fn stages(&self) -> impl Iterator<Item = (&str, &LatencyStats)> {
        self.stages.iter().map(|(name, stats)| (name.as_str(), stats))
    }

    pub fn http_durations(&self) -> &LatencyStats {
        &self.http_durations
    }

    pub fn http_total(&self) -> u64 {
        self.http_total
    }

    pub fn http_failed(&self) -> u64 {
        self.http_failed
    }

    /// Fraction of failed HTTP requests (0.0 to 1.0)
    pub fn http_failed_rate(&self) -> f64 {
        if self.http_total > 0 {
            self.http_failed as f64 / self.http_total as f64
        } else {
            0.0
        }
    }

    pub fn merge(&mut self, other: Telemetry) {
        for (stage, stats) in other.stages {
            self.stages.entry(stage).or_default().merge(stats);
        }
        self.http_durations.merge(other.http_durations);
        self.http_total += other.http_total;
        self.http_failed += other.http_failed;
    }
}

/// Everything one worker observed: its error log and its latency samples
#[derive(Debug, Clone, Default)]
pub struct WorkerLog {
    pub errors: ErrorTracker,
    pub telemetry: Telemetry,
    /// Journeys started
    pub iterations: u64,
    /// Journeys that ran to completion
    pub completed: u64,
}

impl WorkerLog {
    pub fn new(worker_id: usize) -> Self {
        Self {
            errors: ErrorTracker::new(worker_id),
            telemetry: Telemetry::new(),
            iterations: 0,
            completed: 0,
        }
    }

    /// Concatenate another worker's log onto this one
    pub fn merge(&mut self, other: WorkerLog) {
        self.errors.merge(other.errors);
        self.telemetry.merge(other.telemetry);
        self.iterations += other.iterations;
        self.completed += other.completed;
    }
}
