//! End-of-run reporting
//!
//! Produces the JSON error report, evaluates the pass/fail thresholds and
//! prints the console summary.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::config::Thresholds;
use crate::runner::RunOutcome;
use crate::telemetry::{FULL_FLOW, Telemetry, Trend};
use crate::tracker::{ErrorRecord, StageStatistics, stage_statistics};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to write report: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub run_id: Uuid,
    pub total_errors: usize,
    pub timestamp: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub peak_vus: usize,
    pub iterations: u64,
    pub completed_iterations: u64,
}

/// Contents of `error-report.json`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub summary: ReportSummary,
    pub errors_by_stage: BTreeMap<String, StageStatistics>,
    /// Full error log in merge order
    pub detailed_errors: Vec<ErrorRecord>,
}

impl ErrorReport {
    pub fn build(outcome: &RunOutcome, timestamp: DateTime<Utc>) -> Self {
        let records = outcome.log.errors.records();
        let errors_by_stage = stage_statistics(records)
            .into_iter()
            .map(|(stage, stats)| (stage.to_string(), stats))
            .collect();

        Self {
            summary: ReportSummary {
                run_id: Uuid::new_v4(),
                total_errors: records.len(),
                timestamp,
                started_at: outcome.started_at,
                duration_ms: outcome.duration.as_millis() as u64,
                peak_vus: outcome.peak_vus,
                iterations: outcome.log.iterations,
                completed_iterations: outcome.log.completed,
            },
            errors_by_stage,
            detailed_errors: records.to_vec(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn write(&self, path: &Path) -> Result<(), ReportError> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

/// Result of checking one threshold
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Check<V> {
    /// Observed value; `None` when there were no samples
    pub observed: Option<V>,
    pub limit: V,
    pub ok: bool,
}

/// Threshold evaluation of a run
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdVerdict {
    pub http_req_duration_p95: Check<Duration>,
    pub http_req_failed_rate: Check<f64>,
    pub full_flow_p90: Check<Duration>,
}

impl ThresholdVerdict {
    /// Evaluate thresholds; a metric without samples passes
    pub fn evaluate(thresholds: &Thresholds, telemetry: &Telemetry) -> Self {
        let http_p95 = telemetry.http_durations().p95();
        let failed_rate = (telemetry.http_total() > 0).then(|| telemetry.http_failed_rate());
        let full_flow_p90 = telemetry.stage(FULL_FLOW).and_then(|s| s.p90());

        Self {
            http_req_duration_p95: Check {
                observed: http_p95,
                limit: thresholds.http_req_duration_p95,
                ok: http_p95
                    .map(|p| p < thresholds.http_req_duration_p95)
                    .unwrap_or(true),
            },
            http_req_failed_rate: Check {
                observed: failed_rate,
                limit: thresholds.http_req_failed_rate,
                ok: failed_rate
                    .map(|r| r < thresholds.http_req_failed_rate)
                    .unwrap_or(true),
            },
            full_flow_p90: Check {
                observed: full_flow_p90,
                limit: thresholds.full_flow_p90,
                ok: full_flow_p90
                    .map(|p| p < thresholds.full_flow_p90)
                    .unwrap_or(true),
            },
        }
    }

    pub fn passed(&self) -> bool {
        self.http_req_duration_p95.ok && self.http_req_failed_rate.ok && self.full_flow_p90.ok
    }
}

fn status(ok: bool) -> &'static str {
    if ok { "✅ PASS" } else { "❌ FAIL" }
}

fn format_trend(trend: &Trend) -> String {
    format!(
        "avg={:.0}ms min={:.0}ms med={:.0}ms max={:.0}ms p90={:.0}ms p95={:.0}ms p99={:.0}ms (n={})",
        trend.avg_ms,
        trend.min_ms,
        trend.med_ms,
        trend.max_ms,
        trend.p90_ms,
        trend.p95_ms,
        trend.p99_ms,
        trend.count
    )
}

/// Print the end-of-run summary to stdout
pub fn print_summary(outcome: &RunOutcome, verdict: &ThresholdVerdict, report_path: &Path) {
    let telemetry = &outcome.log.telemetry;

    println!();
    println!("═══════════════════════════════════════════════════════════════");
    println!(" STORY LOAD TEST RESULTS");
    println!("═══════════════════════════════════════════════════════════════");
    println!("   Duration:     {:.1}s", outcome.duration.as_secs_f64());
    println!("   Peak VUs:     {}", outcome.peak_vus);
    println!(
        "   Iterations:   {} ({} completed)",
        outcome.log.iterations, outcome.log.completed
    );
    println!(
        "   HTTP:         {} requests, {} failed ({:.2}%)",
        telemetry.http_total(),
        telemetry.http_failed(),
        telemetry.http_failed_rate() * 100.0
    );

    println!(" ─── Stage Durations ─────────────────────────────────────────");
    if let Some(trend) = telemetry.http_durations().trend() {
        println!("   {:<20} {}", "http_req_duration", format_trend(&trend));
    }
    for (stage, stats) in telemetry.stages() {
        if let Some(trend) = stats.trend() {
            println!("   {:<20} {}", stage, format_trend(&trend));
        }
    }

    println!(" ─── Thresholds ──────────────────────────────────────────────");
    let p95 = &verdict.http_req_duration_p95;
    println!(
        "   http_req_duration p95 < {:?}: {:?} {}",
        p95.limit,
        p95.observed,
        status(p95.ok)
    );
    let rate = &verdict.http_req_failed_rate;
    println!(
        "   http_req_failed rate < {:.2}: {} {}",
        rate.limit,
        rate.observed
            .map(|r| format!("{r:.4}"))
            .unwrap_or_else(|| "n/a".to_string()),
        status(rate.ok)
    );
    let flow = &verdict.full_flow_p90;
    println!(
        "   full_flow_duration p90 < {:?}: {:?} {}",
        flow.limit,
        flow.observed,
        status(flow.ok)
    );

    println!("═══════════════════════════════════════════════════════════════");
    let total_errors = outcome.log.errors.len();
    if total_errors > 0 {
        println!(
            " ⚠️  Total errors: {} (details in {})",
            total_errors,
            report_path.display()
        );
        for (stage, stats) in outcome.log.errors.statistics() {
            println!("   {:<28} {}", stage.to_string(), stats.count);
        }
    } else {
        println!(" ✅ No errors.");
    }
    println!(" OVERALL: {}", status(verdict.passed()));
    println!("═══════════════════════════════════════════════════════════════");
}
