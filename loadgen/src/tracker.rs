//! Append-only error log for one worker
//!
//! Each terminal failure is recorded exactly once. Per-stage statistics are
//! never maintained incrementally; `stage_statistics` recomputes them from the
//! records, so logs from several workers can simply be concatenated.

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::error;

use crate::resource::ResourceKind;

/// Synchronous journey steps that can fail on their own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JourneyStep {
    Login,
    ChatStart,
    GenreSet,
    ThemeSet,
    MessageSend,
}

impl JourneyStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            JourneyStep::Login => "login",
            JourneyStep::ChatStart => "chat_start",
            JourneyStep::GenreSet => "genre_set",
            JourneyStep::ThemeSet => "theme_set",
            JourneyStep::MessageSend => "message_send",
        }
    }
}

impl fmt::Display for JourneyStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase of the journey an error is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Step(JourneyStep),
    /// The submit call was not accepted
    Generate(ResourceKind),
    /// The status endpoint reported the job as failed
    GenerationFailed(ResourceKind),
    /// The polling budget ran out
    Polling(ResourceKind),
}

impl Stage {
    pub fn kind(&self) -> Option<ResourceKind> {
        match self {
            Stage::Step(_) => None,
            Stage::Generate(kind) | Stage::GenerationFailed(kind) | Stage::Polling(kind) => {
                Some(*kind)
            }
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Step(step) => write!(f, "{step}"),
            Stage::Generate(kind) => write!(f, "{kind}_generate"),
            Stage::GenerationFailed(kind) => write!(f, "{kind}_generation_failed"),
            Stage::Polling(kind) => write!(f, "{kind}_polling"),
        }
    }
}

impl Serialize for Stage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Details of a failure, before it is stamped by the tracker
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub stage: Stage,
    pub resource_id: String,
    pub parent_id: Option<String>,
    pub request_id: Option<String>,
    pub status_code: Option<u16>,
    pub message: String,
}

impl ErrorEvent {
    pub fn new(stage: Stage, resource_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage,
            resource_id: resource_id.into(),
            parent_id: None,
            request_id: None,
            status_code: None,
            message: message.into(),
        }
    }

    pub fn with_parent(mut self, parent_id: Option<String>) -> Self {
        self.parent_id = parent_id;
        self
    }

    pub fn with_request(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_status(mut self, status_code: Option<u16>) -> Self {
        self.status_code = status_code;
        self
    }
}

/// One recorded failure
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub worker_id: usize,
    pub iteration: u64,
    pub stage: Stage,
    pub resource_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub message: String,
}

/// Per-stage aggregate derived from the error log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageStatistics {
    pub count: usize,
    /// Distinct target resource ids
    pub resource_ids: BTreeSet<String>,
    /// Distinct owning ids, e.g. the story of a failed page image
    pub parent_ids: BTreeSet<String>,
    /// Status code histogram
    pub status_codes: BTreeMap<u16, usize>,
}

/// Aggregate the error log by stage
pub fn stage_statistics(records: &[ErrorRecord]) -> BTreeMap<Stage, StageStatistics> {
    let mut stats: BTreeMap<Stage, StageStatistics> = BTreeMap::new();

    for record in records {
        let entry = stats.entry(record.stage).or_default();
        entry.count += 1;
        if !record.resource_id.is_empty() {
            entry.resource_ids.insert(record.resource_id.clone());
        }
        if let Some(parent) = &record.parent_id {
            entry.parent_ids.insert(parent.clone());
        }
        if let Some(code) = record.status_code {
            *entry.status_codes.entry(code).or_insert(0) += 1;
        }
    }

    stats
}

/// Error log owned by a single worker
#[derive(Debug, Clone, Default)]
pub struct ErrorTracker {
    worker_id: usize,
    iteration: u64,
    records: Vec<ErrorRecord>,
}

impl ErrorTracker {
    pub fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            iteration: 0,
            records: Vec::new(),
        }
    }

    /// Iteration index stamped on subsequent records
    pub fn set_iteration(&mut self, iteration: u64) {
        self.iteration = iteration;
    }

    /// Append one failure
    pub fn track(&mut self, event: ErrorEvent, timestamp: DateTime<Utc>) {
        counter!("storyload_errors_total", "stage" => event.stage.to_string()).increment(1);
        error!(
            worker = self.worker_id,
            iteration = self.iteration,
            stage = %event.stage,
            resource_id = %event.resource_id,
            parent_id = event.parent_id.as_deref(),
            request_id = event.request_id.as_deref(),
            status = event.status_code,
            "[ERROR TRACKED] {}",
            event.message
        );

        self.records.push(ErrorRecord {
            timestamp,
            worker_id: self.worker_id,
            iteration: self.iteration,
            stage: event.stage,
            resource_id: event.resource_id,
            parent_id: event.parent_id,
            request_id: event.request_id,
            status_code: event.status_code,
            message: event.message,
        });
    }

    pub fn records(&self) -> &[ErrorRecord] {
        &self.records
    }

    /// Records appended after the log held `mark` records
    pub fn records_since(&self, mark: usize) -> &[ErrorRecord] {
        self.records.get(mark..).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn statistics(&self) -> BTreeMap<Stage, StageStatistics> {
        stage_statistics(&self.records)
    }

    /// Append another worker's records after this log's records
    pub fn merge(&mut self, other: ErrorTracker) {
        self.records.extend(other.records);
    }
}
