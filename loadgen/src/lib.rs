//! Story API Load Generator Library
//!
//! Drives the story generation chat API through full user journeys at a
//! ramping number of virtual users, tracking every terminal failure and
//! per-stage latency.

pub mod api;
pub mod batch;
pub mod clock;
pub mod config;
pub mod data;
pub mod error;
pub mod journey;
pub mod poll;
pub mod report;
pub mod resource;
pub mod runner;
pub mod telemetry;
pub mod tracker;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types
pub use api::{ApiRequest, ApiResponse, HttpTransport, Transport, TransportError};
pub use batch::{BatchPlan, BatchResult, ItemTally, tally};
pub use clock::{Clock, TokioClock};
pub use config::{Config, ConfigError, LoadTier, PollBudget};
pub use error::{GenerationError, JourneyError};
pub use journey::{IterationReport, Journey, WorkerSession};
pub use poll::{GenerationRequest, Generated, Generator, PollOutcome, Target};
pub use report::{ErrorReport, ThresholdVerdict};
pub use resource::{PollMode, ResourceKind, ResourceTable};
pub use runner::{LoadRunner, RunOutcome};
pub use telemetry::{LatencyStats, WorkerLog};
pub use tracker::{ErrorRecord, ErrorTracker, Stage};
