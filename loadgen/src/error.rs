//! Error types for generation calls and journeys

use thiserror::Error;

use crate::api::TransportError;
use crate::resource::ResourceKind;
use crate::tracker::JourneyStep;

fn display_status(status: &Option<u16>) -> String {
    status.map_or_else(|| "none".to_string(), |s| s.to_string())
}

/// Terminal outcome of a failed generate call.
///
/// Each value corresponds to exactly one recorded error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("{kind} generate request rejected (status: {})", display_status(.status))]
    SubmitRejected {
        kind: ResourceKind,
        status: Option<u16>,
    },

    #[error("{kind} generation failed: {reason}")]
    TerminalFailure { kind: ResourceKind, reason: String },

    #[error("{kind} polling timed out after {attempts} attempts")]
    PollTimeout { kind: ResourceKind, attempts: u32 },
}

impl GenerationError {
    pub fn kind(&self) -> ResourceKind {
        match self {
            GenerationError::SubmitRejected { kind, .. }
            | GenerationError::TerminalFailure { kind, .. }
            | GenerationError::PollTimeout { kind, .. } => *kind,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, GenerationError::PollTimeout { .. })
    }
}

/// Reasons a journey iteration was aborted
#[derive(Debug, Error)]
pub enum JourneyError {
    #[error("{step} rejected (status: {status})")]
    StepRejected { step: JourneyStep, status: u16 },

    #[error("{step} response is missing {field}")]
    MissingField {
        step: JourneyStep,
        field: &'static str,
    },

    #[error("{step} request failed: {source}")]
    Transport {
        step: JourneyStep,
        #[source]
        source: TransportError,
    },

    #[error("No test users configured")]
    NoUsers,

    #[error(transparent)]
    Generation(#[from] GenerationError),
}
