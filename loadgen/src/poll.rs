//! Generate-and-poll primitive
//!
//! A generate call is two-phase: one submit request, then bounded polling of a
//! status endpoint. Polling is an explicit state machine
//! (`Pending -> Completed | Failed | TimedOut`) advanced by classified status
//! observations, with every wait going through the injected `Clock`.
//!
//! Outcomes and error records:
//!
//! | Outcome             | Returned                           | Recorded stage              |
//! |---------------------|------------------------------------|-----------------------------|
//! | submit not accepted | `SubmitRejected`                   | `<kind>_generate`           |
//! | status says failed  | `TerminalFailure`                  | `<kind>_generation_failed`  |
//! | budget exhausted    | `PollTimeout`                      | `<kind>_polling`            |
//! | completed           | `Generated` with payload           | nothing                     |
//!
//! Malformed or non-OK status responses are transient: they use up an attempt
//! and are logged, but are never recorded as errors on their own.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::api::{ApiRequest, Transport, exchange, id_field, timed_send};
use crate::clock::Clock;
use crate::error::GenerationError;
use crate::resource::{PollMode, ResourceKind, ResourceSpec, ResourceTable};
use crate::telemetry::{HttpSample, WorkerLog};
use crate::tracker::{ErrorEvent, Stage};

/// Resource a generate call targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Story id or page id
    pub resource_id: String,
    /// Owning story of a page-level target
    pub parent_id: Option<String>,
}

impl Target {
    pub fn new(resource_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            parent_id: None,
        }
    }

    pub fn with_parent(resource_id: impl Into<String>, parent_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            parent_id: Some(parent_id.into()),
        }
    }
}

/// An accepted submission, owned by whoever submitted it until it resolves
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub resource_id: String,
    /// Server-assigned tracking id, when the submit response carried one
    pub request_id: Option<String>,
    pub submitted_at: DateTime<Utc>,
    /// 1-based round number
    pub round: u32,
}

impl GenerationRequest {
    /// Id used to query the status endpoint
    pub fn tracking_id(&self) -> &str {
        self.request_id.as_deref().unwrap_or(&self.resource_id)
    }
}

/// Result of the submit step
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// Accepted; the job is running server-side
    Accepted(GenerationRequest),
    /// Accepted, and the response already carries the finished result
    Completed(GenerationRequest, Value),
}

/// Successful generate call
#[derive(Debug, Clone, PartialEq)]
pub struct Generated {
    pub request: GenerationRequest,
    /// Completed payload; `None` in submit-only mode
    pub payload: Option<Value>,
    /// Status queries made
    pub attempts: u32,
}

/// Classification of one status response
#[derive(Debug, Clone, PartialEq)]
pub enum PollObservation {
    Pending,
    Completed(Value),
    Failed(String),
    /// Malformed body, non-OK status or no response
    Transient(String),
}

/// State of a polled request
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Pending,
    Completed(Value),
    Failed(String),
    TimedOut,
}

/// Bounded polling state machine
#[derive(Debug, Clone)]
pub struct PollMachine {
    max_attempts: u32,
    attempts: u32,
    outcome: PollOutcome,
}

impl PollMachine {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            attempts: 0,
            outcome: PollOutcome::Pending,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn outcome(&self) -> &PollOutcome {
        &self.outcome
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self.outcome, PollOutcome::Pending)
    }

    /// Feed one observation. Resolved machines ignore further input.
    pub fn observe(&mut self, observation: PollObservation) -> &PollOutcome {
        if self.is_resolved() {
            return &self.outcome;
        }

        self.attempts += 1;
        self.outcome = match observation {
            PollObservation::Completed(payload) => PollOutcome::Completed(payload),
            PollObservation::Failed(reason) => PollOutcome::Failed(reason),
            PollObservation::Pending | PollObservation::Transient(_)
                if self.attempts >= self.max_attempts =>
            {
                PollOutcome::TimedOut
            }
            PollObservation::Pending | PollObservation::Transient(_) => PollOutcome::Pending,
        };
        &self.outcome
    }

    pub fn into_outcome(self) -> PollOutcome {
        self.outcome
    }
}

/// Classify a status response against the kind's rules
pub fn classify(spec: &ResourceSpec, status: u16, body: &str) -> PollObservation {
    if !(200..300).contains(&status) {
        return PollObservation::Transient(format!("status endpoint returned {status}"));
    }

    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) => return PollObservation::Transient(format!("malformed status body: {e}")),
    };

    if let Some(reason) = spec.failure.failure_reason(&value) {
        PollObservation::Failed(reason)
    } else if spec.completion.is_satisfied(&value) {
        PollObservation::Completed(value)
    } else {
        PollObservation::Pending
    }
}

/// Issues generate calls for one worker
pub struct Generator<T> {
    pub(crate) transport: T,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) table: Arc<ResourceTable>,
}

impl<T: Transport> Generator<T> {
    pub fn new(transport: T, clock: Arc<dyn Clock>, table: Arc<ResourceTable>) -> Self {
        Self {
            transport,
            clock,
            table,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn table(&self) -> &ResourceTable {
        &self.table
    }

    /// Submit a job for `target` and wait for its result
    pub async fn generate_and_await(
        &self,
        kind: ResourceKind,
        target: &Target,
        body: Option<Value>,
        token: &str,
        log: &mut WorkerLog,
    ) -> Result<Generated, GenerationError> {
        let started = Instant::now();
        let spec = self.table.spec(kind);

        let generated = match self.submit(kind, target, body, token, 1, log).await? {
            Submission::Completed(request, payload) => Generated {
                request,
                payload: Some(payload),
                attempts: 0,
            },
            Submission::Accepted(request) if spec.mode == PollMode::SubmitOnly => Generated {
                request,
                payload: None,
                attempts: 0,
            },
            Submission::Accepted(request) => {
                self.await_completion(kind, target, request, token, log)
                    .await?
            }
        };

        log.telemetry
            .record_stage(kind.generation_stage(), started.elapsed());
        info!(
            kind = %kind,
            resource_id = %target.resource_id,
            attempts = generated.attempts,
            "Generation finished"
        );
        Ok(generated)
    }

    /// Send the single submit request. A rejection is recorded once and never retried.
    pub async fn submit(
        &self,
        kind: ResourceKind,
        target: &Target,
        body: Option<Value>,
        token: &str,
        round: u32,
        log: &mut WorkerLog,
    ) -> Result<Submission, GenerationError> {
        let spec = self.table.spec(kind);
        let request = ApiRequest::post(spec.submit_path(&target.resource_id), body).bearer(token);

        let response = match exchange(&self.transport, request, &mut log.telemetry).await {
            Ok(resp) if spec.is_accepted(resp.status) => resp,
            Ok(resp) => {
                return Err(self.reject(
                    kind,
                    target,
                    Some(resp.status),
                    format!("{kind} generate request rejected (status: {})", resp.status),
                    log,
                ));
            }
            Err(e) => {
                return Err(self.reject(
                    kind,
                    target,
                    None,
                    format!("{kind} generate request failed: {e}"),
                    log,
                ));
            }
        };

        // Bodies are optional on 202; anything unparsable simply has no tracking id
        let value = response.json().ok();
        let request_id = value.as_ref().and_then(|v| id_field(v, "requestId"));

        let request = GenerationRequest {
            resource_id: target.resource_id.clone(),
            request_id,
            submitted_at: self.clock.now(),
            round,
        };
        debug!(
            kind = %kind,
            resource_id = %request.resource_id,
            request_id = request.request_id.as_deref(),
            round,
            "Generate request accepted"
        );

        match value {
            Some(value) if spec.completion.is_satisfied(&value) => {
                Ok(Submission::Completed(request, value))
            }
            _ => Ok(Submission::Accepted(request)),
        }
    }

    fn reject(
        &self,
        kind: ResourceKind,
        target: &Target,
        status: Option<u16>,
        message: String,
        log: &mut WorkerLog,
    ) -> GenerationError {
        log.errors.track(
            ErrorEvent::new(Stage::Generate(kind), target.resource_id.clone(), message)
                .with_parent(target.parent_id.clone())
                .with_status(status),
            self.clock.now(),
        );
        GenerationError::SubmitRejected { kind, status }
    }

    /// Poll an accepted request until it resolves or the kind's budget runs out
    pub async fn await_completion(
        &self,
        kind: ResourceKind,
        target: &Target,
        request: GenerationRequest,
        token: &str,
        log: &mut WorkerLog,
    ) -> Result<Generated, GenerationError> {
        let spec = self.table.spec(kind);
        let mut machine = PollMachine::new(spec.budget.max_attempts);

        while !machine.is_resolved() {
            self.clock.sleep(spec.budget.interval).await;
            let (observation, sample) = self.check_status(spec, &request, token).await;
            log.telemetry.record_http(sample);
            if let PollObservation::Transient(reason) = &observation {
                debug!(
                    kind = %kind,
                    tracking_id = request.tracking_id(),
                    attempt = machine.attempts() + 1,
                    "Transient status fault: {}",
                    reason
                );
            }
            machine.observe(observation);
        }

        let attempts = machine.attempts();
        match machine.into_outcome() {
            PollOutcome::Completed(payload) => Ok(Generated {
                request,
                payload: Some(payload),
                attempts,
            }),
            PollOutcome::Failed(reason) => {
                let stage = Stage::GenerationFailed(kind);
                self.record_unresolved(kind, target, &request, stage, &reason, log);
                Err(GenerationError::TerminalFailure { kind, reason })
            }
            PollOutcome::TimedOut | PollOutcome::Pending => {
                let message = format!("{kind} not completed after {attempts} polling attempts");
                let stage = Stage::Polling(kind);
                self.record_unresolved(kind, target, &request, stage, &message, log);
                Err(GenerationError::PollTimeout { kind, attempts })
            }
        }
    }

    /// Query the status endpoint once
    pub(crate) async fn check_status(
        &self,
        spec: &ResourceSpec,
        request: &GenerationRequest,
        token: &str,
    ) -> (PollObservation, HttpSample) {
        let api_request = ApiRequest::get(spec.status_path(request.tracking_id())).bearer(token);
        let (result, sample) = timed_send(&self.transport, api_request).await;
        let observation = match result {
            Ok(resp) => classify(spec, resp.status, &resp.body),
            Err(e) => PollObservation::Transient(e.to_string()),
        };
        (observation, sample)
    }

    pub(crate) fn record_unresolved(
        &self,
        kind: ResourceKind,
        target: &Target,
        request: &GenerationRequest,
        stage: Stage,
        message: &str,
        log: &mut WorkerLog,
    ) {
        debug_assert_eq!(stage.kind(), Some(kind));
        log.errors.track(
            ErrorEvent::new(stage, target.resource_id.clone(), message)
                .with_parent(target.parent_id.clone())
                .with_request(request.request_id.clone()),
            self.clock.now(),
        );
    }
}
