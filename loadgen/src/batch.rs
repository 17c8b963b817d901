//! Parallel batch orchestrator
//!
//! Runs the same kind of generation across several items in rounds. Each round
//! submits sequentially with a fixed spacing, then polls every accepted request
//! together: one pass sleeps the poll interval and queries all still-pending
//! requests concurrently. A pass counts as one attempt for every request in it.

use futures_util::future::join_all;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::api::Transport;
use crate::config::ImageBatchConfig;
use crate::poll::{GenerationRequest, Generator, PollMachine, PollOutcome, Submission, Target};
use crate::resource::{PollMode, ResourceKind};
use crate::telemetry::WorkerLog;
use crate::tracker::{ErrorRecord, Stage};

/// Shape of one batch run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    pub kind: ResourceKind,
    /// Maximum number of items used from the list
    pub concurrent_count: usize,
    /// Number of rounds over the same items
    pub repeat_count: u32,
    /// Spacing between consecutive submits
    pub submit_spacing: Duration,
    /// Pause between rounds, never after the last one
    pub round_pause: Duration,
}

impl BatchPlan {
    pub fn images(config: &ImageBatchConfig) -> Self {
        Self {
            kind: ResourceKind::Image,
            concurrent_count: config.concurrent_images,
            repeat_count: config.repeat_count,
            submit_spacing: config.submit_spacing,
            round_pause: config.round_pause,
        }
    }

    /// Items of a list of `len` that the batch actually uses
    pub fn item_count(&self, len: usize) -> usize {
        self.concurrent_count.min(len)
    }
}

/// One successful item of one round
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    pub item_id: String,
    pub request_id: Option<String>,
    pub round: u32,
    /// Completed payload; `None` in submit-only mode
    pub payload: Option<Value>,
}

/// Outcome counts of one item across all rounds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemTally {
    pub attempted: u32,
    pub succeeded: u32,
    /// Recorded errors: rejected submits, reported failures and timeouts
    pub failed: u32,
}

/// An accepted request still owned by the batch
struct InFlight<'a> {
    target: &'a Target,
    request: GenerationRequest,
    machine: PollMachine,
    submitted: Instant,
}

impl<T: Transport> Generator<T> {
    /// Run `plan` over the first `plan.concurrent_count` items.
    ///
    /// `body` renders the submit body per item and round.
    pub async fn generate_batch<F>(
        &self,
        plan: &BatchPlan,
        items: &[Target],
        token: &str,
        log: &mut WorkerLog,
        mut body: F,
    ) -> Vec<BatchResult>
    where
        F: FnMut(&Target) -> Option<Value>,
    {
        let actual_count = plan.item_count(items.len());
        if actual_count == 0 {
            debug!(kind = %plan.kind, "Nothing to generate in batch");
            return Vec::new();
        }
        let targets = &items[..actual_count];
        let spec = self.table.spec(plan.kind);

        let mut results = Vec::new();
        for round in 1..=plan.repeat_count {
            let mut in_flight = Vec::with_capacity(targets.len());

            for (i, target) in targets.iter().enumerate() {
                let submitted = Instant::now();
                match self
                    .submit(plan.kind, target, body(target), token, round, log)
                    .await
                {
                    Ok(Submission::Completed(request, payload)) => {
                        log.telemetry
                            .record_stage(plan.kind.generation_stage(), submitted.elapsed());
                        results.push(batch_result(target, request, Some(payload)));
                    }
                    Ok(Submission::Accepted(request)) if spec.mode == PollMode::SubmitOnly => {
                        results.push(batch_result(target, request, None));
                    }
                    Ok(Submission::Accepted(request)) => in_flight.push(InFlight {
                        target,
                        request,
                        machine: PollMachine::new(spec.budget.max_attempts),
                        submitted,
                    }),
                    // Already recorded by the submit step
                    Err(_) => {}
                }

                if i + 1 < targets.len() {
                    self.clock.sleep(plan.submit_spacing).await;
                }
            }

            if in_flight.is_empty() && results.iter().all(|r| r.round != round) {
                warn!(kind = %plan.kind, round, "Every submit in the round failed");
            }

            self.poll_round(plan.kind, &mut in_flight, token, log).await;

            for flight in in_flight {
                let attempts = flight.machine.attempts();
                match flight.machine.into_outcome() {
                    PollOutcome::Completed(payload) => {
                        log.telemetry
                            .record_stage(plan.kind.generation_stage(), flight.submitted.elapsed());
                        results.push(batch_result(flight.target, flight.request, Some(payload)));
                    }
                    PollOutcome::Failed(reason) => self.record_unresolved(
                        plan.kind,
                        flight.target,
                        &flight.request,
                        Stage::GenerationFailed(plan.kind),
                        &reason,
                        log,
                    ),
                    PollOutcome::TimedOut | PollOutcome::Pending => self.record_unresolved(
                        plan.kind,
                        flight.target,
                        &flight.request,
                        Stage::Polling(plan.kind),
                        &format!(
                            "{} not completed after {attempts} polling attempts",
                            plan.kind
                        ),
                        log,
                    ),
                }
            }

            let succeeded = results.iter().filter(|r| r.round == round).count();
            info!(
                kind = %plan.kind,
                round,
                succeeded,
                requested = targets.len(),
                "Batch round finished"
            );

            if round < plan.repeat_count {
                self.clock.sleep(plan.round_pause).await;
            }
        }

        results
    }

    /// Poll every in-flight request until all are resolved
    async fn poll_round(
        &self,
        kind: ResourceKind,
        in_flight: &mut [InFlight<'_>],
        token: &str,
        log: &mut WorkerLog,
    ) {
        let spec = self.table.spec(kind);

        while in_flight.iter().any(|f| !f.machine.is_resolved()) {
            self.clock.sleep(spec.budget.interval).await;

            let mut pending: Vec<&mut InFlight<'_>> = in_flight
                .iter_mut()
                .filter(|f| !f.machine.is_resolved())
                .collect();
            let checks = pending
                .iter()
                .map(|f| self.check_status(spec, &f.request, token));
            let observations = join_all(checks).await;

            for (flight, (observation, sample)) in pending.iter_mut().zip(observations) {
                log.telemetry.record_http(sample);
                flight.machine.observe(observation);
            }
        }
    }
}

fn batch_result(
    target: &Target,
    request: GenerationRequest,
    payload: Option<Value>,
) -> BatchResult {
    BatchResult {
        item_id: target.resource_id.clone(),
        request_id: request.request_id,
        round: request.round,
        payload,
    }
}

/// Per-item attempted vs succeeded counts for a finished batch.
///
/// Only the items `plan` used are tallied, each attempted once per round.
/// `errors` must be the records appended while the batch ran, e.g.
/// `log.errors.records_since(mark)`; failures are those of `plan.kind`.
pub fn tally(
    plan: &BatchPlan,
    items: &[Target],
    results: &[BatchResult],
    errors: &[ErrorRecord],
) -> BTreeMap<String, ItemTally> {
    let used = &items[..plan.item_count(items.len())];
    let mut tallies: BTreeMap<String, ItemTally> = used
        .iter()
        .map(|item| {
            let tally = ItemTally {
                attempted: plan.repeat_count,
                ..ItemTally::default()
            };
            (item.resource_id.clone(), tally)
        })
        .collect();

    for result in results {
        if let Some(tally) = tallies.get_mut(&result.item_id) {
            tally.succeeded += 1;
        }
    }
    for record in errors.iter().filter(|r| r.stage.kind() == Some(plan.kind)) {
        if let Some(tally) = tallies.get_mut(&record.resource_id) {
            tally.failed += 1;
        }
    }

    tallies
}
