//! Scenario driver
//!
//! One `Journey` per virtual user. An iteration walks the full story flow:
//! login, chat, genre, theme, messages, then summary, persona and pages through
//! the generate-and-poll primitive, and finally an image batch over the story's
//! pages. The first failure aborts the iteration; session state carries over.

mod steps;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::api::{Transport, id_field};
use crate::batch::{BatchPlan, tally};
use crate::config::Config;
use crate::error::JourneyError;
use crate::poll::{Generator, Target};
use crate::resource::ResourceKind;
use crate::telemetry::{FULL_FLOW, WorkerLog};

/// Session state kept across iterations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSession {
    /// Bearer token, obtained once and reused
    pub token: Option<String>,
    /// Story in progress; cleared after a completed iteration
    pub story_id: Option<String>,
}

/// Summary of a completed iteration
#[derive(Debug, Clone, PartialEq)]
pub struct IterationReport {
    pub iteration: u64,
    pub story_id: String,
    pub duration: Duration,
    /// Successful image results across all rounds
    pub images: usize,
}

/// One virtual user
pub struct Journey<T> {
    worker_id: usize,
    generator: Arc<Generator<T>>,
    config: Arc<Config>,
    rng: StdRng,
    session: WorkerSession,
    log: WorkerLog,
    iteration: u64,
}

impl<T: Transport> Journey<T> {
    pub fn new(worker_id: usize, generator: Arc<Generator<T>>, config: Arc<Config>) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(worker_id as u64)),
            None => StdRng::from_os_rng(),
        };

        Self {
            worker_id,
            generator,
            config,
            rng,
            session: WorkerSession::default(),
            log: WorkerLog::new(worker_id),
            iteration: 0,
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn session(&self) -> &WorkerSession {
        &self.session
    }

    pub fn log(&self) -> &WorkerLog {
        &self.log
    }

    pub fn into_log(self) -> WorkerLog {
        self.log
    }

    /// Run one iteration of the story flow
    pub async fn run_iteration(&mut self) -> Result<IterationReport, JourneyError> {
        self.iteration += 1;
        self.log.iterations += 1;
        self.log.errors.set_iteration(self.iteration);

        let result = self.walk().await;
        match &result {
            Ok(report) => info!(
                worker = self.worker_id,
                iteration = self.iteration,
                story_id = %report.story_id,
                duration_ms = report.duration.as_millis() as u64,
                images = report.images,
                "Journey completed"
            ),
            Err(JourneyError::Generation(e)) => warn!(
                worker = self.worker_id,
                iteration = self.iteration,
                kind = %e.kind(),
                timed_out = e.is_timeout(),
                "Journey aborted: {}",
                e
            ),
            Err(e) => warn!(
                worker = self.worker_id,
                iteration = self.iteration,
                "Journey aborted: {}",
                e
            ),
        }
        result
    }

    /// Pause to take after an iteration with the given outcome
    pub fn pause_after<R>(&self, result: &Result<R, JourneyError>) -> Duration {
        match result {
            Ok(_) => self.config.journey.iteration_pause,
            Err(_) => self.config.journey.failure_pause,
        }
    }

    async fn walk(&mut self) -> Result<IterationReport, JourneyError> {
        let started = Instant::now();
        let journey = self.config.journey.clone();

        let token = match self.session.token.clone() {
            Some(token) => token,
            None => {
                let token = self.login().await?;
                self.session.token = Some(token.clone());
                self.pause(journey.step_pause).await;
                token
            }
        };

        let story_id = match self.session.story_id.clone() {
            Some(story_id) => story_id,
            None => {
                let story_id = self.start_chat(&token).await?;
                self.session.story_id = Some(story_id.clone());
                self.pause(journey.step_pause).await;
                story_id
            }
        };

        self.set_genre(&token, &story_id).await?;
        self.pause(journey.step_pause).await;
        self.set_theme(&token, &story_id).await?;
        self.pause(journey.step_pause).await;

        for _ in 0..journey.messages_per_journey {
            self.send_message(&token, &story_id).await?;
            let pause = self.message_pause();
            self.pause(pause).await;
        }

        let story = Target::new(story_id.clone());
        for kind in [ResourceKind::Summary, ResourceKind::Persona] {
            let body = self.submit_body(kind);
            self.generator
                .generate_and_await(kind, &story, body, &token, &mut self.log)
                .await?;
        }
        let body = self.submit_body(ResourceKind::Page);
        let pages = self
            .generator
            .generate_and_await(ResourceKind::Page, &story, body, &token, &mut self.log)
            .await?;

        let images = self
            .generate_images(&token, &story_id, pages.payload.as_ref())
            .await;

        let duration = started.elapsed();
        self.log.telemetry.record_stage(FULL_FLOW, duration);
        self.log.completed += 1;
        self.session.story_id = None;

        Ok(IterationReport {
            iteration: self.iteration,
            story_id,
            duration,
            images,
        })
    }

    /// Image batch over the story's pages. Failures are recorded per item and
    /// never abort the iteration.
    async fn generate_images(
        &mut self,
        token: &str,
        story_id: &str,
        pages: Option<&Value>,
    ) -> usize {
        let plan = BatchPlan::images(&self.config.images);
        if plan.concurrent_count == 0 {
            return 0;
        }

        let items: Vec<Target> = page_ids(pages, story_id, plan.concurrent_count)
            .into_iter()
            .map(|page_id| Target::with_parent(page_id, story_id))
            .collect();

        let template = self.generator.table().spec(ResourceKind::Image).body.clone();
        let data = &self.config.data;
        let rng = &mut self.rng;
        let mark = self.log.errors.len();
        let results = self
            .generator
            .generate_batch(&plan, &items, token, &mut self.log, |_| {
                template.render(data.image_style(rng))
            })
            .await;

        let tallies = tally(&plan, &items, &results, self.log.errors.records_since(mark));
        for (page_id, counts) in tallies.iter().filter(|(_, t)| t.succeeded < t.attempted) {
            debug!(
                worker = self.worker_id,
                story_id,
                page_id = %page_id,
                attempted = counts.attempted,
                succeeded = counts.succeeded,
                failed = counts.failed,
                "Page image incomplete"
            );
        }
        results.len()
    }

    fn submit_body(&self, kind: ResourceKind) -> Option<Value> {
        self.generator.table().spec(kind).body.render(None)
    }

    /// Random pause in `[message_pause_min, message_pause_max]`
    fn message_pause(&mut self) -> Duration {
        let min = self.config.journey.message_pause_min.as_millis() as u64;
        let max = self.config.journey.message_pause_max.as_millis() as u64;
        if max <= min {
            return Duration::from_millis(min);
        }
        Duration::from_millis(self.rng.random_range(min..=max))
    }

    async fn pause(&self, duration: Duration) {
        self.generator.clock().sleep(duration).await;
    }
}

/// Page ids from a page payload's `pageContentDtoList`, or `count`
/// placeholders when the payload carries none
pub fn page_ids(pages: Option<&Value>, story_id: &str, count: usize) -> Vec<String> {
    let ids: Vec<String> = pages
        .and_then(|p| p.get("pageContentDtoList"))
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(|page| id_field(page, "pageId")).collect())
        .unwrap_or_default();

    if ids.is_empty() {
        (0..count).map(|i| format!("dummy-{story_id}-{i}")).collect()
    } else {
        ids
    }
}
