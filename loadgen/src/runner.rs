//! Ramping virtual-user runner
//!
//! The scheduler re-evaluates the load profile every tick and publishes the
//! target VU count on a watch channel. Workers are spawned as the target rises
//! and park between iterations while their id is at or above the target. At
//! the end of the profile the target drops to zero, in-flight iterations run
//! to completion, and every worker's log is merged into one.

use chrono::{DateTime, Utc};
use metrics::gauge;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::api::Transport;
use crate::clock::Clock;
use crate::config::Config;
use crate::journey::Journey;
use crate::poll::Generator;
use crate::telemetry::WorkerLog;

/// Result of a finished run
#[derive(Debug)]
pub struct RunOutcome {
    /// All worker logs, concatenated in worker order
    pub log: WorkerLog,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    /// Workers spawned over the run
    pub peak_vus: usize,
}

pub struct LoadRunner<T> {
    generator: Arc<Generator<T>>,
    config: Arc<Config>,
}

impl<T: Transport + 'static> LoadRunner<T> {
    pub fn new(generator: Arc<Generator<T>>, config: Arc<Config>) -> Self {
        Self { generator, config }
    }

    /// Drive the configured load profile to completion
    pub async fn run(&self) -> RunOutcome {
        let profile = &self.config.load;
        let total = profile.total_duration();
        info!(
            peak_vus = profile.peak_vus(),
            duration_secs = total.as_secs_f64(),
            stages = profile.stages.len(),
            "Starting load test"
        );

        let clock = self.generator.clock();
        let started_at = clock.now();
        let (target_tx, target_rx) = watch::channel(0usize);
        let mut handles: Vec<JoinHandle<WorkerLog>> = Vec::new();

        loop {
            let elapsed = elapsed_since(clock.as_ref(), started_at);
            if elapsed >= total {
                break;
            }

            let target = profile.target_at(elapsed);
            target_tx.send_if_modified(|current| {
                let changed = *current != target;
                *current = target;
                changed
            });
            gauge!("storyload_vus").set(target as f64);

            while handles.len() < target {
                let worker_id = handles.len();
                debug!(worker = worker_id, "Spawning worker");
                let journey = Journey::new(worker_id, self.generator.clone(), self.config.clone());
                handles.push(tokio::spawn(run_worker(
                    journey,
                    target_rx.clone(),
                    clock.clone(),
                )));
            }

            let tick = profile.tick.min(total - elapsed);
            clock.sleep(tick).await;
        }

        target_tx.send_replace(0);
        drop(target_tx);
        gauge!("storyload_vus").set(0.0);

        let peak_vus = handles.len();
        info!(workers = peak_vus, "Load profile finished, waiting for workers");

        let mut log = WorkerLog::new(0);
        for handle in handles {
            match handle.await {
                Ok(worker_log) => log.merge(worker_log),
                Err(e) => error!("Worker task failed: {}", e),
            }
        }

        RunOutcome {
            log,
            started_at,
            duration: elapsed_since(clock.as_ref(), started_at),
            peak_vus,
        }
    }
}

/// Time on `clock` since `start`
fn elapsed_since(clock: &dyn Clock, start: DateTime<Utc>) -> Duration {
    (clock.now() - start).to_std().unwrap_or_default()
}

async fn run_worker<T: Transport>(
    mut journey: Journey<T>,
    mut target: watch::Receiver<usize>,
    clock: Arc<dyn Clock>,
) -> WorkerLog {
    let id = journey.worker_id();

    // Park until this worker is within the target, stop once the scheduler is gone
    while wait_target(&mut target, |t| *t > id).await {
        let result = journey.run_iteration().await;
        let pause = journey.pause_after(&result);

        tokio::select! {
            _ = clock.sleep(pause) => {}
            _ = wait_target(&mut target, |t| *t <= id) => {}
        }
        tokio::task::yield_now().await;
    }

    debug!(worker = id, "Worker stopped");
    journey.into_log()
}

/// Wait until the target satisfies `ready`; false once the channel is closed
/// without satisfying it
async fn wait_target(
    target: &mut watch::Receiver<usize>,
    ready: impl FnMut(&usize) -> bool,
) -> bool {
    target.wait_for(ready).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::config::{LoadProfile, PollBudget, RampStage};
    use crate::resource::ResourceTable;
    use crate::test_utils::{ManualClock, ScriptedTransport, reply, reply_with_token};
    use crate::tracker::{JourneyStep, Stage};

    fn fast_config() -> Config {
        let mut config = Config {
            seed: Some(3),
            ..Config::default()
        };
        let budget = PollBudget::new(3, 5, 15);
        config.polling.summary = budget;
        config.polling.persona = budget;
        config.polling.page = budget;
        config.polling.image = budget;
        config.images.concurrent_images = 1;
        config.images.repeat_count = 1;
        config.images.submit_spacing = Duration::ZERO;
        config.images.round_pause = Duration::ZERO;
        config.journey.messages_per_journey = 1;
        config.journey.step_pause = Duration::from_millis(2);
        config.journey.message_pause_min = Duration::from_millis(1);
        config.journey.message_pause_max = Duration::from_millis(3);
        config.journey.iteration_pause = Duration::from_millis(20);
        config.journey.failure_pause = Duration::from_millis(20);
        config.load = LoadProfile {
            stages: vec![
                RampStage::new(Duration::from_millis(100), 2),
                RampStage::new(Duration::from_millis(300), 2),
            ],
            tick: Duration::from_millis(20),
        };
        config
    }

    fn story_api() -> ScriptedTransport {
        ScriptedTransport::new()
            .on_post("/api/v1/auth/normal/login", reply_with_token(200, "tok"))
            .on_post("/api/v1/chats", reply(200, r#"{"storyId":1}"#))
            .on_post("/api/v1/chats/1/genre", reply(200, "{}"))
            .on_post("/api/v1/chats/1/theme", reply(200, "{}"))
            .on_post("/api/v1/chats/1", reply(200, "{}"))
            .on_post("/api/v1/summaries/1/generate", reply(202, ""))
            .on_get("/api/v1/summaries/1", reply(200, r#"{"title":"t","summary":"s"}"#))
            .on_post("/api/v1/persona/1/generate", reply(202, ""))
            .on_get("/api/v1/persona/1", reply(200, r#"{"isCompleted":true}"#))
            .on_post("/api/v1/pages/1", reply(202, ""))
            .on_get("/api/v1/pages/1", reply(200, r#"{"pageContentDtoList":[{"pageId":5}]}"#))
            .on_post("/api/v1/images/5/generate", reply(200, r#"{"requestId":"r5"}"#))
            .on_get("/api/v1/images/requests/r5", reply(200, r#"{"imageUrl":"u"}"#))
    }

    #[tokio::test]
    async fn test_runner_ramps_workers_and_merges_logs() {
        let config = Arc::new(fast_config());
        let generator = Arc::new(Generator::new(
            story_api(),
            Arc::new(TokioClock),
            Arc::new(ResourceTable::from_polling(&config.polling)),
        ));
        let runner = LoadRunner::new(generator.clone(), config);

        let outcome = runner.run().await;

        assert_eq!(outcome.peak_vus, 2);
        assert!(outcome.log.iterations >= 2);
        assert_eq!(outcome.log.iterations, outcome.log.completed);
        assert!(outcome.log.errors.is_empty());
        assert!(outcome.duration >= Duration::from_millis(400));
        // Tokens are kept per worker
        assert_eq!(generator.transport().calls_to("/api/v1/auth/normal/login"), 2);
    }

    #[tokio::test]
    async fn test_profile_runs_on_virtual_time() {
        let mut config = fast_config();
        config.load = LoadProfile {
            stages: vec![
                RampStage::new(Duration::from_secs(60), 2),
                RampStage::new(Duration::from_secs(540), 2),
            ],
            tick: Duration::from_secs(1),
        };
        let config = Arc::new(config);
        let clock = Arc::new(ManualClock::new());
        // Nothing is scripted, so every login is rejected
        let generator = Arc::new(Generator::new(
            ScriptedTransport::new(),
            clock.clone(),
            Arc::new(ResourceTable::from_polling(&config.polling)),
        ));

        let wall = std::time::Instant::now();
        let outcome = LoadRunner::new(generator, config).run().await;

        assert!(wall.elapsed() < Duration::from_secs(10));
        assert!(outcome.duration >= Duration::from_secs(600));
        assert!((1..=2).contains(&outcome.peak_vus));
        assert!(outcome.log.iterations >= 1);
        assert_eq!(outcome.log.completed, 0);
        assert!(
            outcome
                .log
                .errors
                .records()
                .iter()
                .all(|r| r.stage == Stage::Step(JourneyStep::Login))
        );
        // The scheduler ticked through the clock
        assert!(clock.sleeps().contains(&Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_parked_worker_stops_when_run_ends() {
        let (tx, rx) = watch::channel(0usize);
        let mut rx = rx;
        tx.send_replace(0);
        drop(tx);
        assert!(!wait_target(&mut rx, |t| *t > 0).await);
        assert!(wait_target(&mut rx, |t| *t == 0).await);
    }
}
