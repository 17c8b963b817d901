//! Load test configuration
//!
//! Configuration is loaded from environment variables on top of defaults that
//! mirror the production load profile. Every knob has one variable; invalid
//! values are ignored and the default is kept.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::data::{TestData, TestUser};
use crate::resource::{PollMode, ResourceKind};

/// Configuration validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{kind} polling needs at least one attempt")]
    ZeroAttempts { kind: ResourceKind },

    #[error("Image repeat count must be at least 1")]
    ZeroRepeatCount,

    #[error("Load profile has no stages")]
    EmptyProfile,

    #[error("No test users configured")]
    NoUsers,

    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    #[error("Invalid stage: {0} (expected <duration>:<target>)")]
    InvalidStage(String),

    #[error("Unknown load tier: {0}")]
    UnknownTier(String),
}

/// Main load test configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the API under test
    pub base_url: String,
    /// Per-request HTTP timeout
    pub request_timeout: Duration,
    /// Fixed RNG seed; each worker derives its own stream from it
    pub seed: Option<u64>,

    /// Polling budgets per resource kind
    pub polling: PollingConfig,

    /// Parallel image generation
    pub images: ImageBatchConfig,

    /// Journey pacing
    pub journey: JourneyConfig,

    /// Virtual user ramp
    pub load: LoadProfile,

    /// Pass/fail criteria evaluated at the end of the run
    pub thresholds: Thresholds,

    /// Report output
    pub report: ReportConfig,

    /// Users and content picked at random by workers
    pub data: TestData,
}

/// Polling budget for one resource kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    /// Maximum number of status queries
    pub max_attempts: u32,
    /// Wait before each status query
    pub interval: Duration,
    /// Informational upper bound, roughly `max_attempts * interval`
    pub timeout: Duration,
}

impl PollBudget {
    pub const fn new(max_attempts: u32, interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            max_attempts,
            interval: Duration::from_millis(interval_ms),
            timeout: Duration::from_millis(timeout_ms),
        }
    }
}

/// Polling configuration for all resource kinds
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Whether generate calls wait for completion
    pub mode: PollMode,
    pub summary: PollBudget,
    pub persona: PollBudget,
    pub page: PollBudget,
    pub image: PollBudget,
}

impl PollingConfig {
    pub fn budget(&self, kind: ResourceKind) -> PollBudget {
        match kind {
            ResourceKind::Summary => self.summary,
            ResourceKind::Persona => self.persona,
            ResourceKind::Page => self.page,
            ResourceKind::Image => self.image,
        }
    }

    fn budget_mut(&mut self, kind: ResourceKind) -> &mut PollBudget {
        match kind {
            ResourceKind::Summary => &mut self.summary,
            ResourceKind::Persona => &mut self.persona,
            ResourceKind::Page => &mut self.page,
            ResourceKind::Image => &mut self.image,
        }
    }
}

/// Parallel image generation configuration
#[derive(Debug, Clone)]
pub struct ImageBatchConfig {
    /// Number of pages to request images for at once; 0 skips image generation
    pub concurrent_images: usize,
    /// Number of rounds over the same pages
    pub repeat_count: u32,
    /// Spacing between consecutive submits within a round
    pub submit_spacing: Duration,
    /// Pause between rounds
    pub round_pause: Duration,
}

/// Journey pacing configuration
#[derive(Debug, Clone)]
pub struct JourneyConfig {
    /// Chat messages sent per journey
    pub messages_per_journey: usize,
    /// Pause after login, chat start, genre and theme
    pub step_pause: Duration,
    /// Lower bound of the random pause after each message
    pub message_pause_min: Duration,
    /// Upper bound of the random pause after each message
    pub message_pause_max: Duration,
    /// Pause after a completed journey
    pub iteration_pause: Duration,
    /// Pause after an aborted journey
    pub failure_pause: Duration,
}

/// One ramp stage: move linearly to `target` virtual users over `duration`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RampStage {
    pub duration: Duration,
    pub target: usize,
}

impl RampStage {
    pub const fn new(duration: Duration, target: usize) -> Self {
        Self { duration, target }
    }
}

impl FromStr for RampStage {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (duration, target) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| ConfigError::InvalidStage(s.to_string()))?;
        let target = target
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidStage(s.to_string()))?;
        Ok(Self {
            duration: parse_duration(duration)?,
            target,
        })
    }
}

/// Virtual user ramp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadProfile {
    pub stages: Vec<RampStage>,
    /// How often the scheduler re-evaluates the target VU count
    pub tick: Duration,
}

impl LoadProfile {
    pub fn new(stages: Vec<RampStage>) -> Self {
        Self {
            stages,
            tick: Duration::from_secs(1),
        }
    }

    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    pub fn peak_vus(&self) -> usize {
        self.stages.iter().map(|s| s.target).max().unwrap_or(0)
    }

    /// Target VU count at `elapsed`, interpolated linearly within a stage
    /// starting from 0 VUs.
    pub fn target_at(&self, elapsed: Duration) -> usize {
        let mut from = 0usize;
        let mut stage_start = Duration::ZERO;

        for stage in &self.stages {
            let stage_end = stage_start + stage.duration;
            if elapsed < stage_end {
                if stage.duration.is_zero() {
                    return stage.target;
                }
                let progress =
                    (elapsed - stage_start).as_secs_f64() / stage.duration.as_secs_f64();
                let value = from as f64 + (stage.target as f64 - from as f64) * progress;
                return value.round().max(0.0) as usize;
            }
            from = stage.target;
            stage_start = stage_end;
        }

        0
    }
}

/// Named load presets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadTier {
    /// Quick validation: 5 VUs for ~30s
    Smoke,
    /// Default production profile: up to 100 VUs over 5 minutes
    Standard,
    /// Up to 200 VUs over 10 minutes
    Stress,
}

impl LoadTier {
    pub fn name(&self) -> &'static str {
        match self {
            LoadTier::Smoke => "SMOKE",
            LoadTier::Standard => "STANDARD",
            LoadTier::Stress => "STRESS",
        }
    }

    pub fn profile(&self) -> LoadProfile {
        let secs = Duration::from_secs;
        match self {
            LoadTier::Smoke => LoadProfile::new(vec![
                RampStage::new(secs(10), 5),
                RampStage::new(secs(15), 5),
                RampStage::new(secs(5), 0),
            ]),
            LoadTier::Standard => LoadProfile::new(vec![
                RampStage::new(secs(60), 50),
                RampStage::new(secs(180), 100),
                RampStage::new(secs(60), 0),
            ]),
            LoadTier::Stress => LoadProfile::new(vec![
                RampStage::new(secs(120), 100),
                RampStage::new(secs(360), 200),
                RampStage::new(secs(120), 0),
            ]),
        }
    }
}

impl FromStr for LoadTier {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "smoke" => Ok(LoadTier::Smoke),
            "standard" => Ok(LoadTier::Standard),
            "stress" => Ok(LoadTier::Stress),
            other => Err(ConfigError::UnknownTier(other.to_string())),
        }
    }
}

/// Pass/fail criteria for a run
#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    /// Maximum P95 of all HTTP request durations
    pub http_req_duration_p95: Duration,
    /// Maximum fraction of failed HTTP requests
    pub http_req_failed_rate: f64,
    /// Maximum P90 of full journey durations
    pub full_flow_p90: Duration,
}

/// Report output configuration
#[derive(Debug, Clone)]
pub struct ReportConfig {
    /// Directory receiving report files
    pub dir: PathBuf,
    /// Error report file name
    pub error_report: String,
    /// Prometheus snapshot file name
    pub metrics_snapshot: String,
}

impl ReportConfig {
    pub fn error_report_path(&self) -> PathBuf {
        self.dir.join(&self.error_report)
    }

    pub fn metrics_snapshot_path(&self) -> PathBuf {
        self.dir.join(&self.metrics_snapshot)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "https://dev-api.dreamai.studio".to_string(),
            request_timeout: Duration::from_secs(60),
            seed: None,
            polling: PollingConfig::default(),
            images: ImageBatchConfig::default(),
            journey: JourneyConfig::default(),
            load: LoadTier::Standard.profile(),
            thresholds: Thresholds::default(),
            report: ReportConfig::default(),
            data: TestData::default(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            mode: PollMode::AwaitCompletion,
            summary: PollBudget::new(60, 2000, 120_000),
            persona: PollBudget::new(60, 2000, 120_000),
            page: PollBudget::new(90, 3000, 180_000),
            image: PollBudget::new(120, 500, 300_000),
        }
    }
}

impl Default for ImageBatchConfig {
    fn default() -> Self {
        Self {
            concurrent_images: 5,
            repeat_count: 2,
            submit_spacing: Duration::from_millis(100),
            round_pause: Duration::from_secs(2),
        }
    }
}

impl Default for JourneyConfig {
    fn default() -> Self {
        Self {
            messages_per_journey: 6,
            step_pause: Duration::from_secs(1),
            message_pause_min: Duration::from_secs(1),
            message_pause_max: Duration::from_secs(3),
            iteration_pause: Duration::from_secs(60),
            failure_pause: Duration::from_secs(1),
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            http_req_duration_p95: Duration::from_millis(15_000),
            http_req_failed_rate: 0.15,
            full_flow_p90: Duration::from_millis(300_000),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            error_report: "error-report.json".to_string(),
            metrics_snapshot: "metrics.prom".to_string(),
        }
    }
}

/// Parse durations such as `500ms`, `30s`, `3m`, `1h` or a bare number of seconds
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    let invalid = || ConfigError::InvalidDuration(s.to_string());

    let (value, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => s.split_at(idx),
        None => (s, "s"),
    };
    let value: u64 = value.parse().map_err(|_| invalid())?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        _ => Err(invalid()),
    }
}

/// Parse a comma separated stage list such as `1m:50,3m:100,1m:0`
pub fn parse_stages(s: &str) -> Result<Vec<RampStage>, ConfigError> {
    s.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(str::parse)
        .collect()
}

fn env_millis(name: &str) -> Option<Duration> {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Target
        if let Ok(url) = env::var("BASE_URL")
            && !url.is_empty()
        {
            config.base_url = url;
        }
        if let Ok(val) = env::var("REQUEST_TIMEOUT_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Ok(val) = env::var("SEED")
            && let Ok(seed) = val.parse()
        {
            config.seed = Some(seed);
        }

        // Polling
        if let Ok(val) = env::var("POLL_MODE") {
            match val.parse() {
                Ok(mode) => config.polling.mode = mode,
                Err(e) => warn!("Ignoring POLL_MODE: {}", e),
            }
        }
        for kind in ResourceKind::ALL {
            let prefix = kind.as_str().to_uppercase();
            let budget = config.polling.budget_mut(kind);
            if let Ok(val) = env::var(format!("{prefix}_MAX_ATTEMPTS"))
                && let Ok(v) = val.parse()
            {
                budget.max_attempts = v;
            }
            if let Some(interval) = env_millis(&format!("{prefix}_INTERVAL_MS")) {
                budget.interval = interval;
            }
            if let Some(timeout) = env_millis(&format!("{prefix}_TIMEOUT_MS")) {
                budget.timeout = timeout;
            }
        }

        // Images
        if let Ok(val) = env::var("CONCURRENT_IMAGES")
            && let Ok(v) = val.parse()
        {
            config.images.concurrent_images = v;
        }
        if let Ok(val) = env::var("IMAGE_REPEAT_COUNT")
            && let Ok(v) = val.parse()
        {
            config.images.repeat_count = v;
        }
        if let Some(spacing) = env_millis("IMAGE_SUBMIT_SPACING_MS") {
            config.images.submit_spacing = spacing;
        }
        if let Some(pause) = env_millis("IMAGE_ROUND_PAUSE_MS") {
            config.images.round_pause = pause;
        }

        // Journey
        if let Ok(val) = env::var("MESSAGES_PER_JOURNEY")
            && let Ok(v) = val.parse()
        {
            config.journey.messages_per_journey = v;
        }
        if let Some(pause) = env_millis("STEP_PAUSE_MS") {
            config.journey.step_pause = pause;
        }
        if let Some(pause) = env_millis("ITERATION_PAUSE_MS") {
            config.journey.iteration_pause = pause;
        }
        if let Some(pause) = env_millis("FAILURE_PAUSE_MS") {
            config.journey.failure_pause = pause;
        }

        // Load profile: explicit stages win over a named tier
        if let Ok(val) = env::var("LOAD_TIER") {
            match val.parse::<LoadTier>() {
                Ok(tier) => config.load = tier.profile(),
                Err(e) => warn!("Ignoring LOAD_TIER: {}", e),
            }
        }
        if let Ok(val) = env::var("LOAD_STAGES") {
            match parse_stages(&val) {
                Ok(stages) => config.load.stages = stages,
                Err(e) => warn!("Ignoring LOAD_STAGES: {}", e),
            }
        }

        // Thresholds
        if let Some(p95) = env_millis("THRESHOLD_HTTP_P95_MS") {
            config.thresholds.http_req_duration_p95 = p95;
        }
        if let Ok(val) = env::var("THRESHOLD_HTTP_FAILED_RATE")
            && let Ok(rate) = val.parse()
        {
            config.thresholds.http_req_failed_rate = rate;
        }
        if let Some(p90) = env_millis("THRESHOLD_FULL_FLOW_P90_MS") {
            config.thresholds.full_flow_p90 = p90;
        }

        // Report
        if let Ok(dir) = env::var("REPORT_DIR")
            && !dir.is_empty()
        {
            config.report.dir = PathBuf::from(dir);
        }

        // Test data
        if let Ok(val) = env::var("TEST_USERS") {
            let users: Vec<TestUser> = val.split(',').filter_map(TestUser::parse).collect();
            if !users.is_empty() {
                config.data.users = users;
            }
        }

        config
    }

    /// Check the invariants the orchestrators rely on
    pub fn validate(&self) -> Result<(), ConfigError> {
        for kind in ResourceKind::ALL {
            if self.polling.budget(kind).max_attempts == 0 {
                return Err(ConfigError::ZeroAttempts { kind });
            }
        }
        if self.images.repeat_count == 0 {
            return Err(ConfigError::ZeroRepeatCount);
        }
        if self.load.stages.is_empty() {
            return Err(ConfigError::EmptyProfile);
        }
        if self.data.users.is_empty() {
            return Err(ConfigError::NoUsers);
        }
        Ok(())
    }
}
