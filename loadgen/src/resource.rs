//! Resource kinds and the per-kind generation table
//!
//! Every asynchronously generated resource (summary, persona, pages, image) is
//! described by one `ResourceSpec`: where to submit, where to poll, which submit
//! statuses count as accepted, and how a status body signals completion or
//! failure. The orchestrators only ever consult this table, so adding a kind or
//! changing an endpoint never touches the polling code.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::config::{PollBudget, PollingConfig};

/// Kind of asynchronously generated resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Summary,
    Persona,
    Page,
    Image,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Summary,
        ResourceKind::Persona,
        ResourceKind::Page,
        ResourceKind::Image,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Summary => "summary",
            ResourceKind::Persona => "persona",
            ResourceKind::Page => "page",
            ResourceKind::Image => "image",
        }
    }

    /// Stage name used for the duration of a successful generate call
    pub fn generation_stage(&self) -> &'static str {
        match self {
            ResourceKind::Summary => "summary_generation",
            ResourceKind::Persona => "persona_generation",
            ResourceKind::Page => "page_generation",
            ResourceKind::Image => "image_generation",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a generate call waits for the job to finish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollMode {
    /// Submit, then poll the status endpoint until a terminal signal or timeout
    #[default]
    AwaitCompletion,
    /// Treat an accepted submission as success and never poll
    SubmitOnly,
}

impl FromStr for PollMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "await" | "await_completion" | "poll" => Ok(PollMode::AwaitCompletion),
            "submit_only" | "submit" | "fire_and_forget" => Ok(PollMode::SubmitOnly),
            other => Err(format!("unknown poll mode: {other}")),
        }
    }
}

/// How a status body signals that the job produced its result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionRule {
    /// Every listed field is present and non-null
    FieldsPresent(Vec<String>),
    /// The named field is an array with at least one element
    NonEmptyArray(String),
    /// The named field is `true`
    FlagTrue(String),
}

impl CompletionRule {
    pub fn fields_present(fields: &[&str]) -> Self {
        CompletionRule::FieldsPresent(fields.iter().map(|f| f.to_string()).collect())
    }

    pub fn is_satisfied(&self, body: &Value) -> bool {
        match self {
            CompletionRule::FieldsPresent(fields) => {
                !fields.is_empty()
                    && fields
                        .iter()
                        .all(|f| body.get(f).is_some_and(|v| !v.is_null()))
            }
            CompletionRule::NonEmptyArray(field) => body
                .get(field)
                .and_then(Value::as_array)
                .is_some_and(|items| !items.is_empty()),
            CompletionRule::FlagTrue(field) => {
                body.get(field).and_then(Value::as_bool) == Some(true)
            }
        }
    }
}

/// How a status body signals that the job failed for good: the named field
/// equals the given string (case-insensitive)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRule {
    pub field: String,
    pub value: String,
}

impl FailureRule {
    pub fn status_failed() -> Self {
        Self {
            field: "status".to_string(),
            value: "FAILED".to_string(),
        }
    }

    /// Returns the failure reason when the body reports a terminal failure
    pub fn failure_reason(&self, body: &Value) -> Option<String> {
        let failed = body
            .get(&self.field)
            .and_then(Value::as_str)
            .is_some_and(|v| v.eq_ignore_ascii_case(&self.value));
        if !failed {
            return None;
        }

        let reason = ["errorMessage", "message", "reason"]
            .iter()
            .find_map(|key| body.get(*key).and_then(Value::as_str))
            .unwrap_or("server reported generation failure");
        Some(reason.to_string())
    }
}

/// Request body sent with a submit call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitBody {
    /// No body
    Empty,
    /// Image prompt; the style is picked per request by the caller
    ImagePrompt { prompt: String },
}

impl SubmitBody {
    pub fn render(&self, image_style: Option<&str>) -> Option<Value> {
        match self {
            SubmitBody::Empty => None,
            SubmitBody::ImagePrompt { prompt } => Some(serde_json::json!({
                "prompt": prompt,
                "imageStyle": image_style.unwrap_or("WATERCOLOR"),
                "isDefaultStyle": true,
                "personaIds": [],
            })),
        }
    }
}

/// Everything needed to generate and await one kind of resource
#[derive(Debug, Clone)]
pub struct ResourceSpec {
    pub kind: ResourceKind,
    /// Submit path template, `{id}` is the target resource id
    pub submit_path: String,
    /// Status path template, `{id}` is the request id when one was issued,
    /// otherwise the target resource id
    pub status_path: String,
    /// Submit statuses treated as accepted
    pub accepted: Vec<u16>,
    pub body: SubmitBody,
    pub completion: CompletionRule,
    pub failure: FailureRule,
    pub budget: PollBudget,
    pub mode: PollMode,
}

impl ResourceSpec {
    pub fn submit_path(&self, resource_id: &str) -> String {
        self.submit_path.replace("{id}", resource_id)
    }

    pub fn status_path(&self, tracking_id: &str) -> String {
        self.status_path.replace("{id}", tracking_id)
    }

    pub fn is_accepted(&self, status: u16) -> bool {
        self.accepted.contains(&status)
    }

    /// Default spec for a kind, with the given budget and mode
    pub fn default_for(kind: ResourceKind, budget: PollBudget, mode: PollMode) -> Self {
        let failure = FailureRule::status_failed();
        match kind {
            ResourceKind::Summary => Self {
                kind,
                submit_path: "/api/v1/summaries/{id}/generate".to_string(),
                status_path: "/api/v1/summaries/{id}".to_string(),
                accepted: vec![202],
                body: SubmitBody::Empty,
                completion: CompletionRule::fields_present(&["title", "summary"]),
                failure,
                budget,
                mode,
            },
            ResourceKind::Persona => Self {
                kind,
                submit_path: "/api/v1/persona/{id}/generate".to_string(),
                status_path: "/api/v1/persona/{id}".to_string(),
                accepted: vec![202],
                body: SubmitBody::Empty,
                completion: CompletionRule::FlagTrue("isCompleted".to_string()),
                failure,
                budget,
                mode,
            },
            ResourceKind::Page => Self {
                kind,
                submit_path: "/api/v1/pages/{id}".to_string(),
                status_path: "/api/v1/pages/{id}".to_string(),
                accepted: vec![202],
                body: SubmitBody::Empty,
                completion: CompletionRule::NonEmptyArray("pageContentDtoList".to_string()),
                failure,
                budget,
                mode,
            },
            ResourceKind::Image => Self {
                kind,
                submit_path: "/api/v1/images/{id}/generate".to_string(),
                status_path: "/api/v1/images/requests/{id}".to_string(),
                accepted: vec![200],
                body: SubmitBody::ImagePrompt {
                    prompt: "동화책 한 장면".to_string(),
                },
                completion: CompletionRule::fields_present(&["imageUrl"]),
                failure,
                budget,
                mode,
            },
        }
    }
}

/// Configuration table of resource specs keyed by kind
#[derive(Debug, Clone)]
pub struct ResourceTable {
    specs: BTreeMap<ResourceKind, ResourceSpec>,
}

impl ResourceTable {
    /// Build the default table using the configured budgets and mode
    pub fn from_polling(polling: &PollingConfig) -> Self {
        let specs = ResourceKind::ALL
            .into_iter()
            .map(|kind| {
                (
                    kind,
                    ResourceSpec::default_for(kind, polling.budget(kind), polling.mode),
                )
            })
            .collect();
        Self { specs }
    }

    pub fn spec(&self, kind: ResourceKind) -> &ResourceSpec {
        // Every constructor fills all kinds
        &self.specs[&kind]
    }

    /// Replace the spec for one kind
    pub fn with_spec(mut self, spec: ResourceSpec) -> Self {
        self.specs.insert(spec.kind, spec);
        self
    }
}

impl Default for ResourceTable {
    fn default() -> Self {
        Self::from_polling(&PollingConfig::default())
    }
}
