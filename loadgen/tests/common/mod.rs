//! Common Test Utilities for Integration Tests
//!
//! An in-process mock of the story API, served by axum on an ephemeral port,
//! plus a configuration tuned for millisecond pauses.

#![allow(dead_code)]

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use storyload::config::{LoadProfile, PollBudget, RampStage};
use storyload::{Config, Generator, HttpTransport, ResourceTable, TokioClock};

pub const TOKEN: &str = "mock-token";

/// How the image status endpoint answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOutcome {
    Ready,
    Failed,
    Never,
}

/// Knobs of the mock API
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Pending answers before a summary/persona/page status reports completion
    pub pending_polls: usize,
    /// Summaries never complete
    pub summary_never_ready: bool,
    /// Pages listed in a completed page payload
    pub page_count: u64,
    /// Status returned by the image submit endpoint
    pub image_submit_status: StatusCode,
    pub image_outcome: ImageOutcome,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            pending_polls: 1,
            summary_never_ready: false,
            page_count: 5,
            image_submit_status: StatusCode::OK,
            image_outcome: ImageOutcome::Ready,
        }
    }
}

pub struct MockState {
    behavior: MockBehavior,
    next_story: AtomicU64,
    next_request: AtomicU64,
    /// Status queries seen per path
    polls: Mutex<HashMap<String, usize>>,
    /// `METHOD path` of every request, in arrival order
    requests: Mutex<Vec<String>>,
}

impl MockState {
    fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            next_story: AtomicU64::new(1),
            next_request: AtomicU64::new(1),
            polls: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn log(&self, method: &str, path: String) {
        self.requests.lock().unwrap().push(format!("{method} {path}"));
    }

    /// Record one status query and return how many came before it
    fn poll(&self, path: String) -> usize {
        self.log("GET", path.clone());
        let mut polls = self.polls.lock().unwrap();
        let count = polls.entry(path).or_insert(0);
        *count += 1;
        *count - 1
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.starts_with(prefix))
            .count()
    }
}

type SharedState = Arc<MockState>;

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"))
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({"message": "missing token"}))).into_response()
}

async fn login(State(state): State<SharedState>, Json(body): Json<Value>) -> Response {
    state.log("POST", "/api/v1/auth/normal/login".to_string());
    if body["username"].as_str().is_none_or(str::is_empty) {
        return StatusCode::BAD_REQUEST.into_response();
    }
    (
        StatusCode::OK,
        [(AUTHORIZATION, format!("Bearer {TOKEN}"))],
        Json(json!({"username": body["username"]})),
    )
        .into_response()
}

async fn start_chat(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    state.log("POST", "/api/v1/chats".to_string());
    if !authorized(&headers) {
        return unauthorized();
    }
    let story_id = state.next_story.fetch_add(1, Ordering::SeqCst);
    Json(json!({"storyId": story_id})).into_response()
}

async fn send_message(
    State(state): State<SharedState>,
    Path(story_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.log("POST", format!("/api/v1/chats/{story_id}"));
    if !authorized(&headers) {
        return unauthorized();
    }
    if body["isSkip"] != json!(false) {
        return StatusCode::BAD_REQUEST.into_response();
    }
    Json(json!({"reply": "좋아요"})).into_response()
}

async fn choose_option(
    State(state): State<SharedState>,
    Path((story_id, option)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.log("POST", format!("/api/v1/chats/{story_id}/{option}"));
    if !authorized(&headers) {
        return unauthorized();
    }
    if !matches!(option.as_str(), "genre" | "theme") || body["isDirectInput"] != json!(false) {
        return StatusCode::BAD_REQUEST.into_response();
    }
    Json(json!({})).into_response()
}

/// Accept a generation job with 202 and no body
async fn accept_job(
    State(state): State<SharedState>,
    Path(story_id): Path<String>,
    headers: HeaderMap,
    path_template: &'static str,
) -> Response {
    state.log("POST", path_template.replace("{id}", &story_id));
    if !authorized(&headers) {
        return unauthorized();
    }
    StatusCode::ACCEPTED.into_response()
}

async fn summary_generate(
    state: State<SharedState>,
    story_id: Path<String>,
    headers: HeaderMap,
) -> Response {
    accept_job(state, story_id, headers, "/api/v1/summaries/{id}/generate").await
}

async fn persona_generate(
    state: State<SharedState>,
    story_id: Path<String>,
    headers: HeaderMap,
) -> Response {
    accept_job(state, story_id, headers, "/api/v1/persona/{id}/generate").await
}

async fn pages_generate(
    state: State<SharedState>,
    story_id: Path<String>,
    headers: HeaderMap,
) -> Response {
    accept_job(state, story_id, headers, "/api/v1/pages/{id}").await
}

async fn summary_status(
    State(state): State<SharedState>,
    Path(story_id): Path<String>,
) -> Json<Value> {
    let seen = state.poll(format!("/api/v1/summaries/{story_id}"));
    if state.behavior.summary_never_ready || seen < state.behavior.pending_polls {
        Json(json!({"title": "꿈꾸는 용", "summary": null}))
    } else {
        Json(json!({"title": "꿈꾸는 용", "summary": "용이 하늘을 나는 이야기"}))
    }
}

async fn persona_status(
    State(state): State<SharedState>,
    Path(story_id): Path<String>,
) -> Json<Value> {
    let seen = state.poll(format!("/api/v1/persona/{story_id}"));
    Json(json!({"isCompleted": seen >= state.behavior.pending_polls}))
}

async fn pages_status(
    State(state): State<SharedState>,
    Path(story_id): Path<String>,
) -> Json<Value> {
    let seen = state.poll(format!("/api/v1/pages/{story_id}"));
    if seen < state.behavior.pending_polls {
        return Json(json!({"pageContentDtoList": []}));
    }
    let base = story_id.parse::<u64>().unwrap_or(0) * 100;
    let pages: Vec<Value> = (1..=state.behavior.page_count)
        .map(|i| json!({"pageId": base + i, "content": format!("page {i}")}))
        .collect();
    Json(json!({"pageContentDtoList": pages}))
}

async fn image_generate(
    State(state): State<SharedState>,
    Path(page_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.log("POST", format!("/api/v1/images/{page_id}/generate"));
    if !authorized(&headers) {
        return unauthorized();
    }
    if body["prompt"].as_str().is_none() || body["imageStyle"].as_str().is_none() {
        return StatusCode::BAD_REQUEST.into_response();
    }
    if state.behavior.image_submit_status != StatusCode::OK {
        return state.behavior.image_submit_status.into_response();
    }
    let request_id = state.next_request.fetch_add(1, Ordering::SeqCst);
    Json(json!({"requestId": format!("img-{request_id}")})).into_response()
}

async fn image_status(
    State(state): State<SharedState>,
    Path(request_id): Path<String>,
) -> Json<Value> {
    state.poll(format!("/api/v1/images/requests/{request_id}"));
    match state.behavior.image_outcome {
        ImageOutcome::Ready => Json(json!({
            "status": "COMPLETED",
            "imageUrl": "https://cdn.example/img.png"
        })),
        ImageOutcome::Failed => Json(json!({
            "status": "FAILED",
            "errorMessage": "content policy"
        })),
        ImageOutcome::Never => Json(json!({"status": "IN_PROGRESS"})),
    }
}

/// Create the mock story API router
pub fn create_mock_app(state: SharedState) -> Router {
    Router::new()
        .route("/api/v1/auth/normal/login", post(login))
        .route("/api/v1/chats", post(start_chat))
        .route("/api/v1/chats/:story_id", post(send_message))
        .route("/api/v1/chats/:story_id/:option", post(choose_option))
        .route("/api/v1/summaries/:story_id/generate", post(summary_generate))
        .route("/api/v1/summaries/:story_id", get(summary_status))
        .route("/api/v1/persona/:story_id/generate", post(persona_generate))
        .route("/api/v1/persona/:story_id", get(persona_status))
        .route("/api/v1/pages/:story_id", post(pages_generate).get(pages_status))
        .route("/api/v1/images/:page_id/generate", post(image_generate))
        .route("/api/v1/images/requests/:request_id", get(image_status))
        .with_state(state)
}

/// A running mock server
pub struct MockServer {
    pub base_url: String,
    pub state: SharedState,
}

/// Start the mock API on an ephemeral local port
pub async fn start_mock_server(behavior: MockBehavior) -> MockServer {
    let state = Arc::new(MockState::new(behavior));
    let app = create_mock_app(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind mock server");
    let addr = listener.local_addr().expect("No local address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    MockServer {
        base_url: format!("http://{addr}"),
        state,
    }
}

/// Configuration with millisecond pauses against `base_url`
pub fn fast_config(base_url: &str) -> Config {
    let mut config = Config {
        base_url: base_url.to_string(),
        request_timeout: Duration::from_secs(5),
        seed: Some(42),
        ..Config::default()
    };
    let budget = PollBudget::new(5, 5, 25);
    config.polling.summary = budget;
    config.polling.persona = budget;
    config.polling.page = budget;
    config.polling.image = budget;
    config.images.submit_spacing = Duration::from_millis(1);
    config.images.round_pause = Duration::from_millis(5);
    config.journey.messages_per_journey = 2;
    config.journey.step_pause = Duration::from_millis(1);
    config.journey.message_pause_min = Duration::from_millis(1);
    config.journey.message_pause_max = Duration::from_millis(3);
    config.journey.iteration_pause = Duration::from_millis(20);
    config.journey.failure_pause = Duration::from_millis(20);
    config.load = LoadProfile {
        stages: vec![RampStage::new(Duration::from_millis(400), 2)],
        tick: Duration::from_millis(20),
    };
    config
}

/// Generator talking to `config.base_url` over real HTTP
pub fn http_generator(config: &Config) -> Arc<Generator<HttpTransport>> {
    let transport = HttpTransport::new(&config.base_url, config.request_timeout)
        .expect("Failed to build client");
    Arc::new(Generator::new(
        transport,
        Arc::new(TokioClock),
        Arc::new(ResourceTable::from_polling(&config.polling)),
    ))
}
