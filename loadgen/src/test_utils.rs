//! Test Utilities Module
//!
//! Scripted transport and a manual clock for driving the orchestrators without
//! a network or real waits. This module is only compiled when running tests.

#![cfg(test)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::api::{ApiRequest, ApiResponse, Method, Transport, TransportError};
use crate::clock::Clock;

// ============================================================================
// Responses
// ============================================================================

/// Response with the given status and raw body
pub fn reply(status: u16, body: &str) -> ApiResponse {
    ApiResponse {
        status,
        authorization: None,
        body: body.to_string(),
        elapsed: Duration::from_millis(5),
    }
}

/// Login-style response carrying a bearer token header
pub fn reply_with_token(status: u16, token: &str) -> ApiResponse {
    ApiResponse {
        authorization: Some(format!("Bearer {token}")),
        ..reply(status, "")
    }
}

// ============================================================================
// Scripted Transport
// ============================================================================

type Route = (Method, String);

/// Timeout reported by scripted transport failures
pub const SCRIPTED_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
enum Scripted {
    Reply(ApiResponse),
    /// No response; the request times out
    Timeout,
}

/// Transport answering from per-route response queues.
///
/// Each request pops the next scripted response for its route; the last one
/// keeps being returned once the queue is down to a single entry. Requests
/// to unscripted routes get a 404.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<Route, VecDeque<Scripted>>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(self, method: Method, path: &str, response: Scripted) -> Self {
        self.routes
            .lock()
            .unwrap()
            .entry((method, path.to_string()))
            .or_default()
            .push_back(response);
        self
    }

    pub fn on_get(self, path: &str, response: ApiResponse) -> Self {
        self.script(Method::Get, path, Scripted::Reply(response))
    }

    pub fn on_post(self, path: &str, response: ApiResponse) -> Self {
        self.script(Method::Post, path, Scripted::Reply(response))
    }

    /// Queue a GET to `path` that times out without a response
    pub fn on_get_timeout(self, path: &str) -> Self {
        self.script(Method::Get, path, Scripted::Timeout)
    }

    /// Queue a POST to `path` that times out without a response
    pub fn on_post_timeout(self, path: &str) -> Self {
        self.script(Method::Post, path, Scripted::Timeout)
    }

    /// Every request received so far, in order
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests received for `path`, any method
    pub fn calls_to(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let key = (request.method, request.path.clone());
        self.requests.lock().unwrap().push(request);

        let mut routes = self.routes.lock().unwrap();
        let response = match routes.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        match response {
            Some(Scripted::Reply(response)) => Ok(response),
            Some(Scripted::Timeout) => Err(TransportError::Timeout(SCRIPTED_TIMEOUT)),
            None => Ok(reply(404, "")),
        }
    }
}

// ============================================================================
// Manual Clock
// ============================================================================

/// Clock whose sleeps return immediately and advance virtual time
pub struct ManualClock {
    start: DateTime<Utc>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            start: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    /// Every requested sleep, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }

    pub fn total_slept(&self) -> Duration {
        self.sleeps.lock().unwrap().iter().sum()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.total_slept()).unwrap_or_default();
        self.start + elapsed
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        tokio::task::yield_now().await;
    }
}
