//! JSON-over-HTTP transport
//!
//! The orchestrators talk to the API under test through the `Transport` trait.
//! `HttpTransport` is the production implementation on top of `reqwest`; tests
//! substitute scripted transports.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::telemetry::{HttpSample, Telemetry};

/// Transport-level failures (no HTTP response was obtained)
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

/// Request to the API under test; `path` is relative to the base URL
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub bearer: Option<String>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: None,
            bearer: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body,
            bearer: None,
        }
    }

    pub fn bearer(mut self, token: &str) -> Self {
        self.bearer = Some(token.to_string());
        self
    }
}

/// Response from the API under test
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    /// Raw `Authorization` response header, if any
    pub authorization: Option<String>,
    pub body: String,
    pub elapsed: Duration,
}

impl ApiResponse {
    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.body)
    }

    /// Token carried in an `Authorization: Bearer <token>` header
    pub fn bearer_token(&self) -> Option<&str> {
        self.authorization
            .as_deref()
            .and_then(|h| h.strip_prefix("Bearer "))
            .filter(|t| !t.is_empty())
    }
}

/// Read an id field that the API may return as a string or a number
pub fn id_field(value: &Value, field: &str) -> Option<String> {
    match value.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// `reqwest` transport against a base URL
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .pool_max_idle_per_host(200)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn classify(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else {
            TransportError::Http(err)
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        }
        .header(CONTENT_TYPE, "application/json");

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }

        let start = Instant::now();
        let resp = builder.send().await.map_err(|e| self.classify(e))?;
        let status = resp.status().as_u16();
        let authorization = resp
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.text().await.map_err(|e| self.classify(e))?;

        Ok(ApiResponse {
            status,
            authorization,
            body,
            elapsed: start.elapsed(),
        })
    }
}

/// Send a request and report how it went, without touching any telemetry
pub async fn timed_send<T: Transport + ?Sized>(
    transport: &T,
    request: ApiRequest,
) -> (Result<ApiResponse, TransportError>, HttpSample) {
    let start = Instant::now();
    let result = transport.send(request).await;
    let sample = match &result {
        Ok(resp) => HttpSample {
            elapsed: resp.elapsed,
            failed: resp.status >= 400,
        },
        Err(_) => HttpSample {
            elapsed: start.elapsed(),
            failed: true,
        },
    };
    (result, sample)
}

/// Send a request and record it in the worker's telemetry
pub async fn exchange<T: Transport + ?Sized>(
    transport: &T,
    request: ApiRequest,
    telemetry: &mut Telemetry,
) -> Result<ApiResponse, TransportError> {
    let (result, sample) = timed_send(transport, request).await;
    telemetry.record_http(sample);
    result
}
