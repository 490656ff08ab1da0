//! Blocking client for the two hosted inference endpoints.
//!
//! Every call is a sequence of at most `max_attempts` POSTs. A response only
//! counts when it is HTTP 200 and carries `[{"generated_text": ...}]`; any
//! other status or a transport error is retried after `retry_delay`, while a
//! 200 with the wrong body shape fails at once.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Bytes { content_type: String, body: Vec<u8> },
    Json(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    pub service: String,
    pub endpoint: String,
    pub credential: String,
    pub payload: Payload,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InferenceOutcome {
    Success(String),
    TransientFailure,
    MalformedResponse(String),
}

impl InferenceResponse {
    pub fn outcome(&self) -> InferenceOutcome {
        if self.status != 200 {
            return InferenceOutcome::TransientFailure;
        }
        match extract_generated_text(&self.body) {
            Ok(text) => InferenceOutcome::Success(text),
            Err(reason) => InferenceOutcome::MalformedResponse(reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Where and how one of the two remote services is called.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointSettings {
    pub service: String,
    pub url: String,
    pub credential: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl EndpointSettings {
    pub fn request(&self, payload: Payload) -> InferenceRequest {
        InferenceRequest {
            service: self.service.clone(),
            endpoint: self.url.clone(),
            credential: self.credential.clone(),
            payload,
            timeout: self.timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FailureKind {
    #[error("service unavailable")]
    ServiceUnavailable,
    #[error("malformed response")]
    MalformedResponse,
    #[error("invalid image")]
    InvalidImage,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ServiceUnavailable => "service_unavailable",
            FailureKind::MalformedResponse => "malformed_response",
            FailureKind::InvalidImage => "invalid_image",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InferenceFailure {
    #[error("{service} is currently unavailable after {attempts} attempt(s): {last_error}")]
    ServiceUnavailable {
        service: String,
        attempts: u32,
        last_error: String,
    },
    #[error("{service} returned a malformed response: {reason}")]
    MalformedResponse { service: String, reason: String },
}

impl InferenceFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            InferenceFailure::ServiceUnavailable { .. } => FailureKind::ServiceUnavailable,
            InferenceFailure::MalformedResponse { .. } => FailureKind::MalformedResponse,
        }
    }
}

/// A single attempt that did not produce a usable response and will be
/// retried (or, on the last attempt, ends the call).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub service: String,
    pub attempt: u32,
    pub max_attempts: u32,
    pub status: Option<u16>,
    pub error: String,
}

pub trait Transport: Send + Sync {
    fn post(&self, request: &InferenceRequest) -> Result<InferenceResponse>;
}

pub struct HttpTransport {
    http: HttpClient,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let http = HttpClient::builder()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http })
    }
}

impl Transport for HttpTransport {
    fn post(&self, request: &InferenceRequest) -> Result<InferenceResponse> {
        let builder = self
            .http
            .post(&request.endpoint)
            .bearer_auth(&request.credential)
            .timeout(request.timeout);
        let builder = match &request.payload {
            Payload::Bytes { content_type, body } => builder
                .header(CONTENT_TYPE, content_type.as_str())
                .body(body.clone()),
            Payload::Json(value) => builder.json(value),
        };
        let response = builder.send().with_context(|| {
            format!("{} request failed ({})", request.service, request.endpoint)
        })?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .with_context(|| format!("{} response body read failed", request.service))?;
        Ok(InferenceResponse { status, body })
    }
}

#[derive(Clone)]
pub struct InferenceClient {
    transport: Arc<dyn Transport>,
}

impl InferenceClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn call(
        &self,
        request: &InferenceRequest,
        policy: &RetryPolicy,
    ) -> Result<String, InferenceFailure> {
        self.call_observed(request, policy, &mut |_| {})
    }

    pub fn call_observed(
        &self,
        request: &InferenceRequest,
        policy: &RetryPolicy,
        on_failed_attempt: &mut dyn FnMut(&AttemptFailure),
    ) -> Result<String, InferenceFailure> {
        let max_attempts = policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let (status, error) = match self.transport.post(request) {
                Ok(response) => match response.outcome() {
                    InferenceOutcome::Success(text) => return Ok(text),
                    InferenceOutcome::MalformedResponse(reason) => {
                        return Err(InferenceFailure::MalformedResponse {
                            service: request.service.clone(),
                            reason,
                        });
                    }
                    InferenceOutcome::TransientFailure => (
                        Some(response.status),
                        format!(
                            "HTTP {}: {}",
                            response.status,
                            truncate_text(response.body.trim(), 200)
                        ),
                    ),
                },
                Err(err) => (None, error_chain_text(&err, 300)),
            };

            on_failed_attempt(&AttemptFailure {
                service: request.service.clone(),
                attempt,
                max_attempts,
                status,
                error: error.clone(),
            });
            last_error = error;

            if attempt < max_attempts {
                thread::sleep(policy.retry_delay);
            }
        }

        Err(InferenceFailure::ServiceUnavailable {
            service: request.service.clone(),
            attempts: max_attempts,
            last_error,
        })
    }
}

/// Pulls `generated_text` out of the first element of a JSON array body.
pub fn extract_generated_text(body: &str) -> Result<String, String> {
    let parsed: Value =
        serde_json::from_str(body).map_err(|err| format!("invalid JSON payload: {err}"))?;
    let Some(rows) = parsed.as_array() else {
        return Err("expected a JSON array".to_string());
    };
    let Some(first) = rows.first() else {
        return Err("response array is empty".to_string());
    };
    first
        .get("generated_text")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| "first element has no string `generated_text` field".to_string())
}

fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() || parts.last().map(String::as_str) == Some(trimmed) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
