use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use crate::quality::QUALITY_INSTRUCTION;

#[derive(Debug, Error)]
pub enum CompletionError {
    /// Worth retrying by a caller: timeouts, connection drops, 429 and 5xx.
    #[error("transient completion failure: {0}")]
    Transient(String),
    #[error("completion failed: {0}")]
    Fatal(String),
}

impl CompletionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CompletionError::Transient(_))
    }

    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = format!("status={} body={}", status, body);
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            CompletionError::Transient(message)
        } else {
            CompletionError::Fatal(message)
        }
    }
}

impl From<reqwest::Error> for CompletionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            CompletionError::Transient(err.to_string())
        } else {
            CompletionError::Fatal(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CompletionOptions {
    pub temperature: Option<f32>,
}

impl CompletionOptions {
    pub fn with_temperature(temperature: f64) -> Self {
        Self { temperature: Some(temperature as f32) }
    }
}

/// A language-model text completion surface. One system instruction, one
/// payload, one text reply.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn model(&self) -> &str;

    async fn complete(
        &self,
        system: &str,
        payload: &str,
        options: &CompletionOptions,
    ) -> Result<String, CompletionError>;
}

/// Canned reply used by providers running without an API key. Judge calls get
/// a score between 7.0 and 9.9 derived from the payload length, so demo runs
/// hit both sides of the quality threshold.
pub fn demo_completion(model: &str, system: &str, payload: &str) -> String {
    if system == QUALITY_INSTRUCTION {
        return format!("{:.1}", 7.0 + (payload.len() % 30) as f64 / 10.0);
    }
    format!(
        "Demo response from {model}. Instruction: {}. Input was {} chars.",
        preview(system, 60),
        payload.len()
    )
}

pub fn preview(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...[{} chars]", &s[..idx], s.len()),
        None => s.to_string(),
    }
}
