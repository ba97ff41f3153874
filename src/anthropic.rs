use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::completion::{demo_completion, preview, CompletionError, CompletionOptions, CompletionProvider};
use crate::config::ProviderSettings;

const API_VERSION: &str = "2023-06-01";

/// Messages-API client. Plays the narrative role: full prose and refinement,
/// with the larger token budget.
pub struct AnthropicClient {
    client: Client,
    settings: ProviderSettings,
}

impl AnthropicClient {
    pub fn new(settings: ProviderSettings) -> Result<Self, CompletionError> {
        let client = Client::builder().timeout(settings.timeout).build()?;
        Ok(Self { client, settings })
    }

    async fn perform_api_call(
        &self,
        system: &str,
        payload: &str,
        options: &CompletionOptions,
    ) -> Result<String, CompletionError> {
        let url = format!("{}/messages", self.settings.base_url.trim_end_matches('/'));
        info!("🔗 Making request to: {} (model {})", url, self.settings.model);

        let mut request_body = json!({
            "model": self.settings.model,
            "max_tokens": self.settings.max_tokens,
            "system": system,
            "messages": [{"role": "user", "content": payload}]
        });
        if let Some(temperature) = options.temperature {
            request_body["temperature"] = json!(temperature);
        }

        let response = self.client
            .post(&url)
            .header("x-api-key", self.settings.api_key.as_str())
            .header("anthropic-version", API_VERSION)
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        info!("📥 Response status: {}", status);

        let response_text = response.text().await?;
        if !status.is_success() {
            error!("❌ API Error response: {}", preview(&response_text, 500));
            return Err(CompletionError::from_status(status, &response_text));
        }

        let parsed: MessagesResponse = serde_json::from_str(&response_text)
            .map_err(|e| CompletionError::Fatal(format!("parse error: {}: {}", e, preview(&response_text, 200))))?;

        extract_text(&parsed).ok_or_else(|| CompletionError::Fatal("no text content in response".into()))
    }
}

#[async_trait]
impl CompletionProvider for AnthropicClient {
    fn model(&self) -> &str {
        &self.settings.model
    }

    async fn complete(
        &self,
        system: &str,
        payload: &str,
        options: &CompletionOptions,
    ) -> Result<String, CompletionError> {
        if self.settings.is_demo() {
            info!("Using demo mode - no Anthropic call made");
            return Ok(demo_completion(&self.settings.model, system, payload));
        }

        let result = self.perform_api_call(system, payload, options).await;
        match &result {
            Ok(text) => info!("✅ {} produced {} chars", self.settings.model, text.len()),
            Err(e) => error!(transient = e.is_transient(), "❌ {} completion failed: {}", self.settings.model, e),
        }
        result
    }
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<Block>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Block {
    Text { text: String },
    #[serde(other)]
    Other,
}

/// Joins every text block; the API may split long replies.
fn extract_text(resp: &MessagesResponse) -> Option<String> {
    let parts: Vec<&str> = resp
        .content
        .iter()
        .filter_map(|b| match b {
            Block::Text { text } => Some(text.as_str()),
            Block::Other => None,
        })
        .collect();
    if parts.is_empty() { None } else { Some(parts.concat()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn joins_text_blocks_and_skips_others() {
        let body = r#"{"content":[
            {"type":"text","text":"Chapter 1. "},
            {"type":"tool_use","id":"x","name":"n","input":{}},
            {"type":"text","text":"It rained."}
        ]}"#;
        let parsed: MessagesResponse = serde_json::from_str(body).unwrap();
        assert_eq!(extract_text(&parsed).as_deref(), Some("Chapter 1. It rained."));
    }

    #[test]
    fn empty_content_is_none() {
        let parsed: MessagesResponse = serde_json::from_str(r#"{"content":[]}"#).unwrap();
        assert_eq!(extract_text(&parsed), None);
    }
}
