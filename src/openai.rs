use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::completion::{demo_completion, preview, CompletionError, CompletionOptions, CompletionProvider};
use crate::config::ProviderSettings;

/// Chat-completions client. Plays the structural role: enrichment, outlines
/// and quality judging.
pub struct OpenAiClient {
    client: Client,
    settings: ProviderSettings,
}

impl OpenAiClient {
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
        let url = format!("{}/chat/completions", self.settings.base_url.trim_end_matches('/'));
        info!("🔗 Making request to: {} (model {})", url, self.settings.model);

        let mut request_body = json!({
            "model": self.settings.model,
            "max_tokens": self.settings.max_tokens,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": payload}
            ]
        });
        if let Some(temperature) = options.temperature {
            request_body["temperature"] = json!(temperature);
        }

        let response = self.client
            .post(&url)
            .bearer_auth(&self.settings.api_key)
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

        let parsed: ChatResponse = serde_json::from_str(&response_text)
            .map_err(|e| CompletionError::Fatal(format!("parse error: {}: {}", e, preview(&response_text, 200))))?;

        parsed
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .map(|text| text.trim().to_string())
            .ok_or_else(|| CompletionError::Fatal("no text content in response".into()))
    }
}

#[async_trait]
impl CompletionProvider for OpenAiClient {
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
            info!("Using demo mode - no OpenAI call made");
            return Ok(demo_completion(&self.settings.model, system, payload));
        }

        let result = self.perform_api_call(system, payload, options).await;
        match &result {
            Ok(text) => info!("✅ {} replied: {}", self.settings.model, preview(text, 80)),
            Err(e) => error!(transient = e.is_transient(), "❌ {} completion failed: {}", self.settings.model, e),
        }
        result
    }
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice { message: Message }

#[derive(Debug, Deserialize)]
struct Message { #[serde(default)] content: Option<String> }
