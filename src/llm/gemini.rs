//! Gemini `generateContent` client

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{extract_json, Completion, CompletionRequest, ReasoningClient, ReasoningError};
use crate::config::ReasoningConfig;

/// HTTP client for the Google generative language API.
pub struct GeminiClient {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    total_token_count: u64,
}

impl GenerateResponse {
    fn text(&self) -> Option<String> {
        let parts = &self.candidates.first()?.content.as_ref()?.parts;
        let text: String = parts.iter().filter_map(|p| p.text.as_deref()).collect();
        (!text.trim().is_empty()).then_some(text)
    }
}

impl GeminiClient {
    pub fn new(config: &ReasoningConfig, api_key: String) -> Result<Self, ReasoningError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.api_base, self.model
        )
    }
}

#[async_trait]
impl ReasoningClient for GeminiClient {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion, ReasoningError> {
        let prompt = format!(
            "{}\n\nRespond with a single JSON object shaped like:\n{}",
            request.prompt, request.schema_hint
        );
        let body = json!({
            "contents": [{"role": "user", "parts": [{"text": prompt}]}],
            "generationConfig": {
                "temperature": self.temperature,
                "responseMimeType": "application/json",
            }
        });

        let response = self
            .client
            .post(self.endpoint())
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReasoningError::ServerError { status, body });
        }

        let parsed: GenerateResponse = response.json().await?;
        let text = parsed.text().ok_or(ReasoningError::EmptyResponse)?;
        let value = extract_json(&text)?;
        let tokens_used = parsed.usage_metadata.map_or(0, |u| u.total_token_count);

        debug!(stage = request.stage, tokens_used, "Gemini completion received");

        Ok(Completion {
            value,
            model: self.model.clone(),
            tokens_used,
        })
    }

    fn backend_name(&self) -> &'static str {
        "gemini"
    }
}
