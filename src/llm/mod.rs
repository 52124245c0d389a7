//! Reasoning service clients
//!
//! Stages ask a schema-constrained completion service for JSON and get a
//! [`Completion`] back. The client is built once at startup and shared by
//! every stage through an `Arc<dyn ReasoningClient>`.
//!
//! ## Backends
//!
//! - **Gemini**: Google generative language REST API (`GOOGLE_API_KEY`)
//! - **Template**: deterministic canned payloads, no network; used when no
//!   API key is configured and in tests

mod gemini;
mod template;

pub use gemini::GeminiClient;
pub use template::{canned_payload, TemplateClient};

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{ReasoningConfig, ReasoningProvider};

/// One completion call made by a stage.
#[derive(Debug, Clone)]
pub struct CompletionRequest<'a> {
    /// Stage issuing the call; used for logging and by offline backends.
    pub stage: &'a str,
    pub prompt: String,
    /// JSON skeleton the response must follow.
    pub schema_hint: &'a str,
}

/// Parsed JSON answer plus accounting.
#[derive(Debug, Clone)]
pub struct Completion {
    pub value: Value,
    pub model: String,
    pub tokens_used: u64,
}

/// Reasoning client errors
#[derive(Debug, thiserror::Error)]
pub enum ReasoningError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Server returned status {status}: {body}")]
    ServerError {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("response contained no candidate text")]
    EmptyResponse,
    #[error("response was not valid JSON: {0}")]
    Decode(String),
    #[error("reasoning backend not configured: {0}")]
    NotConfigured(&'static str),
    #[error("reasoning backend unavailable: {0}")]
    Unavailable(String),
}

/// Schema-constrained completion service.
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    /// Ask for a JSON object following `request.schema_hint`.
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion, ReasoningError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// Build the configured client.
///
/// Falls back to the template backend when Gemini is selected but no API key
/// is present, so a fresh checkout still produces reports.
pub fn build_client(config: &ReasoningConfig) -> Result<Arc<dyn ReasoningClient>, ReasoningError> {
    match config.provider {
        ReasoningProvider::Template => {
            info!("Reasoning backend: template (offline)");
            Ok(Arc::new(TemplateClient::new()))
        }
        ReasoningProvider::Gemini => match ReasoningConfig::api_key() {
            Some(key) => {
                let client = GeminiClient::new(config, key)?;
                info!(model = %config.model, "Reasoning backend: gemini");
                Ok(Arc::new(client))
            }
            None => {
                warn!("GOOGLE_API_KEY not set, using template reasoning backend");
                Ok(Arc::new(TemplateClient::new()))
            }
        },
    }
}

/// Pull the JSON object out of a model response.
///
/// Models sometimes wrap the object in Markdown fences or prose; take the
/// outermost `{ ... }` span.
pub fn extract_json(response: &str) -> Result<Value, ReasoningError> {
    let start = response
        .find('{')
        .ok_or_else(|| ReasoningError::Decode("no JSON object in response".to_string()))?;
    let end = response
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| ReasoningError::Decode("unterminated JSON object".to_string()))?;
    serde_json::from_str(&response[start..=end]).map_err(|e| ReasoningError::Decode(e.to_string()))
}
