//! The provider contract and the HTTP client for OpenAI-compatible APIs.
//!
//! OpenAI, Groq, Google (Gemini) and Anthropic all expose the
//! `chat/completions` + `embeddings` JSON API, so one client covers every
//! provider in the routing file; only the base URL differs.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::ProviderConfig;
use crate::error::{AiError, Result};
use crate::router::{AiRouter, CapabilityDescriptor};

const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Generation knobs shared by every provider.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: Option<String>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1024,
            system_prompt: None,
        }
    }
}

/// A text-generation / embedding backend bound to one model.
#[async_trait]
pub trait AiProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Builds a provider for a resolved descriptor.
pub trait ProviderFactory: Send + Sync {
    fn build(&self, descriptor: &CapabilityDescriptor) -> Result<Arc<dyn AiProvider>>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Builds [`OpenAiCompatibleProvider`]s from the `ai_providers` section.
pub struct ProviderRegistry {
    client: reqwest::Client,
    configs: BTreeMap<String, ProviderConfig>,
}

impl ProviderRegistry {
    pub fn new(configs: BTreeMap<String, ProviderConfig>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AiError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, configs })
    }

    /// A registry for every provider the router knows about.
    pub fn from_router(router: &AiRouter) -> Result<Self> {
        let configs = router
            .list_providers()
            .into_iter()
            .filter_map(|name| {
                router
                    .provider_config(name)
                    .ok()
                    .map(|config| (name.to_string(), config.clone()))
            })
            .collect();
        Self::new(configs)
    }
}

impl ProviderFactory for ProviderRegistry {
    fn build(&self, descriptor: &CapabilityDescriptor) -> Result<Arc<dyn AiProvider>> {
        let name = descriptor.provider.as_str();
        let config = self
            .configs
            .get(name)
            .ok_or_else(|| AiError::not_configured("provider lookup", Some(name)))?;

        let base_url = config
            .base_url
            .clone()
            .or_else(|| default_base_url(name).map(str::to_string))
            .ok_or_else(|| AiError::not_configured("provider lookup", Some(name)))?;

        Ok(Arc::new(OpenAiCompatibleProvider {
            client: self.client.clone(),
            name: name.to_string(),
            model: descriptor.model.clone(),
            embedding_model: config
                .embedding_model
                .clone()
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            api_key: config.api_key.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }))
    }
}

fn default_base_url(provider: &str) -> Option<&'static str> {
    match provider {
        "openai" => Some("https://api.openai.com/v1"),
        "groq" => Some("https://api.groq.com/openai/v1"),
        "google" => Some("https://generativelanguage.googleapis.com/v1beta/openai"),
        "anthropic" => Some("https://api.anthropic.com/v1"),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible client
// ---------------------------------------------------------------------------

pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    name: String,
    model: String,
    embedding_model: String,
    api_key: String,
    base_url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiCompatibleProvider {
    async fn post(&self, path: &str, body: serde_json::Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/{path}", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AiError::Connection {
                provider: self.name.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
                .map(Duration::from_secs_f64);
            return Err(AiError::Quota {
                provider: self.name.clone(),
                message: "rate limit exceeded".into(),
                retry_after,
            });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(self.bad_response(format!("HTTP {status}: {text}")));
        }
        Ok(response)
    }

    fn bad_response(&self, message: impl Into<String>) -> AiError {
        AiError::Response {
            provider: self.name.clone(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl AiProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": chat_messages(prompt, options.system_prompt.as_deref()),
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
        });

        let response = self.post("chat/completions", body).await?;
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| self.bad_response(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.is_empty())
            .ok_or_else(|| self.bad_response("empty completion"))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = json!({
            "model": self.embedding_model,
            "input": text,
        });

        let response = self.post("embeddings", body).await?;
        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| self.bad_response(e.to_string()))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| self.bad_response("empty embedding"))
    }
}

fn chat_messages(prompt: &str, system_prompt: Option<&str>) -> Vec<serde_json::Value> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = system_prompt {
        messages.push(json!({ "role": "system", "content": system }));
    }
    messages.push(json!({ "role": "user", "content": prompt }));
    messages
}
