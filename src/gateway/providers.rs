//! HTTP clients for the three supported provider back-ends.
//!
//! Each client owns a `reqwest::Client` with its per-provider timeout baked
//! in and translates between [`CompletionRequest`] and the provider's wire
//! format. HTTP statuses are classified through [`FailureKind::from_status`]
//! so the fallback manager sees a uniform failure taxonomy.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::ProviderSettings;

use super::provider::{
    CompletionRequest, CompletionResponse, FailureKind, LlmProvider, ProviderError,
};

fn build_client(settings: &ProviderSettings, provider: &str) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(settings.timeout)
        .build()
        .map_err(|e| ProviderError::new(provider, FailureKind::Unknown, e.to_string()))
}

async fn classify_response(
    provider: &str,
    response: reqwest::Response,
) -> Result<serde_json::Value, ProviderError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::new(
            provider,
            FailureKind::from_status(status.as_u16()),
            format!("HTTP {status}: {body}"),
        ));
    }
    response
        .json()
        .await
        .map_err(|e| ProviderError::new(provider, FailureKind::Unknown, e.to_string()))
}

// ============================================================================
// OpenAI chat completions
// ============================================================================

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

/// Client for the OpenAI chat-completions API.
pub struct OpenAiProvider {
    name: String,
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl OpenAiProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let api_key = settings.api_key.clone().ok_or_else(|| {
            ProviderError::new(
                "openai",
                FailureKind::Authentication,
                "OPENAI_API_KEY is not configured",
            )
        })?;
        Ok(Self {
            name: "openai".to_string(),
            client: build_client(settings, "openai")?,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": request.prompt}],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(&self.name, &e))?;
        let value = classify_response(&self.name, response).await?;
        let parsed: ChatCompletion = serde_json::from_value(value)
            .map_err(|e| ProviderError::new(&self.name, FailureKind::Unknown, e.to_string()))?;
        let choice = parsed.choices.into_iter().next().ok_or_else(|| {
            ProviderError::new(&self.name, FailureKind::Unknown, "empty choices array")
        })?;
        Ok(CompletionResponse {
            text: choice.message.content,
            model: parsed.model,
            prompt_tokens: parsed.usage.as_ref().map(|u| u.prompt_tokens),
            completion_tokens: parsed.usage.as_ref().map(|u| u.completion_tokens),
        })
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

// ============================================================================
// Ollama
// ============================================================================

#[derive(Deserialize)]
struct OllamaCompletion {
    response: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

/// Client for a local Ollama daemon.
pub struct OllamaProvider {
    name: String,
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        Ok(Self {
            name: "ollama".to_string(),
            client: build_client(settings, "ollama")?,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
        })
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let body = json!({
            "model": self.model,
            "prompt": request.prompt,
            "stream": false,
            "options": {
                "num_predict": request.max_tokens,
                "temperature": request.temperature,
            },
        });
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(&self.name, &e))?;
        let value = classify_response(&self.name, response).await?;
        let parsed: OllamaCompletion = serde_json::from_value(value)
            .map_err(|e| ProviderError::new(&self.name, FailureKind::Unknown, e.to_string()))?;
        Ok(CompletionResponse {
            text: parsed.response,
            model: parsed.model,
            prompt_tokens: parsed.prompt_eval_count,
            completion_tokens: parsed.eval_count,
        })
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

// ============================================================================
// OpenAI-compatible custom endpoint
// ============================================================================

/// Client for any OpenAI-compatible endpoint (vLLM, llama.cpp server,
/// proprietary gateways). Auth header is optional.
pub struct CustomProvider {
    name: String,
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl CustomProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        if settings.base_url.is_empty() {
            return Err(ProviderError::new(
                "custom",
                FailureKind::InvalidRequest,
                "CUSTOM_LLM_BASE_URL is not configured",
            ));
        }
        Ok(Self {
            name: "custom".to_string(),
            client: build_client(settings, "custom")?,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            api_key: settings.api_key.clone(),
        })
    }
}

#[async_trait]
impl LlmProvider for CustomProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": request.prompt}],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(&self.name, &e))?;
        let value = classify_response(&self.name, response).await?;
        let parsed: ChatCompletion = serde_json::from_value(value)
            .map_err(|e| ProviderError::new(&self.name, FailureKind::Unknown, e.to_string()))?;
        let choice = parsed.choices.into_iter().next().ok_or_else(|| {
            ProviderError::new(&self.name, FailureKind::Unknown, "empty choices array")
        })?;
        Ok(CompletionResponse {
            text: choice.message.content,
            model: parsed.model,
            prompt_tokens: parsed.usage.as_ref().map(|u| u.prompt_tokens),
            completion_tokens: parsed.usage.as_ref().map(|u| u.completion_tokens),
        })
    }
}
