mod ollama;
mod openai;

use async_trait::async_trait;
use std::time::Duration;

pub use ollama::{list_local_models, OllamaProvider};
pub use openai::OpenAiProvider;

/// Result type for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

/// Errors that can occur during LLM operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Response parsing failed: {0}")]
    ParseError(String),
}

impl LlmError {
    /// Configuration problems will not fix themselves on retry
    pub fn is_retryable(&self) -> bool {
        !matches!(self, LlmError::ConfigError(_))
    }
}

/// Request to generate a completion
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Instructions for the model
    pub system_prompt: String,
    /// The prompt text
    pub prompt: String,
    /// Ask the provider to constrain output to a JSON object
    pub json: bool,
    /// Maximum response length in tokens (provider-dependent)
    pub max_tokens: Option<u32>,
    /// Timeout for the request
    pub timeout: Duration,
    /// Optional model override (e.g., "gpt-4o" instead of configured model)
    pub model_override: Option<String>,
}

/// Response from an LLM provider
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    /// The generated text
    pub text: String,
    pub metadata: ResponseMetadata,
}

/// Metadata about the LLM response
#[derive(Debug, Clone)]
pub struct ResponseMetadata {
    /// Name of the provider (e.g., "openai", "ollama")
    pub provider: String,
    /// Model name used
    pub model: String,
    /// Tokens consumed (if available)
    pub tokens_used: Option<u32>,
    /// Latency in milliseconds
    pub latency_ms: u64,
}

/// Trait that all LLM providers must implement
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, request: GenerateRequest) -> LlmResult<GenerateResponse>;

    /// Get the name of this provider
    fn name(&self) -> &str;
}

/// Manager for multiple LLM providers
pub struct LlmManager {
    pub providers: Vec<Box<dyn LlmProvider>>,
}

impl LlmManager {
    pub fn new(providers: Vec<Box<dyn LlmProvider>>) -> Self {
        Self { providers }
    }

    /// Generate from a specific provider with a model override.
    /// model_id format: "provider:model" (e.g., "openai:gpt-4o", "ollama:llama3.2")
    pub async fn generate_from_model(
        &self,
        model_id: &str,
        request: GenerateRequest,
    ) -> LlmResult<(String, GenerateResponse)> {
        let (provider_name, model_name) = model_id.split_once(':').ok_or_else(|| {
            LlmError::ConfigError(
                "Invalid model ID format, expected 'provider:model'".to_string(),
            )
        })?;

        let provider = self
            .providers
            .iter()
            .find(|p| p.name() == provider_name)
            .ok_or_else(|| {
                LlmError::ConfigError(format!("Provider '{}' not configured", provider_name))
            })?;

        let request_with_override = GenerateRequest {
            model_override: Some(model_name.to_string()),
            ..request
        };

        let response = provider.generate(request_with_override).await?;
        Ok((provider_name.to_string(), response))
    }

    /// Generate with `model_id` when given, otherwise with the first
    /// configured provider and its default model
    pub async fn generate(
        &self,
        model_id: Option<&str>,
        request: GenerateRequest,
    ) -> LlmResult<GenerateResponse> {
        match model_id {
            Some(id) => Ok(self.generate_from_model(id, request).await?.1),
            None => {
                let provider = self.providers.first().ok_or_else(|| {
                    LlmError::ConfigError("No LLM providers configured".to_string())
                })?;
                provider.generate(request).await
            }
        }
    }
}

/// Configuration for LLM providers
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub ollama_base_url: Option<String>,
    pub ollama_model: String,
    /// Default timeout for LLM requests
    pub default_timeout: Duration,
    /// Default max tokens for responses
    pub default_max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_model: "gpt-4o-mini".to_string(),
            ollama_base_url: Some("http://localhost:11434".to_string()),
            ollama_model: "llama3.2".to_string(),
            default_timeout: Duration::from_secs(30),
            default_max_tokens: 300,
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

impl LlmConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        // An explicitly empty OLLAMA_BASE_URL disables Ollama
        let ollama_base_url = match std::env::var("OLLAMA_BASE_URL") {
            Ok(_) => non_empty_env("OLLAMA_BASE_URL"),
            Err(_) => defaults.ollama_base_url,
        };

        Self {
            openai_api_key: non_empty_env("OPENAI_API_KEY"),
            openai_model: non_empty_env("OPENAI_MODEL").unwrap_or(defaults.openai_model),
            ollama_base_url,
            ollama_model: non_empty_env("OLLAMA_MODEL").unwrap_or(defaults.ollama_model),
            default_timeout: std::env::var("LLM_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_timeout),
            default_max_tokens: std::env::var("LLM_MAX_TOKENS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.default_max_tokens),
        }
    }

    /// Model id used for agents joined without an explicit model
    pub fn default_model_id(&self) -> Option<String> {
        if self.openai_api_key.is_some() {
            Some(format!("openai:{}", self.openai_model))
        } else {
            self.ollama_base_url
                .as_ref()
                .map(|_| format!("ollama:{}", self.ollama_model))
        }
    }

    /// Build an LlmManager with all configured providers
    pub fn build_manager(&self) -> LlmResult<LlmManager> {
        let mut providers: Vec<Box<dyn LlmProvider>> = Vec::new();

        if let Some(api_key) = &self.openai_api_key {
            providers.push(Box::new(OpenAiProvider::new(
                api_key.clone(),
                self.openai_model.clone(),
            )));
        }

        if let Some(base_url) = &self.ollama_base_url {
            providers.push(Box::new(OllamaProvider::new(
                base_url.clone(),
                self.ollama_model.clone(),
            )?));
        }

        if providers.is_empty() {
            return Err(LlmError::ConfigError(
                "No LLM providers configured. Set OPENAI_API_KEY or OLLAMA_BASE_URL".to_string(),
            ));
        }

        Ok(LlmManager::new(providers))
    }
}

/// Pull the first JSON object out of a model reply. Models like to wrap JSON
/// in prose or code fences even when asked not to.
pub fn extract_json(text: &str) -> LlmResult<&str> {
    let start = text.find('{');
    let end = text.rfind('}');
    match (start, end) {
        (Some(start), Some(end)) if start < end => Ok(&text[start..=end]),
        _ => Err(LlmError::ParseError(format!(
            "No JSON object in response: {}",
            text.chars().take(80).collect::<String>()
        ))),
    }
}
