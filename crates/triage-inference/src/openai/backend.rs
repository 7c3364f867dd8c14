//! OpenAI-compatible classifier client implementation.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

use triage_core::{defaults, ClassifierClient, Error, Result};

use super::error::{to_triage_error, OpenAIErrorCode};
use super::types::*;

/// Configuration for the OpenAI-compatible classifier.
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    /// Base URL for the API endpoint, including the version path.
    pub base_url: String,
    /// API key. `None` means the classifier is unconfigured.
    pub api_key: Option<String>,
    pub model: String,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::LLM_BASE_URL.to_string(),
            api_key: None,
            model: defaults::LLM_MODEL.to_string(),
            timeout_seconds: defaults::LLM_TIMEOUT_SECS,
            temperature: Some(defaults::LLM_TEMPERATURE),
            max_tokens: Some(defaults::LLM_MAX_TOKENS),
        }
    }
}

impl OpenAIConfig {
    /// Read `LLM_BASE_URL`, `LLM_API_KEY` (falling back to `OPENAI_API_KEY`),
    /// `LLM_MODEL` and `LLM_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let api_key = std::env::var("LLM_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| {
                std::env::var("OPENAI_API_KEY")
                    .ok()
                    .filter(|k| !k.trim().is_empty())
            });

        Self {
            base_url: std::env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| defaults::LLM_BASE_URL.to_string()),
            api_key,
            model: std::env::var("LLM_MODEL").unwrap_or_else(|_| defaults::LLM_MODEL.to_string()),
            timeout_seconds: std::env::var("LLM_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults::LLM_TIMEOUT_SECS),
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout_seconds(mut self, secs: u64) -> Self {
        self.timeout_seconds = secs;
        self
    }
}

/// Classifier client speaking the OpenAI chat-completions protocol.
pub struct OpenAIClassifier {
    client: Client,
    config: OpenAIConfig,
}

impl OpenAIClassifier {
    pub fn new(config: OpenAIConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "inference",
            component = "openai",
            base_url = %config.base_url,
            model = %config.model,
            configured = config.api_key.is_some(),
            "Initializing classifier client"
        );

        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(OpenAIConfig::from_env())
    }

    pub fn config(&self) -> &OpenAIConfig {
        &self.config
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.api_key {
            Some(ref api_key) => req.header("Authorization", format!("Bearer {}", api_key)),
            None => req,
        }
    }

    /// Turn a non-success response into a triage error.
    async fn error_from_response(response: reqwest::Response) -> Error {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let (error_type, message) = match serde_json::from_str::<OpenAIErrorResponse>(&body) {
            Ok(parsed) => (
                parsed.error.code.unwrap_or(parsed.error.error_type),
                parsed.error.message,
            ),
            Err(_) => (String::new(), body),
        };

        let code = OpenAIErrorCode::from_response(status.as_u16(), &error_type);
        warn!(
            subsystem = "inference",
            component = "openai",
            status = status.as_u16(),
            error_code = ?code,
            retryable = code.is_retryable(),
            error = %message,
            "Classifier request failed"
        );
        to_triage_error(code, &format!("{} {}", status, message))
    }
}

#[async_trait]
impl ClassifierClient for OpenAIClassifier {
    fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    async fn classify(&self, system_prompt: &str, user_text: &str) -> Result<String> {
        if !self.is_configured() {
            return Err(Error::ConfigurationMissing("API key".to_string()));
        }

        debug!(
            subsystem = "inference",
            component = "openai",
            model = %self.config.model,
            prompt_len = system_prompt.len() + user_text.len(),
            "Sending classification request"
        );

        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage::system(system_prompt), ChatMessage::user(user_text)],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream: false,
        };

        let response = self
            .authorize(self.client.post(self.url("/chat/completions")))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let result: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        let content = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| Error::InvalidResponse("completion has no content".to_string()))?;

        debug!(response_len = content.len(), "Classification response received");
        Ok(content)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn health_check(&self) -> Result<bool> {
        let response = self
            .authorize(self.client.get(self.url("/models")))
            .timeout(Duration::from_secs(5))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                debug!(subsystem = "inference", component = "openai", "Health check passed");
                Ok(true)
            }
            Ok(resp) => {
                warn!(
                    subsystem = "inference",
                    component = "openai",
                    status = resp.status().as_u16(),
                    "Health check failed"
                );
                Ok(false)
            }
            Err(e) => {
                debug!(subsystem = "inference", component = "openai", error = %e, "Health check unreachable");
                Ok(false)
            }
        }
    }
}
