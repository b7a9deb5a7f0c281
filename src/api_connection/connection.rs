use async_trait::async_trait;
use dotenv::dotenv;
use reqwest::{Client, StatusCode};
use std::env;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::endpoints::{ChatCompletionRequest, ChatCompletionResponse, Prompt, ProviderKind};

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
const EXPONENTIAL_BACKOFF_BASE: u32 = 2;
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ApiConnectionError {
    #[error("API key not found in environment: {0}")]
    MissingApiKey(String),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("API error {status}: {error_body}")]
    ApiError { status: StatusCode, error_body: String },
    #[error("API returned no completion text")]
    EmptyResponse,
}

impl ApiConnectionError {
    /// Transport failures, timeouts, rate limits and server errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiConnectionError::NetworkError(_) | ApiConnectionError::Timeout(_) => true,
            ApiConnectionError::ApiError { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}

/// Turns a prompt into generated text.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn complete(&self, prompt: &Prompt) -> Result<String, ApiConnectionError>;
}

/// Chat-completions client for an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct Provider {
    kind: ProviderKind,
    api_key_env_var: String,
    model: String,
    base_url: String,
    timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
    client: Client,
}

impl Provider {
    pub fn new(kind: ProviderKind, api_key_env_var: &str) -> Self {
        dotenv().ok();
        let timeout = Duration::from_secs(DEFAULT_TIMEOUT_SECONDS);
        Self {
            kind,
            api_key_env_var: api_key_env_var.to_string(),
            model: kind.default_model().to_string(),
            base_url: kind.base_url().to_string(),
            timeout,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            client: build_client(timeout),
        }
    }

    pub fn openrouter(api_key_env_var_name: &str) -> Self {
        Self::new(ProviderKind::OpenRouter, api_key_env_var_name)
    }

    pub fn openai(api_key_env_var_name: &str) -> Self {
        Self::new(ProviderKind::OpenAi, api_key_env_var_name)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.client = build_client(timeout);
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Delay before the first retry; doubles on each subsequent one.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn api_key_env_var(&self) -> &str {
        &self.api_key_env_var
    }

    /// Fails early when the API key is not configured.
    pub fn api_key(&self) -> Result<String, ApiConnectionError> {
        dotenv().ok();
        env::var(&self.api_key_env_var).map_err(|_| ApiConnectionError::MissingApiKey(self.api_key_env_var.clone()))
    }

    pub async fn call_chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, ApiConnectionError> {
        let api_key = self.api_key()?;
        let attempts = self.max_retries.saturating_add(1);
        let mut attempt = 1;

        loop {
            debug!(attempt, attempts, model = %self.model, "chat completion request");
            match self.send_once(&api_key, &request).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    let delay = backoff_delay(self.retry_delay, attempt);
                    warn!(error = %e, attempt, attempts, ?delay, "chat completion failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(
        &self,
        api_key: &str,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, ApiConnectionError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .header("Content-Type", "application/json")
            .json(request);

        if self.kind == ProviderKind::OpenRouter {
            let site_url = env::var("SITE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
            let app_name = env::var("APP_NAME").unwrap_or_else(|_| "FoodRag".to_string());
            builder = builder.header("HTTP-Referer", site_url).header("X-Title", app_name);
        }

        let response = builder.send().await.map_err(|e| self.classify(e))?;

        if response.status().is_success() {
            let body = response.text().await.map_err(|e| self.classify(e))?;
            Ok(serde_json::from_str::<ChatCompletionResponse>(&body)?)
        } else {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            Err(ApiConnectionError::ApiError { status, error_body })
        }
    }

    fn classify(&self, error: reqwest::Error) -> ApiConnectionError {
        if error.is_timeout() {
            ApiConnectionError::Timeout(self.timeout)
        } else {
            ApiConnectionError::NetworkError(error)
        }
    }
}

#[async_trait]
impl GenerationService for Provider {
    async fn complete(&self, prompt: &Prompt) -> Result<String, ApiConnectionError> {
        let response = self.call_chat_completion(prompt.to_request(&self.model)).await?;
        response
            .first_content()
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or(ApiConnectionError::EmptyResponse)
    }
}

fn build_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "falling back to default HTTP client");
            Client::new()
        })
}

/// Delay before retry number `attempt` (1-based), capped at [`MAX_RETRY_DELAY`].
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    EXPONENTIAL_BACKOFF_BASE
        .checked_pow(attempt.saturating_sub(1))
        .and_then(|factor| base.checked_mul(factor))
        .map_or(MAX_RETRY_DELAY, |delay| delay.min(MAX_RETRY_DELAY))
}
