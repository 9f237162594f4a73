use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quarry_common::{QuarryError, Result};
use serde::{Deserialize, Serialize};

use crate::client::{LlmClient, LlmRequest, LlmResponse};
use crate::gemini::{GeminiClient, GeminiEndpoint};
use crate::openai::OpenAiClient;
use crate::retry::{RetryConfig, RetryingClient};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "gemini", "vertex" or "openai"
    pub provider: String,
    pub model: String,
    /// API key (gemini, openai) or OAuth access token (vertex).
    /// Falls back to the provider's environment variable when unset.
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    /// Cloud project, required for "vertex"
    pub project: Option<String>,
    /// Cloud region, required for "vertex"
    pub location: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Upper bound on one model request, connect to last body byte
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_max_concurrent() -> usize {
    2
}

fn default_timeout_ms() -> u64 {
    120_000
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: "gemini-2.0-flash-001".to_string(),
            api_key: None,
            api_url: None,
            project: None,
            location: None,
            temperature: Some(0.01),
            max_tokens: None,
            timeout_ms: default_timeout_ms(),
            max_concurrent_requests: default_max_concurrent(),
            retry: RetryConfig::default(),
        }
    }
}

impl LlmConfig {
    /// Resolve the credential from config or environment variables.
    ///
    /// Priority:
    /// 1. Explicit non-empty `api_key` in config
    /// 2. Environment variable for the provider:
    ///    - "gemini" -> GOOGLE_API_KEY
    ///    - "vertex" -> GOOGLE_CLOUD_ACCESS_TOKEN
    ///    - "openai" -> OPENAI_API_KEY
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(ref key) = self.api_key {
            if !key.is_empty() {
                return Some(key.clone());
            }
        }

        let env_var = match self.provider.as_str() {
            "gemini" => "GOOGLE_API_KEY",
            "vertex" => "GOOGLE_CLOUD_ACCESS_TOKEN",
            "openai" => "OPENAI_API_KEY",
            _ => return None,
        };

        std::env::var(env_var).ok().filter(|v| !v.is_empty())
    }
}

/// Caps the number of in-flight requests to the wrapped client.
pub struct SemaphoredClient {
    inner: Arc<dyn LlmClient>,
    semaphore: Arc<tokio::sync::Semaphore>,
}

impl SemaphoredClient {
    pub fn new(inner: Arc<dyn LlmClient>, max_concurrent: usize) -> Self {
        Self {
            inner,
            semaphore: Arc::new(tokio::sync::Semaphore::new(max_concurrent.max(1))),
        }
    }
}

#[async_trait]
impl LlmClient for SemaphoredClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| QuarryError::Llm(format!("Semaphore acquire failed: {e}")))?;
        self.inner.complete(request).await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

/// Build the provider client wrapped in retries and a concurrency cap.
pub fn build_llm_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    let timeout = Duration::from_millis(config.timeout_ms);
    let base_client: Box<dyn LlmClient> = match config.provider.as_str() {
        "openai" => Box::new(OpenAiClient::new(
            config.api_url.clone(),
            config.model.clone(),
            config.resolve_api_key(),
            timeout,
        )?),
        "gemini" => {
            let api_key = config.resolve_api_key().ok_or_else(|| {
                QuarryError::Config(
                    "Gemini requires an API key (api_key or GOOGLE_API_KEY)".to_string(),
                )
            })?;
            Box::new(GeminiClient::new(
                config.model.clone(),
                GeminiEndpoint::Studio { api_key },
                timeout,
            )?)
        }
        "vertex" => {
            let (project, location) = match (&config.project, &config.location) {
                (Some(p), Some(l)) => (p.clone(), l.clone()),
                _ => {
                    return Err(QuarryError::Config(
                        "Vertex provider requires project and location".to_string(),
                    ));
                }
            };
            let access_token = config.resolve_api_key().ok_or_else(|| {
                QuarryError::Config(
                    "Vertex requires an access token (api_key or GOOGLE_CLOUD_ACCESS_TOKEN)"
                        .to_string(),
                )
            })?;
            Box::new(GeminiClient::new(
                config.model.clone(),
                GeminiEndpoint::Vertex {
                    project,
                    location,
                    access_token,
                },
                timeout,
            )?)
        }
        other => {
            return Err(QuarryError::Config(format!(
                "Unknown LLM provider: {other}"
            )));
        }
    };

    let retrying: Box<dyn LlmClient> =
        Box::new(RetryingClient::new(base_client, config.retry.clone()));

    let semaphored = SemaphoredClient::new(Arc::from(retrying), config.max_concurrent_requests);

    Ok(Arc::new(semaphored))
}
