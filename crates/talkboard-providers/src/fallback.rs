//! Model fallback chain: one provider and an ordered list of models.
//!
//! Each model is streamed in turn and its text chunks concatenated. The first
//! model to produce non-empty text wins; errors and empty answers move on to
//! the next model.

use std::sync::Arc;
use std::time::Duration;

use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use talkboard_core::config::ProviderConfig;
use talkboard_core::types::Stage;
use talkboard_core::{Result, TalkboardError};

use crate::google::GeminiProvider;
use crate::{CompletionRequest, Credentials, LlmProvider};

const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Prompt handed to [`ModelChain::complete`].
#[derive(Debug, Clone, Default)]
pub struct Prompt {
    pub system: Option<String>,
    pub user: String,
    pub json_output: bool,
}

impl Prompt {
    pub fn json(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            user: user.into(),
            json_output: true,
        }
    }

    pub fn text(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            user: user.into(),
            json_output: false,
        }
    }
}

pub struct ModelChain {
    provider: Arc<dyn LlmProvider>,
    credentials: Option<Credentials>,
    models: Vec<String>,
    max_tokens: u32,
    temperature: Option<f64>,
}

impl ModelChain {
    /// `credentials: None` marks the chain as unconfigured; every call then
    /// fails fast with a configuration error.
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        credentials: Option<Credentials>,
        models: Vec<String>,
    ) -> Self {
        Self {
            provider,
            credentials,
            models,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
        }
    }

    /// Build a Gemini-backed chain from provider config.
    pub fn from_config(config: &ProviderConfig) -> Self {
        let timeout = config.timeout_secs.map(Duration::from_secs);
        let provider: Arc<dyn LlmProvider> = match timeout {
            Some(t) => Arc::new(GeminiProvider::with_timeout(config.base_url.as_deref(), t)),
            None => Arc::new(GeminiProvider::new(config.base_url.as_deref())),
        };
        let credentials = config.resolve_api_key().map(Credentials::api_key);

        let mut chain = Self::new(provider, credentials, config.model_chain());
        if let Some(max_tokens) = config.max_tokens {
            chain.max_tokens = max_tokens;
        }
        chain.temperature = config.temperature;
        chain
    }

    pub fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn provider_id(&self) -> &str {
        self.provider.id()
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// Run the prompt through the chain.
    ///
    /// Returns `Ok("")` when every model answered but none produced text, and
    /// an upstream error when every model failed outright.
    pub async fn complete(&self, stage: Stage, prompt: &Prompt) -> Result<String> {
        let Some(credentials) = &self.credentials else {
            return Err(TalkboardError::Config(format!(
                "Language model provider '{}' has no API key configured",
                self.provider.id()
            )));
        };

        let mut last_error: Option<anyhow::Error> = None;
        let mut answered_empty = false;

        for (i, model) in self.models.iter().enumerate() {
            let request = CompletionRequest {
                model: model.clone(),
                prompt: prompt.user.clone(),
                system: prompt.system.clone(),
                max_tokens: self.max_tokens,
                temperature: self.temperature,
                json_output: prompt.json_output,
            };

            match self.collect_text(&request, credentials).await {
                Ok(text) if !text.trim().is_empty() => {
                    if i > 0 {
                        info!(%stage, model = %model, attempt = i + 1, "Model fallback succeeded");
                    }
                    return Ok(text);
                }
                Ok(_) => {
                    debug!(%stage, model = %model, "Model returned empty text, trying next");
                    answered_empty = true;
                }
                Err(e) => {
                    warn!(%stage, model = %model, attempt = i + 1, %e, "Model failed, trying next");
                    last_error = Some(e);
                }
            }
        }

        if answered_empty {
            return Ok(String::new());
        }

        Err(TalkboardError::upstream(
            stage,
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "No models configured".to_string()),
        ))
    }

    async fn collect_text(
        &self,
        request: &CompletionRequest,
        credentials: &Credentials,
    ) -> anyhow::Result<String> {
        let mut stream = self.provider.stream(request, credentials).await?;
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if let Some(delta) = chunk.delta {
                text.push_str(&delta);
            }
            if let Some(usage) = chunk.usage {
                debug!(
                    model = %request.model,
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    stop_reason = chunk.stop_reason.as_deref(),
                    "Model usage"
                );
            }
        }
        Ok(text)
    }
}
