//! Google Generative AI (Gemini) provider.
//!
//! Implements streaming via the `streamGenerateContent` endpoint with SSE.
//! The API key travels in the `x-goog-api-key` header.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::{debug, trace};

use crate::sse::parse_sse_stream;
use crate::{ChunkStream, ChunkUsage, CompletionChunk, CompletionRequest, Credentials, LlmProvider};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

const DEFAULT_TIMEOUT_SECS: u64 = 60;

pub struct GeminiProvider {
    pub base_url: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(base_url: Option<&str>) -> Self {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: Option<&str>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            client,
        }
    }

    fn stream_url(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{model}:streamGenerateContent?alt=sse",
            self.base_url
        )
    }
}

// --- Gemini request/response types ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<serde_json::Value>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
}

impl GeminiRequest {
    fn from_completion(request: &CompletionRequest) -> Self {
        Self {
            contents: vec![json!({
                "role": "user",
                "parts": [{ "text": request.prompt }],
            })],
            system_instruction: request
                .system
                .as_ref()
                .map(|s| json!({ "parts": [{ "text": s }] })),
            generation_config: GenerationConfig {
                max_output_tokens: request.max_tokens,
                temperature: request.temperature,
                response_mime_type: request.json_output.then_some("application/json"),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiStreamChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

impl GeminiStreamChunk {
    /// Flatten one SSE payload into a completion chunk. Text parts are
    /// concatenated; a payload may carry text, usage and a finish reason at once.
    fn into_completion_chunk(self) -> CompletionChunk {
        let usage = self.usage_metadata.map(|u| ChunkUsage {
            input_tokens: Some(u.prompt_token_count),
            output_tokens: Some(u.candidates_token_count),
        });

        let mut delta = String::new();
        let mut stop_reason = None;
        if let Some(candidate) = self.candidates.into_iter().next() {
            if let Some(content) = candidate.content {
                for part in content.parts {
                    if let Some(text) = part.text {
                        delta.push_str(&text);
                    }
                }
            }
            stop_reason = candidate.finish_reason;
        }

        CompletionChunk {
            delta: (!delta.is_empty()).then_some(delta),
            usage,
            stop_reason,
        }
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn id(&self) -> &str {
        "google"
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
        credentials: &Credentials,
    ) -> anyhow::Result<ChunkStream> {
        let body = GeminiRequest::from_completion(request);
        let url = self.stream_url(&request.model);

        debug!(model = %request.model, json = request.json_output, "Streaming Gemini API");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &credentials.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Gemini API error {status}: {body}");
        }

        let chunks = parse_sse_stream(response).filter_map(|event| match event {
            Ok(event) => match serde_json::from_str::<GeminiStreamChunk>(event.data.trim()) {
                Ok(chunk) => Some(Ok(chunk.into_completion_chunk())),
                Err(e) => {
                    trace!(%e, "Failed to parse Gemini chunk");
                    None
                }
            },
            Err(e) => Some(Err(e)),
        });

        Ok(Box::pin(chunks))
    }
}
