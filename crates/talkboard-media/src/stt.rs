//! Speech-to-text for uploaded recordings.

use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, info, warn};

use talkboard_core::config::TranscriptionConfig;
use talkboard_core::types::{AudioUpload, Stage, TranscriptionResult};
use talkboard_core::{Result, TalkboardError};

const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SttProvider {
    ElevenLabs,
    Groq,
    OpenAi,
}

impl SttProvider {
    fn parse(id: &str) -> Result<Self> {
        match id {
            "elevenlabs" => Ok(Self::ElevenLabs),
            "groq" => Ok(Self::Groq),
            "openai" => Ok(Self::OpenAi),
            other => Err(TalkboardError::Config(format!(
                "Unknown transcription provider '{other}' (expected elevenlabs, groq or openai)"
            ))),
        }
    }

    fn base(self) -> &'static str {
        match self {
            Self::ElevenLabs => "https://api.elevenlabs.io",
            Self::Groq => "https://api.groq.com",
            Self::OpenAi => "https://api.openai.com",
        }
    }

    fn path(self) -> &'static str {
        match self {
            Self::ElevenLabs => "/v1/speech-to-text",
            Self::Groq => "/openai/v1/audio/transcriptions",
            Self::OpenAi => "/v1/audio/transcriptions",
        }
    }

    fn default_model(self) -> &'static str {
        match self {
            Self::ElevenLabs => "scribe_v1",
            Self::Groq => "whisper-large-v3-turbo",
            Self::OpenAi => "whisper-1",
        }
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptBody {
    #[serde(default)]
    text: String,
}

/// Client for the configured speech-to-text provider.
pub struct Transcriber {
    config: TranscriptionConfig,
    client: reqwest::Client,
}

impl Transcriber {
    pub fn new(config: TranscriptionConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { config, client }
    }

    pub fn is_configured(&self) -> bool {
        self.config.resolve_api_key().is_some()
    }

    pub fn provider(&self) -> &str {
        &self.config.provider
    }

    /// Full transcription URL, honoring `base_url` overrides. Unknown
    /// providers are a configuration error.
    pub fn endpoint(&self) -> Result<String> {
        let provider = SttProvider::parse(&self.config.provider)?;
        Ok(self.endpoint_for(provider))
    }

    fn endpoint_for(&self, provider: SttProvider) -> String {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or_else(|| provider.base())
            .trim_end_matches('/');
        format!("{base}{}", provider.path())
    }

    /// Transcribe an uploaded recording.
    ///
    /// Fails with a validation error for an empty upload, a configuration
    /// error without an API key, and [`TalkboardError::NoTranscription`] when
    /// the provider recognized nothing.
    pub async fn transcribe(&self, audio: &AudioUpload) -> Result<TranscriptionResult> {
        if audio.bytes.is_empty() {
            return Err(TalkboardError::Validation("No audio file provided".into()));
        }

        let api_key = self.config.resolve_api_key().ok_or_else(|| {
            TalkboardError::Config(
                "Transcription not configured. Set transcription.api_key in config or ELEVENLABS_API_KEY environment variable.".into(),
            )
        })?;

        let kind = SttProvider::parse(&self.config.provider)?;
        let provider = self.config.provider.as_str();
        let model = self
            .config
            .model
            .as_deref()
            .unwrap_or_else(|| kind.default_model());
        let url = self.endpoint_for(kind);

        let start = Instant::now();
        debug!(%url, model, bytes = audio.bytes.len(), "Sending audio for transcription");

        let part = reqwest::multipart::Part::bytes(audio.bytes.clone())
            .file_name(audio.file_name.clone())
            .mime_str(&audio.mime_type)
            .map_err(|e| TalkboardError::Validation(format!("Invalid audio type: {e}")))?;

        let mut form = reqwest::multipart::Form::new().part("file", part);
        let request = if kind == SttProvider::ElevenLabs {
            form = form.text("model_id", model.to_string());
            if let Some(lang) = &self.config.language {
                form = form.text("language_code", lang.clone());
            }
            self.client.post(&url).header("xi-api-key", &api_key)
        } else {
            form = form
                .text("model", model.to_string())
                .text("response_format", "json");
            if let Some(lang) = &self.config.language {
                form = form.text("language", lang.clone());
            }
            self.client
                .post(&url)
                .header("Authorization", format!("Bearer {api_key}"))
        };

        let resp = request.multipart(form).send().await.map_err(|e| {
            warn!(stage = %Stage::Transcription, %e, "Transcription request failed");
            TalkboardError::upstream(Stage::Transcription, e.to_string())
        })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!(stage = %Stage::Transcription, %status, body = %body, "Transcription API error");
            return Err(TalkboardError::upstream(
                Stage::Transcription,
                format!("Transcription API error ({status}): {body}"),
            ));
        }

        let raw = resp
            .text()
            .await
            .map_err(|e| TalkboardError::upstream(Stage::Transcription, e.to_string()))?;
        let text = parse_transcript(&raw);
        let elapsed_ms = start.elapsed().as_millis() as u64;

        if text.is_empty() {
            info!(provider, elapsed_ms, "Transcription returned no text");
            return Err(TalkboardError::NoTranscription);
        }

        info!(
            provider,
            model,
            file = %audio.file_name,
            chars = text.len(),
            elapsed_ms,
            "Audio transcribed"
        );

        Ok(TranscriptionResult {
            text,
            transcription_time_ms: elapsed_ms,
        })
    }
}

/// Accept a JSON `{ "text": ... }` body, falling back to plain text.
fn parse_transcript(raw: &str) -> String {
    match serde_json::from_str::<TranscriptBody>(raw) {
        Ok(body) => body.text.trim().to_string(),
        Err(_) if raw.trim_start().starts_with('{') => String::new(),
        Err(_) => raw.trim().to_string(),
    }
}
