//! Speech synthesis via ElevenLabs, relayed to the caller as it arrives.

use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::json;
use tracing::{debug, info, warn};

use talkboard_core::config::TtsConfig;
use talkboard_core::types::Stage;
use talkboard_core::{Result, TalkboardError};

const DEFAULT_BASE_URL: &str = "https://api.elevenlabs.io";
const DEFAULT_VOICE_ID: &str = "21m00Tcm4TlvDq8ikWAM"; // ElevenLabs "Rachel"
const DEFAULT_MODEL: &str = "eleven_turbo_v2";
const DEFAULT_OUTPUT_FORMAT: &str = "mp3_44100_128";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

pub type AudioStream = Pin<Box<dyn Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send>>;

/// Audio payload, either relayed chunk by chunk or fully buffered.
pub enum SpeechBody {
    Stream(AudioStream),
    Buffered(Bytes),
}

impl std::fmt::Debug for SpeechBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream(_) => f.write_str("SpeechBody::Stream"),
            Self::Buffered(b) => write!(f, "SpeechBody::Buffered({} bytes)", b.len()),
        }
    }
}

#[derive(Debug)]
pub struct SpeechAudio {
    pub content_type: String,
    pub voice_id: String,
    pub body: SpeechBody,
}

impl SpeechAudio {
    /// Drain the body into memory.
    pub async fn into_bytes(self) -> anyhow::Result<Bytes> {
        match self.body {
            SpeechBody::Buffered(bytes) => Ok(bytes),
            SpeechBody::Stream(mut stream) => {
                let mut buf = Vec::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(Bytes::from(buf))
            }
        }
    }
}

pub struct SpeechSynthesizer {
    config: TtsConfig,
    client: reqwest::Client,
}

impl SpeechSynthesizer {
    pub fn new(config: TtsConfig) -> Self {
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

    /// Build the streaming TTS request URL for a given voice.
    pub fn tts_url(&self, voice: &str) -> String {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/');
        let format = self
            .config
            .output_format
            .as_deref()
            .unwrap_or(DEFAULT_OUTPUT_FORMAT);
        format!("{base}/v1/text-to-speech/{voice}/stream?output_format={format}")
    }

    /// Synthesize `text` with `voice_id` (or the configured default voice).
    pub async fn synthesize(&self, text: &str, voice_id: Option<&str>) -> Result<SpeechAudio> {
        let api_key = self.config.resolve_api_key().ok_or_else(|| {
            TalkboardError::Config(
                "TTS not configured. Set tts.api_key in config or ELEVENLABS_API_KEY environment variable.".into(),
            )
        })?;

        let text = text.trim();
        if text.is_empty() {
            return Err(TalkboardError::Validation("Text is required".into()));
        }

        let voice = voice_id
            .filter(|v| !v.trim().is_empty())
            .or(self.config.default_voice.as_deref())
            .unwrap_or(DEFAULT_VOICE_ID)
            .to_string();
        let model = self
            .config
            .default_model
            .as_deref()
            .unwrap_or(DEFAULT_MODEL);
        let url = self.tts_url(&voice);

        debug!(voice = %voice, model, text_len = text.len(), "Starting TTS request");

        let resp = self
            .client
            .post(&url)
            .header("xi-api-key", &api_key)
            .header("Content-Type", "application/json")
            .header("Accept", "audio/mpeg")
            .json(&json!({
                "text": text,
                "model_id": model,
                "voice_settings": {
                    "stability": 0.5,
                    "similarity_boost": 0.75
                }
            }))
            .send()
            .await
            .map_err(|e| {
                warn!(stage = %Stage::Speech, %e, "TTS request failed");
                TalkboardError::upstream(Stage::Speech, TRANSPORT_FAILURE)
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            let message = upstream_error_message(status, &body);
            warn!(stage = %Stage::Speech, %status, message = %message, "TTS API error");
            return Err(TalkboardError::upstream(Stage::Speech, message));
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| v.starts_with("audio/"))
            .unwrap_or("audio/mpeg")
            .to_string();

        let body = if self.config.stream {
            SpeechBody::Stream(Box::pin(resp.bytes_stream()))
        } else {
            let bytes = resp
                .bytes()
                .await
                .map_err(|e| {
                    warn!(stage = %Stage::Speech, %e, "TTS body read failed");
                    TalkboardError::upstream(Stage::Speech, TRANSPORT_FAILURE)
                })?;
            SpeechBody::Buffered(bytes)
        };

        info!(voice = %voice, model, streamed = self.config.stream, "TTS audio ready");

        Ok(SpeechAudio {
            content_type,
            voice_id: voice,
            body,
        })
    }
}

/// Client-facing message for failures that never produced a provider response.
const TRANSPORT_FAILURE: &str = "Speech synthesis failed";

/// Pull a human-readable message out of an upstream error body.
///
/// Looks at `detail.message`, `detail`, `message`, `error.message` and
/// `error` in that order, then falls back to the raw body text.
pub fn upstream_error_message(status: reqwest::StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let candidates = [
            value.pointer("/detail/message"),
            value.get("detail"),
            value.get("message"),
            value.pointer("/error/message"),
            value.get("error"),
        ];
        for candidate in candidates.into_iter().flatten() {
            if let Some(s) = candidate.as_str().map(str::trim).filter(|s| !s.is_empty()) {
                return s.to_string();
            }
        }
    }

    let raw = body.trim();
    if raw.is_empty() {
        format!("Speech synthesis failed with status {status}")
    } else {
        raw.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    fn unconfigured() -> TtsConfig {
        TtsConfig {
            api_key: None,
            api_key_env: None,
            ..TtsConfig::default()
        }
    }

    #[test]
    fn test_tts_url_defaults_and_override() {
        let synth = SpeechSynthesizer::new(unconfigured());
        let url = synth.tts_url("Rachel");
        assert!(url.starts_with("https://api.elevenlabs.io/v1/text-to-speech/Rachel/stream"));
        assert!(url.ends_with("output_format=mp3_44100_128"));

        let synth = SpeechSynthesizer::new(TtsConfig {
            base_url: Some("http://localhost:7000/".into()),
            output_format: Some("mp3_22050_32".into()),
            ..unconfigured()
        });
        assert_eq!(
            synth.tts_url("v1"),
            "http://localhost:7000/v1/text-to-speech/v1/stream?output_format=mp3_22050_32"
        );
    }

    #[test]
    fn test_error_message_extraction_order() {
        let status = StatusCode::UNAUTHORIZED;
        assert_eq!(
            upstream_error_message(status, r#"{"detail":{"status":"invalid_api_key","message":"Invalid API key"}}"#),
            "Invalid API key"
        );
        assert_eq!(
            upstream_error_message(status, r#"{"detail":"Voice not found"}"#),
            "Voice not found"
        );
        assert_eq!(
            upstream_error_message(status, r#"{"message":"quota exceeded"}"#),
            "quota exceeded"
        );
        assert_eq!(
            upstream_error_message(status, r#"{"error":{"message":"bad model"}}"#),
            "bad model"
        );
        assert_eq!(upstream_error_message(status, "gateway timeout"), "gateway timeout");
        assert!(upstream_error_message(status, "").contains("401"));
    }

    #[tokio::test]
    async fn test_missing_key_is_config_error() {
        let synth = SpeechSynthesizer::new(unconfigured());
        let err = synth.synthesize("hello", None).await.unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn test_transport_failure_hides_endpoint() {
        let synth = SpeechSynthesizer::new(TtsConfig {
            api_key: Some("key".into()),
            base_url: Some("http://127.0.0.1:9".into()),
            ..unconfigured()
        });
        let err = synth.synthesize("hello", None).await.unwrap_err();
        match err {
            TalkboardError::Upstream { stage, message } => {
                assert_eq!(stage, Stage::Speech);
                assert_eq!(message, "Speech synthesis failed");
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_buffered_into_bytes() {
        let audio = SpeechAudio {
            content_type: "audio/mpeg".into(),
            voice_id: "v".into(),
            body: SpeechBody::Buffered(Bytes::from_static(b"ID3")),
        };
        assert_eq!(audio.into_bytes().await.unwrap(), Bytes::from_static(b"ID3"));
    }
}
