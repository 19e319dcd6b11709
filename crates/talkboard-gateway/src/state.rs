//! Gateway shared state.

use std::sync::Arc;
use std::time::Instant;

use talkboard_core::TalkboardError;
use talkboard_core::config::Config;
use talkboard_media::{SpeechSynthesizer, Transcriber};
use talkboard_pipeline::Pipeline;

use crate::error::ApiError;

/// Shared state accessible from all handlers.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub pipeline: Pipeline,
    pub transcriber: Transcriber,
    pub speech: SpeechSynthesizer,
    pub started_at: Instant,
    expose_errors: bool,
}

impl GatewayState {
    /// Build every client from configuration.
    pub fn new(config: Arc<Config>) -> Self {
        let pipeline = Pipeline::from_config(&config);
        let transcriber = Transcriber::new(config.transcription_config());
        let speech = SpeechSynthesizer::new(config.tts_config());
        Self::from_parts(config, pipeline, transcriber, speech)
    }

    pub fn from_parts(
        config: Arc<Config>,
        pipeline: Pipeline,
        transcriber: Transcriber,
        speech: SpeechSynthesizer,
    ) -> Self {
        let expose_errors = config.gateway_config().expose_errors;
        Self {
            config,
            pipeline,
            transcriber,
            speech,
            started_at: Instant::now(),
            expose_errors,
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Convert a pipeline error into an API response error.
    pub fn error(&self, err: TalkboardError) -> ApiError {
        ApiError::from_error(err, self.expose_errors)
    }
}
