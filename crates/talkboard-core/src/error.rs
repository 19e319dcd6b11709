use thiserror::Error;

use crate::types::Stage;

#[derive(Debug, Error)]
pub enum TalkboardError {
    /// A required credential or setting is missing. Never degraded silently.
    #[error("Config error: {0}")]
    Config(String),

    /// Caller input rejected before any network call.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{stage} upstream error: {message}")]
    Upstream { stage: Stage, message: String },

    /// The speech-to-text provider answered but recognized no speech.
    #[error("No transcription: the recording contained no recognizable speech")]
    NoTranscription,

    /// Another run already holds the session slot.
    #[error("Busy: {0}")]
    Busy(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TalkboardError {
    pub fn upstream(stage: Stage, message: impl Into<String>) -> Self {
        Self::Upstream {
            stage,
            message: message.into(),
        }
    }

    /// Stable machine-readable code, used in API error bodies and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Validation(_) => "validation",
            Self::Upstream { .. } => "upstream",
            Self::NoTranscription => "no_transcription",
            Self::Busy(_) => "busy",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Other(_) => "internal",
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, TalkboardError>;
