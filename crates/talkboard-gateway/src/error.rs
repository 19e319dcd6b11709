//! API error responses.
//!
//! Every failure leaves the gateway as `{ "error": message, "code": kind }`.
//! Upstream failure details stay in the logs unless `gateway.expose_errors`
//! is set. Speech synthesis messages are the exception: they are extracted
//! from the provider's error body and are meant for the user.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use talkboard_core::TalkboardError;
use talkboard_core::types::Stage;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("No transcription: {0}")]
    NoTranscription(String),

    #[error("Busy: {0}")]
    Busy(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

fn generic_upstream_message(stage: Stage) -> &'static str {
    match stage {
        Stage::Transcription => "Transcription failed",
        Stage::Planning => "Query planning failed",
        Stage::Retrieval => "Symbol search failed",
        Stage::Ranking => "Symbol ranking failed",
        Stage::Phrase => "Phrase composition failed",
        Stage::Speech => "Speech synthesis failed",
    }
}

impl ApiError {
    /// Map a pipeline error, logging the cause.
    pub fn from_error(err: TalkboardError, expose_errors: bool) -> Self {
        match err {
            TalkboardError::Validation(msg) => Self::BadRequest(msg),
            TalkboardError::NoTranscription => {
                Self::NoTranscription("No speech was recognized in the recording".into())
            }
            TalkboardError::Busy(msg) => Self::Busy(msg),
            TalkboardError::Config(msg) => {
                error!(code = "config", %msg, "Request failed: missing configuration");
                Self::Config(msg)
            }
            TalkboardError::Upstream { stage, message } => {
                warn!(%stage, code = "upstream", %message, "Request failed upstream");
                if stage == Stage::Speech || expose_errors {
                    Self::Upstream(message)
                } else {
                    Self::Upstream(generic_upstream_message(stage).into())
                }
            }
            other => {
                error!(code = other.kind(), error = %other, "Request failed");
                if expose_errors {
                    Self::Internal(other.to_string())
                } else {
                    Self::Internal("An internal error occurred".into())
                }
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NoTranscription(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Busy(_) => StatusCode::CONFLICT,
            Self::Config(_) | Self::Upstream(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code, matching [`TalkboardError::kind`].
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "validation",
            Self::NoTranscription(_) => "no_transcription",
            Self::Busy(_) => "busy",
            Self::Config(_) => "config",
            Self::Upstream(_) => "upstream",
            Self::Internal(_) => "internal",
        }
    }

    fn message(self) -> String {
        match self {
            Self::BadRequest(m)
            | Self::NoTranscription(m)
            | Self::Busy(m)
            | Self::Config(m)
            | Self::Upstream(m)
            | Self::Internal(m) => m,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        #[cfg(feature = "metrics")]
        crate::metrics::record_error(code);

        let body = ErrorResponse {
            error: self.message(),
            code,
        };
        (status, Json(body)).into_response()
    }
}
