//! Route handlers, one per pipeline stage plus the combined suggestion run.

use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use talkboard_core::types::{AudioUpload, AutismProfile, QueryPlan, SymbolCandidate, TranscriptionResult};
use talkboard_media::SpeechBody;
use talkboard_pipeline::Suggestion;

use crate::error::ApiError;
use crate::state::GatewayState;

/// Header carrying the caller's session key for the single-flight guard.
pub const SESSION_HEADER: &str = "x-session-id";

const DEFAULT_FILE_NAME: &str = "recording.webm";
const DEFAULT_AUDIO_TYPE: &str = "audio/webm";

type ApiResult<T> = Result<Json<T>, ApiError>;

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

#[derive(Debug, Deserialize)]
pub struct PlanRequest {
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub profile: Option<AutismProfile>,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub queries: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub candidates: Vec<SymbolCandidate>,
}

#[derive(Debug, Deserialize)]
pub struct FilterRequest {
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub profile: Option<AutismProfile>,
    #[serde(default)]
    pub candidates: Vec<SymbolCandidate>,
}

#[derive(Debug, Serialize)]
pub struct FilterResponse {
    pub selected: Vec<SymbolCandidate>,
}

/// A selected symbol, sent either as its name or as a full candidate.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SymbolRef {
    Name(String),
    Candidate { name: String },
}

impl SymbolRef {
    fn into_name(self) -> String {
        match self {
            Self::Name(name) | Self::Candidate { name } => name,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct InterpretRequest {
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub symbols: Vec<SymbolRef>,
}

#[derive(Debug, Serialize)]
pub struct InterpretResponse {
    pub phrase: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub voice_id: Option<String>,
}

/// `POST /api/transcribe`: multipart upload with a `file` (or `audio`) part.
pub async fn transcribe(
    State(state): State<Arc<GatewayState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<TranscriptionResult> {
    let mut multipart =
        multipart.map_err(|e| ApiError::BadRequest(format!("Expected a multipart upload: {}", e.body_text())))?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {e}")))?
    {
        if !matches!(field.name(), Some("file" | "audio")) {
            continue;
        }
        let file_name = field.file_name().unwrap_or(DEFAULT_FILE_NAME).to_string();
        let mime_type = field.content_type().unwrap_or(DEFAULT_AUDIO_TYPE).to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read audio upload: {e}")))?;
        upload = Some(AudioUpload::new(bytes.to_vec(), file_name, mime_type));
        break;
    }

    let upload = upload.ok_or_else(|| ApiError::BadRequest("No audio file provided".into()))?;
    debug!(file = %upload.file_name, bytes = upload.bytes.len(), "Audio received");

    let result = state
        .transcriber
        .transcribe(&upload)
        .await
        .map_err(|e| state.error(e))?;
    Ok(Json(result))
}

/// `POST /api/plan`
pub async fn plan(
    State(state): State<Arc<GatewayState>>,
    payload: Result<Json<PlanRequest>, JsonRejection>,
) -> ApiResult<QueryPlan> {
    let req = json_body(payload)?;
    let plan = state
        .pipeline
        .planner()
        .plan(&req.transcript, req.profile.as_ref())
        .await
        .map_err(|e| state.error(e))?;
    Ok(Json(plan))
}

/// `POST /api/symbols/search`
pub async fn search_symbols(
    State(state): State<Arc<GatewayState>>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> ApiResult<SearchResponse> {
    let req = json_body(payload)?;
    let outcome = state.pipeline.retriever().retrieve(&req.queries).await;
    Ok(Json(SearchResponse {
        candidates: outcome.candidates,
    }))
}

/// `POST /api/symbols/filter`
pub async fn filter_symbols(
    State(state): State<Arc<GatewayState>>,
    payload: Result<Json<FilterRequest>, JsonRejection>,
) -> ApiResult<FilterResponse> {
    let req = json_body(payload)?;
    let selected = state
        .pipeline
        .ranker()
        .rank(&req.transcript, req.profile.as_ref(), &req.candidates)
        .await
        .map_err(|e| state.error(e))?;
    Ok(Json(FilterResponse { selected }))
}

/// `POST /api/interpret`: always answers with some phrase.
pub async fn interpret(
    State(state): State<Arc<GatewayState>>,
    payload: Result<Json<InterpretRequest>, JsonRejection>,
) -> ApiResult<InterpretResponse> {
    let req = json_body(payload)?;
    let symbols: Vec<String> = req.symbols.into_iter().map(SymbolRef::into_name).collect();
    let composed = state
        .pipeline
        .composer()
        .compose(&req.transcript, &symbols)
        .await;

    #[cfg(feature = "metrics")]
    crate::metrics::record_phrase(composed.source);

    Ok(Json(InterpretResponse {
        phrase: composed.phrase,
    }))
}

/// `POST /api/speak`: relays synthesized audio.
pub async fn speak(
    State(state): State<Arc<GatewayState>>,
    payload: Result<Json<SpeakRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let req = json_body(payload)?;
    let audio = state
        .speech
        .synthesize(&req.text, req.voice_id.as_deref())
        .await
        .map_err(|e| state.error(e))?;

    let body = match audio.body {
        SpeechBody::Stream(stream) => Body::from_stream(stream),
        SpeechBody::Buffered(bytes) => Body::from(bytes),
    };

    Response::builder()
        .header(header::CONTENT_TYPE, audio.content_type)
        .header(header::CACHE_CONTROL, "no-store")
        .body(body)
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// `POST /api/suggest`: plan, retrieve and rank in one run.
pub async fn suggest(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    payload: Result<Json<PlanRequest>, JsonRejection>,
) -> ApiResult<Suggestion> {
    let req = json_body(payload)?;
    let session = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let suggestion = state
        .pipeline
        .suggest(&session, &req.transcript, req.profile.as_ref())
        .await
        .map_err(|e| state.error(e))?;

    info!(
        session = %session,
        candidates = suggestion.candidate_count,
        selected = suggestion.selected.len(),
        "Suggestion served"
    );
    Ok(Json(suggestion))
}

/// `GET /health`
pub async fn health(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let llm = state.config.llm_provider();
    let pipeline = &state.pipeline;

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": state.uptime_secs(),
        "providers": {
            "llm": {
                "id": llm.id,
                "models": llm.model_chain(),
                "configured": pipeline.planner().is_configured(),
            },
            "transcription": {
                "id": state.transcriber.provider(),
                "configured": state.transcriber.is_configured(),
            },
            "tts": {
                "configured": state.speech.is_configured(),
            },
            "symbols": {
                "id": pipeline.retriever().source_id(),
            },
        },
    }))
}
