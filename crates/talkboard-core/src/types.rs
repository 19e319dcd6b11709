//! Request-scoped values passed between pipeline stages.
//!
//! Nothing here is persisted; every value lives for one HTTP request.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum number of symbols offered to the user after ranking.
pub const MAX_SELECTION: usize = 6;

/// Maximum number of queries or tags kept from a query plan.
pub const MAX_PLAN_ITEMS: usize = 6;

/// Pipeline stage, used as a structured log field and error tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Transcription,
    Planning,
    Retrieval,
    Ranking,
    Phrase,
    Speech,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transcription => "transcription",
            Self::Planning => "planning",
            Self::Retrieval => "retrieval",
            Self::Ranking => "ranking",
            Self::Phrase => "phrase",
            Self::Speech => "speech",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Communication and sensory preferences of the person using the board.
///
/// Owned by the persistence layer of the wider application; the pipeline
/// treats it as opaque JSON and only forwards it as prompt context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AutismProfile(pub serde_json::Value);

impl AutismProfile {
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            serde_json::Value::Null => true,
            serde_json::Value::Object(map) => map.is_empty(),
            serde_json::Value::String(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Compact JSON rendering for prompts.
    pub fn to_prompt_json(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_default()
    }
}

/// Keywords and inferred intent produced by the query planner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPlan {
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub queries: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl QueryPlan {
    pub fn is_empty(&self) -> bool {
        self.intent.is_empty() && self.queries.is_empty() && self.tags.is_empty()
    }
}

/// One pictographic symbol returned by the symbol repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolCandidate {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl SymbolCandidate {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Case- and whitespace-insensitive identity used for de-duplication.
    pub fn name_key(&self) -> String {
        normalize_name(&self.name)
    }
}

/// Normalize a symbol name for comparisons.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Output of the transcription stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionResult {
    pub text: String,
    pub transcription_time_ms: u64,
}

/// An uploaded recording.
#[derive(Debug, Clone)]
pub struct AudioUpload {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub mime_type: String,
}

impl AudioUpload {
    pub fn new(bytes: Vec<u8>, file_name: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            file_name: file_name.into(),
            mime_type: mime_type.into(),
        }
    }
}
