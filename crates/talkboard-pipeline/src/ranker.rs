//! Candidate bounding and model-based symbol selection.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use talkboard_core::Result;
use talkboard_core::config::PipelineConfig;
use talkboard_core::types::{AutismProfile, MAX_SELECTION, Stage, SymbolCandidate, normalize_name};
use talkboard_providers::ModelChain;

use crate::extract::{extract_array, extract_object};
use crate::prompt;

pub struct SymbolRanker {
    chain: Arc<ModelChain>,
    max_candidates: usize,
    prompt_budget_chars: usize,
}

impl SymbolRanker {
    pub fn new(chain: Arc<ModelChain>, config: &PipelineConfig) -> Self {
        Self {
            chain,
            max_candidates: config.max_candidates,
            prompt_budget_chars: config.prompt_budget_chars,
        }
    }

    /// Pick up to six candidates, most suitable first.
    ///
    /// Only a missing provider configuration is an error. Model failures and
    /// unusable output produce an empty selection.
    pub async fn rank(
        &self,
        transcript: &str,
        profile: Option<&AutismProfile>,
        candidates: &[SymbolCandidate],
    ) -> Result<Vec<SymbolCandidate>> {
        let transcript = transcript.trim();
        if transcript.is_empty() || candidates.is_empty() {
            debug!(stage = %Stage::Ranking, "Nothing to rank, skipping ranker");
            return Ok(Vec::new());
        }

        let prepared = prepare_candidates(candidates, self.max_candidates, self.prompt_budget_chars);
        debug!(
            stage = %Stage::Ranking,
            input = candidates.len(),
            prompted = prepared.len(),
            "Candidates bounded for ranking"
        );
        if prepared.is_empty() {
            debug!(stage = %Stage::Ranking, "No candidate fits the prompt, skipping ranker");
            return Ok(Vec::new());
        }

        let prompt = prompt::ranker(transcript, profile, &candidates_json(&prepared));
        let text = match self.chain.complete(Stage::Ranking, &prompt).await {
            Ok(text) => text,
            Err(e) if e.is_config() => return Err(e),
            Err(e) => {
                warn!(stage = %Stage::Ranking, %e, "Ranking failed, returning empty selection");
                return Ok(Vec::new());
            }
        };

        let selected = parse_selection(&text, &prepared);
        info!(
            stage = %Stage::Ranking,
            selected = selected.len(),
            names = ?selected.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            "Symbols ranked"
        );
        Ok(selected)
    }
}

fn score_of(candidate: &SymbolCandidate) -> f64 {
    candidate
        .score
        .filter(|s| s.is_finite())
        .unwrap_or(f64::NEG_INFINITY)
}

fn candidates_json(candidates: &[SymbolCandidate]) -> String {
    serde_json::to_string(candidates).unwrap_or_else(|_| "[]".to_string())
}

/// Dedupe by name, order by score then name, cap the count, then drop from
/// the tail until the serialized list fits `budget_chars`.
///
/// The result depends only on the input set and is a fixed point of itself.
pub fn prepare_candidates(
    candidates: &[SymbolCandidate],
    max_candidates: usize,
    budget_chars: usize,
) -> Vec<SymbolCandidate> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<SymbolCandidate> = Vec::new();

    for candidate in candidates {
        let key = candidate.name_key();
        if key.is_empty() {
            continue;
        }
        match index.get(&key).copied() {
            Some(i) => {
                if score_of(candidate) > score_of(&unique[i]) {
                    unique[i] = candidate.clone();
                }
            }
            None => {
                index.insert(key, unique.len());
                unique.push(candidate.clone());
            }
        }
    }

    unique.sort_by(|a, b| {
        score_of(b)
            .partial_cmp(&score_of(a))
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.name_key().cmp(&b.name_key()))
            .then_with(|| a.name.cmp(&b.name))
    });
    unique.truncate(max_candidates);

    while !unique.is_empty() && candidates_json(&unique).chars().count() > budget_chars {
        unique.pop();
    }
    unique
}

/// Resolve model output against the candidates it was shown.
///
/// Accepts `{"selected": [...]}` or a bare array, with entries given as
/// objects carrying `name` or as plain strings. Unknown names and
/// duplicates are dropped; at most six survive.
pub fn parse_selection(text: &str, candidates: &[SymbolCandidate]) -> Vec<SymbolCandidate> {
    let entries = match extract_object(text).and_then(|mut obj| obj.remove("selected")) {
        Some(Value::Array(items)) => items,
        _ => extract_array(text).unwrap_or_default(),
    };
    if entries.is_empty() {
        if !text.trim().is_empty() {
            debug!(stage = %Stage::Ranking, "No selection found in ranker output");
        }
        return Vec::new();
    }

    let by_name: HashMap<String, &SymbolCandidate> = candidates
        .iter()
        .map(|c| (c.name_key(), c))
        .collect();

    let mut seen = HashSet::new();
    let mut selected = Vec::new();
    for entry in &entries {
        let name = match entry {
            Value::String(s) => s.as_str(),
            Value::Object(obj) => match obj.get("name").and_then(Value::as_str) {
                Some(name) => name,
                None => continue,
            },
            _ => continue,
        };
        let key = normalize_name(name);
        let Some(candidate) = by_name.get(&key) else {
            debug!(stage = %Stage::Ranking, name, "Model selected an unknown symbol");
            continue;
        };
        if seen.insert(key) {
            selected.push((*candidate).clone());
            if selected.len() == MAX_SELECTION {
                break;
            }
        }
    }
    selected
}
