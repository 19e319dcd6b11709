//! Phrase composition from the transcript and the symbols the user picked.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use talkboard_core::types::Stage;
use talkboard_providers::ModelChain;

use crate::prompt;

static LINE_BREAKS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*[\r\n]+\s*").expect("line break pattern is valid"));

const QUOTES: &[char] = &['"', '\'', '`', '\u{201c}', '\u{201d}', '\u{2018}', '\u{2019}'];

/// Where a composed phrase came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhraseSource {
    Model,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComposedPhrase {
    pub phrase: String,
    pub source: PhraseSource,
}

impl ComposedPhrase {
    fn fallback(phrase: String) -> Self {
        Self {
            phrase,
            source: PhraseSource::Fallback,
        }
    }
}

pub struct PhraseComposer {
    chain: Arc<ModelChain>,
    fallback_words: usize,
}

impl PhraseComposer {
    pub fn new(chain: Arc<ModelChain>, fallback_words: usize) -> Self {
        Self {
            chain,
            fallback_words,
        }
    }

    /// Compose a short phrase. Never fails: any model problem falls back to
    /// the symbols, then to the start of the transcript.
    pub async fn compose(&self, transcript: &str, symbols: &[String]) -> ComposedPhrase {
        let transcript = transcript.trim();
        let symbols: Vec<String> = symbols
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        let fallback = || fallback_phrase(transcript, &symbols, self.fallback_words);

        if transcript.is_empty() && symbols.is_empty() {
            return ComposedPhrase::fallback(String::new());
        }
        if !self.chain.is_configured() {
            debug!(stage = %Stage::Phrase, "Model not configured, using fallback phrase");
            return ComposedPhrase::fallback(fallback());
        }

        match self
            .chain
            .complete(Stage::Phrase, &prompt::phrase(transcript, &symbols))
            .await
        {
            Ok(text) => {
                let phrase = clean_phrase(&text);
                if phrase.is_empty() {
                    debug!(stage = %Stage::Phrase, "Model returned no phrase, using fallback");
                    return ComposedPhrase::fallback(fallback());
                }
                info!(stage = %Stage::Phrase, phrase = %phrase, "Phrase composed");
                ComposedPhrase {
                    phrase,
                    source: PhraseSource::Model,
                }
            }
            Err(e) => {
                warn!(stage = %Stage::Phrase, %e, "Phrase composition failed, using fallback");
                ComposedPhrase::fallback(fallback())
            }
        }
    }
}

/// Selected symbols joined by spaces, else the first `max_words` words of
/// the transcript, else the empty string.
pub fn fallback_phrase(transcript: &str, symbols: &[String], max_words: usize) -> String {
    let joined = symbols
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if !joined.is_empty() {
        return joined;
    }
    transcript
        .split_whitespace()
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Single line, no wrapping quotes, trimmed.
pub fn clean_phrase(text: &str) -> String {
    let single_line = LINE_BREAKS.replace_all(text.trim(), " ");
    single_line
        .trim()
        .trim_matches(QUOTES)
        .trim()
        .to_string()
}
