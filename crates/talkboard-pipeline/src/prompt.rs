//! Prompt builders for the model-backed stages.

use talkboard_core::types::AutismProfile;
use talkboard_providers::fallback::Prompt;

const PLANNER_SYSTEM: &str = "You support a person who uses augmentative and alternative communication (AAC) with picture symbols. \
Given what they said, infer what they want and choose search keywords for a pictographic symbol library.\n\n\
Respond with a single JSON object and nothing else:\n\
{\"intent\": string, \"queries\": string[], \"tags\": string[]}\n\n\
- intent: a few words describing the need, for example \"request a drink\".\n\
- queries: 2 to 5 short, concrete keywords, one concept each, that a symbol library would index.\n\
- tags: up to 5 broad categories such as food, feelings, people, places or activities.";

const RANKER_SYSTEM: &str = "You choose picture symbols for an AAC communication board. \
From the candidate list, pick at most 6 symbols that best express what the person means, most suitable first.\n\n\
Rules:\n\
- Only use names that appear exactly in the candidate list.\n\
- Avoid duplicates and near-duplicates.\n\
- Prefer concrete, literal pictures and respect the communication profile when one is given.\n\n\
Respond with a single JSON object and nothing else:\n\
{\"selected\": [{\"name\": string}]}";

const PHRASE_SYSTEM: &str = "You turn an AAC user's message into one short, natural first-person sentence of fewer than 10 words. \
The selected symbols carry the main meaning; the transcript is context. \
Reply with the sentence only, without quotes or explanation.";

fn profile_part(profile: Option<&AutismProfile>) -> Option<String> {
    profile
        .filter(|p| !p.is_empty())
        .map(|p| format!("Communication profile (JSON): {}", p.to_prompt_json()))
}

/// Planner prompt: intent and search keywords as JSON.
pub fn planner(transcript: &str, profile: Option<&AutismProfile>) -> Prompt {
    let mut parts = vec![format!("Transcript: \"{transcript}\"")];
    parts.extend(profile_part(profile));
    Prompt::json(PLANNER_SYSTEM, parts.join("\n\n"))
}

/// Ranker prompt. `candidates_json` is the already bounded candidate list.
pub fn ranker(transcript: &str, profile: Option<&AutismProfile>, candidates_json: &str) -> Prompt {
    let mut parts = vec![format!("Transcript: \"{transcript}\"")];
    parts.extend(profile_part(profile));
    parts.push(format!("Candidates (JSON): {candidates_json}"));
    Prompt::json(RANKER_SYSTEM, parts.join("\n\n"))
}

/// Phrase prompt: plain text out.
pub fn phrase(transcript: &str, symbols: &[String]) -> Prompt {
    let mut parts = Vec::new();
    if !transcript.is_empty() {
        parts.push(format!("Transcript: \"{transcript}\""));
    }
    if !symbols.is_empty() {
        parts.push(format!("Selected symbols: {}", symbols.join(", ")));
    }
    Prompt::text(PHRASE_SYSTEM, parts.join("\n\n"))
}
