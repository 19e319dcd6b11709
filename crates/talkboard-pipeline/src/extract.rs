//! Lenient JSON recovery from language model output.
//!
//! Models asked for "only JSON" still wrap answers in code fences, prepend
//! prose or append commentary. Object extraction tries, in order:
//!
//! 1. the whole (trimmed) text,
//! 2. each fenced code block (language tag optional),
//! 3. the greedy span from the first `{` to the last `}`,
//! 4. the first brace-balanced `{...}` span that parses.
//!
//! Anything else yields `None` and the caller falls back to its default.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

static FENCED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").expect("fence pattern is valid")
});
static GREEDY_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("object pattern is valid"));
static GREEDY_ARRAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[.*\]").expect("array pattern is valid"));

/// Recover the first JSON object embedded in `text`.
pub fn extract_object(text: &str) -> Option<Map<String, Value>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(obj) = parse_object(text) {
        return Some(obj);
    }

    for caps in FENCED.captures_iter(text) {
        if let Some(obj) = caps.get(1).and_then(|m| parse_object(m.as_str())) {
            return Some(obj);
        }
    }

    if let Some(obj) = GREEDY_OBJECT.find(text).and_then(|m| parse_object(m.as_str())) {
        return Some(obj);
    }

    balanced_objects(text).find_map(parse_object)
}

/// Recover a JSON array: the whole text, a fenced block, or the greedy
/// `[...]` span.
pub fn extract_array(text: &str) -> Option<Vec<Value>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(items) = parse_array(text) {
        return Some(items);
    }

    for caps in FENCED.captures_iter(text) {
        if let Some(items) = caps.get(1).and_then(|m| parse_array(m.as_str())) {
            return Some(items);
        }
    }

    GREEDY_ARRAY
        .find(text)
        .and_then(|m| parse_array(m.as_str()))
}

fn parse_object(s: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(s.trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn parse_array(s: &str) -> Option<Vec<Value>> {
    match serde_json::from_str::<Value>(s.trim()) {
        Ok(Value::Array(items)) => Some(items),
        _ => None,
    }
}

/// Every brace-balanced span starting at a `{`, in order of position.
fn balanced_objects(text: &str) -> impl Iterator<Item = &str> {
    text.char_indices()
        .filter(|(_, c)| *c == '{')
        .filter_map(move |(start, _)| {
            balanced_len(&text[start..]).map(|len| &text[start..start + len])
        })
}

/// Byte length of the balanced object at the start of `s`, skipping braces
/// inside string literals.
fn balanced_len(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}
