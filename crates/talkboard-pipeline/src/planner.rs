//! Query planning: transcript in, intent and symbol search keywords out.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use talkboard_core::Result;
use talkboard_core::types::{AutismProfile, MAX_PLAN_ITEMS, QueryPlan, Stage};
use talkboard_providers::ModelChain;

use crate::extract::extract_object;
use crate::prompt;

pub struct QueryPlanner {
    chain: Arc<ModelChain>,
}

impl QueryPlanner {
    pub fn new(chain: Arc<ModelChain>) -> Self {
        Self { chain }
    }

    pub fn is_configured(&self) -> bool {
        self.chain.is_configured()
    }

    /// Plan symbol searches for a transcript.
    ///
    /// An empty transcript yields the empty plan without calling the model.
    /// Unparseable model output also yields the empty plan; configuration and
    /// upstream failures are returned to the caller.
    pub async fn plan(&self, transcript: &str, profile: Option<&AutismProfile>) -> Result<QueryPlan> {
        let transcript = transcript.trim();
        if transcript.is_empty() {
            debug!(stage = %Stage::Planning, "Empty transcript, skipping planner");
            return Ok(QueryPlan::default());
        }

        let text = self
            .chain
            .complete(Stage::Planning, &prompt::planner(transcript, profile))
            .await?;
        let plan = parse_plan(&text);

        info!(
            stage = %Stage::Planning,
            intent = %plan.intent,
            queries = ?plan.queries,
            "Query plan ready"
        );
        Ok(plan)
    }
}

/// Turn raw model output into a plan, defaulting anything missing.
pub fn parse_plan(text: &str) -> QueryPlan {
    let Some(obj) = extract_object(text) else {
        if !text.trim().is_empty() {
            debug!(stage = %Stage::Planning, "No JSON object in planner output");
        }
        return QueryPlan::default();
    };

    QueryPlan {
        intent: obj
            .get("intent")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default()
            .to_string(),
        queries: clean_list(obj.get("queries")),
        tags: clean_list(obj.get("tags")),
    }
}

/// Trim, drop empties, dedupe case-insensitively (first wins), cap.
///
/// A comma-separated string is accepted in place of an array.
pub fn clean_list(value: Option<&Value>) -> Vec<String> {
    let raw: Vec<&str> = match value {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        Some(Value::String(s)) => s.split(',').collect(),
        _ => return Vec::new(),
    };

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in raw {
        let item = item.trim();
        if item.is_empty() || !seen.insert(item.to_lowercase()) {
            continue;
        }
        out.push(item.to_string());
        if out.len() == MAX_PLAN_ITEMS {
            break;
        }
    }
    out
}
