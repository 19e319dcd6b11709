//! Symbol repository lookups and the bounded fan-out across planner queries.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, info, warn};

use talkboard_core::config::SymbolsConfig;
use talkboard_core::types::{Stage, SymbolCandidate};

/// A searchable collection of pictographic symbols.
#[async_trait]
pub trait SymbolSource: Send + Sync {
    fn id(&self) -> &str;

    /// Look up symbols for a single keyword.
    async fn search(&self, query: &str) -> anyhow::Result<Vec<SymbolCandidate>>;
}

/// Client for the Global Symbols label search API.
pub struct GlobalSymbolsClient {
    base_url: String,
    language: String,
    repo_key: String,
    client: reqwest::Client,
}

impl GlobalSymbolsClient {
    pub fn new(config: &SymbolsConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            language: config.language.clone(),
            repo_key: config.repo_key.clone(),
            client,
        }
    }

    pub fn search_url(&self) -> String {
        format!("{}/labels/search", self.base_url)
    }
}

#[async_trait]
impl SymbolSource for GlobalSymbolsClient {
    fn id(&self) -> &str {
        "globalsymbols"
    }

    async fn search(&self, query: &str) -> anyhow::Result<Vec<SymbolCandidate>> {
        let resp = self
            .client
            .get(self.search_url())
            .query(&[
                ("query", query),
                ("language", self.language.as_str()),
                ("repo_key", self.repo_key.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Symbol search error {status}: {body}");
        }

        let body: Value = resp.json().await?;
        let Value::Array(records) = body else {
            anyhow::bail!("Symbol search returned a non-array body");
        };

        Ok(records
            .iter()
            .filter_map(|record| normalize_record(record, &self.repo_key))
            .collect())
    }
}

/// Map one repository record to a candidate. Records without a usable name
/// are dropped.
pub fn normalize_record(record: &Value, default_repo: &str) -> Option<SymbolCandidate> {
    let name = first_str(record, &["/text", "/name", "/label", "/picto/name"])?;
    let image_url = first_str(record, &["/picto/image_url", "/image_url", "/imageUrl", "/image"]);
    let alt_url = first_str(record, &["/altUrl", "/alt_url", "/picto/thumbnail_url"]);
    let repo_key = first_str(
        record,
        &["/picto/symbolset/slug", "/symbolset/slug", "/repo_key", "/repoKey"],
    )
    .or_else(|| (!default_repo.is_empty()).then(|| default_repo.to_string()));
    let score = ["/score", "/relevance"]
        .iter()
        .find_map(|p| record.pointer(p).and_then(Value::as_f64));

    Some(SymbolCandidate {
        name,
        image_url,
        alt_url,
        repo_key,
        score,
    })
}

fn first_str(record: &Value, pointers: &[&str]) -> Option<String> {
    pointers.iter().find_map(|p| {
        record
            .pointer(p)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

/// Merged result of one retrieval run.
#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    /// Candidates from every successful lookup, in query order.
    pub candidates: Vec<SymbolCandidate>,
    pub lookups: usize,
    pub failures: usize,
}

/// Fans planner queries out to a [`SymbolSource`] with bounded concurrency.
pub struct SymbolRetriever {
    source: Arc<dyn SymbolSource>,
    max_queries: usize,
    concurrency: usize,
}

impl SymbolRetriever {
    pub fn new(source: Arc<dyn SymbolSource>, config: &SymbolsConfig) -> Self {
        Self {
            source,
            max_queries: config.max_queries,
            concurrency: config.concurrency.max(1),
        }
    }

    pub fn source_id(&self) -> &str {
        self.source.id()
    }

    /// Look up each query and merge the results.
    ///
    /// A failed lookup contributes nothing; the batch always completes.
    pub async fn retrieve(&self, queries: &[String]) -> RetrievalOutcome {
        let queries: Vec<&str> = queries
            .iter()
            .map(|q| q.trim())
            .filter(|q| !q.is_empty())
            .take(self.max_queries)
            .collect();

        if queries.is_empty() {
            return RetrievalOutcome::default();
        }

        let start = Instant::now();
        let results: Vec<(&str, anyhow::Result<Vec<SymbolCandidate>>)> =
            futures::stream::iter(0..queries.len())
                .map(|i| {
                    let query = queries[i];
                    async move { (query, self.source.search(query).await) }
                })
                .buffered(self.concurrency)
                .collect()
                .await;

        let mut outcome = RetrievalOutcome {
            lookups: results.len(),
            ..RetrievalOutcome::default()
        };
        for (query, result) in results {
            match result {
                Ok(found) => {
                    debug!(stage = %Stage::Retrieval, query, count = found.len(), "Symbol lookup done");
                    outcome.candidates.extend(found);
                }
                Err(e) => {
                    warn!(stage = %Stage::Retrieval, query, %e, "Symbol lookup failed");
                    outcome.failures += 1;
                }
            }
        }

        info!(
            stage = %Stage::Retrieval,
            lookups = outcome.lookups,
            failures = outcome.failures,
            candidates = outcome.candidates.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Symbol retrieval complete"
        );
        outcome
    }
}
