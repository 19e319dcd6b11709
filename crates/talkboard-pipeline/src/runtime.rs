//! Pipeline runtime: wires the stages together and runs a full suggestion.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use talkboard_core::config::Config;
use talkboard_core::types::{AutismProfile, QueryPlan, Stage, SymbolCandidate};
use talkboard_core::{Result, TalkboardError};
use talkboard_providers::ModelChain;

use crate::guard::SessionGuard;
use crate::phrase::PhraseComposer;
use crate::planner::QueryPlanner;
use crate::ranker::SymbolRanker;
use crate::symbols::{GlobalSymbolsClient, SymbolRetriever, SymbolSource};

/// Result of a plan, retrieve and rank run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    #[serde(flatten)]
    pub plan: QueryPlan,
    pub candidate_count: usize,
    pub selected: Vec<SymbolCandidate>,
}

pub struct Pipeline {
    planner: QueryPlanner,
    retriever: SymbolRetriever,
    ranker: SymbolRanker,
    composer: PhraseComposer,
    guard: SessionGuard,
}

impl Pipeline {
    pub fn new(
        planner: QueryPlanner,
        retriever: SymbolRetriever,
        ranker: SymbolRanker,
        composer: PhraseComposer,
        guard: SessionGuard,
    ) -> Self {
        Self {
            planner,
            retriever,
            ranker,
            composer,
            guard,
        }
    }

    /// Build every stage from configuration. Planner, ranker and composer
    /// share one model chain.
    pub fn from_config(config: &Config) -> Self {
        let chain = Arc::new(ModelChain::from_config(&config.llm_provider()));
        let symbols = config.symbols_config();
        let pipeline = config.pipeline_config();
        let source: Arc<dyn SymbolSource> = Arc::new(GlobalSymbolsClient::new(&symbols));

        Self::new(
            QueryPlanner::new(chain.clone()),
            SymbolRetriever::new(source, &symbols),
            SymbolRanker::new(chain.clone(), &pipeline),
            PhraseComposer::new(chain, pipeline.fallback_words),
            SessionGuard::new(pipeline.guard_policy),
        )
    }

    pub fn planner(&self) -> &QueryPlanner {
        &self.planner
    }

    pub fn retriever(&self) -> &SymbolRetriever {
        &self.retriever
    }

    pub fn ranker(&self) -> &SymbolRanker {
        &self.ranker
    }

    pub fn composer(&self) -> &PhraseComposer {
        &self.composer
    }

    pub fn guard(&self) -> &SessionGuard {
        &self.guard
    }

    /// Run planning, retrieval and ranking for one utterance under the
    /// session's single-flight slot.
    pub async fn suggest(
        &self,
        session: &str,
        transcript: &str,
        profile: Option<&AutismProfile>,
    ) -> Result<Suggestion> {
        let permit = self.guard.acquire(session)?;

        tokio::select! {
            biased;
            _ = permit.cancelled() => {
                info!(session, "Suggestion superseded by a newer request");
                Err(TalkboardError::Busy(format!(
                    "Request for session '{session}' was superseded by a newer one"
                )))
            }
            result = self.run(transcript, profile) => result,
        }
    }

    async fn run(&self, transcript: &str, profile: Option<&AutismProfile>) -> Result<Suggestion> {
        let transcript = transcript.trim();
        if transcript.is_empty() {
            return Ok(Suggestion::default());
        }
        let start = Instant::now();

        let plan = match self.planner.plan(transcript, profile).await {
            Ok(plan) => plan,
            Err(e) if e.is_config() => return Err(e),
            Err(e) => {
                warn!(stage = %Stage::Planning, %e, "Planning failed, continuing with empty plan");
                QueryPlan::default()
            }
        };

        let outcome = self.retriever.retrieve(&plan.queries).await;
        let selected = self
            .ranker
            .rank(transcript, profile, &outcome.candidates)
            .await?;

        info!(
            intent = %plan.intent,
            lookups = outcome.lookups,
            failed_lookups = outcome.failures,
            candidates = outcome.candidates.len(),
            selected = selected.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Suggestion complete"
        );

        Ok(Suggestion {
            plan,
            candidate_count: outcome.candidates.len(),
            selected,
        })
    }
}
