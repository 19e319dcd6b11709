//! End-to-end suggestion runs against a mocked symbol repository and
//! scripted language models.

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use talkboard_core::config::{GuardPolicy, PipelineConfig, SymbolsConfig};
use talkboard_core::types::SymbolCandidate;
use talkboard_pipeline::symbols::SymbolSource;
use talkboard_pipeline::{
    GlobalSymbolsClient, Pipeline, PhraseComposer, QueryPlanner, SessionGuard, SymbolRanker,
    SymbolRetriever,
};
use talkboard_providers::scripted::ScriptedProvider;
use talkboard_providers::{Credentials, ModelChain};

const WATER_PLAN: &str =
    r#"{"intent":"request a drink","queries":["water","drink","thirsty"],"tags":["food"]}"#;

fn chain(provider: Arc<ScriptedProvider>, model: &str) -> Arc<ModelChain> {
    Arc::new(ModelChain::new(
        provider,
        Some(Credentials::api_key("test")),
        vec![model.to_string()],
    ))
}

fn symbols_config(server: &MockServer) -> SymbolsConfig {
    SymbolsConfig {
        base_url: server.uri(),
        ..SymbolsConfig::default()
    }
}

fn label(text: &str) -> serde_json::Value {
    json!({
        "id": 1,
        "text": text,
        "language": "eng",
        "picto": {
            "image_url": format!("https://globalsymbols.com/uploads/{}.png", text.replace(' ', "_")),
            "native_format": "png",
            "symbolset": {"slug": "arasaac"}
        }
    })
}

async fn mount_lookup(server: &MockServer, query: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path("/labels/search"))
        .and(query_param("query", query))
        .and(query_param("language", "eng"))
        .and(query_param("repo_key", "arasaac"))
        .respond_with(response)
        .expect(1)
        .mount(server)
        .await;
}

fn pipeline(
    server: &MockServer,
    planner: Arc<ScriptedProvider>,
    ranker: Arc<ScriptedProvider>,
    policy: GuardPolicy,
) -> Pipeline {
    let symbols = symbols_config(server);
    let settings = PipelineConfig {
        guard_policy: policy,
        ..PipelineConfig::default()
    };
    let source: Arc<dyn SymbolSource> = Arc::new(GlobalSymbolsClient::new(&symbols));
    let ranker_chain = chain(ranker, "ranker");

    Pipeline::new(
        QueryPlanner::new(chain(planner, "planner")),
        SymbolRetriever::new(source, &symbols),
        SymbolRanker::new(ranker_chain.clone(), &settings),
        PhraseComposer::new(ranker_chain, settings.fallback_words),
        SessionGuard::new(settings.guard_policy),
    )
}

#[tokio::test]
async fn test_i_want_water_with_one_failed_lookup() {
    let server = MockServer::start().await;
    mount_lookup(
        &server,
        "water",
        ResponseTemplate::new(200).set_body_json(json!([label("water"), label("glass of water")])),
    )
    .await;
    mount_lookup(&server, "drink", ResponseTemplate::new(500).set_body_string("internal")).await;
    mount_lookup(
        &server,
        "thirsty",
        ResponseTemplate::new(200).set_body_json(json!([label("thirsty")])),
    )
    .await;

    let planner = Arc::new(ScriptedProvider::new().reply("planner", WATER_PLAN));
    let ranker = Arc::new(ScriptedProvider::new().reply(
        "ranker",
        r#"```json
{"selected":[{"name":"glass of water"},{"name":"water"},{"name":"juice"},{"name":"thirsty"}]}
```"#,
    ));
    let pipeline = pipeline(&server, planner.clone(), ranker.clone(), GuardPolicy::Reject);

    let suggestion = pipeline
        .suggest("caree-1", "I want water", None)
        .await
        .unwrap();

    assert_eq!(suggestion.plan.intent, "request a drink");
    assert_eq!(suggestion.plan.queries, vec!["water", "drink", "thirsty"]);
    assert_eq!(suggestion.candidate_count, 3);
    let names: Vec<&str> = suggestion.selected.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["glass of water", "water", "thirsty"]);
    assert_eq!(
        suggestion.selected[1].image_url.as_deref(),
        Some("https://globalsymbols.com/uploads/water.png")
    );
    assert_eq!(planner.calls(), 1);
    assert_eq!(ranker.calls(), 1);
    assert_eq!(pipeline.guard().in_flight(), 0);

    let body = serde_json::to_value(&suggestion).unwrap();
    assert_eq!(body["intent"], "request a drink");
    assert_eq!(body["candidateCount"], 3);
    assert!(body["selected"].is_array());
}

#[tokio::test]
async fn test_non_array_body_counts_as_zero_candidates() {
    let server = MockServer::start().await;
    mount_lookup(
        &server,
        "water",
        ResponseTemplate::new(200).set_body_json(json!({"error": "rate limited"})),
    )
    .await;
    mount_lookup(
        &server,
        "cup",
        ResponseTemplate::new(200).set_body_json(json!([label("cup")])),
    )
    .await;

    let symbols = symbols_config(&server);
    let retriever = SymbolRetriever::new(Arc::new(GlobalSymbolsClient::new(&symbols)), &symbols);
    let outcome = retriever
        .retrieve(&["water".to_string(), "cup".to_string()])
        .await;

    assert_eq!(outcome.lookups, 2);
    assert_eq!(outcome.failures, 1);
    assert_eq!(outcome.candidates, vec![SymbolCandidate {
        image_url: Some("https://globalsymbols.com/uploads/cup.png".into()),
        repo_key: Some("arasaac".into()),
        ..SymbolCandidate::named("cup")
    }]);
}

#[tokio::test]
async fn test_empty_transcript_makes_no_calls() {
    let server = MockServer::start().await;
    let planner = Arc::new(ScriptedProvider::new().reply("planner", WATER_PLAN));
    let ranker = Arc::new(ScriptedProvider::new());
    let pipeline = pipeline(&server, planner.clone(), ranker.clone(), GuardPolicy::Reject);

    let suggestion = pipeline.suggest("s", "  ", None).await.unwrap();
    assert_eq!(suggestion.candidate_count, 0);
    assert!(suggestion.selected.is_empty());
    assert_eq!(planner.calls(), 0);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_planner_outage_degrades_to_empty_suggestion() {
    let server = MockServer::start().await;
    let planner = Arc::new(ScriptedProvider::new().fail("planner", "503 unavailable"));
    let ranker = Arc::new(ScriptedProvider::new());
    let pipeline = pipeline(&server, planner, ranker.clone(), GuardPolicy::Reject);

    let suggestion = pipeline.suggest("s", "I want water", None).await.unwrap();
    assert!(suggestion.plan.is_empty());
    assert_eq!(suggestion.candidate_count, 0);
    assert_eq!(ranker.calls(), 0);
}

#[tokio::test]
async fn test_busy_session_is_rejected() {
    let server = MockServer::start().await;
    let planner = Arc::new(ScriptedProvider::new().reply("planner", "{}"));
    let pipeline = pipeline(
        &server,
        planner.clone(),
        Arc::new(ScriptedProvider::new()),
        GuardPolicy::Reject,
    );

    let _held = pipeline.guard().acquire("caree-1").unwrap();
    let err = pipeline
        .suggest("caree-1", "I want water", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "busy");
    assert_eq!(planner.calls(), 0);

    assert!(pipeline.suggest("caree-2", "I want water", None).await.is_ok());
}

#[tokio::test]
async fn test_supersede_cancels_previous_holder() {
    let server = MockServer::start().await;
    let planner = Arc::new(ScriptedProvider::new().reply("planner", "{}"));
    let pipeline = pipeline(
        &server,
        planner.clone(),
        Arc::new(ScriptedProvider::new()),
        GuardPolicy::Supersede,
    );

    let held = pipeline.guard().acquire("caree-1").unwrap();
    let suggestion = pipeline.suggest("caree-1", "I want water", None).await.unwrap();
    assert!(held.is_cancelled());
    assert!(suggestion.selected.is_empty());
    assert_eq!(planner.calls(), 1);
}
