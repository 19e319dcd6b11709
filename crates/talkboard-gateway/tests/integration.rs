//! Gateway integration tests: start a real gateway against mocked upstreams
//! (Gemini, Global Symbols, ElevenLabs) and drive it over HTTP.
//!
//! Run with: `cargo test -p talkboard-gateway --test integration`

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use talkboard_core::config::{
    Config, GatewayConfig, ModelsConfig, ProviderConfig, SymbolsConfig, TranscriptionConfig,
    TtsConfig,
};

/// Find an available port.
fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

struct Upstreams {
    gemini: MockServer,
    symbols: MockServer,
    elevenlabs: MockServer,
}

impl Upstreams {
    async fn start() -> Self {
        Self {
            gemini: MockServer::start().await,
            symbols: MockServer::start().await,
            elevenlabs: MockServer::start().await,
        }
    }

    fn config(&self) -> Config {
        Config {
            models: Some(ModelsConfig {
                providers: Some(vec![ProviderConfig {
                    api_key: Some("g-key".into()),
                    api_key_env: None,
                    base_url: Some(self.gemini.uri()),
                    ..ProviderConfig::gemini_default()
                }]),
            }),
            transcription: Some(TranscriptionConfig {
                api_key: Some("el-key".into()),
                api_key_env: None,
                base_url: Some(self.elevenlabs.uri()),
                ..TranscriptionConfig::default()
            }),
            tts: Some(TtsConfig {
                api_key: Some("el-key".into()),
                api_key_env: None,
                base_url: Some(self.elevenlabs.uri()),
                ..TtsConfig::default()
            }),
            symbols: Some(SymbolsConfig {
                base_url: self.symbols.uri(),
                ..SymbolsConfig::default()
            }),
            gateway: Some(GatewayConfig {
                bind: Some("127.0.0.1".into()),
                ..GatewayConfig::default()
            }),
            ..Config::default()
        }
    }
}

/// Start a gateway on a free port and wait until `/health` answers.
async fn start_test_gateway(config: Config) -> u16 {
    let port = find_free_port();
    let state = Arc::new(talkboard_gateway::GatewayState::new(Arc::new(config)));

    tokio::spawn(async move {
        let _ = talkboard_gateway::start_gateway(state, port).await;
    });

    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if reqwest::get(format!("http://127.0.0.1:{port}/health"))
            .await
            .is_ok()
        {
            break;
        }
    }
    port
}

fn gemini_sse(text: &str) -> ResponseTemplate {
    let event = json!({"candidates": [{"content": {"parts": [{"text": text}], "role": "model"}}]});
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(format!("data: {event}\n\n"))
}

fn label(text: &str) -> serde_json::Value {
    json!({
        "text": text,
        "picto": {
            "image_url": format!("https://globalsymbols.com/uploads/{text}.png"),
            "symbolset": {"slug": "arasaac"}
        }
    })
}

async fn mount_planner(upstreams: &Upstreams, plan: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path_regex(r"^/v1beta/models/.+:streamGenerateContent$"))
        .and(body_string_contains("search keywords"))
        .respond_with(gemini_sse(&plan.to_string()))
        .mount(&upstreams.gemini)
        .await;
}

async fn mount_ranker(upstreams: &Upstreams, selection: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path_regex(r"^/v1beta/models/.+:streamGenerateContent$"))
        .and(body_string_contains("Candidates (JSON)"))
        .respond_with(gemini_sse(&selection.to_string()))
        .mount(&upstreams.gemini)
        .await;
}

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

#[tokio::test]
async fn test_health_endpoint() {
    let upstreams = Upstreams::start().await;
    let port = start_test_gateway(upstreams.config()).await;

    let resp = reqwest::get(format!("http://127.0.0.1:{port}/health"))
        .await
        .expect("Health request failed");

    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
    assert!(body["uptimeSecs"].is_u64());
    assert_eq!(body["providers"]["llm"]["configured"], true);
    assert_eq!(body["providers"]["llm"]["id"], "google");
    assert_eq!(body["providers"]["tts"]["configured"], true);
}

#[tokio::test]
async fn test_suggest_full_run_with_failed_lookup() {
    let upstreams = Upstreams::start().await;
    mount_planner(
        &upstreams,
        json!({"intent": "request a drink", "queries": ["water", "drink", "thirsty"], "tags": []}),
    )
    .await;
    mount_ranker(
        &upstreams,
        json!({"selected": [{"name": "water"}, {"name": "lemonade"}, {"name": "thirsty"}]}),
    )
    .await;

    for (query, response) in [
        ("water", ResponseTemplate::new(200).set_body_json(json!([label("water"), label("cup")]))),
        ("drink", ResponseTemplate::new(503)),
        ("thirsty", ResponseTemplate::new(200).set_body_json(json!([label("thirsty")]))),
    ] {
        Mock::given(method("GET"))
            .and(path("/labels/search"))
            .and(query_param("query", query))
            .respond_with(response)
            .expect(1)
            .mount(&upstreams.symbols)
            .await;
    }

    let port = start_test_gateway(upstreams.config()).await;
    let resp = client()
        .post(format!("http://127.0.0.1:{port}/api/suggest"))
        .header("x-session-id", "caree-1")
        .json(&json!({"transcript": "I want water", "profile": {"prefers": "photos"}}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["intent"], "request a drink");
    assert_eq!(body["queries"], json!(["water", "drink", "thirsty"]));
    assert_eq!(body["candidateCount"], 3);
    assert_eq!(body["selected"][0]["name"], "water");
    assert_eq!(
        body["selected"][0]["imageUrl"],
        "https://globalsymbols.com/uploads/water.png"
    );
    assert_eq!(body["selected"][1]["name"], "thirsty");
    assert_eq!(body["selected"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_concurrent_suggest_for_same_session_is_busy() {
    let upstreams = Upstreams::start().await;
    mount_planner(&upstreams, json!({"intent": "play", "queries": ["ball"]})).await;
    mount_ranker(&upstreams, json!({"selected": ["ball"]})).await;
    Mock::given(method("GET"))
        .and(path("/labels/search"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([label("ball")]))
                .set_delay(Duration::from_millis(1500)),
        )
        .mount(&upstreams.symbols)
        .await;

    let port = start_test_gateway(upstreams.config()).await;
    let url = format!("http://127.0.0.1:{port}/api/suggest");

    let first = {
        let url = url.clone();
        tokio::spawn(async move {
            client()
                .post(url)
                .header("x-session-id", "caree-7")
                .json(&json!({"transcript": "ball"}))
                .send()
                .await
                .unwrap()
                .status()
        })
    };
    tokio::time::sleep(Duration::from_millis(300)).await;

    let second = client()
        .post(&url)
        .header("x-session-id", "caree-7")
        .json(&json!({"transcript": "ball"}))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 409);
    let body: serde_json::Value = second.json().await.unwrap();
    assert_eq!(body["code"], "busy");

    assert_eq!(first.await.unwrap(), 200);
}

#[tokio::test]
async fn test_speak_streams_audio() {
    let upstreams = Upstreams::start().await;
    let audio = vec![0xffu8, 0xfb, 0x90, 0x64, 0x00, 0x0f];
    Mock::given(method("POST"))
        .and(path_regex(r"^/v1/text-to-speech/[^/]+/stream$"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "audio/mpeg")
                .set_body_bytes(audio.clone()),
        )
        .expect(1)
        .mount(&upstreams.elevenlabs)
        .await;

    let port = start_test_gateway(upstreams.config()).await;
    let resp = client()
        .post(format!("http://127.0.0.1:{port}/api/speak"))
        .json(&json!({"text": "I want water", "voiceId": "voice-1"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "audio/mpeg");
    assert_eq!(resp.bytes().await.unwrap().to_vec(), audio);
}

#[tokio::test]
async fn test_speak_empty_text_never_reaches_upstream() {
    let upstreams = Upstreams::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&upstreams.elevenlabs)
        .await;

    let port = start_test_gateway(upstreams.config()).await;
    let resp = client()
        .post(format!("http://127.0.0.1:{port}/api/speak"))
        .json(&json!({"text": ""}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "validation");
}

#[tokio::test]
async fn test_speak_surfaces_provider_message() {
    let upstreams = Upstreams::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({"detail": {"message": "Text exceeds quota"}})),
        )
        .mount(&upstreams.elevenlabs)
        .await;

    let port = start_test_gateway(upstreams.config()).await;
    let resp = client()
        .post(format!("http://127.0.0.1:{port}/api/speak"))
        .json(&json!({"text": "hello"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 500);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Text exceeds quota");
    assert_eq!(body["code"], "upstream");
}

#[tokio::test]
async fn test_transcribe_upload() {
    let upstreams = Upstreams::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/speech-to-text"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "I want water"})))
        .expect(1)
        .mount(&upstreams.elevenlabs)
        .await;

    let port = start_test_gateway(upstreams.config()).await;
    let part = reqwest::multipart::Part::bytes(vec![1u8, 2, 3, 4])
        .file_name("clip.webm")
        .mime_str("audio/webm")
        .unwrap();
    let resp = client()
        .post(format!("http://127.0.0.1:{port}/api/transcribe"))
        .multipart(reqwest::multipart::Form::new().part("audio", part))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["text"], "I want water");
    assert!(body["transcriptionTimeMs"].is_u64());
}

#[tokio::test]
async fn test_transcribe_errors() {
    let upstreams = Upstreams::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/speech-to-text"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": ""})))
        .mount(&upstreams.elevenlabs)
        .await;

    let port = start_test_gateway(upstreams.config()).await;
    let url = format!("http://127.0.0.1:{port}/api/transcribe");

    // No file part at all.
    let resp = client()
        .post(&url)
        .multipart(reqwest::multipart::Form::new().text("note", "hello"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Provider heard nothing.
    let part = reqwest::multipart::Part::bytes(vec![9u8; 16]).file_name("silence.webm");
    let resp = client()
        .post(&url)
        .multipart(reqwest::multipart::Form::new().part("file", part))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 422);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "no_transcription");
}

#[tokio::test]
async fn test_symbols_search_and_filter_endpoints() {
    let upstreams = Upstreams::start().await;
    Mock::given(method("GET"))
        .and(path("/labels/search"))
        .and(query_param("query", "apple"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([label("apple")])))
        .mount(&upstreams.symbols)
        .await;
    Mock::given(method("GET"))
        .and(path("/labels/search"))
        .and(query_param("query", "broken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "bad"})))
        .mount(&upstreams.symbols)
        .await;
    mount_ranker(&upstreams, json!(["apple", "pear"])).await;

    let port = start_test_gateway(upstreams.config()).await;

    let resp = client()
        .post(format!("http://127.0.0.1:{port}/api/symbols/search"))
        .json(&json!({"queries": ["apple", "broken"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    let candidates = body["candidates"].clone();
    assert_eq!(candidates.as_array().unwrap().len(), 1);

    let resp = client()
        .post(format!("http://127.0.0.1:{port}/api/symbols/filter"))
        .json(&json!({"transcript": "apple please", "candidates": candidates}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["selected"], json!([{
        "name": "apple",
        "imageUrl": "https://globalsymbols.com/uploads/apple.png",
        "repoKey": "arasaac"
    }]));
}
