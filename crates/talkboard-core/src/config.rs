//! Configuration loading and validation.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_GEMINI_FALLBACK: &str = "gemini-1.5-flash";
pub const DEFAULT_SYMBOLS_BASE_URL: &str = "https://globalsymbols.com/api/v1";
pub const DEFAULT_GATEWAY_PORT: u16 = 8787;

const GEMINI_KEY_ENV: &str = "GEMINI_API_KEY";
const ELEVENLABS_KEY_ENV: &str = "ELEVENLABS_API_KEY";

static ENV_REF: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\$\{([^}]+)\}").expect("env reference pattern is valid"));

/// Top-level Talkboard configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<ModelsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<TranscriptionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts: Option<TtsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbols: Option<SymbolsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

// --- Language model providers ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub providers: Option<Vec<ProviderConfig>>,
}

/// Configuration for a language model provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    /// Models tried in order after `default_model` yields nothing.
    #[serde(default)]
    pub fallback_models: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl ProviderConfig {
    /// Built-in Gemini provider used when no `models` section is present.
    pub fn gemini_default() -> Self {
        Self {
            id: "google".into(),
            api_key_env: Some(GEMINI_KEY_ENV.into()),
            api_key: None,
            base_url: None,
            default_model: None,
            fallback_models: vec![DEFAULT_GEMINI_FALLBACK.into()],
            temperature: None,
            max_tokens: None,
            timeout_secs: None,
        }
    }

    /// Resolve the API key: check `api_key` field first, then `api_key_env` environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }

    /// Ordered, de-duplicated list of models to try.
    pub fn model_chain(&self) -> Vec<String> {
        let mut chain = vec![
            self.default_model
                .clone()
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
        ];
        for model in &self.fallback_models {
            if !model.is_empty() && !chain.contains(model) {
                chain.push(model.clone());
            }
        }
        chain
    }
}

// --- Speech ---

/// Speech-to-text configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Provider: "elevenlabs", "groq" or "openai" (default: "elevenlabs").
    #[serde(default = "default_elevenlabs_provider")]
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_elevenlabs_key_env")]
    pub api_key_env: Option<String>,

    /// Model name (e.g. "scribe_v1", "whisper-large-v3-turbo").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Override for the provider endpoint root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// ISO 639 language hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            provider: default_elevenlabs_provider(),
            api_key: None,
            api_key_env: default_elevenlabs_key_env(),
            model: None,
            base_url: None,
            language: None,
            timeout_secs: None,
        }
    }
}

impl TranscriptionConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Text-to-speech (TTS) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// TTS provider (default: "elevenlabs").
    #[serde(default = "default_elevenlabs_provider")]
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_elevenlabs_key_env")]
    pub api_key_env: Option<String>,

    /// Default voice ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_voice: Option<String>,

    /// Default model ID (e.g. "eleven_turbo_v2").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    /// Output format (default: "mp3_44100_128").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Relay audio chunks as they arrive instead of buffering the whole clip.
    #[serde(default = "default_true")]
    pub stream: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            provider: default_elevenlabs_provider(),
            api_key: None,
            api_key_env: default_elevenlabs_key_env(),
            default_voice: None,
            default_model: None,
            output_format: None,
            base_url: None,
            stream: true,
            timeout_secs: None,
        }
    }
}

impl TtsConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

fn default_elevenlabs_provider() -> String {
    "elevenlabs".into()
}

fn default_elevenlabs_key_env() -> Option<String> {
    Some(ELEVENLABS_KEY_ENV.into())
}

fn default_true() -> bool {
    true
}

// --- Symbol repository ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolsConfig {
    #[serde(default = "default_symbols_base_url")]
    pub base_url: String,

    /// Repository language code (Global Symbols uses ISO 639-3, e.g. "eng").
    #[serde(default = "default_symbols_language")]
    pub language: String,

    /// Symbol set to search (e.g. "arasaac", "mulberry").
    #[serde(default = "default_repo_key")]
    pub repo_key: String,

    /// Maximum number of planner queries looked up per utterance.
    #[serde(default = "default_max_queries")]
    pub max_queries: usize,

    /// Concurrent lookups in flight.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_symbols_timeout")]
    pub timeout_secs: u64,
}

impl Default for SymbolsConfig {
    fn default() -> Self {
        Self {
            base_url: default_symbols_base_url(),
            language: default_symbols_language(),
            repo_key: default_repo_key(),
            max_queries: default_max_queries(),
            concurrency: default_concurrency(),
            timeout_secs: default_symbols_timeout(),
        }
    }
}

fn default_symbols_base_url() -> String {
    DEFAULT_SYMBOLS_BASE_URL.into()
}

fn default_symbols_language() -> String {
    "eng".into()
}

fn default_repo_key() -> String {
    "arasaac".into()
}

fn default_max_queries() -> usize {
    5
}

fn default_concurrency() -> usize {
    5
}

fn default_symbols_timeout() -> u64 {
    10
}

// --- Pipeline tuning ---

/// What happens when a session triggers a run while one is still in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardPolicy {
    /// The new trigger is rejected with a busy error.
    #[default]
    Reject,
    /// The in-flight run is cancelled and the new trigger proceeds.
    Supersede,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Candidates kept (after de-duplication) before ranking.
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,

    /// Upper bound on the serialized candidate list inside the ranking prompt.
    #[serde(default = "default_prompt_budget_chars")]
    pub prompt_budget_chars: usize,

    /// Words of transcript used when phrase composition falls back.
    #[serde(default = "default_fallback_words")]
    pub fallback_words: usize,

    #[serde(default)]
    pub guard_policy: GuardPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_candidates: default_max_candidates(),
            prompt_budget_chars: default_prompt_budget_chars(),
            fallback_words: default_fallback_words(),
            guard_policy: GuardPolicy::default(),
        }
    }
}

fn default_max_candidates() -> usize {
    40
}

fn default_prompt_budget_chars() -> usize {
    10_000
}

fn default_fallback_words() -> usize {
    8
}

// --- Gateway ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// Allowed CORS origins. Empty means any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Largest accepted request body (audio uploads included).
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Include upstream error details in API responses.
    #[serde(default)]
    pub expose_errors: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: None,
            cors_origins: Vec::new(),
            max_upload_bytes: default_max_upload_bytes(),
            expose_errors: false,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_GATEWAY_PORT
}

fn default_max_upload_bytes() -> usize {
    25 * 1024 * 1024
}

// --- Logging ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "talkboard_pipeline=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: None,
            filters: Vec::new(),
            output: default_log_output(),
        }
    }
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    ENV_REF.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::TalkboardError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Default config file location: `~/.talkboard/config.json`.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    /// The language model provider used by the pipeline.
    pub fn llm_provider(&self) -> ProviderConfig {
        let providers = self.models.as_ref().and_then(|m| m.providers.as_ref());
        providers
            .and_then(|p| p.iter().find(|pc| pc.id == "google").or_else(|| p.first()))
            .cloned()
            .unwrap_or_else(ProviderConfig::gemini_default)
    }

    pub fn transcription_config(&self) -> TranscriptionConfig {
        self.transcription.clone().unwrap_or_default()
    }

    pub fn tts_config(&self) -> TtsConfig {
        self.tts.clone().unwrap_or_default()
    }

    pub fn symbols_config(&self) -> SymbolsConfig {
        self.symbols.clone().unwrap_or_default()
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        self.pipeline.clone().unwrap_or_default()
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        self.gateway.clone().unwrap_or_default()
    }

    pub fn logging_config(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }

    /// Gateway port.
    pub fn gateway_port(&self) -> u16 {
        self.gateway
            .as_ref()
            .map(|g| g.port)
            .unwrap_or(DEFAULT_GATEWAY_PORT)
    }

    /// Get a config value by dotted path (e.g. "gateway.port", "symbols.repo_key").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        let llm = self.llm_provider();
        if llm.id != "google" {
            errors.push(format!(
                "Provider '{}' is not supported (expected 'google')",
                llm.id
            ));
        }
        if llm.resolve_api_key().is_none() {
            warnings.push(format!(
                "Provider '{}' has no API key configured; planning and ranking are disabled",
                llm.id
            ));
        }

        let stt = self.transcription_config();
        if !matches!(stt.provider.as_str(), "elevenlabs" | "groq" | "openai") {
            errors.push(format!(
                "Unknown transcription provider '{}'",
                stt.provider
            ));
        }
        if stt.resolve_api_key().is_none() {
            warnings.push("Transcription has no API key configured".to_string());
        }

        let tts = self.tts_config();
        if tts.provider != "elevenlabs" {
            errors.push(format!("Unknown TTS provider '{}'", tts.provider));
        }
        if tts.resolve_api_key().is_none() {
            warnings.push("TTS has no API key configured".to_string());
        }

        let symbols = self.symbols_config();
        if symbols.concurrency == 0 {
            errors.push("symbols.concurrency must be at least 1".to_string());
        }
        if symbols.max_queries == 0 {
            warnings.push("symbols.max_queries is 0; no symbols will be fetched".to_string());
        }

        if let Some(gw) = &self.gateway {
            if gw.port == 0 {
                errors.push("Gateway port cannot be 0".to_string());
            }
        }

        (warnings, errors)
    }
}

/// Base directory for Talkboard data: `~/.talkboard/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".talkboard")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(api_key: Option<&str>) -> ProviderConfig {
        ProviderConfig {
            id: "google".into(),
            api_key_env: None,
            api_key: api_key.map(String::from),
            base_url: None,
            default_model: None,
            fallback_models: vec![],
            temperature: None,
            max_tokens: None,
            timeout_secs: None,
        }
    }

    #[test]
    fn test_env_var_substitution() {
        // SAFETY: test-only, the variable name is unique to this test
        unsafe { std::env::set_var("TEST_TB_KEY", "sk-test-123") };
        let input = r#"{"key": "${TEST_TB_KEY}", "other": "plain"}"#;
        let result = substitute_env_vars(input);
        assert!(result.contains("sk-test-123"));
        assert!(result.contains("plain"));
        unsafe { std::env::remove_var("TEST_TB_KEY") };
    }

    #[test]
    fn test_env_var_missing() {
        let input = r#"{"key": "${NONEXISTENT_VAR_TB_TEST}"}"#;
        let result = substitute_env_vars(input);
        assert!(result.contains(r#""""#));
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.gateway_port(), DEFAULT_GATEWAY_PORT);
        let symbols = config.symbols_config();
        assert_eq!(symbols.max_queries, 5);
        assert_eq!(symbols.repo_key, "arasaac");
        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.prompt_budget_chars, 10_000);
        assert_eq!(pipeline.fallback_words, 8);
        assert_eq!(pipeline.guard_policy, GuardPolicy::Reject);
        assert_eq!(config.llm_provider().id, "google");
    }

    #[test]
    fn test_provider_resolve_api_key() {
        // SAFETY: test-only, the variable name is unique to this test
        unsafe { std::env::set_var("TEST_TB_API_KEY", "from-env") };
        let mut p = provider(None);
        p.api_key_env = Some("TEST_TB_API_KEY".into());
        assert_eq!(p.resolve_api_key(), Some("from-env".into()));

        p.api_key = Some("direct-key".into());
        // Direct key takes priority
        assert_eq!(p.resolve_api_key(), Some("direct-key".into()));
        unsafe { std::env::remove_var("TEST_TB_API_KEY") };
    }

    #[test]
    fn test_model_chain_dedupes_and_orders() {
        let mut p = provider(None);
        p.default_model = Some("gemini-2.5-flash".into());
        p.fallback_models = vec![
            "gemini-2.0-flash".into(),
            "gemini-2.5-flash".into(),
            String::new(),
        ];
        assert_eq!(p.model_chain(), vec!["gemini-2.5-flash", "gemini-2.0-flash"]);
        assert_eq!(
            ProviderConfig::gemini_default().model_chain(),
            vec![DEFAULT_GEMINI_MODEL, DEFAULT_GEMINI_FALLBACK]
        );
    }

    #[test]
    fn test_partial_tts_section_keeps_env_default() {
        let config: Config = json5::from_str(r#"{ tts: { default_voice: "abc" } }"#).unwrap();
        let tts = config.tts_config();
        assert_eq!(tts.provider, "elevenlabs");
        assert_eq!(tts.api_key_env.as_deref(), Some("ELEVENLABS_API_KEY"));
        assert_eq!(tts.default_voice.as_deref(), Some("abc"));
        assert!(tts.stream);
    }

    #[test]
    fn test_logging_config_defaults() {
        let config: Config = json5::from_str(r#"{ "logging": {} }"#).unwrap();
        let logging = config.logging.expect("logging should be present");
        assert_eq!(logging.format, "plain");
        assert!(logging.level.is_none());
        assert_eq!(logging.output, "stderr");
        assert!(logging.filters.is_empty());
    }

    #[test]
    fn test_guard_policy_deser() {
        let config: Config =
            json5::from_str(r#"{ pipeline: { guard_policy: "supersede" } }"#).unwrap();
        assert_eq!(config.pipeline_config().guard_policy, GuardPolicy::Supersede);
    }

    #[test]
    fn test_load_from_file_with_substitution() {
        // SAFETY: test-only, the variable name is unique to this test
        unsafe { std::env::set_var("TEST_TB_FILE_KEY", "file-key") };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                // JSON5 comments are allowed
                models: { providers: [{ id: "google", api_key: "${TEST_TB_FILE_KEY}" }] },
                gateway: { port: 9000 },
            }"#,
        )
        .unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.gateway_port(), 9000);
        assert_eq!(config.llm_provider().resolve_api_key(), Some("file-key".into()));
        unsafe { std::env::remove_var("TEST_TB_FILE_KEY") };
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let config = Config::load(Path::new("/nonexistent/talkboard/config.json")).unwrap();
        assert!(config.models.is_none());
    }

    #[test]
    fn test_get_path() {
        let config: Config = json5::from_str(r#"{ symbols: { repo_key: "mulberry" } }"#).unwrap();
        assert_eq!(
            config.get_path("symbols.repo_key"),
            Some(serde_json::json!("mulberry"))
        );
        assert!(config.get_path("symbols.nope").is_none());
    }

    #[test]
    fn test_validate_missing_api_key_warns() {
        let config = Config {
            models: Some(ModelsConfig {
                providers: Some(vec![provider(None)]),
            }),
            ..Config::default()
        };
        let (warnings, errors) = config.validate();
        assert!(
            warnings.iter().any(|w| w.contains("google") && w.contains("API key")),
            "Expected a warning about missing API key, got: {warnings:?}"
        );
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = Config {
            transcription: Some(TranscriptionConfig {
                provider: "carrier-pigeon".into(),
                ..TranscriptionConfig::default()
            }),
            symbols: Some(SymbolsConfig {
                concurrency: 0,
                ..SymbolsConfig::default()
            }),
            gateway: Some(GatewayConfig {
                port: 0,
                ..GatewayConfig::default()
            }),
            ..Config::default()
        };
        let (_warnings, errors) = config.validate();
        assert!(errors.iter().any(|e| e.contains("carrier-pigeon")));
        assert!(errors.iter().any(|e| e.contains("concurrency")));
        assert!(errors.iter().any(|e| e.contains("port")));
    }
}
