use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use talkboard_core::config::Config;
use talkboard_core::types::{AudioUpload, AutismProfile};
use talkboard_gateway::GatewayState;
use talkboard_media::{SpeechSynthesizer, Transcriber};
use talkboard_pipeline::Pipeline;

mod logging;

#[derive(Parser)]
#[command(
    name = "talkboard",
    about = "AAC speech assistant: transcribe, suggest picture symbols, and speak phrases",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Gateway {
        /// Port to listen on (default: 8787)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Show configuration and gateway status
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Transcribe an audio file
    Transcribe {
        /// Audio file (webm, wav, mp3, m4a, ogg, flac)
        file: PathBuf,
    },

    /// Plan symbol searches for a transcript
    Plan {
        transcript: String,

        /// JSON file with the communication profile
        #[arg(long)]
        profile: Option<PathBuf>,
    },

    /// Plan, fetch and rank symbols for a transcript
    Suggest {
        transcript: String,

        /// Session key for the single-flight guard
        #[arg(long, default_value = "cli")]
        session: String,

        /// JSON file with the communication profile
        #[arg(long)]
        profile: Option<PathBuf>,
    },

    /// Compose a phrase from a transcript and selected symbols
    Interpret {
        transcript: String,

        /// Selected symbol name (repeatable)
        #[arg(long = "symbol")]
        symbols: Vec<String>,
    },

    /// Synthesize speech to an audio file
    Speak {
        text: String,

        /// Voice ID (default: configured voice)
        #[arg(long)]
        voice: Option<String>,

        /// Output file
        #[arg(short, long)]
        out: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value by dotted path
    Get { key: String },
    /// Check configuration for problems
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)?;

    logging::init(&config.logging_config(), cli.verbose);

    match cli.command {
        Commands::Gateway { port } => {
            let port = port.unwrap_or_else(|| config.gateway_port());
            let (warnings, errors) = config.validate();
            for w in &warnings {
                tracing::warn!("{w}");
            }
            if !errors.is_empty() {
                for e in &errors {
                    tracing::error!("{e}");
                }
                anyhow::bail!("Invalid configuration: {} error(s)", errors.len());
            }

            tracing::info!("Starting Talkboard gateway on port {port}");
            let state = Arc::new(GatewayState::new(Arc::new(config)));
            talkboard_gateway::start_gateway(state, port).await?;
        }
        Commands::Status => {
            let port = config.gateway_port();
            let llm = config.llm_provider();
            println!("Talkboard v{}", env!("CARGO_PKG_VERSION"));
            println!("Config: {}", config_path.display());
            println!("Gateway port: {port}");
            println!(
                "Language model: {} ({}) {}",
                llm.id,
                llm.model_chain().join(" -> "),
                configured(llm.resolve_api_key().is_some())
            );
            println!(
                "Transcription: {} {}",
                config.transcription_config().provider,
                configured(config.transcription_config().resolve_api_key().is_some())
            );
            println!(
                "Speech: {} {}",
                config.tts_config().provider,
                configured(config.tts_config().resolve_api_key().is_some())
            );
            println!("Symbols: {}", config.symbols_config().base_url);
            println!("Status: {}", gateway_status(port).await);
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => anyhow::bail!("No config value at '{key}'"),
            },
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for w in &warnings {
                    println!("warning: {w}");
                }
                for e in &errors {
                    println!("error: {e}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("Configuration has {} error(s)", errors.len());
                }
                println!("Configuration OK");
            }
        },
        Commands::Transcribe { file } => {
            let bytes = tokio::fs::read(&file).await?;
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "recording".to_string());
            let upload = AudioUpload::new(bytes, file_name, audio_mime_type(&file));

            let transcriber = Transcriber::new(config.transcription_config());
            let result = transcriber.transcribe(&upload).await?;
            println!("{}", result.text);
            tracing::info!(elapsed_ms = result.transcription_time_ms, "Transcription done");
        }
        Commands::Plan { transcript, profile } => {
            let profile = load_profile(profile.as_deref())?;
            let pipeline = Pipeline::from_config(&config);
            let plan = pipeline.planner().plan(&transcript, profile.as_ref()).await?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        Commands::Suggest {
            transcript,
            session,
            profile,
        } => {
            let profile = load_profile(profile.as_deref())?;
            let pipeline = Pipeline::from_config(&config);
            let suggestion = pipeline
                .suggest(&session, &transcript, profile.as_ref())
                .await?;
            println!("{}", serde_json::to_string_pretty(&suggestion)?);
        }
        Commands::Interpret {
            transcript,
            symbols,
        } => {
            let pipeline = Pipeline::from_config(&config);
            let composed = pipeline.composer().compose(&transcript, &symbols).await;
            println!("{}", composed.phrase);
        }
        Commands::Speak { text, voice, out } => {
            let synth = SpeechSynthesizer::new(config.tts_config());
            let audio = synth.synthesize(&text, voice.as_deref()).await?;
            let voice_id = audio.voice_id.clone();
            let bytes = audio.into_bytes().await?;
            tokio::fs::write(&out, &bytes).await?;
            println!(
                "Wrote {} bytes ({voice_id}) to {}",
                bytes.len(),
                out.display()
            );
        }
    }

    Ok(())
}

fn configured(ok: bool) -> &'static str {
    if ok { "[configured]" } else { "[no API key]" }
}

async fn gateway_status(port: u16) -> String {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
    {
        Ok(client) => client,
        Err(_) => return "unknown".to_string(),
    };
    let resp = client
        .get(format!("http://127.0.0.1:{port}/health"))
        .send()
        .await;
    match resp {
        Ok(resp) if resp.status().is_success() => {
            let uptime = resp
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|body| body["uptimeSecs"].as_u64());
            match uptime {
                Some(secs) => format!("running (up {secs}s)"),
                None => "running".to_string(),
            }
        }
        _ => "not running".to_string(),
    }
}

fn load_profile(path: Option<&Path>) -> anyhow::Result<Option<AutismProfile>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let raw = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    Ok(Some(AutismProfile(value)))
}

fn audio_mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("m4a") | Some("mp4") => "audio/mp4",
        Some("ogg") | Some("oga") => "audio/ogg",
        Some("flac") => "audio/flac",
        _ => "audio/webm",
    }
}
