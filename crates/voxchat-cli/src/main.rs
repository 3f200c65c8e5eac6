//! voxchat CLI — conversational speech server and its clients.
//!
//! ```text
//! voxchat serve [--port 8080] [--host 0.0.0.0] [--tts-engine-url ...]
//! voxchat tts "hello world" [--voice leo] [--get] [--out hello.wav]
//! voxchat chat "how are you?" [--history turns.json] [--text]
//! voxchat bench "tell me a story" [--runs 3] [--text]
//! voxchat health / voices / models / diagnose
//! ```

mod client;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voxchat_core::types::{EngineSettings, ServerConfig, DEFAULT_SYSTEM_PROMPT, MEMORY_BUDGET};
use voxchat_lib::state::AppState;

/// voxchat — streaming text-to-speech and spoken chat over HTTP
#[derive(Parser)]
#[command(name = "voxchat", version, about)]
struct Cli {
    /// Server URL for client commands
    #[arg(long, global = true, env = "VOXCHAT_SERVER", default_value = "http://localhost:8080")]
    server: String,

    /// Per-request timeout for client commands, in seconds
    #[arg(long, global = true, default_value = "120")]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the voxchat server
    Serve(ServeArgs),
    /// Check server and model health
    Health,
    /// List available voices
    Voices,
    /// Show model metadata
    Models,
    /// Synthesize a prompt to a WAV file
    Tts {
        /// Text to speak
        prompt: String,
        #[arg(long, default_value = "tara")]
        voice: String,
        /// Use GET with query parameters instead of a JSON POST
        #[arg(long)]
        get: bool,
        #[arg(long, default_value = "output.wav")]
        out: PathBuf,
    },
    /// Send a chat message and save the spoken reply
    Chat {
        message: String,
        #[arg(long, default_value = "tara")]
        voice: String,
        /// JSON file with prior turns: [{"role": "user", "content": "..."}]
        #[arg(long)]
        history: Option<PathBuf>,
        /// Stream the reply as text to stdout instead of audio
        #[arg(long)]
        text: bool,
        #[arg(long, default_value = "chat.wav")]
        out: PathBuf,
    },
    /// Time repeated chat requests
    Bench {
        message: String,
        #[arg(long, default_value = "tara")]
        voice: String,
        #[arg(long, default_value = "3")]
        runs: usize,
        /// Measure the text reply only, without speech
        #[arg(long)]
        text: bool,
    },
    /// Report GPU memory usage against the configured engine budget
    Diagnose(ServeArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// Listen port
    #[arg(long, env = "PORT", default_value = "8080")]
    port: u16,
    /// Listen host
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,
    #[arg(long, env = "TTS_MODEL_NAME", default_value = "canopylabs/orpheus-tts-0.1-finetune-prod")]
    tts_model_name: String,
    #[arg(long, env = "TTS_MAX_MODEL_LEN", default_value = "2048")]
    tts_max_model_len: u32,
    #[arg(long, env = "TTS_GPU_MEMORY_UTILIZATION", default_value = "0.5")]
    tts_gpu_memory_utilization: f32,
    /// Speech engine base URL
    #[arg(long, env = "TTS_ENGINE_URL", default_value = "http://127.0.0.1:8001")]
    tts_engine_url: String,
    #[arg(long, env = "LLM_MODEL_NAME", default_value = "meta-llama/Llama-3.2-3B-Instruct")]
    llm_model_name: String,
    #[arg(long, env = "LLM_MAX_MODEL_LEN", default_value = "4096")]
    llm_max_model_len: u32,
    #[arg(long, env = "LLM_GPU_MEMORY_UTILIZATION", default_value = "0.35")]
    llm_gpu_memory_utilization: f32,
    /// Text engine base URL
    #[arg(long, env = "LLM_ENGINE_URL", default_value = "http://127.0.0.1:8002")]
    llm_engine_url: String,
    /// Reply length limit for chat
    #[arg(long, env = "LLM_MAX_TOKENS", default_value = "256")]
    llm_max_tokens: u32,
    #[arg(long, env = "LLM_SYSTEM_PROMPT", default_value = DEFAULT_SYSTEM_PROMPT)]
    system_prompt: String,
    /// Audio decoder device passed to the speech engine
    #[arg(long, env = "SNAC_DEVICE", default_value = "cuda")]
    snac_device: String,
    /// HTML page served at `/`
    #[arg(long, env = "WEB_UI_PATH", default_value = "web_ui.html")]
    web_ui_path: String,
}

impl ServeArgs {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            host: self.host,
            port: self.port,
            tts: EngineSettings {
                model_name: self.tts_model_name,
                max_model_len: self.tts_max_model_len,
                gpu_memory_utilization: self.tts_gpu_memory_utilization,
                url: self.tts_engine_url,
            },
            llm: EngineSettings {
                model_name: self.llm_model_name,
                max_model_len: self.llm_max_model_len,
                gpu_memory_utilization: self.llm_gpu_memory_utilization,
                url: self.llm_engine_url,
            },
            snac_device: self.snac_device,
            llm_max_tokens: self.llm_max_tokens,
            system_prompt: self.system_prompt,
            web_ui_path: self.web_ui_path,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voxchat=info,voxchat_lib=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/');
    let http = client::http_client(Duration::from_secs(cli.timeout))?;

    match cli.command {
        Command::Serve(args) => serve(args.into_config()).await,
        Command::Health => client::get_json(&http, server, "/health").await,
        Command::Voices => client::get_json(&http, server, "/voices").await,
        Command::Models => client::get_json(&http, server, "/models").await,
        Command::Tts {
            prompt,
            voice,
            get,
            out,
        } => client::tts(&http, server, &prompt, &voice, get, &out).await,
        Command::Chat {
            message,
            voice,
            history,
            text,
            out,
        } => client::chat(&http, server, &message, &voice, history.as_deref(), text, &out).await,
        Command::Bench {
            message,
            voice,
            runs,
            text,
        } => client::bench(&http, server, &message, &voice, runs, text).await,
        Command::Diagnose(args) => diagnose(&args.into_config()).await,
    }
}

async fn serve(config: ServerConfig) -> Result<()> {
    info!("Starting voxchat server");

    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::new(config.clone());

    // The listener comes up immediately; /health answers 503 until the
    // engines are ready.
    let init_state = state.clone();
    tokio::spawn(async move {
        let status = voxchat_lib::init::initialize(&config).await;
        if init_state.set_models(status).is_err() {
            warn!("model status was already recorded");
        }
    });

    let app = voxchat_lib::server::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

async fn diagnose(config: &ServerConfig) -> Result<()> {
    println!("Configured engines");
    println!(
        "  tts: {} (max len {}, memory {:.2})",
        config.tts.model_name, config.tts.max_model_len, config.tts.gpu_memory_utilization
    );
    println!(
        "  llm: {} (max len {}, memory {:.2})",
        config.llm.model_name, config.llm.max_model_len, config.llm.gpu_memory_utilization
    );
    println!("  audio decoder device: {}", config.snac_device);

    let claim = config.memory_claim();
    if config.exceeds_memory_budget() {
        println!("  combined memory {claim:.2} exceeds budget {MEMORY_BUDGET:.2}; lower one fraction");
    } else {
        println!("  combined memory {claim:.2} within budget {MEMORY_BUDGET:.2}");
    }

    println!();
    println!("GPUs");
    match voxchat_lib::diagnostics::query_gpus().await {
        Ok(gpus) if gpus.is_empty() => println!("  none reported"),
        Ok(gpus) => {
            for gpu in gpus {
                println!(
                    "  [{}] {}: {}/{} MiB ({:.0}%), utilization {}%",
                    gpu.index,
                    gpu.name,
                    gpu.memory_used_mib,
                    gpu.memory_total_mib,
                    gpu.memory_used_fraction() * 100.0,
                    gpu.utilization_percent
                );
            }
        }
        Err(e) => println!("  {e}"),
    }

    println!();
    println!("Compute processes");
    match voxchat_lib::diagnostics::query_compute_apps().await {
        Ok(apps) if apps.is_empty() => println!("  none"),
        Ok(apps) => {
            for app in apps {
                println!("  pid {} {}: {} MiB", app.pid, app.process_name, app.used_memory_mib);
            }
        }
        Err(e) => println!("  {e}"),
    }

    Ok(())
}
