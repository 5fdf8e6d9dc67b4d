//! voxserve - real-time speech-to-speech conversation server.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use voxserve::adapters::scripted::{ScriptedAsr, ScriptedLlm, ScriptedTts, ScriptedUtterance};
use voxserve::adapters::AdapterSet;
use voxserve::config::loader::load_config;
use voxserve::server::VoiceServer;

#[derive(Parser)]
#[command(
    name = "voxserve",
    about = "voxserve - speech-to-speech conversation server",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the WebSocket server.
    Serve {
        /// Host to bind to.
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on.
        #[arg(short, long)]
        port: Option<u16>,
        /// Config file path (default: ~/.voxserve/config.json).
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Verbose logging.
        #[arg(short, long)]
        verbose: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .ok();
}

/// Scripted adapters for demo operation: concrete cloud providers plug in
/// through the same traits.
fn demo_adapters() -> AdapterSet {
    AdapterSet {
        asr: Arc::new(ScriptedAsr::new(
            vec![
                ScriptedUtterance::new(&["hel", "hello"], "hello"),
                ScriptedUtterance::new(&["how are", "how are you"], "how are you"),
            ],
            32_000,
        )),
        llm: Arc::new(ScriptedLlm::echo()),
        tts: Arc::new(ScriptedTts::new()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve {
            host,
            port,
            config,
            verbose,
        } => {
            init_tracing(verbose);

            let mut cfg = load_config(config.as_deref());
            if let Some(host) = host {
                cfg.server.host = host;
            }
            if let Some(port) = port {
                cfg.server.port = port;
            }

            let server = VoiceServer::bind(cfg, demo_adapters()).await?;
            let shutdown = server.shutdown_token();

            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("ctrl-c received, shutting down");
                    shutdown.cancel();
                }
            });

            server.run().await;
        }
    }
    Ok(())
}
