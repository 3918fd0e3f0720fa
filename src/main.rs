use std::path::PathBuf;

use anyhow::anyhow;
use clap::{Parser, Subcommand};

use live_assist::{BackendClient, EngineConfig, LocalToolRegistry, core::FunctionDeclaration};

/// Live Assist - realtime voice shopping assistant
#[derive(Parser, Debug)]
#[command(name = "live-assist")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check backend health
    Health,

    /// Print the tool declarations a session would send
    Tools,

    /// Run a voice session on the system microphone and speaker
    #[cfg(feature = "cpal-audio")]
    Session {
        /// Input device name (system default if omitted)
        #[arg(long = "input-device")]
        input_device: Option<String>,

        /// Output device name (system default if omitted)
        #[arg(long = "output-device")]
        output_device: Option<String>,

        /// Number of protocol log entries printed on exit
        #[arg(long = "log-tail", default_value_t = 20)]
        log_tail: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt::init();

    // Must be installed before the first TLS connection
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let config = if let Some(config_path) = cli.config {
        println!("Loading configuration from {}", config_path.display());
        EngineConfig::from_file(&config_path)?
    } else {
        EngineConfig::from_env()?
    };

    let backend = BackendClient::from_config(&config)?;

    match cli.command {
        Commands::Health => {
            let health = backend.health_check().await?;
            println!("{}", serde_json::to_string_pretty(&health)?);
            if !health.is_healthy() {
                anyhow::bail!(
                    "Backend unhealthy: {}",
                    health.error.as_deref().unwrap_or("no details")
                );
            }
        }
        Commands::Tools => {
            let mut tools = backend.get_sdk_tools().await?;
            tools.extend(local_tools().declarations());
            println!("{}", serde_json::to_string_pretty(&tools)?);
        }
        #[cfg(feature = "cpal-audio")]
        Commands::Session {
            input_device,
            output_device,
            log_tail,
        } => {
            let devices = live_assist::core::audio::CpalAudioProvider {
                input_device,
                output_device,
            };
            session::run(config, std::sync::Arc::new(backend), devices, log_tail).await?;
        }
    }

    Ok(())
}

/// Tools answered inside this process.
fn local_tools() -> LocalToolRegistry {
    let mut registry = LocalToolRegistry::new();
    registry.register_fn(
        FunctionDeclaration::new(
            "navigate_to_page",
            "Open a storefront page such as the cart, checkout or a product page",
        )
        .with_parameters(serde_json::json!({
            "type": "object",
            "properties": {
                "page": {
                    "type": "string",
                    "description": "Path of the page to open, e.g. /cart"
                }
            },
            "required": ["page"]
        })),
        |args| async move {
            let page = args
                .get("page")
                .and_then(|v| v.as_str())
                .ok_or_else(|| "missing 'page' argument".to_string())?
                .to_string();
            println!(">> navigate to {page}");
            Ok::<_, String>(Some(serde_json::json!({ "success": true, "page": page })))
        },
    );
    registry
}

#[cfg(feature = "cpal-audio")]
mod session {
    use std::sync::Arc;

    use tokio::io::{AsyncBufReadExt, BufReader};

    use live_assist::backend::SessionBackend;
    use live_assist::core::audio::CpalAudioProvider;
    use live_assist::{EngineConfig, LiveSession, WebSocketTransport};

    pub async fn run(
        config: EngineConfig,
        backend: Arc<dyn SessionBackend>,
        devices: CpalAudioProvider,
        log_tail: usize,
    ) -> anyhow::Result<()> {
        let session = LiveSession::new(
            config,
            backend,
            Arc::new(WebSocketTransport::new()),
            Arc::new(devices),
        )
        .with_local_tools(super::local_tools());

        session.prepare().await?;
        session.connect().await?;
        if let Some(info) = session.session_info().await {
            println!("Connected to {} with tools: {}", info.model, info.tools.join(", "));
        }
        println!("Type 'm' + Enter to toggle mute, Ctrl-C to quit.");

        let mut connected = session.connected();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    println!("Shutting down...");
                    break;
                }
                changed = connected.changed() => {
                    if changed.is_err() || !*connected.borrow_and_update() {
                        println!(
                            "Disconnected: {}",
                            session.last_error().unwrap_or_else(|| "closed".to_string())
                        );
                        break;
                    }
                    println!("Connected");
                }
                line = lines.next_line(), if stdin_open => match line {
                    Ok(Some(line)) if line.trim().eq_ignore_ascii_case("m") => {
                        let muted = session.toggle_mute();
                        println!("{}", if muted { "Muted" } else { "Unmuted" });
                    }
                    Ok(Some(_)) => {}
                    // stdin closed; keep running until Ctrl-C
                    Ok(None) | Err(_) => stdin_open = false,
                },
            }
        }

        session.disconnect().await;

        let entries = session.logs().entries();
        let skip = entries.len().saturating_sub(log_tail);
        for entry in &entries[skip..] {
            let repeat = if entry.repeat_count > 1 {
                format!(" (x{})", entry.repeat_count)
            } else {
                String::new()
            };
            println!("[{}] {}{}: {}", entry.seq, entry.kind, repeat, entry.payload);
        }
        Ok(())
    }
}
