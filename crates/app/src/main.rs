use anyhow::{bail, Context, Result};
use cadence_core::{AppConfig, SourceResolver};
use cadence_gateway::{endpoint, GatewayClient, GatewayError};
use cadence_player::{NullEngine, PlaybackController};
use cadence_sync::Session;
use clap::{Parser, Subcommand};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const CONFIG_SCHEMA_VERSION: u32 = 1;

#[derive(Parser, Debug)]
#[command(
    name = "cadence",
    about = "Playback queue and gateway sync daemon"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Run,
    Doctor,
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Writes a default config file.
    Init {
        /// Replace an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cmd = cli.command.unwrap_or(Commands::Run);
    let cfg_path = cli.config.unwrap_or_else(default_config_path);

    match cmd {
        Commands::Config {
            action: ConfigAction::Init { force },
        } => {
            write_default_config(&cfg_path, force)?;
            println!("Wrote default config to {}", cfg_path.display());
            Ok(())
        }
        Commands::Doctor => {
            let cfg = load_config(&cfg_path)?;
            init_logging(&cfg.log_level);
            doctor(&cfg).await
        }
        Commands::Run => {
            let cfg = load_config(&cfg_path)?;
            init_logging(&cfg.log_level);
            run(cfg).await
        }
    }
}

async fn run(cfg: AppConfig) -> Result<()> {
    let resolver = SourceResolver::new(&cfg.base_url, cfg.media_dir.clone())
        .with_context(|| format!("invalid base_url {}", cfg.base_url))?;
    let (engine, mut engine_events) = NullEngine::with_events();
    let player = PlaybackController::new(Box::new(engine), resolver);
    let (gateway, mut gateway_events) = GatewayClient::spawn(cfg.gateway.clone());
    let mut session = Session::new(player, gateway.clone());

    match gateway.connect().await {
        Ok(_) => {}
        Err(err @ (GatewayError::NotConfigured | GatewayError::InvalidUrl { .. })) => {
            return Err(err).context("gateway is not usable; set gateway.url in the config");
        }
        Err(err) => {
            warn!(error=%err, "gateway unreachable; retrying in the background");
        }
    }

    info!(engine = session.player().engine().name(), "cadence started");

    loop {
        tokio::select! {
            Some(event) = engine_events.recv() => {
                if let Err(err) = session.handle_engine_event(event).await {
                    warn!(error=%err, "engine event handling failed");
                }
            }
            Some(event) = gateway_events.recv() => {
                session.handle_gateway_event(event).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received ctrl-c; shutting down");
                break;
            }
        }
    }

    gateway.disconnect();
    Ok(())
}

async fn doctor(cfg: &AppConfig) -> Result<()> {
    println!("== cadence doctor ==");

    match SourceResolver::new(&cfg.base_url, cfg.media_dir.clone()) {
        Ok(resolver) => println!("Media base URL: {}", resolver.base_url()),
        Err(err) => println!("Media base URL: invalid ({err})"),
    }
    println!("Media directory: {}", cfg.media_dir.display());

    let url = match endpoint(&cfg.gateway) {
        Ok(url) => url,
        Err(err) => {
            println!("Gateway endpoint: {err}");
            return Ok(());
        }
    };
    println!("Gateway endpoint: {url}");

    let (gateway, _events) = GatewayClient::spawn(cfg.gateway.clone());
    let reachable = matches!(
        tokio::time::timeout(Duration::from_secs(5), gateway.connect()).await,
        Ok(Ok(true))
    );
    gateway.disconnect();
    println!(
        "Gateway connection: {}",
        if reachable { "ok" } else { "not reachable" }
    );
    if cfg.gateway.token.is_empty() {
        println!("Gateway token: missing; the server will reject state updates");
    }

    Ok(())
}

fn default_config_path() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("cadence").join("config.toml")
}

fn write_default_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists; pass --force to replace it", path.display());
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("cannot create {}", dir.display()))?;
    }
    let rendered = toml::to_string_pretty(&AppConfig::default())?;
    std::fs::write(path, rendered).with_context(|| format!("cannot write {}", path.display()))
}

fn load_config(path: &Path) -> Result<AppConfig> {
    let mut cfg = match std::fs::read_to_string(path) {
        Ok(raw) => toml::from_str::<AppConfig>(&raw)
            .with_context(|| format!("cannot parse {}", path.display()))?,
        Err(err) if err.kind() == ErrorKind::NotFound => AppConfig::default(),
        Err(err) => return Err(err).with_context(|| format!("cannot read {}", path.display())),
    };
    if cfg.schema_version > CONFIG_SCHEMA_VERSION {
        eprintln!(
            "warning: {} has schema_version {}; this build understands {}",
            path.display(),
            cfg.schema_version,
            CONFIG_SCHEMA_VERSION
        );
    }
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn apply_env_overrides(cfg: &mut AppConfig) {
    if let Some(url) = env_value("CADENCE_GATEWAY_URL") {
        cfg.gateway.url = Some(url);
    }
    if let Some(base_url) = env_value("CADENCE_BASE_URL") {
        cfg.base_url = base_url;
    }
    if let Some(token) = env_value("CADENCE_TOKEN") {
        cfg.gateway.token = token;
    }
    if let Some(level) = env_value("CADENCE_LOG_LEVEL") {
        cfg.log_level = level;
    }
    if let Some(broadcast) = env_value("CADENCE_BROADCAST").and_then(|v| v.parse().ok()) {
        cfg.gateway.broadcast = broadcast;
    }
}
