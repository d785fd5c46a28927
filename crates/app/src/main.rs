use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tidal_presence_core::AppConfig;
use tidal_presence_engine::{Bridge, EngineConfig, Resolution, TokenCache, TrackResolver};
use tidal_presence_providers::host::find_connection;
use tidal_presence_providers::{ConnectionsApi, HostRestClient, SpotifySearchClient};
use tidal_presence_rpc::{bind_first_free, GatewayChannel, RpcServer};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "tidal-presence",
    about = "TIDAL now playing -> Spotify metadata -> Discord presence"
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
    /// Look a track up once and print what would be shown.
    Resolve {
        name: String,
        /// Track length in seconds.
        duration: f64,
    },
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cmd = cli.command.unwrap_or(Commands::Run);
    let cfg_path = cli.config.unwrap_or_else(default_config_path);

    match cmd {
        Commands::Config {
            action: ConfigAction::Init,
        } => {
            init_config(&cfg_path)?;
            println!("Initialized config at {}", cfg_path.display());
            Ok(())
        }
        Commands::Doctor => {
            let cfg = load_or_default(&cfg_path)?;
            init_logging(&cfg.log_level);
            doctor(&cfg).await
        }
        Commands::Resolve { name, duration } => {
            let cfg = load_or_default(&cfg_path)?;
            init_logging(&cfg.log_level);
            resolve_once(&cfg, &name, duration).await
        }
        Commands::Run => {
            let cfg = load_or_default(&cfg_path)?;
            init_logging(&cfg.log_level);
            if let Err(err) = run(cfg).await {
                error!(error = %err, "tidal-presence stopped");
                return Err(err);
            }
            Ok(())
        }
    }
}

async fn run(cfg: AppConfig) -> Result<()> {
    let engine_cfg = EngineConfig::from_app_config(&cfg);
    let tokens = Arc::new(bootstrap_tokens(&cfg, &engine_cfg).await?);
    let search = Arc::new(SpotifySearchClient::new(
        cfg.search.api_base_url.clone(),
        request_timeout(&cfg),
    )?);
    let gateway = Arc::new(GatewayChannel::new(&cfg.gateway.url)?);
    let presence_state = Arc::new(cfg.presence.base_state());

    let bridge = Arc::new(Bridge::new(
        &engine_cfg,
        tokens,
        search,
        gateway,
        presence_state,
    ));
    let server = RpcServer::new(bridge, cfg.listener.clone());

    info!(gateway = %cfg.gateway.url, "tidal-presence started");

    tokio::select! {
        res = server.run() => res,
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c; shutting down");
            Ok(())
        }
    }
}

async fn bootstrap_tokens(cfg: &AppConfig, engine_cfg: &EngineConfig) -> Result<TokenCache> {
    let host = Arc::new(host_client(cfg)?);
    TokenCache::bootstrap(
        host,
        &cfg.host.connection_type,
        engine_cfg.token_ttl,
        Instant::now(),
    )
    .await
    .with_context(|| {
        format!(
            "failed to load the linked {} connection",
            cfg.host.connection_type
        )
    })
}

async fn doctor(cfg: &AppConfig) -> Result<()> {
    println!("== tidal-presence doctor ==");

    if cfg.host.token.trim().is_empty() {
        println!("Host token: missing (set TIDAL_PRESENCE_HOST_TOKEN or host.token)");
    } else {
        println!("Host token: configured");
    }

    let host = host_client(cfg)?;
    match host.connections().await {
        Ok(connections) => match find_connection(connections, &cfg.host.connection_type) {
            Ok(conn) => println!(
                "Linked {} connection: {} ({})",
                conn.kind,
                conn.name.unwrap_or_else(|| "<unnamed>".to_string()),
                conn.id
            ),
            Err(err) => println!("Linked connection: {err}"),
        },
        Err(err) => println!("Connections endpoint: {err}"),
    }

    match bind_first_free(&cfg.listener.ports).await {
        Ok((_, port)) => println!("RPC listener: port {port} is free"),
        Err(err) => println!("RPC listener: {err}"),
    }
    println!("Gateway: {}", cfg.gateway.url);

    Ok(())
}

async fn resolve_once(cfg: &AppConfig, name: &str, duration: f64) -> Result<()> {
    let engine_cfg = EngineConfig::from_app_config(cfg);
    let tokens = Arc::new(bootstrap_tokens(cfg, &engine_cfg).await?);
    let search = Arc::new(SpotifySearchClient::new(
        cfg.search.api_base_url.clone(),
        request_timeout(cfg),
    )?);
    let resolver = TrackResolver::new(search, tokens.clone(), engine_cfg.duration_tolerance_ms);

    let credential = tokens.credential(Instant::now()).await;
    match resolver.resolve(name, duration, &credential).await {
        Resolution::Found(track) => {
            println!("title: {}", track.title);
            println!("artists: {}", track.artist_names.join("; "));
            println!("album: {} ({})", track.album_name, track.album_id);
            if let Some(image) = track.album_image_id {
                println!("cover: spotify:{image}");
            }
            println!("duration: {}ms", track.duration_ms);
        }
        Resolution::NotFound | Resolution::Superseded => println!("not found"),
    }
    Ok(())
}

fn host_client(cfg: &AppConfig) -> Result<HostRestClient> {
    Ok(HostRestClient::new(
        cfg.host.api_base_url.clone(),
        cfg.host.token.clone(),
        request_timeout(cfg),
    )?)
}

fn request_timeout(cfg: &AppConfig) -> Duration {
    Duration::from_millis(cfg.search.request_timeout_ms)
}

fn default_config_path() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("tidal-presence").join("config.toml")
}

fn init_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory {}", parent.display()))?;
    }
    let cfg = AppConfig::default();
    let toml = toml::to_string_pretty(&cfg)?;
    std::fs::write(path, toml)
        .with_context(|| format!("failed to write config file {}", path.display()))?;
    Ok(())
}

fn load_or_default(path: &Path) -> Result<AppConfig> {
    let mut cfg = if !path.exists() {
        AppConfig::default()
    } else {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))?
    };
    apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
    Ok(cfg)
}

fn init_logging(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();
}

fn apply_env_overrides(cfg: &mut AppConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("TIDAL_PRESENCE_HOST_TOKEN") {
        if !v.trim().is_empty() {
            cfg.host.token = v;
        }
    }
    if let Some(v) = var("TIDAL_PRESENCE_LOG_LEVEL") {
        if !v.trim().is_empty() {
            cfg.log_level = v;
        }
    }
    if let Some(v) = var("TIDAL_PRESENCE_GATEWAY_URL") {
        if !v.trim().is_empty() {
            cfg.gateway.url = v;
        }
    }
}
