//! works-notify - LINE WORKS notification client

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn, Level};
use works_notify::config::{cookie_value, load_cookie_header, WorksConfig};
use works_notify::observability::logging::{parse_level, LogFormat};
use works_notify::observability::init_logging;
use works_notify::protocol::WorksMessage;
use works_notify::transport::mqtt::{ClientHealth, Credentials, WorksClient};
use works_notify::transport::websocket::WebSocketConnector;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(300);

/// Receive LINE WORKS notifications over MQTT/WebSocket
#[derive(Parser)]
#[command(name = "works-notify")]
#[command(about = "LINE WORKS push notification client")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and log every delivered message until interrupted
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_cli_logging(cli.verbose);

    info!("Starting works-notify v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_client(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Shutdown complete");
}

fn init_cli_logging(verbose: u8) {
    let level = match verbose {
        0 => parse_level(&std::env::var("LOG_LEVEL").unwrap_or_default()),
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let format = LogFormat::parse(&std::env::var("LOG_FORMAT").unwrap_or_default());
    let include_spans = std::env::var("LOG_SPANS")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    init_logging(level, format, include_spans);
}

fn load_configuration(
    config_path: Option<&Path>,
) -> Result<WorksConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(WorksConfig::load_from_file(path)?);
    }

    for candidate in ["works.toml", "config/works.toml"] {
        let path = PathBuf::from(candidate);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(WorksConfig::load_from_file(&path)?);
        }
    }

    Err("No configuration file found. Provide one with -c/--config or create works.toml".into())
}

async fn run_client(config: WorksConfig) -> Result<(), Box<dyn std::error::Error>> {
    // rustls needs a process-wide crypto provider before the first TLS handshake
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cookie_file = config.websocket.cookie_file.clone();
    let cookie_header = load_cookie_header(&cookie_file)?;

    let token = match &config.mqtt.token_cookie {
        Some(name) => {
            let token = cookie_value(&cookie_file, name)?;
            if token.is_none() {
                error!(cookie = %name, "Token cookie not found in {}", cookie_file.display());
            }
            token
        }
        None => None,
    };
    let credentials = Credentials::new(config.mqtt.username.clone(), token);

    let (tx, mut rx) = mpsc::unbounded_channel::<WorksMessage>();
    let mut client = WorksClient::new(config, Arc::new(WebSocketConnector::new()), tx)?
        .with_credentials(credentials)
        .with_cookie_header(cookie_header);

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    client.start();
    info!("Waiting for notifications...");

    let mut health_log = tokio::time::interval_at(
        tokio::time::Instant::now() + HEALTH_LOG_INTERVAL,
        HEALTH_LOG_INTERVAL,
    );

    loop {
        tokio::select! {
            Some(message) = rx.recv() => log_message(&message),
            _ = health_log.tick() => log_health(&client.health()),
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully...");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
                break;
            }
            result = client.wait() => {
                // The supervisor only ends on its own for terminal failures
                result?;
                return Ok(());
            }
        }
    }

    client.stop().await?;
    while let Ok(message) = rx.try_recv() {
        log_message(&message);
    }
    let dispatch = client.health().dispatch;
    info!(
        delivered = dispatch.delivered,
        duplicates = dispatch.duplicates,
        rejected = dispatch.rejected,
        "Session totals"
    );
    Ok(())
}

fn log_health(health: &ClientHealth) {
    let uptime_secs = health.metrics.uptime.map(|d| d.as_secs());
    let idle_secs = health.metrics.time_since_last_packet.map(|d| d.as_secs());
    if health.metrics.is_healthy {
        info!(
            state = %health.state,
            quality = ?health.quality,
            uptime_secs,
            idle_secs,
            reconnects = health.metrics.reconnect_count,
            delivered = health.dispatch.delivered,
            duplicates = health.dispatch.duplicates,
            rejected = health.dispatch.rejected,
            "Session health"
        );
    } else {
        warn!(
            state = %health.state,
            quality = ?health.quality,
            idle_secs,
            reconnects = health.metrics.reconnect_count,
            delivered = health.dispatch.delivered,
            "Session unhealthy"
        );
    }
}

fn log_message(message: &WorksMessage) {
    info!(
        notification_id = %message.notification_id,
        message_type = %message.message_type,
        channel_id = %message.channel_id,
        channel = message.channel_title.as_deref().unwrap_or(""),
        sender = message.sender_name.as_deref().unwrap_or(""),
        sticker = message.is_sticker(),
        "{}",
        message.text.as_deref().unwrap_or("")
    );
}

fn handle_config_command(
    config: &WorksConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("{}", config.to_toml()?);
    }

    info!("Configuration validation complete");
    Ok(())
}
