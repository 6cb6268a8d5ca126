//! notifyd - WebSocket notification server
//!
//! Serves `/ws`, `/health` and `/status`. On SIGINT/SIGTERM it stops
//! accepting connections, waits up to the drain timeout for connected
//! clients to leave, then force-closes the rest and exits.

use clap::Parser as ClapParser;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use notifyd::{
    config::{self, ConfigError, FileConfig, Overrides, Settings},
    server::{Server, ServerError},
    shutdown::DrainOutcome,
};

/// notifyd - WebSocket notification server with graceful drain
///
/// Command-line flags override the config file, which overrides built-in
/// defaults.
#[derive(ClapParser, Debug)]
#[command(name = "notifyd", version, about, long_about = None)]
struct Cli {
    /// Address to bind the HTTP/WebSocket server [default: 0.0.0.0:8000]
    #[arg(long, env = "NOTIFYD_BIND")]
    bind: Option<SocketAddr>,

    /// Path to the TOML config file
    /// [default: $XDG_CONFIG_HOME/notifyd/config.toml]
    #[arg(long, env = "NOTIFYD_CONFIG")]
    config: Option<PathBuf>,

    /// Instance name included in notifications [default: hostname]
    #[arg(long, env = "NOTIFYD_INSTANCE")]
    instance: Option<String>,

    /// Seconds to wait for clients to disconnect before force-closing them
    /// [default: 1800]
    #[arg(long, env = "NOTIFYD_DRAIN_TIMEOUT")]
    drain_timeout: Option<u64>,

    /// Milliseconds between drain progress checks [default: 1000]
    #[arg(long, env = "NOTIFYD_POLL_INTERVAL")]
    poll_interval: Option<u64>,

    /// Seconds between periodic notifications [default: 10]
    #[arg(long, env = "NOTIFYD_BROADCAST_INTERVAL")]
    broadcast_interval: Option<u64>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            bind: self.bind,
            instance: self.instance.clone(),
            drain_timeout_secs: self.drain_timeout,
            poll_interval_ms: self.poll_interval,
            broadcast_interval_secs: self.broadcast_interval,
        }
    }
}

#[derive(Debug, Error)]
enum NotifydError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("server error: {0}")]
    Server(#[from] ServerError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), NotifydError> {
    let cli = Cli::parse();
    init_tracing();

    let settings = load_settings(&cli)?;
    run_server(settings).await
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "notifyd=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_settings(cli: &Cli) -> Result<Settings, ConfigError> {
    let file = match cli.config.clone().or_else(config::default_config_path) {
        Some(path) => {
            let loaded = FileConfig::load(&path)?;
            match &loaded {
                Some(_) => tracing::info!(path = %path.display(), "loaded config file"),
                // An explicitly named file that doesn't exist is worth a warning.
                None if cli.config.is_some() => {
                    tracing::warn!(path = %path.display(), "config file not found, using defaults")
                }
                None => tracing::debug!(path = %path.display(), "no config file"),
            }
            loaded.unwrap_or_default()
        }
        None => FileConfig::default(),
    };
    Settings::resolve(file, cli.overrides())
}

async fn run_server(settings: Settings) -> Result<(), NotifydError> {
    tracing::info!(
        drain_timeout_secs = settings.drain.drain_timeout.as_secs(),
        poll_interval_ms = settings.drain.poll_interval.as_millis() as u64,
        broadcast_interval_secs = settings.broadcast_interval.as_secs(),
        "notifyd starting"
    );

    let listener = tokio::net::TcpListener::bind(settings.bind).await?;
    let server = Server::new(settings);
    let signals = server.shutdown().start()?;

    let outcome = server.serve(listener).await?;
    signals.abort();

    match outcome {
        DrainOutcome::Drained => tracing::info!("all clients disconnected, notifyd exiting"),
        DrainOutcome::Forced(report) => tracing::info!(
            closed = report.closed,
            failed = report.failed,
            "drain deadline reached, notifyd exiting"
        ),
    }
    Ok(())
}
