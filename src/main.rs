//! Polyhub - real-time connection hub

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use polyhub::{action::LogHandler, config::ConfigManager, ConnectionManager, ShutdownCoordinator};

/// CLI arguments for Polyhub
#[derive(Parser, Debug)]
#[command(name = "polyhub")]
#[command(about = "Polyhub - real-time connection hub")]
#[command(version)]
#[command(long_about = "
Polyhub - real-time connection hub

Accepts WebSocket connections on the HTTP listener and framed TCP
connections from sibling servers, keeps them alive and dispatches every
inbound frame to the action handler.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Environment variables
3. Configuration file
4. Built-in defaults

Environment variables:
  POLYHUB_NAME        - Server name
  POLYHUB_HTTP_ADDR   - HTTP/WebSocket listener (e.g., 127.0.0.1:8080)
  POLYHUB_TCP_ADDR    - Framed TCP listener (e.g., 127.0.0.1:8081)
  POLYHUB_MAX_USERS   - Maximum concurrent users
  POLYHUB_PONG_WAIT   - Liveness timeout (e.g., 60s)
  POLYHUB_LOG_LEVEL   - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "polyhub.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    #[arg(long, help = "HTTP/WebSocket listen address (e.g., 127.0.0.1:8080)")]
    pub http_addr: Option<SocketAddr>,

    #[arg(long, help = "Framed TCP listen address (e.g., 127.0.0.1:8081)")]
    pub tcp_addr: Option<SocketAddr>,

    /// Disable the framed TCP listener
    #[arg(long, help = "Disable the framed TCP listener")]
    pub no_tcp: bool,

    #[arg(long, help = "Server name announced to brothers")]
    pub name: Option<String>,

    #[arg(long, help = "Maximum number of concurrent users")]
    pub max_users: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, help = "Log level")]
    pub log_level: Option<String>,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let config_exists = args.config.exists();
    let config = if config_exists {
        ConfigManager::apply_env(ConfigManager::load_from_file(&args.config)?)?
    } else {
        ConfigManager::load_from_env()?
    };

    init_tracing(&args, &config.logging.level)?;

    info!("Starting Polyhub v{}", env!("CARGO_PKG_VERSION"));
    if !config_exists {
        warn!(
            "Config file {} not found, using defaults and environment",
            args.config.display()
        );
    }

    let mut config = config;
    config.merge_with_cli_args(
        args.name.as_deref(),
        args.http_addr,
        args.tcp_addr,
        args.no_tcp,
        args.max_users,
    );
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }

    config
        .validate()
        .context("Final configuration validation failed")?;

    if args.validate_config {
        info!("Configuration is valid");
        info!("Configuration summary:");
        info!("  Server name: {}", config.server.name);
        info!("  HTTP address: {}", config.server.http_addr);
        if config.server.tcp_enabled {
            info!("  TCP address: {}", config.server.tcp_addr);
        } else {
            info!("  TCP listener: disabled");
        }
        info!(
            "  Limits: {} users, {} monitors, {} servers, {} incoming",
            config.limits.max_users,
            config.limits.max_monitors,
            config.limits.max_servers,
            config.limits.max_incoming
        );
        info!(
            "  Keepalive: write {:?}, pong {:?}, ping {:?}, max frame {} bytes",
            config.keepalive.write_wait,
            config.keepalive.pong_wait,
            config.keepalive.ping_period(),
            config.keepalive.max_message_size
        );
        info!("  Brothers: {}", config.brothers.len());
        return Ok(());
    }

    info!("Server name: {}", config.server.name);
    info!("HTTP address: {}", config.server.http_addr);

    let shutdown_coordinator = Arc::new(ShutdownCoordinator::new());
    let mut shutdown_rx = shutdown_coordinator.subscribe();
    let coordinator = Arc::clone(&shutdown_coordinator);

    let mut manager = ConnectionManager::new(Arc::new(config), Arc::new(LogHandler));
    manager.bind().await?;

    let server_handle = tokio::spawn(async move {
        tokio::select! {
            result = manager.serve() => {
                if let Err(e) = result {
                    error!("Server error: {}", e);
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Server task received shutdown signal");
            }
        }

        if let Err(e) = coordinator.drain(&manager).await {
            error!("Error during peer cleanup: {}", e);
        }
    });

    info!("Polyhub started, press Ctrl+C or send SIGTERM/SIGINT to stop");

    if let Err(e) = shutdown_coordinator.listen_for_signals().await {
        error!("Error setting up signal handlers: {}", e);
        shutdown_coordinator.trigger();
    }

    if let Err(e) = server_handle.await {
        if !e.is_cancelled() {
            error!("Server task failed: {}", e);
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging. `RUST_LOG` wins over everything else.
fn init_tracing(args: &CliArgs, configured: &str) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        args.log_level.as_deref().unwrap_or(configured)
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
