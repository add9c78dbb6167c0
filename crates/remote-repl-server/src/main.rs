//! Remote REPL server.
//!
//! Run with: cargo run -p remote-repl-server -- --password secret
//!
//! Then connect a WebSocket client to ws://127.0.0.1:44445/ws.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use remote_repl_server::{Config, build_app, build_manager};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Serve an interactive Python interpreter over WebSocket.
#[derive(Debug, Parser)]
#[command(name = "remote-repl", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Socket address to listen on.
    #[arg(short, long)]
    bind: Option<String>,

    /// Shared secret clients must present at login.
    #[arg(long)]
    password: Option<String>,

    /// Python executable used for each session.
    #[arg(long)]
    python: Option<String>,

    /// Logging level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::load_default()?,
        };
        config.apply_env_overrides();

        if let Some(bind) = &self.bind {
            config.server.bind.clone_from(bind);
        }
        if let Some(password) = &self.password {
            config.auth.password = Some(password.clone());
        }
        if let Some(python) = &self.python {
            config.interpreter.command.clone_from(python);
        }
        if let Some(level) = &self.log_level {
            config.server.log_level.clone_from(level);
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.server.log_level.to_lowercase().into()),
        )
        .init();

    if !config.requires_login() {
        tracing::warn!("No password configured, clients are authenticated on connect");
    }

    let manager = Arc::new(build_manager(&config));
    let app = build_app(&config, manager);

    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(
        "Server listening on ws://{}{}",
        listener.local_addr()?,
        config.server.path
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
