//! Duplex Daemon
//!
//! Command-line peer for duplex Unix socket connections.
//!
//! # Usage
//!
//! ```bash
//! # Run an echo peer on the default socket ($XDG_RUNTIME_DIR/duplex/duplex.sock)
//! duplex-daemon serve
//!
//! # Run on a custom socket path
//! duplex-daemon serve --socket /tmp/duplex.sock
//!
//! # Send 1 MiB through the echo peer and verify it comes back intact
//! duplex-daemon probe --socket /tmp/duplex.sock --bytes 1048576
//!
//! # With verbose logging
//! RUST_LOG=debug duplex-daemon serve
//! ```
//!
//! # Environment Variables
//!
//! - `DUPLEX_CONFIG`: Configuration file path
//! - `DUPLEX_SOCKET_PATH`, `DUPLEX_BUFFER_SIZE`, `DUPLEX_*_TIMEOUT`, ...:
//!   overrides, see `duplex_core::config`
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)
//!
//! # Signals
//!
//! - SIGTERM/SIGINT: stop accepting, abort live connections, remove the socket

mod probe;
mod server;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use duplex_core::{load_config, load_config_from_path, ConfigOverrides, Endpoint};

use crate::server::DaemonServer;

/// Duplex Unix socket peer
#[derive(Debug, Parser)]
#[command(name = "duplex-daemon", version, about)]
struct Cli {
    /// Configuration file (default: ~/.config/duplex/duplex.toml)
    #[arg(long, global = true, env = "DUPLEX_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Echo every byte back and close gracefully when the peer does
    Serve {
        /// Socket path to bind
        #[arg(long)]
        socket: Option<PathBuf>,
    },

    /// Send random bytes to an echo peer and verify the echo
    Probe {
        /// Socket path to connect to
        #[arg(long)]
        socket: Option<PathBuf>,

        /// Number of bytes to send
        #[arg(long, default_value_t = 64 * 1024)]
        bytes: usize,

        /// Read/write timeout in milliseconds (0 = none)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(path) => load_config_from_path(Some(path)),
        None => load_config(),
    }
    .context("Failed to load configuration")?;

    match cli.command {
        Command::Serve { socket } => {
            if let Some(path) = socket {
                ConfigOverrides::new()
                    .with_socket_path(path)
                    .apply(&mut config);
            }
            config.validate()?;

            info!(source = %config.source(), "Starting duplex echo peer");
            let server = DaemonServer::new(config);
            server.run(shutdown_signal()).await
        }
        Command::Probe {
            socket,
            bytes,
            timeout_ms,
        } => {
            let path = socket.unwrap_or_else(|| config.listener.resolved_socket_path());
            let endpoint = Endpoint::new(path);
            let timeout = match timeout_ms {
                Some(0) => duplex_core::INFINITE,
                Some(ms) => Duration::from_millis(ms),
                None => config.connection.read_timeout(),
            };

            let report = probe::run(&endpoint, config.connection, bytes, timeout).await?;
            info!(
                %endpoint,
                bytes = report.bytes,
                elapsed = ?report.elapsed,
                inline_completions = report.stats.inline_completions,
                timer_reprograms = report.stats.timer_reprograms,
                "Probe succeeded"
            );
            Ok(())
        }
    }
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
