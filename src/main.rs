//! SSH router - Entry point
//!
//! Parses CLI arguments, validates configuration, then serves the line
//! protocol on stdin/stdout until input ends or a shutdown signal arrives.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ssh_router::config::{Args, Config, DEFAULT_LOG_LEVEL};
use ssh_router::router::RemoteRouter;
use ssh_router::server::{Reply, RouterServer};
use ssh_router::ssh::RusshTransport;

/// How long pending replies may take to drain on shutdown
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logging goes to stderr; stdout carries the protocol
    let filter = match args.log_level.as_deref() {
        Some(level) => EnvFilter::try_new(level).context("invalid --log-level")?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL)),
    };
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_args(args)?;

    info!("SSH router v{} starting...", env!("CARGO_PKG_VERSION"));
    info!(
        "Local host {}, user {}, known_hosts {}",
        config.local_host,
        config.local_user,
        config.known_hosts.display()
    );

    let transport = Arc::new(RusshTransport::new(config.transport_config()));
    let router = RemoteRouter::new(config.router_config(), transport);

    let (tx, rx) = mpsc::unbounded_channel();
    let server = RouterServer::new(router, tx);
    let writer = tokio::spawn(write_replies(rx));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    info!("Input closed, shutting down...");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                if let Err(e) = server.handle_line(&line).await {
                    warn!("Rejected message: {}", e);
                }
            }
            _ = shutdown_signal() => break,
        }
    }

    server.shutdown().await;
    drop(server);

    match tokio::time::timeout(DRAIN_TIMEOUT, writer).await {
        Ok(result) => result.context("reply writer panicked")??,
        Err(_) => warn!("Timed out writing the remaining replies"),
    }

    info!("SSH router stopped");
    Ok(())
}

async fn write_replies(mut rx: mpsc::UnboundedReceiver<Reply>) -> anyhow::Result<()> {
    let mut stdout = tokio::io::stdout();
    while let Some(reply) = rx.recv().await {
        let mut line = serde_json::to_vec(&reply)?;
        line.push(b'\n');
        stdout.write_all(&line).await?;
        stdout.flush().await?;
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        warn!("Failed to register SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
