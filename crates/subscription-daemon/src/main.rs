//! subscription-daemon: keeps subscribed folders up to date with friends' shares.
//!
//! Runs the subscription exchange over WebSocket connections, answers peers'
//! change queries from the configured share-bases, and takes operator
//! commands on stdin.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use subscription_core::{open_store, PeerId, WatermarkStore};
use subscription_daemon::{Config, ConfiguredShares, Daemon, WebSocketServer};

#[derive(Parser, Debug)]
#[command(name = "subscription-daemon")]
#[command(about = "Friend subscription change-detection daemon")]
struct Args {
    /// Directory holding config.json and, by default, the subscription store
    #[arg(short = 'd', long, default_value = ".subscription-daemon")]
    config_dir: PathBuf,

    /// Address to listen on (overrides config)
    #[arg(short, long)]
    listen: Option<String>,

    /// Peer to dial, repeatable (added to config)
    #[arg(short, long)]
    connect: Vec<String>,

    /// Peer ID (overrides config)
    #[arg(long)]
    peer_id: Option<PeerId>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,subscription_daemon=debug,subscription_core=debug"
    } else {
        "info,subscription_daemon=info,subscription_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting subscription-daemon");

    let mut config = Config::load(&args.config_dir)?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    config.connect.extend(args.connect);
    let peer_id = args
        .peer_id
        .or(config.peer_id)
        .unwrap_or_else(PeerId::generate);
    info!("Peer ID: {}", peer_id);
    info!("Listen address: {}", config.listen);

    let store_path = config.store_path(&args.config_dir);
    let store: Arc<dyn WatermarkStore> = Arc::from(
        open_store(config.store.backend, &store_path)
            .with_context(|| format!("Failed to open subscription store {:?}", store_path))?,
    );
    info!("Subscription store: {:?} ({:?})", store_path, config.store.backend);

    let shares = Arc::new(ConfiguredShares::new(&config.shares));
    info!("Exporting {} share-base(s)", config.shares.len());

    let listener = WebSocketServer::bind(&config.listen).await?;
    let mut daemon = Daemon::new(peer_id, store.clone(), shares, config.connect.clone());

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    // The first tick fires immediately and dials the configured peers.
    let mut redial = tokio::time::interval(Duration::from_secs(config.reconnect_secs.max(1)));

    info!("Daemon running. Press Ctrl+C to stop.");

    // Main event loop
    loop {
        tokio::select! {
            // Accept new WebSocket connections
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        daemon.server_mut().accept_connection(stream, addr).await;
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                }
            }

            // Handle peer events (connects, messages, disconnects)
            Some(event) = daemon.server_mut().poll_event() => {
                daemon.on_server_event(event).await;
            }

            // Operator commands
            line = stdin.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => {
                        if let Some(output) = daemon.on_console_line(&line).await {
                            println!("{}", output);
                        }
                    }
                    Ok(None) => {
                        debug!("stdin closed, console disabled");
                        stdin_open = false;
                    }
                    Err(e) => {
                        warn!("Failed to read console input: {}", e);
                        stdin_open = false;
                    }
                }
            }

            // Re-dial lost peers
            _ = redial.tick() => {
                daemon.redial().await;
            }

            // Handle graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("Shutting down");
    if let Err(e) = store.close() {
        error!("Failed to close subscription store: {}", e);
    }
    Ok(())
}
