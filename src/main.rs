//! uPlexa GUI backend - binary entry point
//!
//! All logic lives in the library crates; this wires configuration,
//! logging, the backend loop, the UI gateway, and signal handling.

use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};

use upgui_backend::{Backend, BackendCommand, ConfigStore, Gateway};

/// Backend orchestration core for the uPlexa desktop wallet
#[derive(Parser, Debug)]
#[command(name = "upgui")]
#[command(about = "Backend orchestration core for the uPlexa desktop wallet", long_about = None)]
struct Args {
    /// Configuration directory (default: platform application-data dir)
    #[arg(long, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// Directory holding the bundled service binaries
    #[arg(long, value_name = "DIR")]
    bin_dir: Option<PathBuf>,

    /// Override the UI WebSocket port from the configuration
    #[arg(long, value_name = "PORT")]
    ws_port: Option<u16>,
}

fn default_bin_dir() -> PathBuf {
    // Bundled service binaries ship next to the executable, in bin/.
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("bin")))
        .unwrap_or_else(|| PathBuf::from("bin"))
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    let config_dir = args
        .config_dir
        .unwrap_or_else(ConfigStore::default_config_dir);
    let mut store = ConfigStore::open(config_dir)?;
    upgui_core::logging::init(&store.log_dir())?;

    // Best-effort early merge so the gateway binds the persisted port;
    // startup repeats this (merging is idempotent) and reports failures
    // to the UI.
    if let Err(e) = store.merge_from_disk() {
        warn!("No persisted configuration yet: {e}");
    }
    let ws_port = args.ws_port.unwrap_or_else(|| {
        store
            .config()
            .app()
            .map(|app| app.ws_bind_port)
            .unwrap_or(21066)
    });
    let bin_dir = args.bin_dir.unwrap_or_else(default_bin_dir);

    let (events_tx, events_rx) = tokio::sync::mpsc::channel(256);
    let (commands_tx, commands_rx) = tokio::sync::mpsc::channel(64);

    let (backend, daemon_events, wallet_events) = Backend::new(store, bin_dir, events_tx);

    let gateway = Gateway::bind(ws_port).await?;
    tokio::spawn(gateway.run(commands_tx.clone(), events_rx));

    // Ctrl-C goes through the same confirmation gate as a window close.
    let close_tx = commands_tx.clone();
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            info!("Close signal received");
            if close_tx.send(BackendCommand::CloseRequested).await.is_err() {
                return;
            }
        }
    });

    backend.run(commands_rx, daemon_events, wallet_events).await;
    info!("Shutdown complete");
    Ok(())
}
