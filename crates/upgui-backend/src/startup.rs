//! The startup state machine
//!
//! Drives the two supervisors through the ordered bring-up sequence and
//! emits a `StartupState` transition before attempting each step, so the
//! UI can render granular progress. Strictly sequential: a step never
//! begins before the previous step's asynchronous result is known. Any
//! failure either downgrades the daemon mode (with a warning) or halts
//! with status -1 (with a negative notification); the whole sequence is
//! restartable from the top.

use serde_json::json;
use tokio::sync::mpsc;

use upgui_core::config::{Configuration, DaemonMode, DaemonSettings};
use upgui_core::ipc::{Event, Notification};
use upgui_core::prelude::*;
use upgui_core::status::{StartupState, StatusCode};
use upgui_service::{ProcessSupervisor, RemoteInfo, RpcEndpoint};

use crate::store::ConfigStore;
use crate::wallets;

/// The control surface the sequencer needs from each supervisor.
///
/// A narrow trait so tests can drive the sequence with instrumented fakes
/// that record call order.
#[allow(async_fn_in_trait)]
pub trait ServiceControl {
    /// Query the local binary's version; `None` means missing/unusable.
    async fn check_version(&self) -> Option<String>;

    /// One-shot reachability/info probe against a node endpoint.
    async fn probe_remote(&self, endpoint: &RpcEndpoint) -> Result<RemoteInfo>;

    /// Start the service under the given configuration snapshot.
    async fn start(&mut self, cfg: &Configuration) -> Result<()>;
}

impl ServiceControl for ProcessSupervisor {
    async fn check_version(&self) -> Option<String> {
        ProcessSupervisor::check_version(self).await
    }

    async fn probe_remote(&self, endpoint: &RpcEndpoint) -> Result<RemoteInfo> {
        ProcessSupervisor::probe_endpoint(endpoint).await
    }

    async fn start(&mut self, cfg: &Configuration) -> Result<()> {
        ProcessSupervisor::start(self, cfg).await
    }
}

/// How a startup attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupOutcome {
    /// Status 0 reached, the stack is up.
    Ready,
    /// Halted with status -1; the user has to reconfigure.
    Halted,
}

/// Run the bring-up sequence against the two supervisors.
pub async fn run_startup<D, W>(
    daemon: &mut D,
    wallet: &mut W,
    store: &mut ConfigStore,
    events: &mpsc::Sender<Event>,
) -> StartupOutcome
where
    D: ServiceControl,
    W: ServiceControl,
{
    // Step 1: probe the local daemon binary.
    emit_status(events, StartupState::new(StatusCode::StartingDaemon)).await;

    match daemon.check_version().await {
        Some(version) => {
            info!("Local daemon binary found: {}", version);
            emit_status(
                events,
                StartupState::with_message(StatusCode::DaemonVersionKnown, version),
            )
            .await;
        }
        None => {
            // Binary missing (commonly removed by an antivirus): not
            // fatal, fall back to the remote node.
            warn!("Local daemon binary not found, forcing remote mode");
            store.set_daemon_mode(DaemonMode::Remote);
            emit(events, Event::app_data(store.config())).await;
            emit_warning(events, "Warning: uplexad not found, using remote node").await;
        }
    }

    let daemon_settings = match store.config().daemon() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Daemon configuration unusable: {e}");
            return halt(events, "Error: daemon configuration is invalid").await;
        }
    };
    let testnet = store.config().app().map(|a| a.testnet).unwrap_or(false);

    // Steps 2+3: remote reachability and network match, whenever a remote
    // endpoint is in play.
    if daemon_settings.mode != DaemonMode::Local {
        let endpoint = RpcEndpoint::new(
            daemon_settings.remote_host.clone(),
            daemon_settings.remote_port,
        );
        match daemon.probe_remote(&endpoint).await {
            Err(e) => {
                warn!("Remote node {} unreachable: {}", endpoint, e);
                match daemon_settings.mode {
                    DaemonMode::LocalRemote => {
                        downgrade_to_local(
                            store,
                            events,
                            "Warning: remote node not available, using local node",
                        )
                        .await;
                    }
                    DaemonMode::Remote => {
                        return halt(
                            events,
                            "Error: remote node not available, change to local mode or update remote node",
                        )
                        .await;
                    }
                    DaemonMode::Local => unreachable!("local mode never probes"),
                }
            }
            Ok(info) if testnet && !info.testnet => {
                warn!("Remote node {} is on the wrong network", endpoint);
                match daemon_settings.mode {
                    DaemonMode::LocalRemote => {
                        downgrade_to_local(
                            store,
                            events,
                            "Warning: remote node network does not match, using local node",
                        )
                        .await;
                    }
                    DaemonMode::Remote => {
                        return halt(
                            events,
                            "Error: remote node network does not match, change to local mode or update remote node",
                        )
                        .await;
                    }
                    DaemonMode::Local => unreachable!("local mode never probes"),
                }
            }
            Ok(_) => {}
        }
    }

    // Step 4: start the daemon.
    if let Err(e) = daemon.start(store.config()).await {
        error!("Daemon failed to start: {e}");
        let message = if daemon_mode(store) == DaemonMode::Remote {
            "Remote daemon cannot be reached"
        } else {
            "Local daemon internal error"
        };
        return halt(events, message).await;
    }

    // Step 5: start the wallet service.
    emit_status(events, StartupState::new(StatusCode::StartingWallet)).await;
    if let Err(e) = wallet.start(store.config()).await {
        error!("Wallet service failed to start: {e}");
        return halt(events, "Wallet RPC internal error").await;
    }

    // Step 6: enumerate wallets. Failure here is logged but never blocks
    // reaching the ready state.
    emit_status(events, StartupState::new(StatusCode::ReadingWalletList)).await;
    match store.config().app() {
        Ok(app) => match wallets::list_wallets(&app.data_paths().wallet_dir) {
            Ok(list) => {
                emit(events, Event::new("wallet_list", json!({ "wallets": list }))).await;
            }
            Err(e) => warn!("Could not read wallet list: {e}"),
        },
        Err(e) => warn!("Could not resolve wallet directory: {e}"),
    }

    // Step 7: ready.
    emit_status(events, StartupState::new(StatusCode::Ready)).await;
    StartupOutcome::Ready
}

fn daemon_mode(store: &ConfigStore) -> DaemonMode {
    store
        .config()
        .daemon()
        .map(|d: DaemonSettings| d.mode)
        .unwrap_or(DaemonMode::Remote)
}

async fn downgrade_to_local(store: &mut ConfigStore, events: &mpsc::Sender<Event>, message: &str) {
    store.set_daemon_mode(DaemonMode::Local);
    emit(events, Event::app_data(store.config())).await;
    emit_warning(events, message).await;
}

async fn halt(events: &mpsc::Sender<Event>, message: &str) -> StartupOutcome {
    emit(
        events,
        Event::notification(&Notification::negative(message)),
    )
    .await;
    emit_status(events, StartupState::new(StatusCode::Error)).await;
    StartupOutcome::Halted
}

async fn emit_warning(events: &mpsc::Sender<Event>, message: &str) {
    emit(events, Event::notification(&Notification::warning(message))).await;
}

async fn emit_status(events: &mpsc::Sender<Event>, state: StartupState) {
    emit(events, Event::status(&state)).await;
}

async fn emit(events: &mpsc::Sender<Event>, event: Event) {
    // The UI being gone is not the sequencer's problem.
    let _ = events.send(event).await;
}
