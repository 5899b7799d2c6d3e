//! Top-level orchestrator
//!
//! [`Backend`] exclusively owns the config store, both supervisors, and
//! the shutdown coordinator; the router and sequencer borrow them. One
//! `tokio::select!` loop drives everything: UI commands in, supervisor
//! events in, UI events out.

use std::path::PathBuf;

use serde_json::json;
use tokio::sync::mpsc;

use upgui_core::ipc::{Event, Notification, Request};
use upgui_core::prelude::*;
use upgui_core::status::{StartupState, StatusCode};
use upgui_service::{LifecycleState, ProcessSupervisor, ServiceEvent, ServiceKind};

use crate::router;
use crate::shutdown::ShutdownCoordinator;
use crate::startup::{self, StartupOutcome};
use crate::store::ConfigStore;

/// Inputs to the backend event loop.
#[derive(Debug)]
pub enum BackendCommand {
    /// An envelope from the UI gateway.
    Request(Request),
    /// The platform asked to close (window close, SIGINT).
    CloseRequested,
}

/// The backend-orchestration core.
pub struct Backend {
    pub(crate) store: ConfigStore,
    pub(crate) daemon: ProcessSupervisor,
    pub(crate) wallet: ProcessSupervisor,
    pub(crate) coordinator: ShutdownCoordinator,
    outbound: mpsc::Sender<Event>,
    shutdown_complete: bool,
}

impl Backend {
    /// Wire up the backend. Returns the two supervisor event receivers
    /// for [`Backend::run`].
    pub fn new(
        store: ConfigStore,
        bin_dir: PathBuf,
        outbound: mpsc::Sender<Event>,
    ) -> (
        Self,
        mpsc::Receiver<ServiceEvent>,
        mpsc::Receiver<ServiceEvent>,
    ) {
        let (daemon_tx, daemon_rx) = mpsc::channel(256);
        let (wallet_tx, wallet_rx) = mpsc::channel(256);
        let daemon = ProcessSupervisor::new(ServiceKind::Daemon, bin_dir.clone(), daemon_tx);
        let wallet = ProcessSupervisor::new(ServiceKind::Wallet, bin_dir, wallet_tx);

        (
            Self {
                store,
                daemon,
                wallet,
                coordinator: ShutdownCoordinator::new(),
                outbound,
                shutdown_complete: false,
            },
            daemon_rx,
            wallet_rx,
        )
    }

    pub(crate) async fn emit(&self, event: Event) {
        // The gateway being gone must never stall the core.
        let _ = self.outbound.send(event).await;
    }

    /// Run the full startup sequence from the top.
    ///
    /// Loads and merges the persisted configuration, validates the data
    /// directory layout, then hands over to the sequencer. Also used by
    /// `save_config_init` to restart after first-run configuration.
    pub(crate) async fn startup(&mut self) -> StartupOutcome {
        // Restartable from scratch: drain anything a prior attempt left
        // running (a no-op when nothing was started).
        ShutdownCoordinator::quit(&mut self.daemon, &mut self.wallet).await;

        self.emit(Event::initialize()).await;

        if let Err(e) = self.store.merge_from_disk() {
            warn!("No usable persisted configuration: {e}");
            let state = StartupState::new(StatusCode::Error);
            let config = self.store.config();
            self.emit(Event::new(
                "set_app_data",
                json!({ "status": state, "config": config, "pending_config": config }),
            ))
            .await;
            return StartupOutcome::Halted;
        }
        self.emit(Event::app_data(self.store.config())).await;

        if let Err(e) = self.store.validate_data_paths() {
            error!("Data path validation failed: {e}");
            let message = match &e {
                Error::PathUnavailable { reason, .. } if reason.contains("not found") => {
                    "Error: data storage path not found"
                }
                _ => "Error: data storage path not writable",
            };
            self.emit(Event::notification(&Notification::negative(message)))
                .await;
            self.emit(Event::status(&StartupState::new(StatusCode::Error)))
                .await;
            return StartupOutcome::Halted;
        }

        startup::run_startup(
            &mut self.daemon,
            &mut self.wallet,
            &mut self.store,
            &self.outbound,
        )
        .await
    }

    async fn handle_service_event(&mut self, kind: ServiceKind, event: ServiceEvent) {
        match event {
            ServiceEvent::Stdout(line) => trace!("{} stdout: {}", kind.display_name(), line),
            ServiceEvent::Stderr(line) => debug!("{} stderr: {}", kind.display_name(), line),
            ServiceEvent::SpawnFailed { reason } => {
                // start() has already surfaced this to the sequencer.
                warn!("{} spawn failed: {}", kind.display_name(), reason);
            }
            ServiceEvent::Exited { code } => {
                let supervisor = match kind {
                    ServiceKind::Daemon => &mut self.daemon,
                    ServiceKind::Wallet => &mut self.wallet,
                };
                let was_running = supervisor.state() == LifecycleState::Running;
                supervisor.handle_exit();

                if was_running {
                    error!(
                        "{} stopped unexpectedly (exit code {:?})",
                        kind.display_name(),
                        code
                    );
                    self.emit(Event::notification(&Notification::negative(format!(
                        "Error: {} stopped unexpectedly",
                        kind.display_name()
                    ))))
                    .await;
                    self.emit(Event::status(&StartupState::new(StatusCode::Error)))
                        .await;
                } else {
                    debug!(
                        "{} exited (code {:?}) while {:?}",
                        kind.display_name(),
                        code,
                        supervisor.state()
                    );
                }
            }
        }
    }

    /// The user confirmed the close prompt: disable the gate, drain both
    /// services, and let the run loop finish.
    pub(crate) async fn confirm_close(&mut self) {
        if self.coordinator.is_confirmed() {
            return;
        }
        self.coordinator.confirm();
        ShutdownCoordinator::quit(&mut self.daemon, &mut self.wallet).await;
        self.shutdown_complete = true;
    }

    async fn handle_close_requested(&mut self) {
        if let Some(prompt) = self.coordinator.request_close() {
            self.emit(prompt).await;
        }
    }

    /// The backend event loop. Returns once shutdown has completed.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<BackendCommand>,
        mut daemon_events: mpsc::Receiver<ServiceEvent>,
        mut wallet_events: mpsc::Receiver<ServiceEvent>,
    ) {
        self.startup().await;

        while !self.shutdown_complete {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(BackendCommand::Request(request)) => {
                        router::route(&mut self, request).await;
                    }
                    Some(BackendCommand::CloseRequested) => {
                        self.handle_close_requested().await;
                    }
                    None => {
                        // Command channel gone: nothing can reach us
                        // anymore, drain the services and exit.
                        info!("Command channel closed, shutting down");
                        self.coordinator.confirm();
                        ShutdownCoordinator::quit(&mut self.daemon, &mut self.wallet).await;
                        break;
                    }
                },
                Some(event) = daemon_events.recv() => {
                    self.handle_service_event(ServiceKind::Daemon, event).await;
                }
                Some(event) = wallet_events.recv() => {
                    self.handle_service_event(ServiceKind::Wallet, event).await;
                }
            }
        }

        info!("Backend loop finished");
    }
}
