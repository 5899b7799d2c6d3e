//! Coordinated application shutdown
//!
//! The UI-facing close flow is gated behind a confirmation prompt: the
//! first close signal sends a `confirm_close` event for the UI to render
//! as a cancellable dialog. Once the user confirms, the gate is disabled
//! so repeated close signals do not re-prompt while the services drain.

use upgui_core::ipc::Event;
use upgui_core::prelude::*;
use upgui_service::ProcessSupervisor;

/// Drains and stops both supervised services on application exit.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    confirmed: bool,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    /// Handle a close signal (window close, SIGINT).
    ///
    /// Returns the confirmation prompt to send to the UI, or `None` once
    /// the gate is already confirmed and shutdown is underway.
    pub fn request_close(&mut self) -> Option<Event> {
        if self.confirmed {
            None
        } else {
            Some(Event::confirm_close())
        }
    }

    /// The user confirmed the close prompt; disable the gate.
    pub fn confirm(&mut self) {
        self.confirmed = true;
    }

    /// Stop both services concurrently, resolving once both have stopped.
    ///
    /// Individual failures are logged, not propagated: at exit there is
    /// nothing better to do than keep draining the other service. Safe
    /// when neither service was ever started.
    pub async fn quit(daemon: &mut ProcessSupervisor, wallet: &mut ProcessSupervisor) {
        let (daemon_result, wallet_result) = tokio::join!(daemon.quit(), wallet.quit());
        if let Err(e) = daemon_result {
            warn!("Daemon did not stop cleanly: {e}");
        }
        if let Err(e) = wallet_result {
            warn!("Wallet service did not stop cleanly: {e}");
        }
        info!("All services stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tokio::sync::mpsc;
    use upgui_service::{LifecycleState, ServiceKind};

    #[test]
    fn test_gate_prompts_until_confirmed() {
        let mut coordinator = ShutdownCoordinator::new();

        // Every close signal before confirmation re-prompts.
        let prompt = coordinator.request_close().expect("first prompt");
        assert_eq!(prompt.event, "confirm_close");
        assert!(coordinator.request_close().is_some());

        coordinator.confirm();
        assert!(coordinator.is_confirmed());

        // Once confirmed, repeated close signals do not re-prompt.
        assert!(coordinator.request_close().is_none());
        assert!(coordinator.request_close().is_none());
    }

    #[tokio::test]
    async fn test_quit_with_never_started_supervisors() {
        let (daemon_tx, _daemon_rx) = mpsc::channel(8);
        let (wallet_tx, _wallet_rx) = mpsc::channel(8);
        let mut daemon =
            ProcessSupervisor::new(ServiceKind::Daemon, PathBuf::from("/nonexistent"), daemon_tx);
        let mut wallet =
            ProcessSupervisor::new(ServiceKind::Wallet, PathBuf::from("/nonexistent"), wallet_tx);

        ShutdownCoordinator::quit(&mut daemon, &mut wallet).await;

        assert_eq!(daemon.state(), LifecycleState::Stopped);
        assert_eq!(wallet.state(), LifecycleState::Stopped);
    }
}
