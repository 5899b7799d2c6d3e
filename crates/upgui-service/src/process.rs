//! Service child process management

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Notify};

use upgui_core::prelude::*;

/// Asynchronous lifecycle events from a supervised child process.
#[derive(Debug, Clone)]
pub enum ServiceEvent {
    /// A line of stdout from the service
    Stdout(String),
    /// A line of stderr (usually errors/warnings)
    Stderr(String),
    /// The OS process has exited
    Exited { code: Option<i32> },
    /// Process spawn failed before any events could flow
    SpawnFailed { reason: String },
}

/// Manages one service child process (`uplexad` or `uplexa-wallet-rpc`).
///
/// The `Child` handle is moved into a dedicated `wait_for_exit` background
/// task that calls `child.wait()`, so the real exit code is captured and
/// emitted as `ServiceEvent::Exited { code: Some(N) }` rather than `None`.
///
/// `ServiceProcess` retains a kill channel to request a force-kill, an
/// atomic flag for synchronous `has_exited()` checks, and a [`Notify`]
/// handle so `shutdown()` can await graceful exit without holding a lock
/// across `.await`.
pub struct ServiceProcess {
    /// Process ID for logging
    pid: Option<u32>,
    /// One-shot sender that tells the wait task to force-kill the process.
    /// Consumed on first use (or on drop).
    kill_tx: Option<oneshot::Sender<()>>,
    /// Set to `true` by the wait task once the child has exited.
    exited: Arc<AtomicBool>,
    /// Notified by the wait task immediately after the child exits.
    exit_notify: Arc<Notify>,
}

impl ServiceProcess {
    /// Spawn a service binary with the given arguments.
    ///
    /// Stdout/stderr lines and the final exit are sent to `event_tx` for
    /// processing by the backend event loop. The child is killed on drop
    /// as a last-resort cleanup.
    pub fn spawn(
        binary: &Path,
        args: &[String],
        event_tx: mpsc::Sender<ServiceEvent>,
    ) -> Result<Self> {
        info!("Spawning service: {} {}", binary.display(), args.join(" "));

        let mut child = Command::new(binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::BinaryNotFound {
                        name: binary.display().to_string(),
                    }
                } else {
                    Error::ProcessSpawn {
                        reason: e.to_string(),
                    }
                }
            })?;

        let pid = child.id();
        info!("Service process started with PID: {:?}", pid);

        // The services log to stdout even with a --log-file configured;
        // forward both pipes so the backend can surface them.
        let stdout = child.stdout.take().expect("stdout was configured");
        tokio::spawn(Self::stdout_reader(stdout, event_tx.clone()));

        let stderr = child.stderr.take().expect("stderr was configured");
        tokio::spawn(Self::stderr_reader(stderr, event_tx.clone()));

        // Shared exit-state primitives
        let exited = Arc::new(AtomicBool::new(false));
        let exit_notify = Arc::new(Notify::new());

        // Kill channel: ServiceProcess holds the sender, wait task holds
        // the receiver.
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        // The wait task takes ownership of `child`.
        tokio::spawn(Self::wait_for_exit(
            child,
            kill_rx,
            event_tx,
            Arc::clone(&exited),
            Arc::clone(&exit_notify),
        ));

        Ok(Self {
            pid,
            kill_tx: Some(kill_tx),
            exited,
            exit_notify,
        })
    }

    /// Background task: owns `child`, waits for it to exit, emits
    /// `ServiceEvent::Exited`.
    ///
    /// Two ways the task can end:
    /// 1. The process exits naturally — `child.wait()` resolves.
    /// 2. `kill_rx` fires — we kill the child first, then wait for it.
    async fn wait_for_exit(
        mut child: Child,
        kill_rx: oneshot::Receiver<()>,
        event_tx: mpsc::Sender<ServiceEvent>,
        exited: Arc<AtomicBool>,
        exit_notify: Arc<Notify>,
    ) {
        let code: Option<i32> = tokio::select! {
            // Natural exit path
            result = child.wait() => {
                match result {
                    Ok(status) => {
                        info!("Service process exited with status: {:?}", status);
                        status.code()
                    }
                    Err(e) => {
                        error!("Error waiting for service process: {}", e);
                        None
                    }
                }
            }
            // Force-kill path: kill_tx was sent (by shutdown or drop)
            _ = kill_rx => {
                info!("Kill signal received, force-killing service process");
                if let Err(e) = child.kill().await {
                    error!("Failed to kill service process: {}", e);
                }
                match child.wait().await {
                    Ok(status) => status.code(),
                    Err(e) => {
                        error!("Error waiting after kill: {}", e);
                        None
                    }
                }
            }
        };

        // Mark the process exited and wake waiters before sending the
        // event, so `has_exited()` is true before the event is observed.
        exited.store(true, Ordering::Release);
        exit_notify.notify_waiters();

        debug!("Sending ServiceEvent::Exited {{ code: {:?} }}", code);
        let _ = event_tx.send(ServiceEvent::Exited { code }).await;
    }

    /// Read lines from stdout and send as `ServiceEvent::Stdout`.
    ///
    /// Does NOT emit `ServiceEvent::Exited` — that is the wait task's job,
    /// which captures the real exit code.
    async fn stdout_reader(stdout: tokio::process::ChildStdout, tx: mpsc::Sender<ServiceEvent>) {
        let mut reader = BufReader::new(stdout).lines();

        while let Ok(Some(line)) = reader.next_line().await {
            trace!("stdout: {}", line);
            if tx.send(ServiceEvent::Stdout(line)).await.is_err() {
                debug!("stdout channel closed");
                break;
            }
        }

        debug!("stdout reader finished");
    }

    /// Read lines from stderr and send as `ServiceEvent::Stderr`.
    async fn stderr_reader(stderr: tokio::process::ChildStderr, tx: mpsc::Sender<ServiceEvent>) {
        let mut reader = BufReader::new(stderr).lines();

        while let Ok(Some(line)) = reader.next_line().await {
            trace!("stderr: {}", line);
            if tx.send(ServiceEvent::Stderr(line)).await.is_err() {
                debug!("stderr channel closed");
                break;
            }
        }

        debug!("stderr reader finished");
    }

    /// Wait up to `grace` for the process to exit, then force-kill it.
    ///
    /// The RPC shutdown request (if any) is the supervisor's job and has
    /// already been sent by the time this runs.
    pub async fn shutdown(&mut self, grace: Duration) -> Result<()> {
        use tokio::time::timeout;

        // Fast path: already dead.
        if self.has_exited() {
            info!("Service process already exited, skipping shutdown wait");
            return Ok(());
        }

        // Race-free pattern: create the `notified()` future BEFORE the
        // final `has_exited()` check, so a notification firing between the
        // check and the await cannot be missed.
        let notified = self.exit_notify.notified();
        if self.has_exited() {
            return Ok(());
        }

        match timeout(grace, notified).await {
            Ok(()) => {
                info!("Service process exited gracefully");
                Ok(())
            }
            Err(_) => {
                warn!("Timeout waiting for graceful exit, force killing");
                self.force_kill()
            }
        }
    }

    /// Force kill the process by signalling the wait task.
    ///
    /// The wait task calls `child.kill()` and then `child.wait()`, so the
    /// OS reaps the process before `ServiceEvent::Exited` is emitted.
    fn force_kill(&mut self) -> Result<()> {
        if let Some(tx) = self.kill_tx.take() {
            // Ignore send error — the wait task may have already exited.
            let _ = tx.send(());
        }
        Ok(())
    }

    /// Non-blocking, synchronous exit check backed by the atomic flag set
    /// by the wait task.
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        !self.has_exited()
    }

    /// Get the process ID
    pub fn id(&self) -> Option<u32> {
        self.pid
    }
}

impl Drop for ServiceProcess {
    fn drop(&mut self) {
        if !self.has_exited() {
            warn!("ServiceProcess dropped while process may still be running");
            // Send the kill signal so the wait task tears down the child.
            if let Some(tx) = self.kill_tx.take() {
                let _ = tx.send(());
            }
        }
        // kill_on_drop(true) on the Child is the final safety net.
        debug!("ServiceProcess dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Spawn a short-lived real process (`sh -c "exit N"`) as a stand-in
    /// for a service binary.
    fn spawn_test_process(command: &str, event_tx: mpsc::Sender<ServiceEvent>) -> ServiceProcess {
        ServiceProcess::spawn(
            Path::new("sh"),
            &["-c".to_string(), command.to_string()],
            event_tx,
        )
        .expect("sh must be available in test environment")
    }

    async fn wait_for_exit_event(rx: &mut mpsc::Receiver<ServiceEvent>) -> Option<i32> {
        for _ in 0..50 {
            match tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
                Ok(Some(ServiceEvent::Exited { code })) => return code,
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(_) => continue,
            }
        }
        panic!("ServiceEvent::Exited was not received");
    }

    #[tokio::test]
    async fn test_spawn_missing_binary() {
        let (tx, _rx) = mpsc::channel(16);
        let result = ServiceProcess::spawn(Path::new("/nonexistent/uplexad"), &[], tx);
        assert!(matches!(result, Err(Error::BinaryNotFound { .. })));
    }

    #[tokio::test]
    async fn test_exit_code_captured_on_normal_exit() {
        let (tx, mut rx) = mpsc::channel(16);
        let _process = spawn_test_process("exit 0", tx);
        assert_eq!(wait_for_exit_event(&mut rx).await, Some(0));
    }

    #[tokio::test]
    async fn test_exit_code_captured_on_error_exit() {
        let (tx, mut rx) = mpsc::channel(16);
        let _process = spawn_test_process("exit 42", tx);
        assert_eq!(wait_for_exit_event(&mut rx).await, Some(42));
    }

    #[tokio::test]
    async fn test_stdout_lines_forwarded() {
        let (tx, mut rx) = mpsc::channel(32);
        let _process = spawn_test_process("echo one; echo two", tx);

        let mut lines = Vec::new();
        loop {
            match tokio::time::timeout(Duration::from_millis(500), rx.recv()).await {
                Ok(Some(ServiceEvent::Stdout(line))) => lines.push(line),
                Ok(Some(ServiceEvent::Exited { .. })) => break,
                Ok(Some(_)) => continue,
                _ => break,
            }
        }
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_exactly_one_exited_event() {
        let (tx, mut rx) = mpsc::channel(32);
        let _process = spawn_test_process("exit 0", tx);

        let mut exited_count = 0usize;
        let deadline = tokio::time::sleep(Duration::from_millis(500));
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(ServiceEvent::Exited { .. }) => exited_count += 1,
                        Some(_) => {}
                        None => break,
                    }
                }
                _ = &mut deadline => break,
            }
        }

        assert_eq!(exited_count, 1);
    }

    #[tokio::test]
    async fn test_has_exited_true_after_exit_event() {
        let (tx, mut rx) = mpsc::channel(16);
        let process = spawn_test_process("exit 0", tx);

        wait_for_exit_event(&mut rx).await;

        assert!(process.has_exited());
        assert!(!process.is_running());
    }

    #[tokio::test]
    async fn test_shutdown_kills_long_running_process() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut process = spawn_test_process("sleep 60", tx);

        assert!(!process.has_exited());

        // Short grace: falls through to the force-kill path.
        process
            .shutdown(Duration::from_millis(100))
            .await
            .expect("shutdown should not error");

        wait_for_exit_event(&mut rx).await;
        assert!(process.has_exited());
    }

    #[tokio::test]
    async fn test_shutdown_after_exit_is_noop() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut process = spawn_test_process("exit 0", tx);

        wait_for_exit_event(&mut rx).await;
        process.shutdown(Duration::from_secs(1)).await.unwrap();
    }
}
