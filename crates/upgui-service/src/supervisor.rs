//! Per-service process supervision
//!
//! One [`ProcessSupervisor`] instance owns one service: the `uplexad` node
//! or the `uplexa-wallet-rpc` service. It spawns the child (in local
//! modes), probes the RPC endpoint until the service answers, exposes the
//! call surface, and tears the process down on quit. It never
//! auto-restarts; restart policy belongs to the startup sequencer.

use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};

use upgui_core::config::{Configuration, DaemonMode};
use upgui_core::prelude::*;

use crate::process::{ServiceEvent, ServiceProcess};
use crate::rpc::{RpcClient, RpcEndpoint};

/// Per-attempt timeout for connect + probe during warm-up.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
/// Overall deadline for a service to become reachable, distinct from the
/// per-probe timeout so a wedged binary cannot hang startup forever.
const START_DEADLINE: Duration = Duration::from_secs(60);
/// How long `--version` may take before the binary counts as unusable.
const VERSION_TIMEOUT: Duration = Duration::from_secs(5);
/// Grace period between the RPC shutdown request and the force-kill.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
/// Timeout for the best-effort RPC shutdown request itself.
const SHUTDOWN_RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// Which service a supervisor instance owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    Daemon,
    Wallet,
}

impl ServiceKind {
    pub fn binary_name(self) -> &'static str {
        match self {
            ServiceKind::Daemon => "uplexad",
            ServiceKind::Wallet => "uplexa-wallet-rpc",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ServiceKind::Daemon => "daemon",
            ServiceKind::Wallet => "wallet service",
        }
    }

    /// Lightweight RPC issued to decide the service is up.
    pub fn probe_method(self) -> &'static str {
        match self {
            ServiceKind::Daemon => "get_info",
            ServiceKind::Wallet => "get_version",
        }
    }

    /// Graceful-termination RPC, tried before killing the process.
    pub fn shutdown_method(self) -> &'static str {
        match self {
            ServiceKind::Daemon => "stop_daemon",
            ServiceKind::Wallet => "stop_wallet",
        }
    }
}

/// Lifecycle state of the supervised service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Crashed,
}

/// Subset of a node's `get_info` response the startup sequence cares about.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RemoteInfo {
    pub testnet: bool,
    pub status: Option<String>,
    pub height: Option<u64>,
}

// ─────────────────────────────────────────────────────────────────
// Launch arguments
// ─────────────────────────────────────────────────────────────────

/// Build the `uplexad` argument list from the configuration.
///
/// Peer and rate limits are passed only when non-negative; `-1` means
/// "let the daemon pick".
pub fn daemon_launch_args(cfg: &Configuration) -> Result<Vec<String>> {
    let app = cfg.app()?;
    let daemon = cfg.daemon()?;
    let paths = app.data_paths();

    let mut args = vec![
        format!("--data-dir={}", app.data_dir.display()),
        format!("--p2p-bind-ip={}", daemon.p2p_bind_ip),
        format!("--p2p-bind-port={}", daemon.p2p_bind_port),
        format!("--rpc-bind-ip={}", daemon.rpc_bind_ip),
        format!("--rpc-bind-port={}", daemon.rpc_bind_port),
        format!("--zmq-rpc-bind-ip={}", daemon.zmq_rpc_bind_ip),
        format!("--zmq-rpc-bind-port={}", daemon.zmq_rpc_bind_port),
        format!("--log-file={}", paths.log_dir.join("uplexad.log").display()),
        format!("--log-level={}", daemon.log_level),
    ];

    for (flag, value) in [
        ("--out-peers", daemon.out_peers),
        ("--in-peers", daemon.in_peers),
        ("--limit-rate-up", daemon.limit_rate_up),
        ("--limit-rate-down", daemon.limit_rate_down),
    ] {
        if value >= 0 {
            args.push(format!("{flag}={value}"));
        }
    }

    if daemon.rpc_bind_ip != "127.0.0.1" {
        args.push("--confirm-external-bind".to_string());
    }
    if app.testnet {
        args.push("--testnet".to_string());
    }
    if daemon.mode == DaemonMode::LocalRemote {
        args.push(format!(
            "--bootstrap-daemon-address={}:{}",
            daemon.remote_host, daemon.remote_port
        ));
    }
    args.push("--non-interactive".to_string());

    Ok(args)
}

/// Build the `uplexa-wallet-rpc` argument list from the configuration.
pub fn wallet_launch_args(cfg: &Configuration) -> Result<Vec<String>> {
    let app = cfg.app()?;
    let daemon = cfg.daemon()?;
    let wallet = cfg.wallet()?;
    let paths = app.data_paths();

    let daemon_address = match daemon.mode {
        DaemonMode::Remote => format!("{}:{}", daemon.remote_host, daemon.remote_port),
        _ => format!("127.0.0.1:{}", daemon.rpc_bind_port),
    };

    let mut args = vec![
        format!("--rpc-bind-port={}", wallet.rpc_bind_port),
        format!("--daemon-address={daemon_address}"),
        format!("--wallet-dir={}", paths.wallet_dir.display()),
        format!(
            "--log-file={}",
            paths.log_dir.join("uplexa-wallet-rpc.log").display()
        ),
        format!("--log-level={}", wallet.log_level),
        "--disable-rpc-login".to_string(),
    ];

    // Only a daemon on this machine is trusted with view keys.
    if daemon.mode != DaemonMode::Remote {
        args.push("--trusted-daemon".to_string());
    }
    if app.testnet {
        args.push("--testnet".to_string());
    }
    args.push("--non-interactive".to_string());

    Ok(args)
}

// ─────────────────────────────────────────────────────────────────
// ProcessSupervisor
// ─────────────────────────────────────────────────────────────────

/// Supervises one service: lifecycle, RPC surface, and event stream.
pub struct ProcessSupervisor {
    kind: ServiceKind,
    bin_dir: PathBuf,
    event_tx: mpsc::Sender<ServiceEvent>,
    state: LifecycleState,
    process: Option<ServiceProcess>,
    rpc: Option<RpcClient>,
    start_deadline: Duration,
}

impl ProcessSupervisor {
    /// Create a supervisor for `kind`, looking for bundled binaries in
    /// `bin_dir`. Lifecycle events are sent to `event_tx`.
    pub fn new(kind: ServiceKind, bin_dir: PathBuf, event_tx: mpsc::Sender<ServiceEvent>) -> Self {
        Self {
            kind,
            bin_dir,
            event_tx,
            state: LifecycleState::Stopped,
            process: None,
            rpc: None,
            start_deadline: START_DEADLINE,
        }
    }

    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Override the overall start deadline (tests, slow disks).
    pub fn set_start_deadline(&mut self, deadline: Duration) {
        self.start_deadline = deadline;
    }

    /// Locate the service binary: the bundled copy under `bin_dir` wins,
    /// falling back to a `PATH` lookup.
    fn resolve_binary(&self) -> Option<PathBuf> {
        let file = if cfg!(windows) {
            format!("{}.exe", self.kind.binary_name())
        } else {
            self.kind.binary_name().to_string()
        };
        let bundled = self.bin_dir.join(&file);
        if bundled.exists() {
            return Some(bundled);
        }
        which::which(self.kind.binary_name()).ok()
    }

    /// Query the local binary's version without starting the service.
    ///
    /// `None` means the binary is missing or unusable (e.g. removed by an
    /// antivirus), never an error; the caller falls back to remote mode.
    pub async fn check_version(&self) -> Option<String> {
        let binary = self.resolve_binary()?;

        let output = timeout(
            VERSION_TIMEOUT,
            Command::new(&binary).arg("--version").output(),
        )
        .await
        .ok()?
        .ok()?;

        if !output.status.success() {
            warn!(
                "{} --version exited with {:?}",
                binary.display(),
                output.status.code()
            );
            return None;
        }

        parse_version_output(&String::from_utf8_lossy(&output.stdout))
    }

    /// Probe an arbitrary node endpoint with a one-shot `get_info` call.
    ///
    /// Used for remote-reachability and network-match checks; the
    /// connection is dropped immediately after the probe.
    pub async fn probe_endpoint(endpoint: &RpcEndpoint) -> Result<RemoteInfo> {
        let client = RpcClient::connect(endpoint.clone(), PROBE_TIMEOUT).await?;
        let result = client
            .call_with_timeout("get_info", Value::Null, PROBE_TIMEOUT)
            .await;
        client.close().await;

        // Tolerate shape drift: reachability is what matters here.
        let info = serde_json::from_value(result?).unwrap_or_default();
        Ok(info)
    }

    /// The RPC endpoint this supervisor talks to under `cfg`.
    fn rpc_endpoint(&self, cfg: &Configuration) -> Result<RpcEndpoint> {
        match self.kind {
            ServiceKind::Daemon => {
                let daemon = cfg.daemon()?;
                Ok(match daemon.mode {
                    DaemonMode::Remote => {
                        RpcEndpoint::new(daemon.remote_host.clone(), daemon.remote_port)
                    }
                    _ => RpcEndpoint::new("127.0.0.1", daemon.rpc_bind_port),
                })
            }
            ServiceKind::Wallet => Ok(RpcEndpoint::new("127.0.0.1", cfg.wallet()?.rpc_bind_port)),
        }
    }

    /// Whether this supervisor spawns a local child under `cfg`.
    fn runs_locally(&self, cfg: &Configuration) -> Result<bool> {
        match self.kind {
            ServiceKind::Daemon => Ok(cfg.daemon()?.mode != DaemonMode::Remote),
            ServiceKind::Wallet => Ok(true),
        }
    }

    /// Start the service and wait until it answers its probe RPC.
    ///
    /// In local modes the child is spawned first; in remote mode only
    /// reachability is validated. A bounded retry loop with backoff covers
    /// transient connection refusals during warm-up, under an overall
    /// deadline distinct from the per-probe timeout.
    pub async fn start(&mut self, cfg: &Configuration) -> Result<()> {
        let endpoint = self.rpc_endpoint(cfg)?;
        let local = self.runs_locally(cfg)?;
        self.state = LifecycleState::Starting;
        info!(
            "Starting {} ({} mode, endpoint {})",
            self.kind.display_name(),
            if local { "local" } else { "remote" },
            endpoint
        );

        if local {
            let binary = self.resolve_binary().ok_or_else(|| {
                self.state = LifecycleState::Stopped;
                Error::BinaryNotFound {
                    name: self.kind.binary_name().to_string(),
                }
            })?;
            let args = match self.kind {
                ServiceKind::Daemon => daemon_launch_args(cfg)?,
                ServiceKind::Wallet => wallet_launch_args(cfg)?,
            };
            match ServiceProcess::spawn(&binary, &args, self.event_tx.clone()) {
                Ok(process) => self.process = Some(process),
                Err(e) => {
                    self.state = LifecycleState::Crashed;
                    let _ = self
                        .event_tx
                        .send(ServiceEvent::SpawnFailed {
                            reason: e.to_string(),
                        })
                        .await;
                    return Err(Error::start_failure(
                        self.kind.display_name(),
                        e.to_string(),
                    ));
                }
            }
        }

        let deadline = Instant::now() + self.start_deadline;
        let mut delay = Duration::from_millis(500);
        let mut last_failure = String::from("no probe attempted");

        loop {
            // A child that dies during warm-up fails the start immediately.
            if let Some(process) = &self.process {
                if process.has_exited() {
                    self.state = LifecycleState::Crashed;
                    self.process = None;
                    return Err(Error::start_failure(
                        self.kind.display_name(),
                        "process exited during startup",
                    ));
                }
            }

            match self.try_probe(&endpoint).await {
                Ok(client) => {
                    self.rpc = Some(client);
                    self.state = LifecycleState::Running;
                    info!("{} is up at {}", self.kind.display_name(), endpoint);
                    return Ok(());
                }
                Err(e) => {
                    trace!("{} probe failed: {}", self.kind.display_name(), e);
                    last_failure = e.to_string();
                }
            }

            if Instant::now() + delay >= deadline {
                self.state = if local {
                    LifecycleState::Crashed
                } else {
                    LifecycleState::Stopped
                };
                let reason = if local {
                    format!("did not answer on {endpoint} ({last_failure})")
                } else {
                    format!("remote node {endpoint} unreachable ({last_failure})")
                };
                return Err(Error::start_failure(self.kind.display_name(), reason));
            }

            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(Duration::from_secs(3));
        }
    }

    async fn try_probe(&self, endpoint: &RpcEndpoint) -> Result<RpcClient> {
        let client = RpcClient::connect(endpoint.clone(), PROBE_TIMEOUT).await?;
        client
            .call_with_timeout(self.kind.probe_method(), Value::Null, PROBE_TIMEOUT)
            .await?;
        Ok(client)
    }

    /// Issue an RPC against the running service.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let rpc = self.rpc.as_ref().ok_or_else(|| {
            Error::rpc_transport(format!("{} is not running", self.kind.display_name()))
        })?;
        rpc.call(method, params).await
    }

    /// Record that the OS process exited (driven by the backend observing
    /// [`ServiceEvent::Exited`]). An exit during `Stopping` is the normal
    /// shutdown path; anything else is a crash.
    pub fn handle_exit(&mut self) {
        self.process = None;
        self.state = match self.state {
            LifecycleState::Stopping | LifecycleState::Stopped => LifecycleState::Stopped,
            _ => LifecycleState::Crashed,
        };
    }

    /// Request graceful termination, falling back to force-kill.
    ///
    /// Safe to call when the service was never started: resolves
    /// immediately.
    pub async fn quit(&mut self) -> Result<()> {
        if self.process.is_none() && self.rpc.is_none() {
            self.state = LifecycleState::Stopped;
            return Ok(());
        }

        self.state = LifecycleState::Stopping;
        info!("Stopping {}", self.kind.display_name());

        // Best effort: ask the service to stop itself first.
        if let Some(rpc) = &self.rpc {
            if let Err(e) = rpc
                .call_with_timeout(self.kind.shutdown_method(), Value::Null, SHUTDOWN_RPC_TIMEOUT)
                .await
            {
                debug!(
                    "{} shutdown request failed (continuing): {}",
                    self.kind.display_name(),
                    e
                );
            }
        }

        if let Some(mut process) = self.process.take() {
            process.shutdown(SHUTDOWN_GRACE).await?;
        }
        if let Some(rpc) = self.rpc.take() {
            rpc.close().await;
        }

        self.state = LifecycleState::Stopped;
        Ok(())
    }
}

/// Extract a version token (`vX.Y...`) from `--version` output, falling
/// back to the first non-empty line.
fn parse_version_output(output: &str) -> Option<String> {
    let line = output.lines().find(|l| !l.trim().is_empty())?.trim();
    // Unwrap is fine: the pattern is a compile-time constant.
    let re = Regex::new(r"v\d+[0-9A-Za-z.\-]*").unwrap();
    Some(
        re.find(line)
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| line.to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn test_config() -> Configuration {
        Configuration::defaults(Path::new("/tmp/uplexa-test"))
    }

    fn supervisor(kind: ServiceKind) -> ProcessSupervisor {
        let (tx, _rx) = mpsc::channel(16);
        ProcessSupervisor::new(kind, PathBuf::from("/nonexistent/bin"), tx)
    }

    #[test]
    fn test_service_kind_properties() {
        assert_eq!(ServiceKind::Daemon.binary_name(), "uplexad");
        assert_eq!(ServiceKind::Wallet.binary_name(), "uplexa-wallet-rpc");
        assert_eq!(ServiceKind::Daemon.probe_method(), "get_info");
        assert_eq!(ServiceKind::Wallet.probe_method(), "get_version");
        assert_eq!(ServiceKind::Daemon.shutdown_method(), "stop_daemon");
        assert_eq!(ServiceKind::Wallet.shutdown_method(), "stop_wallet");
    }

    #[test]
    fn test_daemon_args_defaults() {
        let mut cfg = test_config();
        cfg.set_daemon_mode(DaemonMode::Local);
        let args = daemon_launch_args(&cfg).unwrap();

        assert!(args.contains(&"--data-dir=/tmp/uplexa-test".to_string()));
        assert!(args.contains(&"--rpc-bind-ip=127.0.0.1".to_string()));
        assert!(args.contains(&"--rpc-bind-port=21061".to_string()));
        assert!(args.contains(&"--p2p-bind-port=21060".to_string()));
        assert!(args.contains(&"--zmq-rpc-bind-port=21062".to_string()));
        assert!(args.contains(&"--log-level=0".to_string()));
        assert!(args.contains(&"--non-interactive".to_string()));

        // -1 means unset: no peer/rate flags, and 127.0.0.1 needs no
        // external-bind confirmation.
        assert!(!args.iter().any(|a| a.starts_with("--out-peers")));
        assert!(!args.iter().any(|a| a.starts_with("--in-peers")));
        assert!(!args.iter().any(|a| a.starts_with("--limit-rate")));
        assert!(!args.contains(&"--confirm-external-bind".to_string()));
        assert!(!args.contains(&"--testnet".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--bootstrap-daemon")));
    }

    #[test]
    fn test_daemon_args_testnet_and_limits() {
        let mut cfg = test_config();
        cfg.set("app", "testnet", serde_json::json!(true));
        cfg.set("daemon", "out_peers", serde_json::json!(8));
        cfg.set("daemon", "rpc_bind_ip", serde_json::json!("0.0.0.0"));
        let args = daemon_launch_args(&cfg).unwrap();

        assert!(args.contains(&"--testnet".to_string()));
        assert!(args.contains(&"--out-peers=8".to_string()));
        assert!(args.contains(&"--confirm-external-bind".to_string()));
        // Log files land in the testnet-scoped directory.
        assert!(args
            .iter()
            .any(|a| a.starts_with("--log-file=") && a.contains("testnet")));
    }

    #[test]
    fn test_daemon_args_local_remote_bootstrap() {
        let mut cfg = test_config();
        cfg.set_daemon_mode(DaemonMode::LocalRemote);
        let args = daemon_launch_args(&cfg).unwrap();

        assert!(args.contains(&"--bootstrap-daemon-address=remote.uplexa.com:21061".to_string()));
    }

    #[test]
    fn test_wallet_args_remote_daemon() {
        let cfg = test_config(); // daemon defaults to remote mode
        let args = wallet_launch_args(&cfg).unwrap();

        assert!(args.contains(&"--rpc-bind-port=21065".to_string()));
        assert!(args.contains(&"--daemon-address=remote.uplexa.com:21061".to_string()));
        assert!(args.contains(&"--disable-rpc-login".to_string()));
        assert!(args
            .iter()
            .any(|a| a.starts_with("--wallet-dir=") && a.ends_with("wallets")));
        // A remote daemon is not trusted.
        assert!(!args.contains(&"--trusted-daemon".to_string()));
    }

    #[test]
    fn test_wallet_args_local_daemon() {
        let mut cfg = test_config();
        cfg.set_daemon_mode(DaemonMode::Local);
        let args = wallet_launch_args(&cfg).unwrap();

        assert!(args.contains(&"--daemon-address=127.0.0.1:21061".to_string()));
        assert!(args.contains(&"--trusted-daemon".to_string()));
    }

    #[test]
    fn test_parse_version_output() {
        assert_eq!(
            parse_version_output("uPlexa 'Electroneum-Killer' (v0.4.0.1-release)"),
            Some("v0.4.0.1-release".to_string())
        );
        assert_eq!(
            parse_version_output("\nsome banner line\n"),
            Some("some banner line".to_string())
        );
        assert_eq!(parse_version_output(""), None);
        assert_eq!(parse_version_output("  \n  "), None);
    }

    #[tokio::test]
    async fn test_check_version_missing_binary() {
        let sup = supervisor(ServiceKind::Daemon);
        assert_eq!(sup.check_version().await, None);
    }

    #[tokio::test]
    async fn test_quit_never_started_resolves() {
        let mut sup = supervisor(ServiceKind::Wallet);
        assert_eq!(sup.state(), LifecycleState::Stopped);
        sup.quit().await.unwrap();
        assert_eq!(sup.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_start_remote_unreachable_fails_with_start_failure() {
        let mut sup = supervisor(ServiceKind::Daemon);
        sup.set_start_deadline(Duration::from_millis(200));

        // Remote mode pointed at a closed local port: no spawn, probe fails.
        let mut cfg = test_config();
        cfg.set("daemon", "remote_host", serde_json::json!("127.0.0.1"));
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        cfg.set("daemon", "remote_port", serde_json::json!(port));

        let err = sup.start(&cfg).await.unwrap_err();
        match err {
            Error::StartFailure { service, reason } => {
                assert_eq!(service, "daemon");
                assert!(reason.contains("unreachable"), "reason: {reason}");
            }
            other => panic!("expected StartFailure, got {other:?}"),
        }
        // Remote start failure leaves no crashed local process behind.
        assert_eq!(sup.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_handle_exit_marks_crash_when_running() {
        let mut sup = supervisor(ServiceKind::Daemon);
        sup.state = LifecycleState::Running;
        sup.handle_exit();
        assert_eq!(sup.state(), LifecycleState::Crashed);

        sup.state = LifecycleState::Stopping;
        sup.handle_exit();
        assert_eq!(sup.state(), LifecycleState::Stopped);
    }
}
