//! # upgui-service - Service Process Supervision
//!
//! Manages the `uplexad` and `uplexa-wallet-rpc` child processes and the
//! JSON-RPC plumbing to reach them, local or remote.
//!
//! Depends on [`upgui_core`] for configuration and error handling.
//!
//! ## Public API
//!
//! ### Process Management
//! - [`ServiceProcess`] - Spawn and manage one service child process
//! - [`ServiceEvent`] - stdout/stderr/exit events from a child
//!
//! ### RPC
//! - [`RpcClient`] - Line-delimited JSON-RPC client over a local endpoint
//! - [`RpcEndpoint`] - host/port pair
//! - [`RequestTracker`] - Pending request/response matching
//!
//! ### Supervision
//! - [`ProcessSupervisor`] - Start, probe, call, and stop one service
//! - [`ServiceKind`] - Daemon vs. wallet service identity
//! - [`LifecycleState`] - stopped/starting/running/stopping/crashed
//! - [`daemon_launch_args()`], [`wallet_launch_args()`] - CLI argument
//!   construction from the configuration

pub mod process;
pub mod rpc;
pub mod supervisor;

// Public API re-exports
pub use process::{ServiceEvent, ServiceProcess};
pub use rpc::{RequestTracker, RpcClient, RpcEndpoint, DEFAULT_CALL_TIMEOUT};
pub use supervisor::{
    daemon_launch_args, wallet_launch_args, LifecycleState, ProcessSupervisor, RemoteInfo,
    ServiceKind,
};
