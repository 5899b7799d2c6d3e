//! Application error types with rich context

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    ConfigInvalid { message: String },

    #[error("Data storage path not usable: {path} ({reason})")]
    PathUnavailable { path: PathBuf, reason: String },

    // ─────────────────────────────────────────────────────────────
    // Service/Process Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Service binary not found: {name}")]
    BinaryNotFound { name: String },

    #[error("Failed to spawn service process: {reason}")]
    ProcessSpawn { reason: String },

    #[error("{service} failed to start: {reason}")]
    StartFailure { service: String, reason: String },

    #[error("Remote node network does not match local network")]
    NetworkMismatch,

    // ─────────────────────────────────────────────────────────────
    // RPC Errors
    // ─────────────────────────────────────────────────────────────
    #[error("RPC transport error: {message}")]
    RpcTransport { message: String },

    #[error("RPC call '{method}' timed out after {timeout:?}")]
    RpcTimeout { method: String, timeout: Duration },

    #[error("RPC error from service: {message}")]
    RpcService { message: String, code: Option<i64> },

    // ─────────────────────────────────────────────────────────────
    // Channel/Communication Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Channel send error: {message}")]
    ChannelSend { message: String },

    #[error("Channel closed unexpectedly")]
    ChannelClosed,

    // ─────────────────────────────────────────────────────────────
    // UI Gateway Errors
    // ─────────────────────────────────────────────────────────────
    #[error("UI gateway error: {message}")]
    Gateway { message: String },
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            message: message.into(),
        }
    }

    pub fn path_unavailable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::PathUnavailable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn start_failure(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StartFailure {
            service: service.into(),
            reason: reason.into(),
        }
    }

    pub fn rpc_transport(message: impl Into<String>) -> Self {
        Self::RpcTransport {
            message: message.into(),
        }
    }

    pub fn rpc_service(message: impl Into<String>, code: Option<i64>) -> Self {
        Self::RpcService {
            message: message.into(),
            code,
        }
    }

    pub fn channel_send(message: impl Into<String>) -> Self {
        Self::ChannelSend {
            message: message.into(),
        }
    }

    pub fn gateway(message: impl Into<String>) -> Self {
        Self::Gateway {
            message: message.into(),
        }
    }

    /// Check if this is an RPC-layer error (transport, timeout, or a
    /// service-reported error payload).
    pub fn is_rpc(&self) -> bool {
        matches!(
            self,
            Error::RpcTransport { .. } | Error::RpcTimeout { .. } | Error::RpcService { .. }
        )
    }

    /// Errors with no safe degraded mode: the startup sequence must halt
    /// and send the user back to the configuration screen.
    pub fn is_fatal_to_startup(&self) -> bool {
        matches!(
            self,
            Error::PathUnavailable { .. }
                | Error::ConfigNotFound { .. }
                | Error::StartFailure { .. }
                | Error::NetworkMismatch
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = Error::start_failure("daemon", "probe timed out");
        assert_eq!(err.to_string(), "daemon failed to start: probe timed out");

        let err = Error::path_unavailable("/data", "not writable");
        assert!(err.to_string().contains("/data"));
        assert!(err.to_string().contains("not writable"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_is_rpc() {
        assert!(Error::rpc_transport("connection refused").is_rpc());
        assert!(Error::rpc_service("busy", Some(-9)).is_rpc());
        assert!(Error::RpcTimeout {
            method: "get_info".into(),
            timeout: Duration::from_secs(30),
        }
        .is_rpc());
        assert!(!Error::config("bad").is_rpc());
    }

    #[test]
    fn test_error_is_fatal_to_startup() {
        assert!(Error::path_unavailable("/x", "denied").is_fatal_to_startup());
        assert!(Error::start_failure("wallet", "exited").is_fatal_to_startup());
        assert!(Error::NetworkMismatch.is_fatal_to_startup());
        assert!(!Error::rpc_transport("refused").is_fatal_to_startup());
    }
}
