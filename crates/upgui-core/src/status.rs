//! Startup status codes, the primary UI-visible state machine output
//!
//! The integer codes are a frozen UI contract and must not be renumbered.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Phase of the startup sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 0 - stack is up, wallets enumerated
    Ready,
    /// 1 - UI connecting to the backend
    Connecting,
    /// 2 - backend loading persisted configuration
    LoadingConfig,
    /// 3 - starting (or probing) the daemon
    StartingDaemon,
    /// 4 - local daemon version is known
    DaemonVersionKnown,
    /// 6 - starting the wallet service
    StartingWallet,
    /// 7 - enumerating known wallets
    ReadingWalletList,
    /// -1 - unrecoverable startup failure, return to config screen
    Error,
}

impl StatusCode {
    pub fn code(self) -> i32 {
        match self {
            StatusCode::Ready => 0,
            StatusCode::Connecting => 1,
            StatusCode::LoadingConfig => 2,
            StatusCode::StartingDaemon => 3,
            StatusCode::DaemonVersionKnown => 4,
            StatusCode::StartingWallet => 6,
            StatusCode::ReadingWalletList => 7,
            StatusCode::Error => -1,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(StatusCode::Ready),
            1 => Some(StatusCode::Connecting),
            2 => Some(StatusCode::LoadingConfig),
            3 => Some(StatusCode::StartingDaemon),
            4 => Some(StatusCode::DaemonVersionKnown),
            6 => Some(StatusCode::StartingWallet),
            7 => Some(StatusCode::ReadingWalletList),
            -1 => Some(StatusCode::Error),
            _ => None,
        }
    }
}

impl Serialize for StatusCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.code())
    }
}

impl<'de> Deserialize<'de> for StatusCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = i32::deserialize(deserializer)?;
        StatusCode::from_code(code)
            .ok_or_else(|| D::Error::custom(format!("unknown status code {code}")))
    }
}

/// The single source of truth for "where the app is": one status code plus
/// an optional human-readable message (e.g. the daemon version for code 4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartupState {
    pub code: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StartupState {
    pub fn new(code: StatusCode) -> Self {
        Self {
            code,
            message: None,
        }
    }

    pub fn with_message(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.code == StatusCode::Error
    }
}
