//! Application configuration model
//!
//! The persisted configuration is a JSON object of named sections
//! (`app`, `appearance`, `daemon`, `wallet`), each mapping option names to
//! values. [`Configuration`] keeps that exact shape so the on-disk file
//! round-trips byte-for-byte modulo formatting, while the typed views
//! ([`AppSettings`], [`DaemonSettings`], ...) decode individual sections
//! for code that needs real types.
//!
//! Merge semantics are shallow-per-section: sections present on disk but
//! not in the defaults are created, keys within a section overwrite the
//! default value wholesale, and sections only present in the defaults are
//! kept as-is.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// One configuration section: option name -> JSON value.
pub type Section = BTreeMap<String, Value>;

// ─────────────────────────────────────────────────────────────────
// Typed section views
// ─────────────────────────────────────────────────────────────────

/// Where the daemon runs relative to this machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonMode {
    /// Spawn and manage a local `uplexad` only.
    Local,
    /// Use a remote node only, never spawn locally.
    Remote,
    /// Remote node as primary with a local daemon as fallback.
    LocalRemote,
}

impl std::fmt::Display for DaemonMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DaemonMode::Local => write!(f, "local"),
            DaemonMode::Remote => write!(f, "remote"),
            DaemonMode::LocalRemote => write!(f, "local_remote"),
        }
    }
}

/// The `app` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub data_dir: PathBuf,
    pub ws_bind_port: u16,
    pub testnet: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::new(),
            ws_bind_port: 21066,
            testnet: false,
        }
    }
}

impl AppSettings {
    /// Defaults with the data directory pointed at the config directory,
    /// matching the shipped first-run configuration.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// The on-disk layout under the data directory. Testnet mode scopes
    /// everything below `<data_dir>/testnet` so the two networks never
    /// share ledger or wallet storage.
    pub fn data_paths(&self) -> DataPaths {
        let base = if self.testnet {
            self.data_dir.join("testnet")
        } else {
            self.data_dir.clone()
        };
        DataPaths {
            ledger_dir: base.join("lmdb02"),
            log_dir: base.join("logs"),
            wallet_dir: base.join("wallets"),
            base,
        }
    }
}

/// Resolved storage directories for one network (mainnet or testnet).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub base: PathBuf,
    pub ledger_dir: PathBuf,
    pub log_dir: PathBuf,
    pub wallet_dir: PathBuf,
}

/// The `appearance` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppearanceSettings {
    pub theme: String,
}

impl Default for AppearanceSettings {
    fn default() -> Self {
        Self {
            theme: "dark".to_string(),
        }
    }
}

/// The `daemon` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    #[serde(rename = "type")]
    pub mode: DaemonMode,
    pub remote_host: String,
    pub remote_port: u16,
    pub p2p_bind_ip: String,
    pub p2p_bind_port: u16,
    pub rpc_bind_ip: String,
    pub rpc_bind_port: u16,
    pub zmq_rpc_bind_ip: String,
    pub zmq_rpc_bind_port: u16,
    pub out_peers: i64,
    pub in_peers: i64,
    pub limit_rate_up: i64,
    pub limit_rate_down: i64,
    pub log_level: u8,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            mode: DaemonMode::Remote,
            remote_host: "remote.uplexa.com".to_string(),
            remote_port: 21061,
            p2p_bind_ip: "0.0.0.0".to_string(),
            p2p_bind_port: 21060,
            rpc_bind_ip: "127.0.0.1".to_string(),
            rpc_bind_port: 21061,
            zmq_rpc_bind_ip: "127.0.0.1".to_string(),
            zmq_rpc_bind_port: 21062,
            out_peers: -1,
            in_peers: -1,
            limit_rate_up: -1,
            limit_rate_down: -1,
            log_level: 0,
        }
    }
}

/// The `wallet` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletSettings {
    pub rpc_bind_port: u16,
    pub log_level: u8,
}

impl Default for WalletSettings {
    fn default() -> Self {
        Self {
            rpc_bind_port: 21065,
            log_level: 0,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────

/// The full application configuration: a map of named sections.
///
/// Serializes transparently, so `serde_json::to_string_pretty` produces
/// the persisted `config.json` shape directly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration {
    sections: BTreeMap<String, Section>,
}

impl Configuration {
    /// Compiled-in defaults with `app.data_dir` pointed at `data_dir`.
    pub fn defaults(data_dir: &Path) -> Self {
        let mut cfg = Self::default();
        cfg.put_section("app", &AppSettings::with_data_dir(data_dir));
        cfg.put_section("appearance", &AppearanceSettings::default());
        cfg.put_section("daemon", &DaemonSettings::default());
        cfg.put_section("wallet", &WalletSettings::default());
        cfg
    }

    /// Parse a configuration from its JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize pretty-printed, the shape written to disk.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.get(name)
    }

    pub fn sections(&self) -> impl Iterator<Item = (&String, &Section)> {
        self.sections.iter()
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&Value> {
        self.sections.get(section).and_then(|s| s.get(key))
    }

    pub fn set(&mut self, section: &str, key: &str, value: Value) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    /// Merge `other` into `self` at section/key granularity.
    ///
    /// Sections of `other` missing here are created; keys within a section
    /// overwrite the existing value wholesale (no deep merge below the
    /// section->key level). Sections absent from `other` are untouched.
    pub fn merge(&mut self, other: &Configuration) {
        for (name, section) in &other.sections {
            let target = self.sections.entry(name.clone()).or_default();
            for (key, value) in section {
                target.insert(key.clone(), value.clone());
            }
        }
    }

    /// Whether switching from `self` to `next` requires a service restart.
    ///
    /// Compares every key of every section except `appearance`; a key
    /// missing from `next` counts as changed.
    pub fn requires_restart(&self, next: &Configuration) -> bool {
        self.sections
            .iter()
            .filter(|(name, _)| name.as_str() != "appearance")
            .any(|(name, section)| {
                section
                    .iter()
                    .any(|(key, value)| next.get(name, key) != Some(value))
            })
    }

    /// Force the daemon mode, used by the startup sequence when the local
    /// binary is missing or the remote node is unusable. In-memory only:
    /// the change reaches disk on the next explicit save.
    pub fn set_daemon_mode(&mut self, mode: DaemonMode) {
        self.set("daemon", "type", Value::String(mode.to_string()));
    }

    pub fn app(&self) -> Result<AppSettings> {
        self.decode("app")
    }

    pub fn appearance(&self) -> Result<AppearanceSettings> {
        self.decode("appearance")
    }

    pub fn daemon(&self) -> Result<DaemonSettings> {
        self.decode("daemon")
    }

    pub fn wallet(&self) -> Result<WalletSettings> {
        self.decode("wallet")
    }

    fn put_section<T: Serialize>(&mut self, name: &str, settings: &T) {
        // Settings structs are plain field maps; serialization cannot fail.
        if let Ok(Value::Object(map)) = serde_json::to_value(settings) {
            self.sections
                .insert(name.to_string(), map.into_iter().collect());
        }
    }

    fn decode<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let section = self
            .sections
            .get(name)
            .ok_or_else(|| Error::config_invalid(format!("missing '{name}' section")))?;
        let value = Value::Object(
            section
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        );
        serde_json::from_value(value)
            .map_err(|e| Error::config_invalid(format!("bad '{name}' section: {e}")))
    }
}
