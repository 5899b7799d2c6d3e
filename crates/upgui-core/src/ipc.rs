//! IPC envelope types for the UI <-> backend protocol
//!
//! Two wire shapes, both JSON objects:
//! - requests from the UI: `{module, method, data}`
//! - events to the UI: `{event, data}`
//!
//! There is no request id; the method name is the only correlation. Unknown
//! modules and methods are a documented no-op so forward-incompatible UI
//! messages never crash the backend, expressed here as explicit catch-all
//! variants rather than missing match arms.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::Configuration;
use crate::status::StartupState;

// ─────────────────────────────────────────────────────────────────
// Inbound requests
// ─────────────────────────────────────────────────────────────────

/// Routing target of an inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetModule {
    Core,
    Daemon,
    Wallet,
    /// Tolerance arm: anything else is accepted and ignored.
    #[serde(other)]
    Unknown,
}

/// An inbound request envelope from the UI.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub module: TargetModule,
    pub method: String,
    #[serde(default)]
    pub data: Value,
}

impl Request {
    /// Parse a request from JSON text. Malformed input yields `None`; the
    /// caller drops it silently.
    pub fn parse(json: &str) -> Option<Self> {
        serde_json::from_str(json).ok()
    }
}

/// Core-module methods handled by the router itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreMethod {
    QuickSaveConfig,
    SaveConfig,
    SaveConfigInit,
    OpenExplorer,
    OpenUrl,
    SavePng,
    ConfirmClose,
    /// Tolerance arm: unknown methods are an explicit no-op.
    Unknown,
}

impl CoreMethod {
    pub fn parse(method: &str) -> Self {
        match method {
            "quick_save_config" => CoreMethod::QuickSaveConfig,
            "save_config" => CoreMethod::SaveConfig,
            "save_config_init" => CoreMethod::SaveConfigInit,
            "open_explorer" => CoreMethod::OpenExplorer,
            "open_url" => CoreMethod::OpenUrl,
            "save_png" => CoreMethod::SavePng,
            "confirm_close" => CoreMethod::ConfirmClose,
            _ => CoreMethod::Unknown,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Outbound events
// ─────────────────────────────────────────────────────────────────

/// Notification severity rendered by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Positive,
    Negative,
    Warning,
}

/// A user-visible toast notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub severity: Severity,
    pub message: String,
    pub timeout: u32,
}

impl Notification {
    const DEFAULT_TIMEOUT_MS: u32 = 2000;

    pub fn positive(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Positive,
            message: message.into(),
            timeout: Self::DEFAULT_TIMEOUT_MS,
        }
    }

    pub fn negative(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Negative,
            message: message.into(),
            timeout: Self::DEFAULT_TIMEOUT_MS,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            timeout: Self::DEFAULT_TIMEOUT_MS,
        }
    }
}

/// An outbound event envelope, fire-and-forget toward the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Event {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// First event of every startup attempt; the UI answers by showing
    /// the loading-config state.
    pub fn initialize() -> Self {
        Self::new("initialize", json!({}))
    }

    /// A bare startup-state transition.
    pub fn status(state: &StartupState) -> Self {
        Self::new("set_app_data", json!({ "status": state }))
    }

    /// Push the effective configuration to the UI. `pending_config`
    /// mirrors `config` so the settings screen resets its edit buffer.
    pub fn app_data(config: &Configuration) -> Self {
        Self::new(
            "set_app_data",
            json!({ "config": config, "pending_config": config }),
        )
    }

    pub fn notification(notification: &Notification) -> Self {
        // Serializing a field-only struct cannot fail.
        Self::new(
            "show_notification",
            serde_json::to_value(notification).unwrap_or(Value::Null),
        )
    }

    pub fn settings_changed_reboot() -> Self {
        Self::new("settings_changed_reboot", json!({}))
    }

    pub fn confirm_close() -> Self {
        Self::new("confirm_close", json!({}))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusCode;

    #[test]
    fn test_parse_core_request() {
        let req = Request::parse(
            r#"{"module":"core","method":"quick_save_config","data":{"appearance":{"theme":"light"}}}"#,
        )
        .unwrap();
        assert_eq!(req.module, TargetModule::Core);
        assert_eq!(CoreMethod::parse(&req.method), CoreMethod::QuickSaveConfig);
        assert_eq!(req.data["appearance"]["theme"], "light");
    }

    #[test]
    fn test_parse_request_missing_data_defaults_null() {
        let req = Request::parse(r#"{"module":"daemon","method":"get_info"}"#).unwrap();
        assert_eq!(req.module, TargetModule::Daemon);
        assert!(req.data.is_null());
    }

    #[test]
    fn test_unknown_module_is_tolerated() {
        let req = Request::parse(r#"{"module":"miner","method":"start","data":{}}"#).unwrap();
        assert_eq!(req.module, TargetModule::Unknown);
    }

    #[test]
    fn test_malformed_request_is_none() {
        assert!(Request::parse("not json").is_none());
        assert!(Request::parse(r#"{"method":"x"}"#).is_none());
    }

    #[test]
    fn test_unknown_core_method() {
        assert_eq!(CoreMethod::parse("save_config"), CoreMethod::SaveConfig);
        assert_eq!(CoreMethod::parse("save_config_init"), CoreMethod::SaveConfigInit);
        assert_eq!(CoreMethod::parse("reticulate_splines"), CoreMethod::Unknown);
    }

    #[test]
    fn test_status_event_shape() {
        let event = Event::status(&StartupState::new(StatusCode::StartingDaemon));
        assert_eq!(event.event, "set_app_data");
        assert_eq!(event.data["status"]["code"], 3);
    }

    #[test]
    fn test_notification_event_shape() {
        let event = Event::notification(&Notification::warning("remote node not available"));
        assert_eq!(event.event, "show_notification");
        assert_eq!(event.data["type"], "warning");
        assert_eq!(event.data["message"], "remote node not available");
        assert_eq!(event.data["timeout"], 2000);
    }

    #[test]
    fn test_app_data_event_mirrors_pending_config() {
        let cfg = Configuration::defaults(std::path::Path::new("/tmp"));
        let event = Event::app_data(&cfg);
        assert_eq!(event.data["config"], event.data["pending_config"]);
        assert_eq!(event.data["config"]["daemon"]["type"], "remote");
    }

    #[test]
    fn test_event_json_roundtrip() {
        let event = Event::settings_changed_reboot();
        let text = event.to_json();
        let parsed: Event = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, event);
    }
}
