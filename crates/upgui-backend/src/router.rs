//! Message routing between the UI and the core
//!
//! Every inbound envelope is dispatched by target module: `core` methods
//! are handled here, `daemon`/`wallet` methods are forwarded to the
//! matching supervisor's RPC surface. Unknown modules and methods are an
//! explicit no-op, so forward-incompatible UI messages never crash the
//! backend. The router is also the sole producer of outbound events.

use serde_json::{json, Value};
use url::Url;

use upgui_core::config::Configuration;
use upgui_core::ipc::{CoreMethod, Event, Notification, Request, TargetModule};
use upgui_core::prelude::*;
use upgui_service::ServiceKind;

use crate::backend::Backend;

const EXPLORER_TX_URL: &str = "https://explorer.uplexa.com/tx/";

/// Dispatch one inbound request.
pub(crate) async fn route(backend: &mut Backend, request: Request) {
    match request.module {
        TargetModule::Core => handle_core(backend, &request.method, request.data).await,
        TargetModule::Daemon => {
            forward(backend, ServiceKind::Daemon, &request.method, request.data).await
        }
        TargetModule::Wallet => {
            forward(backend, ServiceKind::Wallet, &request.method, request.data).await
        }
        TargetModule::Unknown => debug!("Ignoring request for unknown module"),
    }
}

async fn handle_core(backend: &mut Backend, method: &str, data: Value) {
    match CoreMethod::parse(method) {
        CoreMethod::QuickSaveConfig => quick_save_config(backend, data).await,
        CoreMethod::SaveConfig => save_config(backend, data).await,
        CoreMethod::SaveConfigInit => save_config_init(backend, data).await,
        CoreMethod::OpenExplorer => open_explorer(&data),
        CoreMethod::OpenUrl => open_url(&data),
        CoreMethod::SavePng => save_png(backend, &data).await,
        CoreMethod::ConfirmClose => backend.confirm_close().await,
        CoreMethod::Unknown => debug!("Ignoring unknown core method '{method}'"),
    }
}

// ─────────────────────────────────────────────────────────────────
// Configuration saves
// ─────────────────────────────────────────────────────────────────

fn parse_partial(data: Value) -> Option<Configuration> {
    match serde_json::from_value(data) {
        Ok(partial) => Some(partial),
        Err(e) => {
            warn!("Malformed configuration payload from UI: {e}");
            None
        }
    }
}

/// Shared merge-and-persist used by every save variant, so the variants
/// differ only in what happens afterwards.
async fn merge_and_persist(backend: &mut Backend, partial: &Configuration) -> Option<Configuration> {
    match backend.store.save(partial) {
        Ok(effective) => Some(effective),
        Err(e) => {
            error!("Failed to persist configuration: {e}");
            backend
                .emit(Event::notification(&Notification::negative(
                    "Error: could not save configuration",
                )))
                .await;
            None
        }
    }
}

/// Persist a partial change and acknowledge with the submitted payload.
/// Never triggers a restart prompt (used for UI preferences).
async fn quick_save_config(backend: &mut Backend, data: Value) {
    let Some(partial) = parse_partial(data) else {
        return;
    };
    if merge_and_persist(backend, &partial).await.is_some() {
        backend.emit(Event::app_data(&partial)).await;
    }
}

/// Persist and additionally decide whether the services must restart:
/// any changed key outside the `appearance` section requires one.
async fn save_config(backend: &mut Backend, data: Value) {
    let Some(partial) = parse_partial(data) else {
        return;
    };
    let previous = backend.store.snapshot();
    if let Some(effective) = merge_and_persist(backend, &partial).await {
        let restart_required = previous.requires_restart(&effective);
        backend.emit(Event::app_data(&effective)).await;
        if restart_required {
            info!("Configuration change requires a service restart");
            backend.emit(Event::settings_changed_reboot()).await;
        }
    }
}

/// Persist and re-run the full startup sequence instead of acknowledging
/// (first-run configuration).
async fn save_config_init(backend: &mut Backend, data: Value) {
    let Some(partial) = parse_partial(data) else {
        return;
    };
    if merge_and_persist(backend, &partial).await.is_some() {
        backend.startup().await;
    }
}

// ─────────────────────────────────────────────────────────────────
// Core utility methods
// ─────────────────────────────────────────────────────────────────

fn open_explorer(data: &Value) {
    let Some(id) = data["id"].as_str() else {
        return;
    };
    if data["type"].as_str() == Some("tx") {
        spawn_url_opener(&format!("{EXPLORER_TX_URL}{id}"));
    }
}

fn open_url(data: &Value) {
    let Some(raw) = data["url"].as_str() else {
        return;
    };
    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => spawn_url_opener(url.as_str()),
        Ok(url) => warn!("Refusing to open URL with scheme '{}'", url.scheme()),
        Err(e) => warn!("Invalid URL from UI: {e}"),
    }
}

fn spawn_url_opener(url: &str) {
    if let Err(e) = open_in_browser(url) {
        warn!("Failed to open {url}: {e}");
    }
}

/// Open a URL with the platform-default browser (fire-and-forget).
fn open_in_browser(url: &str) -> std::io::Result<()> {
    use std::process::Command;

    #[cfg(target_os = "macos")]
    {
        Command::new("open").arg(url).spawn()?;
    }

    #[cfg(target_os = "linux")]
    {
        Command::new("xdg-open").arg(url).spawn()?;
    }

    #[cfg(target_os = "windows")]
    {
        Command::new("cmd").args(["/C", "start", "", url]).spawn()?;
    }

    Ok(())
}

/// Decode a `data:image/png;base64,` payload from the UI (QR codes,
/// address images) and write it where the user asked.
async fn save_png(backend: &mut Backend, data: &Value) {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    let kind = data["type"].as_str().unwrap_or("image");
    let (Some(img), Some(path)) = (data["img"].as_str(), data["path"].as_str()) else {
        warn!("save_png request missing img or path");
        return;
    };

    let encoded = img.strip_prefix("data:image/png;base64,").unwrap_or(img);
    let notification = match STANDARD.decode(encoded) {
        Ok(bytes) => match std::fs::write(path, bytes) {
            Ok(()) => Notification::positive(format!("{kind} saved to {path}")),
            Err(e) => {
                warn!("Could not write {path}: {e}");
                Notification::negative(format!("Error saving {kind}"))
            }
        },
        Err(e) => {
            warn!("Bad base64 payload for save_png: {e}");
            Notification::negative(format!("Error saving {kind}"))
        }
    };
    backend.emit(Event::notification(&notification)).await;
}

// ─────────────────────────────────────────────────────────────────
// Service forwarding
// ─────────────────────────────────────────────────────────────────

/// Forward `{method, data}` to a supervisor's RPC surface and report the
/// outcome for that specific call only; failures never change the global
/// startup state.
async fn forward(backend: &mut Backend, kind: ServiceKind, method: &str, data: Value) {
    let result = match kind {
        ServiceKind::Daemon => backend.daemon.call(method, data).await,
        ServiceKind::Wallet => backend.wallet.call(method, data).await,
    };

    let event = match (kind, result) {
        (ServiceKind::Daemon, Ok(result)) => Event::new(
            "set_daemon_data",
            json!({ "method": method, "result": result }),
        ),
        (ServiceKind::Daemon, Err(e)) => {
            debug!("Daemon call '{method}' failed: {e}");
            Event::new(
                "set_daemon_data",
                json!({ "method": method, "error": e.to_string() }),
            )
        }
        (ServiceKind::Wallet, Ok(result)) => Event::new(
            "set_wallet_data",
            json!({ "method": method, "result": result }),
        ),
        (ServiceKind::Wallet, Err(e)) => {
            debug!("Wallet call '{method}' failed: {e}");
            Event::new(
                "set_wallet_error",
                json!({ "method": method, "error": e.to_string() }),
            )
        }
    };
    backend.emit(event).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::store::ConfigStore;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use std::path::PathBuf;
    use tempfile::{tempdir, TempDir};
    use tokio::sync::mpsc;
    use upgui_service::ServiceEvent;

    struct Fixture {
        temp: TempDir,
        backend: Backend,
        events_rx: mpsc::Receiver<Event>,
        _daemon_events: mpsc::Receiver<ServiceEvent>,
        _wallet_events: mpsc::Receiver<ServiceEvent>,
    }

    fn fixture() -> Fixture {
        let temp = tempdir().unwrap();
        let store = ConfigStore::open(temp.path().join("uplexa")).unwrap();
        let (events_tx, events_rx) = mpsc::channel(64);
        let (backend, daemon_events, wallet_events) =
            Backend::new(store, PathBuf::from("/nonexistent/bin"), events_tx);
        Fixture {
            temp,
            backend,
            events_rx,
            _daemon_events: daemon_events,
            _wallet_events: wallet_events,
        }
    }

    impl Fixture {
        async fn send(&mut self, json: &str) {
            let request = Request::parse(json).expect("request must parse");
            route(&mut self.backend, request).await;
        }

        fn events(&mut self) -> Vec<Event> {
            let mut out = Vec::new();
            while let Ok(event) = self.events_rx.try_recv() {
                out.push(event);
            }
            out
        }
    }

    #[tokio::test]
    async fn test_quick_save_acks_with_payload_and_no_reboot() {
        let mut fx = fixture();
        fx.send(
            r#"{"module":"core","method":"quick_save_config","data":{"appearance":{"theme":"light"}}}"#,
        )
        .await;

        let events = fx.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "set_app_data");
        assert_eq!(events[0].data["config"]["appearance"]["theme"], "light");
        assert_eq!(
            events[0].data["pending_config"],
            events[0].data["config"]
        );

        // Persisted.
        let on_disk = fx.backend.store.load().unwrap();
        assert_eq!(on_disk.appearance().unwrap().theme, "light");
    }

    #[tokio::test]
    async fn test_save_config_port_change_requires_reboot() {
        let mut fx = fixture();
        fx.send(
            r#"{"module":"core","method":"save_config","data":{"daemon":{"remote_port":21062}}}"#,
        )
        .await;

        let events = fx.events();
        let names: Vec<&str> = events.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(names, ["set_app_data", "settings_changed_reboot"]);
        // The acknowledgment carries the full effective config.
        assert_eq!(events[0].data["config"]["daemon"]["remote_port"], 21062);
        assert_eq!(events[0].data["config"]["wallet"]["rpc_bind_port"], 21065);
    }

    #[tokio::test]
    async fn test_save_config_appearance_only_no_reboot() {
        let mut fx = fixture();
        fx.send(
            r#"{"module":"core","method":"save_config","data":{"appearance":{"theme":"light"}}}"#,
        )
        .await;

        let events = fx.events();
        let names: Vec<&str> = events.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(names, ["set_app_data"]);
    }

    #[tokio::test]
    async fn test_save_config_unchanged_values_no_reboot() {
        let mut fx = fixture();
        // Re-submitting the default value changes nothing.
        fx.send(
            r#"{"module":"core","method":"save_config","data":{"daemon":{"remote_port":21061}}}"#,
        )
        .await;

        let events = fx.events();
        assert!(!events.iter().any(|e| e.event == "settings_changed_reboot"));
    }

    #[tokio::test]
    async fn test_malformed_save_payload_is_dropped() {
        let mut fx = fixture();
        fx.send(r#"{"module":"core","method":"save_config","data":"not an object"}"#)
            .await;

        assert!(fx.events().is_empty());
        // Nothing reached disk.
        assert!(fx.backend.store.load().is_err());
    }

    #[tokio::test]
    async fn test_unknown_module_and_method_are_noops() {
        let mut fx = fixture();
        fx.send(r#"{"module":"miner","method":"start","data":{}}"#).await;
        fx.send(r#"{"module":"core","method":"reticulate_splines","data":{}}"#)
            .await;

        assert!(fx.events().is_empty());
    }

    #[tokio::test]
    async fn test_forward_to_stopped_daemon_reports_error() {
        let mut fx = fixture();
        fx.send(r#"{"module":"daemon","method":"get_info","data":{}}"#).await;

        let events = fx.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "set_daemon_data");
        assert_eq!(events[0].data["method"], "get_info");
        assert!(events[0].data["error"]
            .as_str()
            .unwrap()
            .contains("not running"));
    }

    #[tokio::test]
    async fn test_forward_to_stopped_wallet_uses_error_event() {
        let mut fx = fixture();
        fx.send(r#"{"module":"wallet","method":"get_balance","data":{}}"#)
            .await;

        let events = fx.events();
        assert_eq!(events[0].event, "set_wallet_error");
    }

    #[tokio::test]
    async fn test_save_png_writes_file_and_notifies() {
        let mut fx = fixture();
        let target = fx.temp.path().join("qr.png");
        let payload = format!(
            "data:image/png;base64,{}",
            STANDARD.encode(b"\x89PNG\r\n\x1a\n")
        );
        fx.send(&format!(
            r#"{{"module":"core","method":"save_png","data":{{"type":"QR Code","img":"{}","path":"{}"}}}}"#,
            payload,
            target.display()
        ))
        .await;

        assert_eq!(std::fs::read(&target).unwrap(), b"\x89PNG\r\n\x1a\n");
        let events = fx.events();
        assert_eq!(events[0].event, "show_notification");
        assert_eq!(events[0].data["type"], "positive");
        assert!(events[0].data["message"]
            .as_str()
            .unwrap()
            .contains("QR Code saved"));
    }

    #[tokio::test]
    async fn test_save_png_bad_base64_notifies_error() {
        let mut fx = fixture();
        let target = fx.temp.path().join("bad.png");
        fx.send(&format!(
            r#"{{"module":"core","method":"save_png","data":{{"img":"%%%not-base64%%%","path":"{}"}}}}"#,
            target.display()
        ))
        .await;

        assert!(!target.exists());
        let events = fx.events();
        assert_eq!(events[0].data["type"], "negative");
    }

    #[tokio::test]
    async fn test_confirm_close_stops_services() {
        let mut fx = fixture();
        fx.send(r#"{"module":"core","method":"confirm_close","data":{}}"#)
            .await;

        assert!(fx.backend.coordinator.is_confirmed());
    }
}
