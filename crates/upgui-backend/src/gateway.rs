//! WebSocket gateway toward the UI layer
//!
//! The UI speaks the envelope protocol over a local WebSocket: one JSON
//! object per text message, requests in, events out. Events are broadcast
//! to every connected UI; requests from any connection funnel into the
//! single backend command channel.

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use upgui_core::ipc::{Event, Request};
use upgui_core::prelude::*;

use crate::backend::BackendCommand;

/// Accepts UI connections on `127.0.0.1:<ws_bind_port>`.
pub struct Gateway {
    listener: TcpListener,
}

impl Gateway {
    /// Bind the gateway socket. Pass port 0 to let the OS pick (tests).
    pub async fn bind(port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|e| Error::gateway(format!("cannot bind ws port {port}: {e}")))?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        self.listener.local_addr().map_err(Error::from)
    }

    /// Serve forever: fan backend events out to every UI connection and
    /// funnel UI requests into the backend command channel.
    pub async fn run(self, commands: mpsc::Sender<BackendCommand>, mut events: mpsc::Receiver<Event>) {
        let (broadcast_tx, _) = broadcast::channel::<Event>(256);

        // Pump the backend's outbound channel into the broadcast fan-out.
        let fanout = broadcast_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                // Send only fails with zero receivers; events are
                // fire-and-forget, so a UI-less period just drops them.
                let _ = fanout.send(event);
            }
        });

        info!(
            "UI gateway listening on ws://{}",
            self.listener
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_default()
        );

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    debug!("UI connection from {peer}");
                    tokio::spawn(handle_connection(
                        stream,
                        commands.clone(),
                        broadcast_tx.subscribe(),
                    ));
                }
                Err(e) => warn!("Accept failed: {e}"),
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    commands: mpsc::Sender<BackendCommand>,
    mut events: broadcast::Receiver<Event>,
) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake failed: {e}");
            return;
        }
    };
    let (mut sink, mut source) = ws.split();

    loop {
        tokio::select! {
            message = source.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    match Request::parse(text.as_str()) {
                        Some(request) => {
                            if commands.send(BackendCommand::Request(request)).await.is_err() {
                                break;
                            }
                        }
                        // Malformed envelopes are dropped, not answered.
                        None => debug!("Dropping malformed UI message"),
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("WebSocket read error: {e}");
                    break;
                }
            },
            event = events.recv() => match event {
                Ok(event) => {
                    if sink.send(Message::text(event.to_json())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("UI connection lagged, dropped {n} events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    debug!("UI connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_tungstenite::connect_async;
    use upgui_core::ipc::TargetModule;

    #[tokio::test]
    async fn test_gateway_bridges_requests_and_events() {
        let gateway = Gateway::bind(0).await.unwrap();
        let addr = gateway.local_addr().unwrap();

        let (commands_tx, mut commands_rx) = mpsc::channel(16);
        let (events_tx, events_rx) = mpsc::channel(16);
        tokio::spawn(gateway.run(commands_tx, events_rx));

        let (mut client, _) = connect_async(format!("ws://{addr}"))
            .await
            .expect("client connect");

        // UI -> backend: a request envelope arrives as a BackendCommand.
        client
            .send(Message::text(
                r#"{"module":"daemon","method":"get_info","data":{}}"#,
            ))
            .await
            .unwrap();
        let command = tokio::time::timeout(std::time::Duration::from_secs(2), commands_rx.recv())
            .await
            .expect("command in time")
            .expect("channel open");
        match command {
            BackendCommand::Request(request) => {
                assert_eq!(request.module, TargetModule::Daemon);
                assert_eq!(request.method, "get_info");
            }
            other => panic!("expected request, got {other:?}"),
        }

        // Backend -> UI: an event reaches the connected client.
        events_tx
            .send(Event::new("wallet_list", json!({ "wallets": [] })))
            .await
            .unwrap();
        let message = tokio::time::timeout(std::time::Duration::from_secs(2), client.next())
            .await
            .expect("event in time")
            .expect("stream open")
            .expect("no ws error");
        let event: Event = serde_json::from_str(message.to_text().unwrap()).unwrap();
        assert_eq!(event.event, "wallet_list");
    }

    #[tokio::test]
    async fn test_malformed_ui_message_is_dropped() {
        let gateway = Gateway::bind(0).await.unwrap();
        let addr = gateway.local_addr().unwrap();

        let (commands_tx, mut commands_rx) = mpsc::channel(16);
        let (_events_tx, events_rx) = mpsc::channel::<Event>(16);
        tokio::spawn(gateway.run(commands_tx, events_rx));

        let (mut client, _) = connect_async(format!("ws://{addr}"))
            .await
            .expect("client connect");

        client.send(Message::text("not an envelope")).await.unwrap();
        client
            .send(Message::text(
                r#"{"module":"core","method":"quick_save_config","data":{}}"#,
            ))
            .await
            .unwrap();

        // Only the well-formed request comes through.
        let command = tokio::time::timeout(std::time::Duration::from_secs(2), commands_rx.recv())
            .await
            .unwrap()
            .unwrap();
        match command {
            BackendCommand::Request(request) => {
                assert_eq!(request.method, "quick_save_config");
            }
            other => panic!("expected request, got {other:?}"),
        }
    }
}
