//! Socket.IO client for GroupTech real-time events
//!
//! Connects to the backend's Socket.IO endpoint, joins the default and
//! direct-message namespaces, forwards typed events to the session and
//! relays outgoing emits.

pub mod events;
pub mod frame;
pub mod socket;

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::time;
use url::Url;

pub use events::{parse_event, Emit, EventScope, RealtimeEvent};
use frame::{Packet, DEFAULT_NAMESPACE, DIRECT_NAMESPACE};
use socket::RealtimeSocket;

/// Reason the inner connection loop exited.
enum DisconnectReason {
    /// The session dropped its handle or stopped listening. Do not reconnect.
    Shutdown,
    /// Error or server-initiated close. Should reconnect.
    Error(anyhow::Error),
}

/// Sender side for outgoing emits.
///
/// Emits queued while the socket is reconnecting are sent once it is back.
#[derive(Clone)]
pub struct RealtimeHandle {
    outbox: mpsc::UnboundedSender<Emit>,
}

impl RealtimeHandle {
    pub fn emit(&self, emit: Emit) -> Result<()> {
        self.outbox
            .send(emit)
            .map_err(|_| anyhow::anyhow!("Real-time connection is shut down"))
    }

    /// Handle with no connection behind it; emits land in the receiver.
    #[cfg(test)]
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<Emit>) {
        let (outbox, rx) = mpsc::unbounded_channel();
        (Self { outbox }, rx)
    }
}

/// Start the connection task.
///
/// Events are delivered on `events`. The task ends when every handle is
/// dropped or the event receiver is closed.
pub fn spawn(
    url: Url,
    events: mpsc::UnboundedSender<RealtimeEvent>,
) -> (RealtimeHandle, tokio::task::JoinHandle<()>) {
    let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        if let Err(e) = connect_and_run(url, events, outbox_rx).await {
            tracing::error!("Real-time connection stopped: {:#}", e);
        }
    });
    (RealtimeHandle { outbox: outbox_tx }, task)
}

/// Run the connection with automatic reconnection.
///
/// On transient errors or server-initiated disconnects, reconnects with
/// exponential backoff (1s, 2s, 4s, ... capped at 64s). A session that
/// stayed up for a minute resets the backoff.
async fn connect_and_run(
    url: Url,
    events: mpsc::UnboundedSender<RealtimeEvent>,
    mut outbox: mpsc::UnboundedReceiver<Emit>,
) -> Result<()> {
    let mut backoff = 1u64;

    loop {
        let delay = match connect_and_run_inner(&url, &events, &mut outbox).await {
            Ok(DisconnectReason::Shutdown) => return Ok(()),
            Ok(DisconnectReason::Error(e)) => {
                backoff = 1;
                tracing::warn!(
                    "Real-time disconnected after stable session: {:#}. Reconnecting in 1s...",
                    e
                );
                1
            }
            Err(e) => {
                tracing::warn!(
                    "Real-time disconnected: {:#}. Reconnecting in {}s...",
                    e,
                    backoff
                );
                let delay = backoff;
                backoff = (backoff * 2).min(64);
                delay
            }
        };

        tokio::select! {
            _ = time::sleep(Duration::from_secs(delay)) => {}
            _ = events.closed() => return Ok(()),
        }
    }
}

/// Wait for the Engine.IO open packet and join both namespaces.
async fn handshake(ws: &mut RealtimeSocket) -> Result<frame::OpenInfo> {
    let open = match ws
        .recv_packet()
        .await?
        .context("Connection closed before handshake")?
    {
        Packet::Open(info) => info,
        other => anyhow::bail!("Expected open packet, got {:?}", other),
    };
    tracing::info!("Engine.IO session {} open", open.sid);

    for namespace in [DEFAULT_NAMESPACE, DIRECT_NAMESPACE] {
        ws.send_text(&frame::encode_connect(namespace)).await?;
    }
    Ok(open)
}

/// Run one connection: handshake, then pump events and emits.
///
/// Returns `DisconnectReason::Shutdown` when the session went away, or
/// `DisconnectReason::Error` when the connection should be retried after a
/// stable session. Errors before the stability threshold come back as `Err`.
async fn connect_and_run_inner(
    url: &Url,
    events: &mpsc::UnboundedSender<RealtimeEvent>,
    outbox: &mut mpsc::UnboundedReceiver<Emit>,
) -> Result<DisconnectReason> {
    let mut ws = RealtimeSocket::connect(url).await?;
    let open = handshake(&mut ws).await?;

    let connected_at = Instant::now();
    let stability_threshold = Duration::from_secs(60);

    // The server pings every `ping_interval`; silence past interval + timeout
    // means the connection is dead.
    let liveness = Duration::from_millis(open.ping_interval + open.ping_timeout);
    let mut deadline = Box::pin(time::sleep(liveness));

    let disconnect_reason = loop {
        tokio::select! {
            packet = ws.recv_packet() => {
                deadline.as_mut().reset(time::Instant::now() + liveness);
                match packet {
                    Ok(Some(packet)) => {
                        if let Err(e) = handle_packet(packet, events) {
                            break DisconnectReason::Error(e);
                        }
                    }
                    Ok(None) => {
                        break DisconnectReason::Error(anyhow::anyhow!("WebSocket closed by server"));
                    }
                    Err(e) => {
                        break DisconnectReason::Error(e.context("WebSocket recv error"));
                    }
                }
            }
            emit = outbox.recv() => {
                let Some(emit) = emit else {
                    break DisconnectReason::Shutdown;
                };
                let text = frame::encode_event(emit.namespace, emit.name, &emit.data);
                if let Err(e) = ws.send_text(&text).await {
                    break DisconnectReason::Error(e.context("Emit send failed"));
                }
            }
            _ = &mut deadline => {
                break DisconnectReason::Error(anyhow::anyhow!("No ping from server within {:?}", liveness));
            }
            _ = events.closed() => {
                break DisconnectReason::Shutdown;
            }
        }
    };

    if matches!(disconnect_reason, DisconnectReason::Shutdown) {
        if let Err(e) = ws.close().await {
            tracing::debug!("Close failed: {:#}", e);
        }
    }

    if connected_at.elapsed() >= stability_threshold {
        return Ok(disconnect_reason);
    }

    match disconnect_reason {
        DisconnectReason::Shutdown => Ok(DisconnectReason::Shutdown),
        DisconnectReason::Error(e) => Err(e),
    }
}

/// Forward one packet. Errors mean the connection must be restarted.
fn handle_packet(packet: Packet, events: &mpsc::UnboundedSender<RealtimeEvent>) -> Result<()> {
    match packet {
        Packet::Event { namespace, name, data } => match parse_event(&name, data) {
            Ok(Some(event)) => {
                tracing::debug!("{} event on {}", name, namespace);
                // A closed receiver is noticed by the select loop.
                let _ = events.send(event);
            }
            Ok(None) => tracing::debug!("Ignoring {} event on {}", name, namespace),
            Err(e) => tracing::warn!("Dropping {} event: {:#}", name, e),
        },
        Packet::Connect { namespace } => tracing::info!("Joined namespace {}", namespace),
        Packet::ConnectError { namespace, message } => {
            tracing::warn!("Namespace {} refused: {}", namespace, message);
        }
        Packet::Disconnect { namespace } => {
            anyhow::bail!("Server disconnected namespace {}", namespace);
        }
        Packet::Close => anyhow::bail!("Server closed the Engine.IO session"),
        Packet::Open(_) | Packet::Pong | Packet::Noop | Packet::Ack { .. } | Packet::Ping => {}
    }
    Ok(())
}

/// Connect, send a single emit and disconnect. Used by one-shot commands.
pub async fn emit_once(url: &Url, emit: Emit) -> Result<()> {
    let mut ws = RealtimeSocket::connect(url).await?;
    handshake(&mut ws).await?;

    // Wait until the target namespace is joined before emitting.
    let joined = async {
        loop {
            match ws.recv_packet().await? {
                Some(Packet::Connect { namespace }) if namespace == emit.namespace => {
                    return Ok::<_, anyhow::Error>(())
                }
                Some(Packet::ConnectError { namespace, message }) if namespace == emit.namespace => {
                    anyhow::bail!("Namespace {} refused: {}", namespace, message)
                }
                Some(_) => continue,
                None => anyhow::bail!("Connection closed before namespace join"),
            }
        }
    };
    time::timeout(Duration::from_secs(10), joined)
        .await
        .context("Timed out joining namespace")??;

    ws.send_text(&frame::encode_event(emit.namespace, emit.name, &emit.data))
        .await?;
    tracing::info!("Emitted {}", emit.name);
    ws.close().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConversationId;
    use serde_json::json;

    #[test]
    fn test_handle_packet_forwards_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle_packet(
            Packet::Event {
                namespace: "/".into(),
                name: "message_deleted".into(),
                data: json!({"message_ID": 2, "channelId": 5}),
            },
            &tx,
        )
        .unwrap();
        // Unknown and malformed events are dropped without breaking the connection.
        handle_packet(
            Packet::Event {
                namespace: "/".into(),
                name: "message_deleted".into(),
                data: json!("garbage"),
            },
            &tx,
        )
        .unwrap();

        match rx.try_recv().unwrap() {
            RealtimeEvent::MessageDeleted { scope, .. } => {
                assert!(scope.matches(ConversationId::Channel(5)));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_handle_packet_disconnect_restarts() {
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(handle_packet(Packet::Close, &tx).is_err());
        assert!(handle_packet(
            Packet::Disconnect {
                namespace: "/direct".into()
            },
            &tx
        )
        .is_err());
        assert!(handle_packet(Packet::Pong, &tx).is_ok());
    }

    #[tokio::test]
    async fn test_pings_keep_idle_connection_alive() {
        use futures::{SinkExt, StreamExt};
        use tokio::net::TcpListener;
        use tokio_tungstenite::tungstenite::Message;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Liveness window is 200ms; the only event comes after 600ms.
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let (mut tx, mut rx) = ws.split();
            tokio::spawn(async move { while let Some(Ok(_)) = rx.next().await {} });
            let open = r#"0{"sid":"s","pingInterval":100,"pingTimeout":100}"#;
            tx.send(Message::Text(open.into())).await.unwrap();
            for _ in 0..12 {
                time::sleep(Duration::from_millis(50)).await;
                if tx.send(Message::Text("2".into())).await.is_err() {
                    return;
                }
            }
            let event = r#"42["status_changed",{"user_ID":3,"status":"away"}]"#;
            let _ = tx.send(Message::Text(event.into())).await;
        });

        let url = Url::parse(&format!("ws://{}/socket.io/?EIO=4&transport=websocket", addr)).unwrap();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (_outbox_tx, mut outbox_rx) = mpsc::unbounded_channel();
        let client = tokio::spawn(async move {
            connect_and_run_inner(&url, &events_tx, &mut outbox_rx).await
        });

        let event = time::timeout(Duration::from_secs(5), events_rx.recv())
            .await
            .expect("no event before timeout")
            .expect("connection ended before the event");
        assert!(matches!(event, RealtimeEvent::PresenceChanged { user_id: 3, .. }));

        drop(events_rx);
        let reason = time::timeout(Duration::from_secs(5), client)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(matches!(reason, DisconnectReason::Shutdown));
        server.abort();
    }

    #[test]
    fn test_emit_after_shutdown_fails() {
        let (handle, outbox_rx) = RealtimeHandle::detached();
        assert!(handle
            .emit(Emit::set_status(1, crate::models::PresenceStatus::Online))
            .is_ok());
        drop(outbox_rx);
        assert!(handle
            .emit(Emit::set_status(1, crate::models::PresenceStatus::Online))
            .is_err());
    }
}
