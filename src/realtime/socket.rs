//! Socket.IO WebSocket connection and frame handling

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use super::frame::{self, Packet, PONG};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Build the Engine.IO WebSocket URL for a backend base URL.
///
/// `http(s)` becomes `ws(s)`, the path is `/socket.io/` and the local user id
/// is passed as a query parameter so the server can join the user's rooms.
pub fn socket_url(base: &Url, user_id: Option<u64>) -> Result<Url> {
    let mut url = base.clone();
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => anyhow::bail!("Unsupported real-time URL scheme: {}", other),
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow::anyhow!("Cannot set scheme {} on {}", scheme, base))?;
    url.set_path("/socket.io/");
    url.set_query(None);
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("EIO", "4").append_pair("transport", "websocket");
        if let Some(id) = user_id {
            query.append_pair("user_ID", &id.to_string());
        }
    }
    Ok(url)
}

pub struct RealtimeSocket {
    stream: WsStream,
}

impl RealtimeSocket {
    pub async fn connect(url: &Url) -> Result<Self> {
        tracing::info!("Connecting WebSocket to {}", url);

        let (stream, response) = connect_async(url.as_str())
            .await
            .context("WebSocket connection failed")?;

        tracing::info!("WebSocket connected (status={})", response.status());

        Ok(Self { stream })
    }

    /// Send a text frame.
    pub async fn send_text(&mut self, msg: &str) -> Result<()> {
        tracing::debug!("WS send: {}", msg);
        self.stream
            .send(Message::Text(msg.to_string()))
            .await
            .context("Failed to send WebSocket message")
    }

    /// Receive the next Socket.IO packet.
    ///
    /// Engine.IO pings are answered here, then returned so the caller can
    /// track liveness. Frames that do not parse are logged and skipped.
    /// Returns `None` when the server closes the connection.
    pub async fn recv_packet(&mut self) -> Result<Option<Packet>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    tracing::debug!("WS recv: {}", text);
                    match frame::decode(&text) {
                        Ok(Packet::Ping) => {
                            self.send_text(PONG).await?;
                            return Ok(Some(Packet::Ping));
                        }
                        Ok(packet) => return Ok(Some(packet)),
                        Err(e) => tracing::warn!("Skipping malformed frame {:?}: {:#}", text, e),
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!("WebSocket closed by server: {:?}", frame);
                    return Ok(None);
                }
                Some(Ok(_)) => {
                    // Binary, ping and pong frames; tungstenite answers pings.
                    continue;
                }
                Some(Err(e)) => {
                    return Err(anyhow::anyhow!(e).context("WebSocket error"));
                }
                None => return Ok(None),
            }
        }
    }

    pub async fn close(&mut self) -> Result<()> {
        self.stream
            .close(None)
            .await
            .context("Failed to close WebSocket")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_url() {
        let base = Url::parse("https://grouptech.example.com/api").unwrap();
        let url = socket_url(&base, Some(7)).unwrap();
        assert_eq!(
            url.as_str(),
            "wss://grouptech.example.com/socket.io/?EIO=4&transport=websocket&user_ID=7"
        );

        let local = Url::parse("http://localhost:5000").unwrap();
        assert_eq!(
            socket_url(&local, None).unwrap().as_str(),
            "ws://localhost:5000/socket.io/?EIO=4&transport=websocket"
        );
    }
}
