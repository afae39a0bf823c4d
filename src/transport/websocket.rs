//! Socket.IO over WebSocket transport
//!
//! Speaks Engine.IO v4 directly over a WebSocket (no polling, no upgrade).
//! The credential travels as auth data in the Socket.IO CONNECT packet.

use crate::transport::traits::{LinkEvent, TransportConnector, TransportLink};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use seller_socket_shared::codec::{self, EnginePacket, SocketPacket};
use seller_socket_shared::EventFrame;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Path the Socket.IO server is mounted on
pub const SOCKET_IO_PATH: &str = "/socket.io/";

/// Engine.IO protocol revision
pub const ENGINE_IO_VERSION: &str = "4";

/// Build the WebSocket URL for a dashboard endpoint
///
/// `http://host:3000` becomes `ws://host:3000/socket.io/?EIO=4&transport=websocket`.
pub fn engine_url(endpoint: &Url) -> Result<Url> {
    let mut url = endpoint.clone();

    let scheme = match endpoint.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => bail!("Unsupported endpoint scheme: {}", other),
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow!("Cannot use scheme {} for {}", scheme, endpoint))?;

    if !matches!(endpoint.path(), "" | "/") {
        debug!(path = endpoint.path(), "Ignoring endpoint path, only the default namespace is used");
    }
    url.set_path(SOCKET_IO_PATH);
    url.query_pairs_mut()
        .append_pair("EIO", ENGINE_IO_VERSION)
        .append_pair("transport", "websocket");

    Ok(url)
}

/// Connector for Socket.IO servers
#[derive(Debug, Clone, Default)]
pub struct SocketIoConnector;

impl SocketIoConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportConnector for SocketIoConnector {
    type Link = SocketIoLink;

    async fn connect(&self, endpoint: &Url, token: &str) -> Result<Self::Link> {
        let url = engine_url(endpoint)?;
        debug!(%url, "Opening WebSocket");

        let (ws, _) = connect_async(url.as_str()).await?;
        let (mut sink, mut stream) = ws.split();

        let handshake = match next_packet(&mut stream).await? {
            EnginePacket::Open(handshake) => handshake,
            other => bail!("Expected open packet, got {:?}", other),
        };
        debug!(sid = %handshake.sid, ping_interval = handshake.ping_interval, "Engine.IO session opened");

        send_packet(
            &mut sink,
            &EnginePacket::Message(SocketPacket::connect_with_token(token)),
        )
        .await?;

        loop {
            match next_packet(&mut stream).await? {
                EnginePacket::Message(SocketPacket::Connect(_)) => break,
                EnginePacket::Message(SocketPacket::ConnectError(data)) => {
                    let reason = data
                        .get("message")
                        .and_then(|m| m.as_str())
                        .map(str::to_string)
                        .unwrap_or_else(|| data.to_string());
                    bail!("Connection refused: {}", reason);
                }
                EnginePacket::Ping => send_packet(&mut sink, &EnginePacket::Pong).await?,
                EnginePacket::Close => bail!("Server closed the session during handshake"),
                other => debug!(?other, "Ignoring packet during handshake"),
            }
        }

        Ok(SocketIoLink {
            sink,
            stream,
            idle_timeout: Duration::from_millis(handshake.ping_interval + handshake.ping_timeout),
            pong_due: false,
        })
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// Acknowledged Socket.IO session on the default namespace
pub struct SocketIoLink {
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
    /// Silence longer than this means the server is gone
    idle_timeout: Duration,
    /// A ping was read but the pong is not yet in the sink
    pong_due: bool,
}

impl SocketIoLink {
    /// Queue the owed pong, if any. Survives being cancelled at any await.
    async fn answer_ping(&mut self) -> Result<()> {
        if !self.pong_due {
            return Ok(());
        }
        let text = codec::encode(&EnginePacket::Pong)?;
        self.sink.feed(Message::Text(text.into())).await?;
        self.pong_due = false;
        self.sink.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl TransportLink for SocketIoLink {
    async fn send(&mut self, frame: EventFrame) -> Result<()> {
        self.answer_ping().await?;
        send_packet(&mut self.sink, &EnginePacket::Message(SocketPacket::Event(frame))).await
    }

    async fn next_event(&mut self) -> LinkEvent {
        loop {
            if let Err(e) = self.answer_ping().await {
                return closed(format!("Failed to answer ping: {}", e));
            }

            let message = match timeout(self.idle_timeout, self.stream.next()).await {
                Err(_) => return closed("Ping timeout"),
                Ok(None) => return closed("Connection closed"),
                Ok(Some(Err(e))) => return closed(format!("WebSocket error: {}", e)),
                Ok(Some(Ok(message))) => message,
            };

            let text = match message {
                Message::Text(text) => text,
                Message::Close(frame) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "Server closed the WebSocket".into());
                    return closed(reason);
                }
                _ => continue,
            };

            match codec::decode(text.as_str()) {
                Ok(EnginePacket::Message(SocketPacket::Event(frame))) => return LinkEvent::Frame(frame),
                Ok(EnginePacket::Ping) => self.pong_due = true,
                Ok(EnginePacket::Message(SocketPacket::Disconnect)) => {
                    return closed("Server disconnected the socket")
                }
                Ok(EnginePacket::Close) => return closed("Server closed the session"),
                Ok(other) => debug!(?other, "Ignoring packet"),
                Err(e) => warn!("Undecodable packet: {}", e),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        // Best effort: the server may already be gone
        if let Err(e) = send_packet(&mut self.sink, &EnginePacket::Message(SocketPacket::Disconnect)).await {
            debug!("Failed to send disconnect packet: {}", e);
        }
        self.sink.send(Message::Close(None)).await?;
        self.sink.close().await?;
        Ok(())
    }
}

fn closed(reason: impl Into<String>) -> LinkEvent {
    LinkEvent::Closed {
        reason: reason.into(),
    }
}

async fn send_packet(sink: &mut SplitSink<WsStream, Message>, packet: &EnginePacket) -> Result<()> {
    let text = codec::encode(packet)?;
    sink.send(Message::Text(text.into())).await?;
    Ok(())
}

/// Read until the next Engine.IO packet, skipping WebSocket control frames
async fn next_packet(stream: &mut SplitStream<WsStream>) -> Result<EnginePacket> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return Ok(codec::decode(text.as_str())?),
            Some(Ok(Message::Close(_))) | None => bail!("Connection closed during handshake"),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_url() {
        let url = engine_url(&Url::parse("http://localhost:3000").unwrap()).unwrap();
        assert_eq!(url.as_str(), "ws://localhost:3000/socket.io/?EIO=4&transport=websocket");

        let url = engine_url(&Url::parse("https://api.bstock.example/").unwrap()).unwrap();
        assert_eq!(url.as_str(), "wss://api.bstock.example/socket.io/?EIO=4&transport=websocket");
    }

    #[test]
    fn test_engine_url_keeps_query() {
        let url = engine_url(&Url::parse("http://localhost:3000/?tenant=7").unwrap()).unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:3000/socket.io/?tenant=7&EIO=4&transport=websocket"
        );
    }

    #[test]
    fn test_engine_url_rejects_other_schemes() {
        assert!(engine_url(&Url::parse("ftp://localhost").unwrap()).is_err());
    }

    #[test]
    fn test_connector_name() {
        assert_eq!(SocketIoConnector::new().name(), "websocket");
    }
}
