//! In-memory transport
//!
//! Connects a [`MemoryConnector`] to a [`MemoryServer`] inside the same
//! process. The server side decides when (and whether) each pending connect is
//! acknowledged, pushes inbound frames, drops links, and observes what the
//! client emitted and how often it closed. Used as the deterministic test
//! double for the connection manager, and for demos without a backend.

use crate::transport::traits::{LinkEvent, TransportConnector, TransportLink};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use seller_socket_shared::{EventFrame, InboundEvent};
use tokio::sync::{mpsc, oneshot, watch};
use url::Url;

/// Create a connected connector/server pair
pub fn channel() -> (MemoryConnector, MemoryServer) {
    let (pending_tx, pending_rx) = mpsc::unbounded_channel();
    (
        MemoryConnector { pending_tx },
        MemoryServer { pending_rx },
    )
}

/// Client half: hands connect attempts to the paired server
#[derive(Clone)]
pub struct MemoryConnector {
    pending_tx: mpsc::UnboundedSender<PendingConnection>,
}

#[async_trait]
impl TransportConnector for MemoryConnector {
    type Link = MemoryLink;

    async fn connect(&self, endpoint: &Url, token: &str) -> Result<Self::Link> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let pending = PendingConnection {
            endpoint: endpoint.clone(),
            token: token.to_string(),
            reply: reply_tx,
        };

        self.pending_tx
            .send(pending)
            .map_err(|_| anyhow!("Memory server is gone"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("Connection attempt abandoned by server"))?
            .map_err(|reason| anyhow!("Connection refused: {}", reason))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Server half: receives connect attempts in the order they were made
pub struct MemoryServer {
    pending_rx: mpsc::UnboundedReceiver<PendingConnection>,
}

impl MemoryServer {
    /// Wait for the next connect attempt
    pub async fn accept(&mut self) -> Option<PendingConnection> {
        self.pending_rx.recv().await
    }

    /// Take a connect attempt if one is already waiting
    pub fn try_accept(&mut self) -> Option<PendingConnection> {
        self.pending_rx.try_recv().ok()
    }
}

/// A connect attempt waiting for the server's answer
pub struct PendingConnection {
    endpoint: Url,
    token: String,
    reply: oneshot::Sender<std::result::Result<MemoryLink, String>>,
}

impl PendingConnection {
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Credential the client attached to the handshake
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Acknowledge the connection.
    ///
    /// If the client already gave up on this attempt the returned session is
    /// detached: pushes go nowhere and it reports closed.
    pub fn acknowledge(self) -> MemorySession {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (closes_tx, closes_rx) = watch::channel(0usize);

        let link = MemoryLink {
            inbound_rx,
            outbound_tx,
            closes: closes_tx,
        };
        // A dropped reply means the client stopped waiting
        let _ = self.reply.send(Ok(link));

        MemorySession {
            inbound_tx,
            outbound_rx,
            closes: closes_rx,
        }
    }

    /// Refuse the connection, as a server rejecting the credential would
    pub fn refuse(self, reason: impl Into<String>) {
        let _ = self.reply.send(Err(reason.into()));
    }
}

/// Server-side view of one acknowledged link
pub struct MemorySession {
    inbound_tx: mpsc::UnboundedSender<LinkEvent>,
    outbound_rx: mpsc::UnboundedReceiver<EventFrame>,
    closes: watch::Receiver<usize>,
}

impl MemorySession {
    /// Push a raw frame to the client. Returns false once the link is gone.
    pub fn push_frame(&self, frame: EventFrame) -> bool {
        self.inbound_tx.send(LinkEvent::Frame(frame)).is_ok()
    }

    /// Push a typed event to the client
    pub fn push(&self, event: &InboundEvent) -> Result<bool> {
        Ok(self.push_frame(event.to_frame()?))
    }

    /// Drop the link from the server side
    pub fn drop_link(&self, reason: impl Into<String>) {
        let _ = self.inbound_tx.send(LinkEvent::Closed {
            reason: reason.into(),
        });
    }

    /// Next frame the client emitted; `None` once the client link is gone
    pub async fn next_outbound(&mut self) -> Option<EventFrame> {
        self.outbound_rx.recv().await
    }

    /// Frame the client emitted, if one is already waiting
    pub fn try_next_outbound(&mut self) -> Option<EventFrame> {
        self.outbound_rx.try_recv().ok()
    }

    /// How many times the client closed this link
    pub fn close_count(&self) -> usize {
        *self.closes.borrow()
    }

    /// Wait until the client has closed the link or dropped it
    pub async fn closed(&mut self) {
        let _ = self.closes.wait_for(|count| *count > 0).await;
    }
}

/// Client-side link produced by [`MemoryConnector`]
pub struct MemoryLink {
    inbound_rx: mpsc::UnboundedReceiver<LinkEvent>,
    outbound_tx: mpsc::UnboundedSender<EventFrame>,
    closes: watch::Sender<usize>,
}

#[async_trait]
impl TransportLink for MemoryLink {
    async fn send(&mut self, frame: EventFrame) -> Result<()> {
        self.outbound_tx
            .send(frame)
            .map_err(|_| anyhow!("Memory session dropped"))
    }

    async fn next_event(&mut self) -> LinkEvent {
        self.inbound_rx.recv().await.unwrap_or_else(|| LinkEvent::Closed {
            reason: "Memory session dropped".into(),
        })
    }

    async fn close(&mut self) -> Result<()> {
        self.closes.send_modify(|count| *count += 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn endpoint() -> Url {
        Url::parse("http://localhost:3000").unwrap()
    }

    #[tokio::test]
    async fn test_acknowledged_link_carries_frames_both_ways() {
        let (connector, mut server) = channel();
        let client = tokio::spawn(async move { connector.connect(&endpoint(), "abc").await });

        let pending = server.accept().await.expect("no connect attempt");
        assert_eq!(pending.token(), "abc");
        assert_eq!(pending.endpoint().as_str(), "http://localhost:3000/");
        let mut session = pending.acknowledge();

        let mut link = client.await.unwrap().expect("connect failed");

        let frame = EventFrame::new("receiveMessage", json!({ "message": "hi" }));
        assert!(session.push_frame(frame.clone()));
        assert_eq!(link.next_event().await, LinkEvent::Frame(frame));

        link.send(EventFrame::new("sendMessage", json!({}))).await.unwrap();
        assert_eq!(session.next_outbound().await.unwrap().name, "sendMessage");

        link.close().await.unwrap();
        session.closed().await;
        assert_eq!(session.close_count(), 1);
    }

    #[tokio::test]
    async fn test_refused_connect() {
        let (connector, mut server) = channel();
        let client = tokio::spawn(async move { connector.connect(&endpoint(), "bad").await });

        server.accept().await.unwrap().refuse("Not authorized");

        let err = client.await.unwrap().err().expect("connect should fail");
        assert!(err.to_string().contains("Not authorized"));
    }

    #[tokio::test]
    async fn test_server_drop_closes_link() {
        let (connector, mut server) = channel();
        let client = tokio::spawn(async move { connector.connect(&endpoint(), "abc").await });
        let session = server.accept().await.unwrap().acknowledge();
        let mut link = client.await.unwrap().unwrap();

        session.drop_link("server restart");
        assert_eq!(
            link.next_event().await,
            LinkEvent::Closed {
                reason: "server restart".into()
            }
        );

        drop(session);
        assert!(matches!(link.next_event().await, LinkEvent::Closed { .. }));
    }

    #[tokio::test]
    async fn test_connect_without_server() {
        let (connector, server) = channel();
        drop(server);
        assert!(connector.connect(&endpoint(), "abc").await.is_err());
    }
}
