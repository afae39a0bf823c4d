//! Transport trait abstraction for pluggable real-time backends

use anyhow::Result;
use async_trait::async_trait;
use seller_socket_shared::EventFrame;
use url::Url;

/// Notification surfaced by a live link
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// An application event arrived
    Frame(EventFrame),
    /// The link is gone (server close, network loss, heartbeat timeout)
    Closed { reason: String },
}

/// One established, acknowledged duplex connection
#[async_trait]
pub trait TransportLink: Send + 'static {
    /// Emit an application event
    async fn send(&mut self, frame: EventFrame) -> Result<()>;

    /// Wait for the next inbound notification.
    ///
    /// Must be cancel safe: the connection driver polls it inside `select!`.
    async fn next_event(&mut self) -> LinkEvent;

    /// Close the link gracefully
    async fn close(&mut self) -> Result<()>;
}

/// Factory for creating links
#[async_trait]
pub trait TransportConnector: Send + Sync + 'static {
    /// The link type this connector produces
    type Link: TransportLink;

    /// Open a link to `endpoint`, passing `token` as handshake auth data.
    ///
    /// Resolves only once the server has acknowledged the connection.
    async fn connect(&self, endpoint: &Url, token: &str) -> Result<Self::Link>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
