//! Seams to the external connection layer.
//!
//! The socket machinery itself lives outside this crate. A server host
//! implements [`ServerTransport`] (many peers, addressed by API key); a
//! client host implements [`ClientTransport`] (one peer). [`Link`] is the
//! single capability a [`Channel`](crate::Channel) needs, and the adapters in
//! [`crate::role`] provide it for either side.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tether_core::{EventRecord, TransportError};

/// Reserved notification a transport emits when the peer (re)connects.
pub const CONNECT_EVENT: &str = "connect";

/// Callback for inbound events. Receives the event payload.
pub type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Whether the peer can currently receive forwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// A live session exists.
    Connected,
    /// No session; sends go to the queue file.
    Disconnected,
}

impl ConnectionState {
    /// Map a plain boolean.
    pub fn from_connected(connected: bool) -> Self {
        if connected { Self::Connected } else { Self::Disconnected }
    }

    /// Whether this is [`ConnectionState::Connected`].
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

/// Which side of the connection an endpoint sits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Server side, one endpoint per connected API key.
    Server,
    /// Client side.
    Client,
}

impl Role {
    /// Label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Client => "client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-side transport: addresses peers by API key.
#[async_trait]
pub trait ServerTransport: Send + Sync {
    /// Connection state of the peer identified by `api_key`.
    fn state(&self, api_key: &str) -> ConnectionState;

    /// Deliver `record` to the peer identified by `api_key`.
    async fn send_to(&self, api_key: &str, record: &EventRecord) -> Result<(), TransportError>;

    /// Subscribe to `event` from the peer identified by `api_key`.
    fn listen_to(&self, api_key: &str, event: &str, handler: EventHandler);
}

/// Client-side transport: a single peer.
#[async_trait]
pub trait ClientTransport: Send + Sync {
    /// Whether the server session is up.
    fn is_connected(&self) -> bool;

    /// Deliver `record` to the server.
    async fn send(&self, record: &EventRecord) -> Result<(), TransportError>;

    /// Subscribe to `event` from the server.
    fn listen(&self, event: &str, handler: EventHandler);
}

/// One endpoint's view of its peer.
#[async_trait]
pub trait Link: Send + Sync {
    /// Side this link serves.
    fn role(&self) -> Role;

    /// Current state of the peer.
    fn state(&self) -> ConnectionState;

    /// Forward a record to the peer.
    async fn forward(&self, record: &EventRecord) -> Result<(), TransportError>;

    /// Subscribe to inbound `event`.
    fn listen(&self, event: &str, handler: EventHandler);
}
